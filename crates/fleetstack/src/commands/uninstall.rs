use colored::Colorize;
use fleetstack_cloud::{ProvisioningDriver, ServiceNetwork, ServiceScope};
use fleetstack_openstack::OpenStackDriver;

pub async fn handle(
    driver: &OpenStackDriver,
    service: &str,
    last: bool,
    network_template: Option<String>,
) -> anyhow::Result<()> {
    let scope = ServiceScope::parse(service)?;
    let network = network_template.map(|template| ServiceNetwork {
        template: Some(template),
        ..Default::default()
    });

    println!("{}", format!("Cleaning up after {}...", scope).yellow());
    driver
        .on_service_uninstalled(&scope, network.as_ref(), last)
        .await?;

    println!();
    println!("{}", format!("✓ Resources of {} removed", scope).green().bold());
    if last {
        println!("  {}", format!("including application '{}'", scope.application).dimmed());
    }
    Ok(())
}
