use crate::utils;
use colored::Colorize;
use fleetstack_cloud::{MachineRequest, ProvisioningDriver, ServiceNetwork, ServiceScope};
use fleetstack_openstack::OpenStackDriver;
use std::time::Duration;

pub struct StartOptions {
    pub service: String,
    pub template: Option<String>,
    pub network_template: Option<String>,
    pub location: Option<String>,
}

pub async fn handle(driver: &OpenStackDriver, options: StartOptions, timeout: Duration) -> anyhow::Result<()> {
    let scope = ServiceScope::parse(&options.service)?;
    let config = driver.config();
    let template_name = options
        .template
        .as_deref()
        .unwrap_or(config.management_template.as_str());
    let template = config.template(template_name)?.clone();

    println!(
        "{}",
        format!("Starting a machine for {} (template {})...", scope, template_name).blue()
    );

    let mut request = MachineRequest::service(template, scope);
    if let Some(network_template) = options.network_template {
        request = request.with_network(ServiceNetwork {
            template: Some(network_template),
            ..Default::default()
        });
    }
    if let Some(location) = options.location {
        request = request.with_location(location);
    }

    let machine = driver.start_machine(&request, timeout).await?;

    println!();
    println!("{}", format!("✓ {} is ready", machine.name).green().bold());
    println!();
    utils::print_machines(std::slice::from_ref(&machine));
    Ok(())
}
