use colored::Colorize;
use fleetstack_cloud::{ProvisioningDriver, ServiceScope};
use fleetstack_openstack::OpenStackDriver;
use std::time::Duration;

pub async fn handle(
    driver: &OpenStackDriver,
    ip: &str,
    service: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let scope = service.map(ServiceScope::parse).transpose()?;
    println!("{}", format!("Stopping the machine with address {}...", ip).yellow());

    let stopped = driver.stop_machine(ip, scope.as_ref(), timeout).await?;

    println!();
    if stopped {
        println!("{}", format!("✓ Machine {} stopped", ip).green().bold());
    } else {
        println!("{}", format!("ℹ No machine found with address {}", ip).dimmed());
    }
    Ok(())
}
