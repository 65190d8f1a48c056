use colored::Colorize;
use fleetstack_cloud::ProvisioningDriver;
use fleetstack_openstack::OpenStackDriver;
use std::time::Duration;

pub async fn handle(driver: &OpenStackDriver, timeout: Duration) -> anyhow::Result<()> {
    println!("{}", "Stopping the management cluster...".yellow());

    driver.stop_management_machines(timeout).await?;

    println!();
    println!("{}", "✓ Management cluster stopped".green().bold());
    Ok(())
}
