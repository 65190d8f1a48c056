use colored::Colorize;
use fleetstack_cloud::ProvisioningDriver;
use fleetstack_openstack::OpenStackDriver;
use std::time::Duration;

pub async fn handle(driver: &OpenStackDriver, timeout: Duration) -> anyhow::Result<()> {
    println!("{}", "Terminating all FleetStack resources...".red());

    driver.terminate_all_resources(timeout).await?;

    println!();
    println!("{}", "✓ All resources terminated".green().bold());
    Ok(())
}
