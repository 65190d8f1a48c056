use crate::utils;
use colored::Colorize;
use fleetstack_cloud::ProvisioningDriver;
use fleetstack_openstack::OpenStackDriver;
use std::time::Duration;

pub async fn handle(driver: &OpenStackDriver, count: Option<u32>, timeout: Duration) -> anyhow::Result<()> {
    let count = count.unwrap_or(driver.config().provider.number_of_management_machines);
    if count == 0 {
        anyhow::bail!("the management cluster needs at least one machine");
    }

    println!(
        "{}",
        format!("Starting {} management machine(s) on '{}'...", count, driver.config().name).blue()
    );

    let machines = driver.start_management_machines(count, timeout).await?;

    println!();
    println!(
        "{}",
        format!("✓ Management cluster is up ({} machines)", machines.len())
            .green()
            .bold()
    );
    println!();
    utils::print_machines(&machines);
    Ok(())
}
