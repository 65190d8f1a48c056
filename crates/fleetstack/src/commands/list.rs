use crate::utils;
use colored::Colorize;
use fleetstack_cloud::ProvisioningDriver;
use fleetstack_openstack::OpenStackDriver;

pub async fn handle(driver: &OpenStackDriver) -> anyhow::Result<()> {
    println!("{}", "Listing management machines...".blue());

    let machines = driver.get_existing_management_servers().await?;

    println!();
    if machines.is_empty() {
        println!("{}", "No management machine is running".dimmed());
    } else {
        utils::print_machines(&machines);
    }
    Ok(())
}
