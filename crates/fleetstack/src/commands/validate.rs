use colored::Colorize;
use fleetstack_openstack::OpenStackDriver;

pub async fn handle(driver: &OpenStackDriver) -> anyhow::Result<()> {
    println!(
        "{}",
        format!("Validating cloud '{}'...", driver.config().name).blue()
    );

    driver.validate_cloud().await?;

    println!();
    println!("{}", "✓ Configuration matches the cloud".green().bold());
    Ok(())
}
