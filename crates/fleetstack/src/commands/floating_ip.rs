use clap::Subcommand;
use colored::Colorize;
use fleetstack_openstack::OpenStackDriver;

#[derive(Subcommand)]
pub enum FloatingIpCommand {
    /// Reserve an address from an external network
    Allocate {
        /// Name of the external network
        pool: String,
    },
    /// Bind an address to the machine holding a private IP
    Assign {
        address: String,
        /// Private IP of the machine
        instance_ip: String,
    },
    /// Unbind an address from its machine
    Unassign { address: String },
    /// Give an address back to its pool
    Release { address: String },
}

pub async fn handle(driver: &OpenStackDriver, command: FloatingIpCommand) -> anyhow::Result<()> {
    let floating_ips = driver.floating_ips();
    match command {
        FloatingIpCommand::Allocate { pool } => {
            let address = floating_ips.allocate(&pool).await?;
            println!("{}", format!("✓ Allocated {} from {}", address, pool).green().bold());
        }
        FloatingIpCommand::Assign {
            address,
            instance_ip,
        } => {
            floating_ips.assign(&instance_ip, &address).await?;
            println!("{}", format!("✓ {} assigned to {}", address, instance_ip).green().bold());
        }
        FloatingIpCommand::Unassign { address } => {
            floating_ips.unassign(&address).await?;
            println!("{}", format!("✓ {} unassigned", address).green().bold());
        }
        FloatingIpCommand::Release { address } => {
            floating_ips.release(&address).await?;
            println!("{}", format!("✓ {} released", address).green().bold());
        }
    }
    Ok(())
}
