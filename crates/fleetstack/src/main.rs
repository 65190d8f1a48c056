mod commands;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use fleetstack_openstack::OpenStackDriver;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetstack")]
#[command(about = "Provision FleetStack management clusters and service machines on OpenStack", long_about = None)]
struct Cli {
    /// Cloud configuration file (default: searched, see FLEETSTACK_CONFIG_PATH)
    #[arg(short, long, global = true, env = "FLEETSTACK_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the management cluster
    Bootstrap {
        /// Number of management machines (default: provider.number_of_management_machines)
        #[arg(short = 'n', long)]
        count: Option<u32>,
        /// Timeout in seconds
        #[arg(short, long, default_value = "1800")]
        timeout: u64,
    },
    /// Stop the management cluster and remove its security groups and networks
    Teardown {
        #[arg(short, long, default_value = "600")]
        timeout: u64,
    },
    /// List running management machines
    List,
    /// Check credentials, images, flavors and quotas without creating anything
    Validate,
    /// Manage floating IPs apart from machine starts
    #[command(name = "floating-ip", subcommand)]
    FloatingIp(commands::floating_ip::FloatingIpCommand),
    /// Start one machine for a service
    Start {
        /// Fully qualified service name (application.service)
        #[arg(short, long)]
        service: String,
        /// Compute template (default: the management template)
        #[arg(long)]
        template: Option<String>,
        /// Network template the service is attached to
        #[arg(long)]
        network_template: Option<String>,
        /// Availability zone
        #[arg(long)]
        location: Option<String>,
        #[arg(short, long, default_value = "1800")]
        timeout: u64,
    },
    /// Stop the machine owning an IP address
    Stop {
        /// Private or public address of the machine
        ip: String,
        /// Only stop it if it belongs to this service (application.service)
        #[arg(short, long)]
        service: Option<String>,
        #[arg(short, long, default_value = "600")]
        timeout: u64,
    },
    /// Remove the security groups of an uninstalled service
    #[command(name = "uninstall-service")]
    UninstallService {
        /// Fully qualified service name (application.service)
        service: String,
        /// The application has no services left: remove its group and network too
        #[arg(long)]
        last: bool,
        /// Network template the service was started with
        #[arg(long)]
        network_template: Option<String>,
    },
    /// Remove every machine, security group and network created by FleetStack
    Terminate {
        /// Skip the confirmation
        #[arg(short, long)]
        yes: bool,
        #[arg(short, long, default_value = "1800")]
        timeout: u64,
    },
    /// Show version information
    Version,
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if matches!(cli.command, Commands::Version) {
        println!("fleetstack {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Refuse before touching the cloud
    if let Commands::Terminate { yes: false, .. } = cli.command {
        eprintln!(
            "{} terminate removes every machine, security group and network with the FleetStack prefixes.",
            "Warning:".yellow().bold()
        );
        anyhow::bail!("pass --yes to confirm");
    }

    let (config_path, config) = match &cli.config {
        Some(path) => (path.clone(), fleetstack_config::load_config(path)?),
        None => fleetstack_config::load()?,
    };
    println!("{} {}", "Configuration:".dimmed(), config_path.display().to_string().cyan());
    tracing::debug!(
        "Cloud '{}' with {} compute template(s), management template {}",
        config.name,
        config.templates.len(),
        config.management_template
    );

    let driver = OpenStackDriver::connect(config)?;

    match cli.command {
        Commands::Bootstrap { count, timeout } => {
            commands::bootstrap::handle(&driver, count, utils::seconds(timeout)).await?;
        }
        Commands::Teardown { timeout } => {
            commands::teardown::handle(&driver, utils::seconds(timeout)).await?;
        }
        Commands::List => {
            commands::list::handle(&driver).await?;
        }
        Commands::Validate => {
            commands::validate::handle(&driver).await?;
        }
        Commands::FloatingIp(command) => {
            commands::floating_ip::handle(&driver, command).await?;
        }
        Commands::Start {
            service,
            template,
            network_template,
            location,
            timeout,
        } => {
            let options = commands::start::StartOptions {
                service,
                template,
                network_template,
                location,
            };
            commands::start::handle(&driver, options, utils::seconds(timeout)).await?;
        }
        Commands::Stop {
            ip,
            service,
            timeout,
        } => {
            commands::stop::handle(&driver, &ip, service.as_deref(), utils::seconds(timeout)).await?;
        }
        Commands::UninstallService {
            service,
            last,
            network_template,
        } => {
            commands::uninstall::handle(&driver, &service, last, network_template).await?;
        }
        Commands::Terminate { timeout, .. } => {
            commands::terminate::handle(&driver, utils::seconds(timeout)).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}
