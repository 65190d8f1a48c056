use colored::Colorize;
use fleetstack_cloud::{APPLICATION_NETWORK_IP, MachineDetails};
use std::time::Duration;

pub fn seconds(timeout: u64) -> Duration {
    Duration::from_secs(timeout)
}

/// Print machines as a table
pub fn print_machines(machines: &[MachineDetails]) {
    println!(
        "{}",
        format!(
            "{:<32} {:<16} {:<16} {:<12} {:<16}",
            "NAME", "PRIVATE IP", "PUBLIC IP", "ZONE", "APP NETWORK IP"
        )
        .bold()
    );
    println!("{}", "─".repeat(96).dimmed());

    for machine in machines {
        println!(
            "{:<32} {:<16} {:<16} {:<12} {:<16}",
            machine.name.cyan(),
            machine.private_address,
            machine.public_address.as_deref().unwrap_or("-"),
            machine.location_id.as_deref().unwrap_or("-"),
            machine
                .environment
                .get(APPLICATION_NETWORK_IP)
                .map(String::as_str)
                .unwrap_or("-")
                .dimmed()
        );
    }
}
