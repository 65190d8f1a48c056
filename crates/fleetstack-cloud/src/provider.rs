//! Provisioning driver trait definition

use crate::config::{ComputeTemplate, ServiceNetwork};
use crate::error::Result;
use crate::naming::ServiceScope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Environment key carrying the address of a machine on its application network
pub const APPLICATION_NETWORK_IP: &str = "APPLICATION_NETWORK_IP";

/// Provisioning driver abstraction trait
///
/// The synchronous surface the cluster orchestrator calls to start and stop
/// machines. Every call either completes or fails with a typed error; long
/// running calls take a timeout that bounds all polling underneath.
#[async_trait]
pub trait ProvisioningDriver: Send + Sync {
    /// Returns the driver name (e.g., "openstack")
    fn name(&self) -> &str;

    /// Start one service machine
    async fn start_machine(
        &self,
        request: &MachineRequest,
        timeout: Duration,
    ) -> Result<MachineDetails>;

    /// Bootstrap the management cluster, all or nothing
    async fn start_management_machines(
        &self,
        count: u32,
        timeout: Duration,
    ) -> Result<Vec<MachineDetails>>;

    /// Stop the machine owning `ip`
    ///
    /// Returns `false` when no such machine exists.
    async fn stop_machine(
        &self,
        ip: &str,
        scope: Option<&ServiceScope>,
        timeout: Duration,
    ) -> Result<bool>;

    /// Stop every management machine and clean up what they used
    async fn stop_management_machines(&self, timeout: Duration) -> Result<()>;

    /// Management machines that are currently running
    async fn get_existing_management_servers(&self) -> Result<Vec<MachineDetails>>;

    /// Remove per-service resources after a service was uninstalled
    ///
    /// `application_empty` tells whether the application has no services left;
    /// `network` is the network declaration the service was started with.
    async fn on_service_uninstalled(
        &self,
        scope: &ServiceScope,
        network: Option<&ServiceNetwork>,
        application_empty: bool,
    ) -> Result<()>;

    /// Release what a failed machine still holds
    async fn on_machine_failure(&self, machine: &MachineDetails) -> Result<()>;

    /// Best-effort removal of everything the driver ever created
    async fn terminate_all_resources(&self, timeout: Duration) -> Result<()>;
}

/// What to start
#[derive(Debug, Clone)]
pub struct MachineRequest {
    /// Compute template
    pub template: ComputeTemplate,

    /// Owning service, `None` for management machines
    pub scope: Option<ServiceScope>,

    /// Network requirements of the owning service
    pub network: Option<ServiceNetwork>,

    /// Explicit availability zone
    pub location_id: Option<String>,
}

impl MachineRequest {
    pub fn management(template: ComputeTemplate) -> Self {
        Self {
            template,
            scope: None,
            network: None,
            location_id: None,
        }
    }

    pub fn service(template: ComputeTemplate, scope: ServiceScope) -> Self {
        Self {
            template,
            scope: Some(scope),
            network: None,
            location_id: None,
        }
    }

    pub fn with_network(mut self, network: ServiceNetwork) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }

    pub fn is_management(&self) -> bool {
        self.scope.is_none()
    }
}

/// A machine that reached the ready state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineDetails {
    pub machine_id: String,
    pub name: String,
    pub private_address: String,
    pub public_address: Option<String>,

    /// Availability zone
    pub location_id: Option<String>,

    pub environment: HashMap<String, String>,
}

impl MachineDetails {
    /// One-line summary used in error messages and listings
    pub fn describe(&self) -> String {
        match &self.public_address {
            Some(public) => format!(
                "{} [id={}, private={}, public={}]",
                self.name, self.machine_id, self.private_address, public
            ),
            None => format!(
                "{} [id={}, private={}]",
                self.name, self.machine_id, self.private_address
            ),
        }
    }
}

/// Polling configuration for status waits
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between two status checks
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
        }
    }
}
