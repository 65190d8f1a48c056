//! OpenStack provisioning driver

use crate::compute::{ComputeApi, ComputeClient};
use crate::context::{
    OPT_COMPUTE_SERVICE_NAME, OPT_NETWORK_API_VERSION, OPT_NETWORK_SERVICE_NAME,
    OVERRIDE_ENDPOINT, ProvisioningContext,
};
use crate::coordinator::ProvisioningCoordinator;
use crate::error::OpenStackError;
use crate::floating::FloatingIpManager;
use crate::lifecycle::MachineOrchestrator;
use crate::models::ServerStatus;
use crate::network::{NetworkApi, NetworkClient};
use crate::session::{Credentials, KeystoneAuthenticator, SessionManager};
use crate::validation::CloudValidator;
use async_trait::async_trait;
use fleetstack_cloud::naming::sanitize;
use fleetstack_cloud::{
    CloudConfig, CloudError, Deadline, MachineDetails, MachineRequest, ProvisioningDriver, Result,
    ServiceNetwork, ServiceScope,
};
use std::sync::Arc;
use std::time::Duration;

pub const DRIVER_NAME: &str = "openstack";

/// OpenStack implementation of [`ProvisioningDriver`]
pub struct OpenStackDriver {
    config: CloudConfig,
    orchestrator: Arc<MachineOrchestrator>,
    coordinator: ProvisioningCoordinator,
    management: Arc<ProvisioningContext>,
}

impl OpenStackDriver {
    /// Build the HTTP clients from the configuration
    ///
    /// No request is sent; the first call authenticates.
    pub fn connect(config: CloudConfig) -> Result<Self> {
        config.validate()?;

        let template = config.management_compute_template()?;
        let region = template.region().ok_or_else(|| {
            CloudError::InvalidConfig(format!(
                "templates.{}.image_id must start with the region",
                config.management_template
            ))
        })?;
        let (tenant, username) = config.user.tenant_and_username()?;
        let endpoint = template.override_str(OVERRIDE_ENDPOINT).ok_or_else(|| {
            CloudError::InvalidConfig(format!(
                "templates.{}.overrides.{} is required",
                config.management_template, OVERRIDE_ENDPOINT
            ))
        })?;

        tracing::info!(
            "Connecting to OpenStack cloud '{}' at {} (region {})",
            config.name,
            endpoint,
            region
        );

        let http = reqwest::Client::builder()
            .build()
            .map_err(OpenStackError::from)?;
        let credentials = Credentials {
            endpoint: endpoint.to_string(),
            username,
            password: config.user.api_key.clone(),
            tenant,
        };
        let session = Arc::new(SessionManager::new(
            Arc::new(KeystoneAuthenticator::new(http.clone())),
            credentials,
            region,
        ));

        let compute = Arc::new(ComputeClient::new(
            http.clone(),
            session.clone(),
            template.option_str(OPT_COMPUTE_SERVICE_NAME),
        ));
        let network = Arc::new(NetworkClient::new(
            http,
            session,
            template.option_str(OPT_NETWORK_SERVICE_NAME),
            template.option_str(OPT_NETWORK_API_VERSION),
        ));

        Self::new(config, compute, network)
    }

    /// Driver over arbitrary compute and network implementations
    pub fn new(
        config: CloudConfig,
        compute: Arc<dyn ComputeApi>,
        network: Arc<dyn NetworkApi>,
    ) -> Result<Self> {
        Self::with_orchestrator(config, MachineOrchestrator::new(compute, network))
    }

    pub fn with_orchestrator(config: CloudConfig, orchestrator: MachineOrchestrator) -> Result<Self> {
        let management = Arc::new(ProvisioningContext::management(&config)?);
        let orchestrator = Arc::new(orchestrator);
        Ok(Self {
            coordinator: ProvisioningCoordinator::new(orchestrator.clone()),
            orchestrator,
            management,
            config,
        })
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    /// Check the configuration against the live tenant without creating
    /// anything: identity endpoint, credentials, images and flavors of the
    /// management region, and the compute and networking quotas a
    /// management cluster of `provider.number_of_management_machines` needs
    pub async fn validate_cloud(&self) -> Result<()> {
        CloudValidator::new(
            &self.config,
            &self.management,
            &**self.orchestrator.compute(),
            &**self.orchestrator.network(),
        )
        .run()
        .await
    }

    /// Floating IPs managed apart from machine starts
    pub fn floating_ips(&self) -> FloatingIpManager {
        FloatingIpManager::new(
            self.orchestrator.compute().clone(),
            self.orchestrator.network().clone(),
        )
    }

    /// Release and delete every server under `prefix`, then wait for each; failures are logged
    async fn terminate_by_prefix(&self, prefix: &str, deadline: Deadline) {
        let servers = match self.orchestrator.compute().servers_by_prefix(prefix).await {
            Ok(servers) => servers,
            Err(e) => {
                tracing::warn!("Couldn't list servers with prefix {}: {}", prefix, e);
                return;
            }
        };

        for server in &servers {
            self.orchestrator.release_floating_ips(&server.id).await;
            if let Err(e) = self.orchestrator.compute().delete_server(&server.id).await {
                tracing::warn!("Couldn't delete server {}: {}", server.name, e);
            }
        }
        for server in &servers {
            if let Err(e) = self.orchestrator.wait_for_shutdown(&server.id, deadline).await {
                tracing::warn!("Server {} did not shut down: {}", server.name, e);
            }
        }
    }

    /// Prefixed name of the template network a service was started with
    fn application_network_name(&self, network: Option<&ServiceNetwork>) -> Option<String> {
        let template = network?.template.as_deref()?;
        let name = self.config.network.templates.get(template)?.name.as_deref()?;
        Some(self.management.prefixes().network(name))
    }
}

#[async_trait]
impl ProvisioningDriver for OpenStackDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn start_machine(&self, request: &MachineRequest, timeout: Duration) -> Result<MachineDetails> {
        let deadline = Deadline::after(timeout);
        let ctx = ProvisioningContext::new(&self.config, request)?;
        self.orchestrator.start(&ctx, deadline).await
    }

    async fn start_management_machines(&self, count: u32, timeout: Duration) -> Result<Vec<MachineDetails>> {
        let deadline = Deadline::after(timeout);
        self.coordinator
            .start_management_cluster(self.management.clone(), count, deadline)
            .await
    }

    async fn stop_machine(&self, ip: &str, scope: Option<&ServiceScope>, timeout: Duration) -> Result<bool> {
        let deadline = Deadline::after(timeout);
        let group = scope.map(|s| self.management.prefixes().service_group(s));
        self.orchestrator.stop(ip, group.as_deref(), deadline).await
    }

    async fn stop_management_machines(&self, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after(timeout);
        let prefix = self.management.server_name_prefix();
        let servers = self.orchestrator.compute().servers_by_prefix(prefix).await?;
        if servers.is_empty() {
            return Err(CloudError::ResourceNotFound(format!(
                "management servers with prefix '{}'",
                prefix
            )));
        }

        for server in &servers {
            tracing::info!("Stopping management server {}", server.name);
            self.orchestrator.release_floating_ips(&server.id).await;
            self.orchestrator.compute().delete_server(&server.id).await?;
        }
        for server in &servers {
            self.orchestrator.wait_for_shutdown(&server.id, deadline).await?;
        }

        self.coordinator.clean_shared_resources(&self.management).await;
        Ok(())
    }

    async fn get_existing_management_servers(&self) -> Result<Vec<MachineDetails>> {
        let servers = self
            .orchestrator
            .compute()
            .servers_by_prefix(self.management.server_name_prefix())
            .await?;

        let mut machines = Vec::new();
        for server in servers {
            if server.status != ServerStatus::Active {
                tracing::debug!("Skipping server {} in status {}", server.name, server.status);
                continue;
            }
            machines.push(self.orchestrator.describe_server(&self.management, &server).await?);
        }
        Ok(machines)
    }

    async fn on_service_uninstalled(
        &self,
        scope: &ServiceScope,
        network: Option<&ServiceNetwork>,
        application_empty: bool,
    ) -> Result<()> {
        let prefixes = self.management.prefixes();
        tracing::info!("Cleaning up resources of service {}", scope);
        self.orchestrator
            .security()
            .delete_service_groups(prefixes, scope)
            .await?;

        if application_empty {
            self.orchestrator
                .security()
                .delete_application_group(prefixes, &scope.application)
                .await?;

            if let Some(name) = self.application_network_name(network) {
                if let Some(found) = self.orchestrator.network().network_by_name(&name).await? {
                    tracing::info!("Delete application network {}", name);
                    self.orchestrator.network().delete_network(&found.id).await?;
                }
            }
        }
        Ok(())
    }

    async fn on_machine_failure(&self, machine: &MachineDetails) -> Result<()> {
        tracing::info!("Releasing resources of failed machine {}", machine.describe());
        self.orchestrator.release_floating_ips(&machine.machine_id).await;
        Ok(())
    }

    async fn terminate_all_resources(&self, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after(timeout);
        let prefixes = [
            self.management.server_name_prefix().to_string(),
            sanitize(&self.config.provider.machine_name_prefix),
        ];
        for prefix in &prefixes {
            tracing::info!("Terminating servers with prefix {}", prefix);
            self.terminate_by_prefix(prefix, deadline).await;
        }

        self.coordinator.clean_shared_resources(&self.management).await;
        Ok(())
    }
}
