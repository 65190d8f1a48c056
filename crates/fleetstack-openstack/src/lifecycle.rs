//! Machine lifecycle orchestration
//!
//! Drives one machine from request to ready, and back:
//!
//! ```text
//! REQUESTED --create--> BUILD --poll--> ACTIVE --> groups --> floating ip --> ready
//!                            \--poll--> ERROR | deadline  --> delete, fail
//! ```
//!
//! All waiting is polling against a [`Deadline`] computed by the caller.

use crate::compute::ComputeApi;
use crate::context::ProvisioningContext;
use crate::models::{
    FixedIp, Network, PortRequest, Server, ServerNetwork, ServerRequest, ServerStatus,
};
use crate::network::NetworkApi;
use crate::networking::NetworkProvisioner;
use crate::security::SecurityGroupSynthesizer;
use fleetstack_cloud::{
    APPLICATION_NETWORK_IP, CloudError, Deadline, MachineDetails, NameAllocator, PollConfig,
    Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What a start attempt has created so far, for cleanup on failure
#[derive(Debug, Default)]
struct LaunchState {
    server_id: Option<String>,
    reserved_ports: Vec<String>,
}

pub struct MachineOrchestrator {
    compute: Arc<dyn ComputeApi>,
    network: Arc<dyn NetworkApi>,
    security: SecurityGroupSynthesizer,
    networks: NetworkProvisioner,
    names: NameAllocator,
    poll: PollConfig,
}

impl MachineOrchestrator {
    pub fn new(compute: Arc<dyn ComputeApi>, network: Arc<dyn NetworkApi>) -> Self {
        Self {
            security: SecurityGroupSynthesizer::new(network.clone()),
            networks: NetworkProvisioner::new(network.clone()),
            compute,
            network,
            names: NameAllocator::default(),
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_names(mut self, names: NameAllocator) -> Self {
        self.names = names;
        self
    }

    pub fn compute(&self) -> &Arc<dyn ComputeApi> {
        &self.compute
    }

    pub fn network(&self) -> &Arc<dyn NetworkApi> {
        &self.network
    }

    pub fn security(&self) -> &SecurityGroupSynthesizer {
        &self.security
    }

    pub fn networks(&self) -> &NetworkProvisioner {
        &self.networks
    }

    /// Start one machine and wait until it is ready
    pub async fn start(&self, ctx: &ProvisioningContext, deadline: Deadline) -> Result<MachineDetails> {
        if ctx.scope().is_some() {
            let groups = self.security.ensure_service_groups(ctx).await?;
            self.security.apply_service_rules(ctx, &groups).await?;
        }
        self.networks.ensure_application_network(ctx).await?;

        let existing: HashSet<String> = self
            .compute
            .list_servers()
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        let name = self.names.allocate(ctx.server_name_prefix(), &existing)?;

        let mut state = LaunchState::default();
        match self.launch(ctx, &name, deadline, &mut state).await {
            Ok(details) => {
                tracing::info!("Server {} is ready: {}", name, details.describe());
                Ok(details)
            }
            Err(e) => {
                tracing::error!("Failed to start server {}: {}", name, e);
                self.abort(&state).await;
                if e.is_timeout() || e.is_config_error() {
                    Err(e)
                } else {
                    Err(CloudError::provisioning_failed(
                        format!("failed to start server '{}'", name),
                        e,
                    ))
                }
            }
        }
    }

    async fn launch(
        &self,
        ctx: &ProvisioningContext,
        name: &str,
        deadline: Deadline,
        state: &mut LaunchState,
    ) -> Result<MachineDetails> {
        let networks = self.server_networks(ctx, state).await?;
        let template = ctx.template();
        let request = ServerRequest {
            name: name.to_string(),
            image_ref: template.image_ref().to_string(),
            flavor_ref: template.flavor_ref().to_string(),
            key_name: ctx.key_pair_name().map(str::to_string),
            availability_zone: ctx.location_id().map(str::to_string),
            networks,
        };

        tracing::info!("Creating server {}", name);
        let server = self.compute.create_server(&request).await?;
        state.server_id = Some(server.id.clone());

        let server = self.wait_for_active(&server.id, deadline).await?;
        self.assign_security_groups(ctx, &server.id).await?;

        let public_address = if ctx.topology().associate_floating_ip() {
            let private = self.required_network(ctx.topology().private_ip_network()).await?;
            let address = self
                .network
                .create_and_associate_floating_ip(&server.id, &private.id)
                .await?;
            tracing::info!("Associated floating ip {} to server {}", address, name);
            Some(address)
        } else {
            None
        };

        self.build_details(ctx, &server, public_address).await
    }

    /// Networks of the create request; multi-subnet networks get a
    /// pre-created port with one fixed IP per subnet
    async fn server_networks(
        &self,
        ctx: &ProvisioningContext,
        state: &mut LaunchState,
    ) -> Result<Vec<ServerNetwork>> {
        let mut attachments = Vec::new();
        for name in ctx.topology().attached_networks() {
            let network = self.required_network(&name).await?;
            if network.subnets.len() > 1 {
                let port = self
                    .network
                    .create_port(&PortRequest {
                        network_id: network.id.clone(),
                        fixed_ips: network
                            .subnets
                            .iter()
                            .map(|subnet_id| FixedIp {
                                subnet_id: subnet_id.clone(),
                                ip_address: None,
                            })
                            .collect(),
                    })
                    .await?;
                state.reserved_ports.push(port.id.clone());
                attachments.push(ServerNetwork::port(port.id));
            } else {
                attachments.push(ServerNetwork::network(network.id));
            }
        }
        Ok(attachments)
    }

    async fn required_network(&self, name: &str) -> Result<Network> {
        self.network
            .network_by_name(name)
            .await?
            .ok_or_else(|| CloudError::ResourceNotFound(format!("network '{}'", name)))
    }

    /// Best-effort removal of a failed start
    async fn abort(&self, state: &LaunchState) {
        if let Some(server_id) = &state.server_id {
            self.release_floating_ips(server_id).await;
            if let Err(e) = self.compute.delete_server(server_id).await {
                tracing::warn!("Couldn't delete server {}: {}", server_id, e);
            }
        }
        for port_id in &state.reserved_ports {
            if let Err(e) = self.network.delete_port(port_id).await {
                tracing::warn!("Couldn't delete port {}: {}", port_id, e);
            }
        }
    }

    /// Poll until the server is ACTIVE
    ///
    /// A server that is not visible yet counts as still building.
    pub async fn wait_for_active(&self, server_id: &str, deadline: Deadline) -> Result<Server> {
        let mut last_status = "REQUESTED".to_string();
        loop {
            match self.compute.server_details(server_id).await? {
                None => tracing::debug!("Server {} not visible yet", server_id),
                Some(server) => match server.status {
                    ServerStatus::Active => return Ok(server),
                    ServerStatus::Build => {
                        tracing::debug!("Server {} is building", server_id);
                        last_status = server.status.to_string();
                    }
                    other => {
                        return Err(CloudError::UnexpectedStatus {
                            resource: format!("server {}", server_id),
                            status: other.to_string(),
                        });
                    }
                },
            }

            self.pause(server_id, &last_status, deadline).await?;
        }
    }

    /// Poll until the server is gone or stopped
    pub async fn wait_for_shutdown(&self, server_id: &str, deadline: Deadline) -> Result<()> {
        loop {
            let last_status = match self.compute.server_details(server_id).await? {
                None => return Ok(()),
                Some(server) => match server.status {
                    ServerStatus::Stopped
                    | ServerStatus::Shutoff
                    | ServerStatus::Deleted
                    | ServerStatus::SoftDeleted => return Ok(()),
                    ServerStatus::Error | ServerStatus::Unknown | ServerStatus::Unrecognized => {
                        return Err(CloudError::UnexpectedStatus {
                            resource: format!("server {} while shutting down", server_id),
                            status: server.status.to_string(),
                        });
                    }
                    other => other.to_string(),
                },
            };

            self.pause(server_id, &last_status, deadline).await?;
        }
    }

    async fn pause(&self, server_id: &str, last_status: &str, deadline: Deadline) -> Result<()> {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(CloudError::Timeout {
                resource: format!("server {}", server_id),
                last_status: last_status.to_string(),
            });
        }
        tokio::time::sleep(self.poll.interval.min(remaining)).await;
        Ok(())
    }

    /// Put the assigned security groups on every port of the server
    pub async fn assign_security_groups(&self, ctx: &ProvisioningContext, server_id: &str) -> Result<()> {
        let groups = self.network.security_groups().await?;
        let mut ids = Vec::new();
        for name in ctx.assigned_security_groups() {
            let group = groups
                .iter()
                .find(|g| g.name == name)
                .ok_or_else(|| CloudError::ResourceNotFound(format!("security group '{}'", name)))?;
            ids.push(group.id.clone());
        }

        for port in self.network.ports_by_device(server_id).await? {
            self.network.update_port_security_groups(&port.id, &ids).await?;
        }
        Ok(())
    }

    /// Release every floating IP bound to a port of the server; failures are logged
    pub async fn release_floating_ips(&self, server_id: &str) {
        let ports = match self.network.ports_by_device(server_id).await {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("Couldn't list ports of server {}: {}", server_id, e);
                return;
            }
        };

        for port in ports {
            match self.network.floating_ip_by_port(&port.id).await {
                Ok(Some(floating_ip)) => {
                    tracing::info!(
                        "Release floating ip {} of server {}",
                        floating_ip.floating_ip_address,
                        server_id
                    );
                    if let Err(e) = self.network.delete_floating_ip(&floating_ip.id).await {
                        tracing::warn!("Couldn't release floating ip {}: {}", floating_ip.id, e);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Couldn't look up floating ip of port {}: {}", port.id, e),
            }
        }
    }

    /// Release the floating IPs of a server, delete it and wait until it is gone
    pub async fn terminate(&self, server: &Server, deadline: Deadline) -> Result<()> {
        tracing::info!("Terminating server {} ({})", server.name, server.id);
        self.release_floating_ips(&server.id).await;
        self.compute.delete_server(&server.id).await?;
        self.wait_for_shutdown(&server.id, deadline).await
    }

    /// Stop the machine owning `ip`; `false` when there is none
    ///
    /// With `security_group`, only servers carrying that group are considered.
    pub async fn stop(&self, ip: &str, security_group: Option<&str>, deadline: Deadline) -> Result<bool> {
        let Some(server) = self.compute.server_by_ip(ip, security_group).await? else {
            tracing::warn!("No server found with ip {}", ip);
            return Ok(false);
        };
        self.terminate(&server, deadline).await?;
        Ok(true)
    }

    /// Addresses and environment of a ready server
    pub async fn build_details(
        &self,
        ctx: &ProvisioningContext,
        server: &Server,
        public_address: Option<String>,
    ) -> Result<MachineDetails> {
        let private_network = ctx.topology().private_ip_network();
        let private_address = self
            .port_address(&server.id, private_network)
            .await?
            .ok_or_else(|| {
                CloudError::ResourceNotFound(format!(
                    "private address of server {} on network '{}'",
                    server.id, private_network
                ))
            })?;

        let mut environment = HashMap::new();
        if let Some(application_network) = ctx.topology().application_network_name() {
            let address = if application_network == private_network {
                Some(private_address.clone())
            } else {
                self.port_address(&server.id, application_network).await?
            };
            if let Some(address) = address {
                environment.insert(APPLICATION_NETWORK_IP.to_string(), address);
            }
        }

        Ok(MachineDetails {
            machine_id: server.id.clone(),
            name: server.name.clone(),
            private_address,
            public_address,
            location_id: server
                .availability_zone
                .clone()
                .or_else(|| ctx.location_id().map(str::to_string)),
            environment,
        })
    }

    /// Details of an already running server, looking up its floating IP
    pub async fn describe_server(&self, ctx: &ProvisioningContext, server: &Server) -> Result<MachineDetails> {
        let private_network = self
            .network
            .network_by_name(ctx.topology().private_ip_network())
            .await?;
        let public_address = match private_network {
            Some(network) => match self.network.port(&server.id, &network.id).await? {
                Some(port) => self
                    .network
                    .floating_ip_by_port(&port.id)
                    .await?
                    .map(|f| f.floating_ip_address),
                None => None,
            },
            None => None,
        };
        self.build_details(ctx, server, public_address).await
    }

    async fn port_address(&self, server_id: &str, network_name: &str) -> Result<Option<String>> {
        let Some(network) = self.network.network_by_name(network_name).await? else {
            return Ok(None);
        };
        Ok(self
            .network
            .port(server_id, &network.id)
            .await?
            .and_then(|p| p.first_ip().map(str::to_string)))
    }
}
