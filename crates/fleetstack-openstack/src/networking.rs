//! Provisioning of the networks the engine owns
//!
//! Networks, subnets and the management router are created on demand under
//! the resource prefix and found again by name on the next run.

use crate::context::ProvisioningContext;
use crate::models::{
    ExternalGatewayInfo, HostRoute, Network, NetworkRequest, Router, RouterRequest, Subnet,
    SubnetRequest,
};
use crate::network::NetworkApi;
use crate::topology::{ExternalNetworking, ManagedNetwork};
use fleetstack_cloud::{CloudError, NetworkConfiguration, Result, SubnetConfig};
use std::sync::Arc;

pub const SUBNET_DNS_NAME_SERVERS: &str = "dnsNameServers";
pub const SUBNET_GATEWAY: &str = "gateway";

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// Build the create request of a configured subnet
///
/// DHCP is always on. A `gateway` option of `null` (or empty) disables the
/// gateway; any other value becomes the gateway and the next hop of a default
/// route.
pub fn subnet_request(network_id: &str, config: &SubnetConfig) -> SubnetRequest {
    let dns_nameservers = config
        .options
        .get(SUBNET_DNS_NAME_SERVERS)
        .map(|servers| {
            servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let (gateway_ip, host_routes) = match config.options.get(SUBNET_GATEWAY).map(|g| g.trim()) {
        None => (None, Vec::new()),
        Some("") | Some("null") => (Some(None), Vec::new()),
        Some(gateway) => (
            Some(Some(gateway.to_string())),
            vec![HostRoute {
                destination: DEFAULT_ROUTE.to_string(),
                nexthop: gateway.to_string(),
            }],
        ),
    };

    SubnetRequest {
        network_id: network_id.to_string(),
        name: config.name.clone(),
        cidr: config.range.clone(),
        ip_version: 4,
        enable_dhcp: true,
        dns_nameservers,
        gateway_ip,
        host_routes,
    }
}

/// A network with the subnets the engine ensured on it, in configuration order
#[derive(Debug, Clone)]
pub struct ProvisionedNetwork {
    pub network: Network,
    pub subnets: Vec<Subnet>,
}

pub struct NetworkProvisioner {
    network: Arc<dyn NetworkApi>,
}

impl NetworkProvisioner {
    pub fn new(network: Arc<dyn NetworkApi>) -> Self {
        Self { network }
    }

    /// Create the management network, its subnets and its external routing
    ///
    /// Does nothing when no management network is configured. On failure
    /// every prefixed network is cleaned best-effort.
    pub async fn ensure_management_network(
        &self,
        ctx: &ProvisioningContext,
    ) -> Result<Option<ProvisionedNetwork>> {
        let Some(managed) = ctx.topology().management_network() else {
            return Ok(None);
        };

        tracing::info!("Ensuring management network {}", managed.name);
        match self.provision_management(ctx, managed).await {
            Ok(provisioned) => Ok(Some(provisioned)),
            Err(e) => {
                tracing::error!("Failed to set up management network: {}", e);
                if let Err(clean_err) = self.clean_all_networks(ctx).await {
                    tracing::warn!("Couldn't clean all networks: {}", clean_err);
                }
                Err(e)
            }
        }
    }

    async fn provision_management(
        &self,
        ctx: &ProvisioningContext,
        managed: &ManagedNetwork,
    ) -> Result<ProvisionedNetwork> {
        let provisioned = self.get_or_create(&managed.name, &managed.config).await?;

        let external = ctx.topology().external();
        if !external.skip {
            let subnet = provisioned.subnets.first().ok_or_else(|| {
                CloudError::InvalidConfig(format!(
                    "cannot add router interface because the network '{}' has no subnets",
                    managed.name
                ))
            })?;
            self.create_external_networking(ctx, external, subnet).await?;
        }

        Ok(provisioned)
    }

    /// Create the template network of a service machine, if it uses one
    pub async fn ensure_application_network(
        &self,
        ctx: &ProvisioningContext,
    ) -> Result<Option<ProvisionedNetwork>> {
        match ctx.topology().application_network() {
            Some(managed) => {
                tracing::debug!("Ensuring application network {}", managed.name);
                Ok(Some(self.get_or_create(&managed.name, &managed.config).await?))
            }
            None => Ok(None),
        }
    }

    async fn get_or_create(&self, name: &str, config: &NetworkConfiguration) -> Result<ProvisionedNetwork> {
        let network = self
            .network
            .create_network_if_not_exists(&NetworkRequest {
                name: name.to_string(),
                admin_state_up: true,
            })
            .await?;

        if config.subnets.is_empty() {
            return Err(CloudError::InvalidConfig(format!(
                "the network '{}' is missing subnet configuration",
                name
            )));
        }

        let _guard = self.network.creation_locks().networks.lock().await;
        let existing = self.network.subnets_by_network(&network.id).await?;
        let mut subnets = Vec::with_capacity(config.subnets.len());
        for subnet_config in &config.subnets {
            let subnet = match existing.iter().find(|s| s.name == subnet_config.name) {
                Some(found) => found.clone(),
                None => {
                    self.network
                        .create_subnet(&subnet_request(&network.id, subnet_config))
                        .await?
                }
            };
            subnets.push(subnet);
        }

        Ok(ProvisionedNetwork { network, subnets })
    }

    async fn create_external_networking(
        &self,
        ctx: &ProvisioningContext,
        external: &ExternalNetworking,
        subnet: &Subnet,
    ) -> Result<()> {
        let router = match &external.router_name {
            Some(name) => self.network.router_by_name(name).await?.ok_or_else(|| {
                CloudError::ResourceNotFound(format!("external router '{}'", name))
            })?,
            None => self.get_or_create_router(ctx, external).await?,
        };

        let attached = self
            .network
            .ports_by_device(&router.id)
            .await?
            .iter()
            .any(|p| p.fixed_ips.iter().any(|ip| ip.subnet_id == subnet.id));
        if attached {
            tracing::debug!("Subnet {} already attached to router {}", subnet.name, router.name);
            return Ok(());
        }

        tracing::info!("Attach subnet {} to router {}", subnet.name, router.name);
        self.network.add_router_interface(&router.id, &subnet.id).await?;
        Ok(())
    }

    async fn get_or_create_router(
        &self,
        ctx: &ProvisioningContext,
        external: &ExternalNetworking,
    ) -> Result<Router> {
        let name = ctx.prefixes().management_router();
        if let Some(router) = self.network.router_by_name(&name).await? {
            return Ok(router);
        }

        let public_network_id = match &external.network_name {
            Some(network_name) => {
                let network = self
                    .network
                    .network_by_name(network_name)
                    .await?
                    .ok_or_else(|| {
                        CloudError::ResourceNotFound(format!("external network '{}'", network_name))
                    })?;
                if !network.router_external {
                    return Err(CloudError::InvalidConfig(format!(
                        "the network '{}' is not an external network",
                        network_name
                    )));
                }
                network.id
            }
            None => self
                .network
                .external_networks()
                .await?
                .into_iter()
                .next()
                .map(|n| n.id)
                .ok_or_else(|| CloudError::ResourceNotFound("external network".to_string()))?,
        };

        tracing::info!("Create router {}", name);
        Ok(self
            .network
            .create_router(&RouterRequest {
                name,
                admin_state_up: true,
                external_gateway_info: ExternalGatewayInfo {
                    network_id: public_network_id,
                },
            })
            .await?)
    }

    /// Detach the management subnets from the external router, delete the
    /// router if the engine created it, then delete every prefixed network
    pub async fn clean_all_networks(&self, ctx: &ProvisioningContext) -> Result<()> {
        let external = ctx.topology().external();
        if !external.skip {
            let router_name = external
                .router_name
                .clone()
                .unwrap_or_else(|| ctx.prefixes().management_router());

            if let Some(router) = self.network.router_by_name(&router_name).await? {
                if let Err(e) = self.detach_private_subnets(ctx, &router).await {
                    tracing::warn!("Could not remove an interface from router {}: {}", router.name, e);
                }
                if external.creates_router() {
                    self.network.delete_router(&router.id).await?;
                }
            }
        }

        for network in self.network.networks_by_prefix(ctx.prefixes().prefix()).await? {
            tracing::info!("Delete network {}", network.name);
            self.network.delete_network(&network.id).await?;
        }
        Ok(())
    }

    async fn detach_private_subnets(&self, ctx: &ProvisioningContext, router: &Router) -> Result<()> {
        let private = ctx.topology().private_ip_network();
        let Some(network) = self.network.network_by_name(private).await? else {
            return Ok(());
        };

        for port in self.network.ports_by_device(&router.id).await? {
            for fixed_ip in &port.fixed_ips {
                if network.subnets.contains(&fixed_ip.subnet_id) {
                    self.network
                        .remove_router_interface(&router.id, &fixed_ip.subnet_id)
                        .await?;
                }
            }
        }
        Ok(())
    }
}
