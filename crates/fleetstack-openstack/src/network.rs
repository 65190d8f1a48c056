//! Networking service client

use crate::error::{OpenStackError, Result};
use crate::http::{RestClient, ServiceEndpoint, unwrap_list, unwrap_one};
use crate::models::{
    FloatingIp, FloatingIpRequest, Network, NetworkQuota, NetworkRequest, Port, PortRequest, Router,
    RouterRequest, SecurityGroup, SecurityGroupRule, SecurityGroupRuleRequest, Subnet,
    SubnetRequest,
};
use crate::session::SessionManager;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_NETWORK_SERVICE: &str = "neutron";
pub const DEFAULT_NETWORK_API_VERSION: &str = "v2.0";

/// One lock per resource kind created with create-if-not-exists semantics
///
/// Concurrent machine starts of the same engine share groups and networks;
/// the lookup and the create must not interleave between them.
#[derive(Debug, Default)]
pub struct CreationLocks {
    pub security_groups: Mutex<()>,
    pub networks: Mutex<()>,
}

/// Networking operations used by the engine
#[async_trait]
pub trait NetworkApi: Send + Sync {
    /// Locks guarding the idempotent creates of this client
    fn creation_locks(&self) -> &CreationLocks;

    // Networks

    async fn networks(&self) -> Result<Vec<Network>>;

    async fn network_by_name(&self, name: &str) -> Result<Option<Network>>;

    /// Networks flagged `router:external`
    async fn external_networks(&self) -> Result<Vec<Network>>;

    async fn create_network(&self, request: &NetworkRequest) -> Result<Network>;

    /// Delete a network after deleting its ports
    async fn delete_network(&self, network_id: &str) -> Result<()>;

    async fn networks_by_prefix(&self, prefix: &str) -> Result<Vec<Network>> {
        Ok(self
            .networks()
            .await?
            .into_iter()
            .filter(|n| n.name.starts_with(prefix))
            .collect())
    }

    async fn create_network_if_not_exists(&self, request: &NetworkRequest) -> Result<Network> {
        let _guard = self.creation_locks().networks.lock().await;
        if let Some(existing) = self.network_by_name(&request.name).await? {
            tracing::info!("Network '{}' already exists", request.name);
            return Ok(existing);
        }
        tracing::debug!("Create network {}", request.name);
        self.create_network(request).await
    }

    // Subnets

    async fn subnets_by_network(&self, network_id: &str) -> Result<Vec<Subnet>>;

    async fn create_subnet(&self, request: &SubnetRequest) -> Result<Subnet>;

    // Routers

    async fn router_by_name(&self, name: &str) -> Result<Option<Router>>;

    async fn create_router(&self, request: &RouterRequest) -> Result<Router>;

    async fn delete_router(&self, router_id: &str) -> Result<()>;

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()>;

    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()>;

    // Ports

    /// The port binding `device_id` to `network_id`
    async fn port(&self, device_id: &str, network_id: &str) -> Result<Option<Port>>;

    async fn ports_by_device(&self, device_id: &str) -> Result<Vec<Port>>;

    async fn ports_by_network(&self, network_id: &str) -> Result<Vec<Port>>;

    async fn create_port(&self, request: &PortRequest) -> Result<Port>;

    async fn update_port_security_groups(&self, port_id: &str, security_group_ids: &[String]) -> Result<Port>;

    async fn delete_port(&self, port_id: &str) -> Result<()>;

    // Floating IPs

    async fn floating_ips(&self) -> Result<Vec<FloatingIp>>;

    async fn floating_ip_by_address(&self, address: &str) -> Result<Option<FloatingIp>>;

    async fn floating_ip_by_port(&self, port_id: &str) -> Result<Option<FloatingIp>>;

    async fn floating_ip_by_fixed_ip(&self, fixed_ip: &str) -> Result<Option<FloatingIp>>;

    async fn create_floating_ip(&self, request: &FloatingIpRequest) -> Result<FloatingIp>;

    async fn delete_floating_ip(&self, floating_ip_id: &str) -> Result<()>;

    /// Bind the floating IP to `port_id`, or unbind it with `None`
    async fn update_floating_ip_port(&self, floating_ip_id: &str, port_id: Option<&str>) -> Result<FloatingIp>;

    /// Allocate a floating IP from the first external network and bind it to
    /// the port of `device_id` on `network_id`; returns the public address
    async fn create_and_associate_floating_ip(&self, device_id: &str, network_id: &str) -> Result<String> {
        tracing::debug!(
            "Create and associate floating ip for device {} on network {}",
            device_id,
            network_id
        );
        let external = self.external_networks().await?;
        let floating_network = external.first().ok_or_else(|| {
            OpenStackError::UnexpectedResponse("no external network to allocate a floating ip from".to_string())
        })?;
        let port = self.port(device_id, network_id).await?.ok_or_else(|| {
            OpenStackError::UnexpectedResponse(format!(
                "port not found for device {} on network {}",
                device_id, network_id
            ))
        })?;

        let request = FloatingIpRequest {
            floating_network_id: floating_network.id.clone(),
            port_id: Some(port.id.clone()),
            fixed_ip_address: port.first_ip().map(str::to_string),
        };
        let floating_ip = self.create_floating_ip(&request).await?;
        Ok(floating_ip.floating_ip_address)
    }

    async fn delete_floating_ip_by_fixed_ip(&self, fixed_ip: &str) -> Result<()> {
        match self.floating_ip_by_fixed_ip(fixed_ip).await? {
            Some(floating_ip) => self.delete_floating_ip(&floating_ip.id).await,
            None => {
                tracing::warn!("No floating ip found for fixed ip {}", fixed_ip);
                Ok(())
            }
        }
    }

    // Quotas

    /// Quotas of the tenant the session is scoped to; `None` when the
    /// identity service did not name a tenant
    async fn quotas(&self) -> Result<Option<NetworkQuota>>;

    // Security groups

    async fn security_groups(&self) -> Result<Vec<SecurityGroup>>;

    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup>;

    /// Deleting a group that is already gone succeeds
    async fn delete_security_group(&self, security_group_id: &str) -> Result<()>;

    /// `None` when an identical rule already exists
    async fn create_security_group_rule(
        &self,
        request: &SecurityGroupRuleRequest,
    ) -> Result<Option<SecurityGroupRule>>;

    async fn delete_security_group_rule(&self, rule_id: &str) -> Result<()>;

    async fn security_group_by_name(&self, name: &str) -> Result<Option<SecurityGroup>> {
        Ok(self
            .security_groups()
            .await?
            .into_iter()
            .find(|g| g.name == name))
    }

    async fn security_groups_by_prefix(&self, prefix: &str) -> Result<Vec<SecurityGroup>> {
        Ok(self
            .security_groups()
            .await?
            .into_iter()
            .filter(|g| g.name.starts_with(prefix))
            .collect())
    }

    /// Return the group named `name`, creating it when missing
    async fn create_security_group_if_not_exists(&self, name: &str) -> Result<SecurityGroup> {
        let _guard = self.creation_locks().security_groups.lock().await;
        if let Some(existing) = self.security_group_by_name(name).await? {
            tracing::debug!("Security group '{}' already exists", name);
            return Ok(existing);
        }
        tracing::debug!("Create security group {}", name);
        let description = format!("Security group {}", name);
        match self.create_security_group(name, &description).await {
            Ok(group) => Ok(group),
            Err(e) if e.is_conflict() => {
                tracing::info!("Security group '{}' was created concurrently", name);
                self.security_group_by_name(name).await?.ok_or(e)
            }
            Err(e) => Err(e),
        }
    }
}

/// Networking client over HTTP
pub struct NetworkClient {
    rest: RestClient,
    locks: CreationLocks,
}

impl NetworkClient {
    pub fn new(
        http: reqwest::Client,
        session: Arc<SessionManager>,
        service_name: Option<&str>,
        api_version: Option<&str>,
    ) -> Self {
        let service = service_name
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_NETWORK_SERVICE);
        let version = api_version
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_NETWORK_API_VERSION);
        tracing::info!("OpenStack {} api version: {}", service, version);

        Self {
            rest: RestClient::new(http, session, ServiceEndpoint::new(service).with_version(version)),
            locks: CreationLocks::default(),
        }
    }
}

#[async_trait]
impl NetworkApi for NetworkClient {
    fn creation_locks(&self) -> &CreationLocks {
        &self.locks
    }

    async fn networks(&self) -> Result<Vec<Network>> {
        let response = self.rest.get("networks", &[]).await?;
        unwrap_list(response, "networks")
    }

    async fn network_by_name(&self, name: &str) -> Result<Option<Network>> {
        let response = self.rest.get("networks", &[("name", name)]).await?;
        let networks: Vec<Network> = unwrap_list(response, "networks")?;
        Ok(networks.into_iter().find(|n| n.name == name))
    }

    async fn external_networks(&self) -> Result<Vec<Network>> {
        let response = self.rest.get("networks", &[("router:external", "true")]).await?;
        unwrap_list(response, "networks")
    }

    async fn create_network(&self, request: &NetworkRequest) -> Result<Network> {
        let response = self.rest.post("networks", &json!({ "network": request })).await?;
        unwrap_one(response, "network")
    }

    async fn delete_network(&self, network_id: &str) -> Result<()> {
        tracing::debug!("Delete network {}", network_id);
        for port in self.ports_by_network(network_id).await? {
            self.delete_port(&port.id).await?;
        }
        self.rest.delete(&format!("networks/{}", network_id)).await
    }

    async fn subnets_by_network(&self, network_id: &str) -> Result<Vec<Subnet>> {
        let response = self.rest.get("subnets", &[("network_id", network_id)]).await?;
        unwrap_list(response, "subnets")
    }

    async fn create_subnet(&self, request: &SubnetRequest) -> Result<Subnet> {
        tracing::debug!("Create subnet {} ({})", request.name, request.cidr);
        let response = self.rest.post("subnets", &json!({ "subnet": request })).await?;
        unwrap_one(response, "subnet")
    }

    async fn router_by_name(&self, name: &str) -> Result<Option<Router>> {
        let response = self.rest.get("routers", &[("name", name)]).await?;
        let routers: Vec<Router> = unwrap_list(response, "routers")?;
        Ok(routers.into_iter().next())
    }

    async fn create_router(&self, request: &RouterRequest) -> Result<Router> {
        tracing::debug!("Create router {}", request.name);
        let response = self.rest.post("routers", &json!({ "router": request })).await?;
        unwrap_one(response, "router")
    }

    async fn delete_router(&self, router_id: &str) -> Result<()> {
        tracing::debug!("Delete router {}", router_id);
        self.rest.delete(&format!("routers/{}", router_id)).await
    }

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        tracing::debug!("Add interface subnet {} to router {}", subnet_id, router_id);
        self.rest
            .put(
                &format!("routers/{}/add_router_interface", router_id),
                &json!({ "subnet_id": subnet_id }),
            )
            .await?;
        Ok(())
    }

    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        tracing::debug!("Remove interface subnet {} from router {}", subnet_id, router_id);
        self.rest
            .put(
                &format!("routers/{}/remove_router_interface", router_id),
                &json!({ "subnet_id": subnet_id }),
            )
            .await?;
        Ok(())
    }

    async fn port(&self, device_id: &str, network_id: &str) -> Result<Option<Port>> {
        let response = self
            .rest
            .get("ports", &[("device_id", device_id), ("network_id", network_id)])
            .await?;
        let ports: Vec<Port> = unwrap_list(response, "ports")?;
        Ok(ports.into_iter().next())
    }

    async fn ports_by_device(&self, device_id: &str) -> Result<Vec<Port>> {
        let response = self.rest.get("ports", &[("device_id", device_id)]).await?;
        unwrap_list(response, "ports")
    }

    async fn ports_by_network(&self, network_id: &str) -> Result<Vec<Port>> {
        let response = self.rest.get("ports", &[("network_id", network_id)]).await?;
        unwrap_list(response, "ports")
    }

    async fn create_port(&self, request: &PortRequest) -> Result<Port> {
        let response = self.rest.post("ports", &json!({ "port": request })).await?;
        unwrap_one(response, "port")
    }

    async fn update_port_security_groups(&self, port_id: &str, security_group_ids: &[String]) -> Result<Port> {
        tracing::debug!("Update security groups of port {}", port_id);
        let response = self
            .rest
            .put(
                &format!("ports/{}", port_id),
                &json!({ "port": { "security_groups": security_group_ids } }),
            )
            .await?;
        unwrap_one(response, "port")
    }

    async fn delete_port(&self, port_id: &str) -> Result<()> {
        tracing::debug!("Delete port {}", port_id);
        self.rest.delete(&format!("ports/{}", port_id)).await
    }

    async fn floating_ips(&self) -> Result<Vec<FloatingIp>> {
        let response = self.rest.get("floatingips", &[]).await?;
        unwrap_list(response, "floatingips")
    }

    async fn floating_ip_by_address(&self, address: &str) -> Result<Option<FloatingIp>> {
        let response = self
            .rest
            .get("floatingips", &[("floating_ip_address", address)])
            .await?;
        let floating_ips: Vec<FloatingIp> = unwrap_list(response, "floatingips")?;
        Ok(floating_ips
            .into_iter()
            .find(|f| f.floating_ip_address == address))
    }

    async fn floating_ip_by_port(&self, port_id: &str) -> Result<Option<FloatingIp>> {
        let response = self.rest.get("floatingips", &[("port_id", port_id)]).await?;
        let floating_ips: Vec<FloatingIp> = unwrap_list(response, "floatingips")?;
        Ok(floating_ips.into_iter().next())
    }

    async fn floating_ip_by_fixed_ip(&self, fixed_ip: &str) -> Result<Option<FloatingIp>> {
        let response = self
            .rest
            .get("floatingips", &[("fixed_ip_address", fixed_ip)])
            .await?;
        let floating_ips: Vec<FloatingIp> = unwrap_list(response, "floatingips")?;
        Ok(floating_ips.into_iter().next())
    }

    async fn create_floating_ip(&self, request: &FloatingIpRequest) -> Result<FloatingIp> {
        let response = self
            .rest
            .post("floatingips", &json!({ "floatingip": request }))
            .await?;
        unwrap_one(response, "floatingip")
    }

    async fn delete_floating_ip(&self, floating_ip_id: &str) -> Result<()> {
        tracing::debug!("Delete floating ip {}", floating_ip_id);
        self.rest.delete(&format!("floatingips/{}", floating_ip_id)).await
    }

    async fn update_floating_ip_port(&self, floating_ip_id: &str, port_id: Option<&str>) -> Result<FloatingIp> {
        tracing::debug!("Bind floating ip {} to port {:?}", floating_ip_id, port_id);
        let response = self
            .rest
            .put(
                &format!("floatingips/{}", floating_ip_id),
                &json!({ "floatingip": { "port_id": port_id } }),
            )
            .await?;
        unwrap_one(response, "floatingip")
    }

    async fn quotas(&self) -> Result<Option<NetworkQuota>> {
        let Some(tenant_id) = self.rest.session().tenant_id().await? else {
            return Ok(None);
        };
        let response = self.rest.get(&format!("quotas/{}", tenant_id), &[]).await?;
        Ok(Some(unwrap_one(response, "quota")?))
    }

    async fn security_groups(&self) -> Result<Vec<SecurityGroup>> {
        let response = self.rest.get("security-groups", &[]).await?;
        unwrap_list(response, "security_groups")
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup> {
        let response = self
            .rest
            .post(
                "security-groups",
                &json!({ "security_group": { "name": name, "description": description } }),
            )
            .await?;
        unwrap_one(response, "security_group")
    }

    async fn delete_security_group(&self, security_group_id: &str) -> Result<()> {
        tracing::debug!("Delete security group {}", security_group_id);
        self.rest
            .delete(&format!("security-groups/{}", security_group_id))
            .await
    }

    async fn create_security_group_rule(
        &self,
        request: &SecurityGroupRuleRequest,
    ) -> Result<Option<SecurityGroupRule>> {
        match self
            .rest
            .post("security-group-rules", &json!({ "security_group_rule": request }))
            .await
        {
            Ok(response) => Ok(Some(unwrap_one(response, "security_group_rule")?)),
            Err(e) if e.is_conflict() => {
                tracing::warn!(
                    "Rule already exists: {} {}-{} on {}",
                    request.direction,
                    request.port_range_min,
                    request.port_range_max,
                    request.security_group_id
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_security_group_rule(&self, rule_id: &str) -> Result<()> {
        self.rest
            .delete(&format!("security-group-rules/{}", rule_id))
            .await
    }
}
