//! Floating IPs addressed by their public address
//!
//! Machine starts allocate and bind floating IPs on their own. These
//! operations serve callers that manage an address separately from any
//! machine: reserve one from an external network, move it between
//! instances, give it back.

use crate::compute::ComputeApi;
use crate::models::{FloatingIp, FloatingIpRequest};
use crate::network::NetworkApi;
use fleetstack_cloud::{CloudError, Result};
use std::sync::Arc;

pub struct FloatingIpManager {
    compute: Arc<dyn ComputeApi>,
    network: Arc<dyn NetworkApi>,
}

impl FloatingIpManager {
    pub fn new(compute: Arc<dyn ComputeApi>, network: Arc<dyn NetworkApi>) -> Self {
        Self { compute, network }
    }

    async fn by_address(&self, address: &str) -> Result<FloatingIp> {
        self.network
            .floating_ip_by_address(address)
            .await?
            .ok_or_else(|| CloudError::ResourceNotFound(format!("floating ip {}", address)))
    }

    /// Reserve an unbound address from the external network named `pool`
    pub async fn allocate(&self, pool: &str) -> Result<String> {
        let network = self
            .network
            .network_by_name(pool)
            .await?
            .ok_or_else(|| CloudError::ResourceNotFound(format!("external network '{}'", pool)))?;
        if !network.router_external {
            return Err(CloudError::InvalidConfig(format!(
                "network '{}' is not an external network",
                pool
            )));
        }

        let floating_ip = self
            .network
            .create_floating_ip(&FloatingIpRequest {
                floating_network_id: network.id,
                port_id: None,
                fixed_ip_address: None,
            })
            .await?;
        tracing::info!(
            "Allocated floating ip {} from {}",
            floating_ip.floating_ip_address,
            pool
        );
        Ok(floating_ip.floating_ip_address)
    }

    /// Bind `address` to the port holding `instance_ip`
    pub async fn assign(&self, instance_ip: &str, address: &str) -> Result<()> {
        let floating_ip = self.by_address(address).await?;
        let server = self
            .compute
            .server_by_ip(instance_ip, None)
            .await?
            .ok_or_else(|| CloudError::ResourceNotFound(format!("server with ip {}", instance_ip)))?;

        let port = self
            .network
            .ports_by_device(&server.id)
            .await?
            .into_iter()
            .find(|p| {
                p.fixed_ips
                    .iter()
                    .any(|ip| ip.ip_address.as_deref() == Some(instance_ip))
            })
            .ok_or_else(|| {
                CloudError::ResourceNotFound(format!(
                    "port of server {} with ip {}",
                    server.name, instance_ip
                ))
            })?;

        if floating_ip.port_id.as_deref() == Some(port.id.as_str()) {
            tracing::debug!("Floating ip {} already bound to {}", address, instance_ip);
            return Ok(());
        }

        tracing::info!("Assign floating ip {} to {} ({})", address, instance_ip, server.name);
        self.network
            .update_floating_ip_port(&floating_ip.id, Some(&port.id))
            .await?;
        Ok(())
    }

    /// Unbind `address` from whatever port holds it
    pub async fn unassign(&self, address: &str) -> Result<()> {
        let floating_ip = self.by_address(address).await?;
        if floating_ip.port_id.is_none() {
            tracing::debug!("Floating ip {} is not bound", address);
            return Ok(());
        }

        tracing::info!("Unassign floating ip {}", address);
        self.network.update_floating_ip_port(&floating_ip.id, None).await?;
        Ok(())
    }

    /// Give `address` back to its pool; an unknown address is a no-op
    pub async fn release(&self, address: &str) -> Result<()> {
        match self.network.floating_ip_by_address(address).await? {
            Some(floating_ip) => {
                tracing::info!("Release floating ip {}", address);
                self.network.delete_floating_ip(&floating_ip.id).await?;
            }
            None => tracing::warn!("Floating ip {} not found, nothing to release", address),
        }
        Ok(())
    }
}
