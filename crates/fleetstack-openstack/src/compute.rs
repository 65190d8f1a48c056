//! Compute service client

use crate::error::{OpenStackError, Result};
use crate::http::{RestClient, ServiceEndpoint, unwrap_list, unwrap_one};
use crate::models::{AbsoluteLimits, Flavor, Image, Server, ServerRequest};
use crate::session::SessionManager;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Default catalog name of the compute service
pub const DEFAULT_COMPUTE_SERVICE: &str = "nova";

/// Compute operations used by the engine
///
/// Lookups return `None` or an empty list for missing resources; deleting a
/// server that is already gone succeeds.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn create_server(&self, request: &ServerRequest) -> Result<Server>;

    /// Summary listing (id and name)
    async fn list_servers(&self) -> Result<Vec<Server>>;

    async fn server_details(&self, server_id: &str) -> Result<Option<Server>>;

    async fn delete_server(&self, server_id: &str) -> Result<()>;

    async fn image(&self, image_id: &str) -> Result<Option<Image>>;

    async fn images(&self) -> Result<Vec<Image>>;

    async fn flavor(&self, flavor_id: &str) -> Result<Option<Flavor>>;

    async fn flavors(&self) -> Result<Vec<Flavor>>;

    /// Absolute limits and usage of the tenant
    async fn limits(&self) -> Result<AbsoluteLimits>;

    /// Detailed servers whose name starts with `prefix`
    async fn servers_by_prefix(&self, prefix: &str) -> Result<Vec<Server>> {
        let mut servers = Vec::new();
        for summary in self.list_servers().await? {
            if !summary.name.starts_with(prefix) {
                continue;
            }
            if let Some(details) = self.server_details(&summary.id).await? {
                servers.push(details);
            }
        }
        Ok(servers)
    }

    /// The server owning `ip`, optionally only among servers carrying
    /// `security_group`
    ///
    /// Scans every live server; there is no address index to query.
    async fn server_by_ip(&self, ip: &str, security_group: Option<&str>) -> Result<Option<Server>> {
        for summary in self.list_servers().await? {
            let Some(details) = self.server_details(&summary.id).await? else {
                continue;
            };
            if !details.has_address(ip) {
                continue;
            }
            match security_group {
                Some(group) if !details.has_security_group(group) => continue,
                _ => return Ok(Some(details)),
            }
        }
        Ok(None)
    }
}

/// Compute client over HTTP
pub struct ComputeClient {
    rest: RestClient,
}

impl ComputeClient {
    pub fn new(http: reqwest::Client, session: Arc<SessionManager>, service_name: Option<&str>) -> Self {
        let service = service_name
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_COMPUTE_SERVICE);
        Self {
            rest: RestClient::new(http, session, ServiceEndpoint::new(service)),
        }
    }
}

#[async_trait]
impl ComputeApi for ComputeClient {
    async fn create_server(&self, request: &ServerRequest) -> Result<Server> {
        tracing::debug!("Launch instance {}", request.name);
        let response = self.rest.post("servers", &json!({ "server": request })).await?;
        unwrap_one(response, "server")
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let response = self.rest.get("servers", &[]).await?;
        unwrap_list(response, "servers")
    }

    async fn server_details(&self, server_id: &str) -> Result<Option<Server>> {
        match self.rest.get_optional(&format!("servers/{}", server_id)).await? {
            Some(response) => Ok(Some(unwrap_one(response, "server")?)),
            None => Ok(None),
        }
    }

    async fn delete_server(&self, server_id: &str) -> Result<()> {
        tracing::debug!("Terminate server {}", server_id);
        self.rest.delete(&format!("servers/{}", server_id)).await
    }

    async fn image(&self, image_id: &str) -> Result<Option<Image>> {
        match self.rest.get_optional(&format!("images/{}", image_id)).await? {
            Some(response) => Ok(Some(unwrap_one(response, "image")?)),
            None => Ok(None),
        }
    }

    async fn images(&self) -> Result<Vec<Image>> {
        let response = self.rest.get("images", &[]).await?;
        unwrap_list(response, "images")
    }

    async fn flavor(&self, flavor_id: &str) -> Result<Option<Flavor>> {
        match self.rest.get_optional(&format!("flavors/{}", flavor_id)).await? {
            Some(response) => Ok(Some(unwrap_one(response, "flavor")?)),
            None => Ok(None),
        }
    }

    async fn flavors(&self) -> Result<Vec<Flavor>> {
        let response = self.rest.get("flavors", &[]).await?;
        unwrap_list(response, "flavors")
    }

    async fn limits(&self) -> Result<AbsoluteLimits> {
        let mut response = self.rest.get("limits", &[]).await?;
        match response.get_mut("limits") {
            Some(limits) => unwrap_one(limits.take(), "absolute"),
            None => Err(OpenStackError::UnexpectedResponse(
                "missing 'limits' in response".to_string(),
            )),
        }
    }
}
