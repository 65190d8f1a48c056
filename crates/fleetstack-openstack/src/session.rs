//! Session and token management
//!
//! A [`SessionManager`] owns the bearer token of one engine instance. Every
//! outbound call asks it for a valid token first; a token that is missing or
//! expires within the renewal margin is renewed synchronously on the request
//! path, so callers never see one that is about to expire.

use crate::error::{OpenStackError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Renewal margin applied before the token expiry
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(60);

/// Account used to obtain tokens
#[derive(Clone)]
pub struct Credentials {
    /// Identity service URL (e.g. `https://keystone.example.com/v2.0`)
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub tenant: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("tenant", &self.tenant)
            .finish()
    }
}

/// An issued bearer token together with the catalog it was issued with
#[derive(Debug, Clone)]
pub struct Token {
    pub id: String,
    pub expires: DateTime<Utc>,
    /// Tenant the token is scoped to
    pub tenant_id: Option<String>,
    pub catalog: Arc<ServiceCatalog>,
}

/// Services reachable with a token, by name/type and region
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub services: Vec<CatalogService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogService {
    pub name: String,
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEndpoint {
    #[serde(default)]
    pub region: String,
    #[serde(rename = "publicURL")]
    pub public_url: String,
}

impl ServiceCatalog {
    pub fn new(services: Vec<CatalogService>) -> Self {
        Self { services }
    }

    /// Public URL of `service` in `region`
    ///
    /// `service` is matched against the service name first, then against the
    /// service type.
    pub fn endpoint<'a>(&'a self, service: &str, region: &str) -> Option<&'a str> {
        let in_region = |s: &'a CatalogService| {
            s.endpoints
                .iter()
                .find(|e| e.region == region)
                .map(|e| e.public_url.as_str())
        };

        self.services
            .iter()
            .filter(|s| s.name == service)
            .find_map(in_region)
            .or_else(|| {
                self.services
                    .iter()
                    .filter(|s| s.service_type == service)
                    .find_map(in_region)
            })
    }
}

/// Obtains tokens from an identity service
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token>;
}

/// Keystone v2 password authentication
pub struct KeystoneAuthenticator {
    client: reqwest::Client,
}

impl KeystoneAuthenticator {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for KeystoneAuthenticator {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Authenticator for KeystoneAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token> {
        let url = format!("{}/tokens", credentials.endpoint.trim_end_matches('/'));
        tracing::info!("Requesting a new token from {}", url);

        let body = AuthRequest {
            auth: AuthBody {
                password_credentials: PasswordCredentials {
                    username: &credentials.username,
                    password: &credentials.password,
                },
                tenant_name: &credentials.tenant,
            },
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(OpenStackError::AuthenticationFailed(format!(
                "identity service rejected the credentials of '{}:{}'",
                credentials.tenant, credentials.username
            )));
        }
        if !status.is_success() {
            return Err(OpenStackError::ServerApi {
                status: status.as_u16(),
                body: text,
            });
        }

        let access: AccessResponse = serde_json::from_str(&text)?;
        Ok(Token {
            id: access.access.token.id,
            expires: access.access.token.expires,
            tenant_id: access.access.token.tenant.map(|t| t.id),
            catalog: Arc::new(ServiceCatalog::new(access.access.service_catalog)),
        })
    }
}

/// Source of the current time, replaceable in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Holds the token of one engine instance and renews it on demand
pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    credentials: Credentials,
    region: String,
    margin: chrono::Duration,
    clock: Clock,
    token: Mutex<Option<Token>>,
}

impl SessionManager {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        credentials: Credentials,
        region: impl Into<String>,
    ) -> Self {
        Self {
            authenticator,
            credentials,
            region: region.into(),
            margin: chrono::Duration::seconds(DEFAULT_RENEWAL_MARGIN.as_secs() as i64),
            clock: Arc::new(Utc::now),
            token: Mutex::new(None),
        }
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = chrono::Duration::seconds(margin.as_secs() as i64);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn is_stale(&self, token: Option<&Token>) -> bool {
        match token {
            None => true,
            Some(token) => (self.clock)() + self.margin >= token.expires,
        }
    }

    /// A token that stays valid for at least the renewal margin
    pub async fn valid_token(&self) -> Result<Token> {
        let mut current = self.token.lock().await;
        if self.is_stale(current.as_ref()) {
            tracing::debug!("Token missing or about to expire, re-authenticating");
            let token = self.authenticator.authenticate(&self.credentials).await?;
            if self.is_stale(Some(&token)) {
                return Err(OpenStackError::AuthenticationFailed(format!(
                    "issued token expires at {} which is within the renewal margin",
                    token.expires
                )));
            }
            *current = Some(token);
        }

        current
            .clone()
            .ok_or_else(|| OpenStackError::AuthenticationFailed("no token issued".to_string()))
    }

    /// Id of the tenant the current token is scoped to
    pub async fn tenant_id(&self) -> Result<Option<String>> {
        Ok(self.valid_token().await?.tenant_id)
    }

    /// Public URL of `service` in the session region
    pub async fn resolve_endpoint(&self, service: &str) -> Result<String> {
        let token = self.valid_token().await?;
        token
            .catalog
            .endpoint(service, &self.region)
            .map(str::to_string)
            .ok_or_else(|| OpenStackError::EndpointNotFound {
                service: service.to_string(),
                region: self.region.clone(),
            })
    }
}

// ============ API Types ============

#[derive(Serialize)]
struct AuthRequest<'a> {
    auth: AuthBody<'a>,
}

#[derive(Serialize)]
struct AuthBody<'a> {
    #[serde(rename = "passwordCredentials")]
    password_credentials: PasswordCredentials<'a>,
    #[serde(rename = "tenantName")]
    tenant_name: &'a str,
}

#[derive(Serialize)]
struct PasswordCredentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AccessResponse {
    access: Access,
}

#[derive(Deserialize)]
struct Access {
    token: AccessToken,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<CatalogService>,
}

#[derive(Deserialize)]
struct AccessToken {
    id: String,
    expires: DateTime<Utc>,
    #[serde(default)]
    tenant: Option<TenantRef>,
}

#[derive(Deserialize)]
struct TenantRef {
    id: String,
}
