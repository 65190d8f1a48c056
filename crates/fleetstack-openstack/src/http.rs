//! Authenticated JSON requests against one catalog service

use crate::error::{OpenStackError, Result};
use crate::session::SessionManager;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

const AUTH_HEADER: &str = "X-Auth-Token";

/// Which catalog service a client talks to, and under which path
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    /// Catalog name or type (e.g. `nova`, `neutron`)
    pub service: String,

    /// Path segment appended to the catalog URL (e.g. `v2.0`)
    pub version_path: Option<String>,
}

impl ServiceEndpoint {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version_path: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.version_path = if version.trim().is_empty() {
            None
        } else {
            Some(version)
        };
        self
    }
}

/// Issues requests with the current session token attached
pub struct RestClient {
    http: reqwest::Client,
    session: Arc<SessionManager>,
    endpoint: ServiceEndpoint,
}

impl RestClient {
    pub fn new(http: reqwest::Client, session: Arc<SessionManager>, endpoint: ServiceEndpoint) -> Self {
        Self {
            http,
            session,
            endpoint,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    async fn url(&self, path: &str) -> Result<String> {
        let base = self.session.resolve_endpoint(&self.endpoint.service).await?;
        let mut url = base.trim_end_matches('/').to_string();
        if let Some(version) = &self.endpoint.version_path {
            url.push('/');
            url.push_str(version.trim_matches('/'));
        }
        url.push('/');
        url.push_str(path.trim_start_matches('/'));
        Ok(url)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<(StatusCode, String)> {
        let url = self.url(path).await?;
        let token = self.session.valid_token().await?;

        tracing::debug!("{} {}", method, url);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(AUTH_HEADER, token.id)
            .header(reqwest::header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::trace!("{} {} -> {}: {}", method, url, status, text);
        Ok((status, text))
    }

    fn check(status: StatusCode, body: String) -> Result<String> {
        if status.is_success() {
            Ok(body)
        } else {
            Err(OpenStackError::ServerApi {
                status: status.as_u16(),
                body,
            })
        }
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        let (status, body) = self.send::<()>(Method::GET, path, query, None).await?;
        let body = Self::check(status, body)?;
        Ok(serde_json::from_str(&body)?)
    }

    /// GET that maps 404 to `None`
    pub async fn get_optional(&self, path: &str) -> Result<Option<serde_json::Value>> {
        let (status, body) = self.send::<()>(Method::GET, path, &[], None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check(status, body)?;
        Ok(Some(serde_json::from_str(&body)?))
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<serde_json::Value> {
        let (status, text) = self.send(Method::POST, path, &[], Some(body)).await?;
        let text = Self::check(status, text)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<serde_json::Value> {
        let (status, text) = self.send(Method::PUT, path, &[], Some(body)).await?;
        let text = Self::check(status, text)?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// DELETE expecting 204; a resource that is already gone counts as deleted
    pub async fn delete(&self, path: &str) -> Result<()> {
        let (status, body) = self.send::<()>(Method::DELETE, path, &[], None).await?;
        match status {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => {
                tracing::debug!("{} already deleted", path);
                Ok(())
            }
            other => Err(OpenStackError::ServerApi {
                status: other.as_u16(),
                body,
            }),
        }
    }
}

/// Unwrap a single resource from `{"<root>": {...}}`
pub fn unwrap_one<T: DeserializeOwned>(mut value: serde_json::Value, root: &str) -> Result<T> {
    match value.get_mut(root) {
        Some(inner) => Ok(serde_json::from_value(inner.take())?),
        None => Err(OpenStackError::UnexpectedResponse(format!(
            "missing '{}' in response",
            root
        ))),
    }
}

/// Unwrap a list from `{"<root>": [...]}`; a missing root is an empty list
pub fn unwrap_list<T: DeserializeOwned>(mut value: serde_json::Value, root: &str) -> Result<Vec<T>> {
    match value.get_mut(root) {
        Some(serde_json::Value::Null) | None => Ok(Vec::new()),
        Some(inner) => Ok(serde_json::from_value(inner.take())?),
    }
}
