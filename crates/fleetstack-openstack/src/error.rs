//! OpenStack client error types

use fleetstack_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenStackError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenStack API returned status {status}: {body}")]
    ServerApi { status: u16, body: String },

    #[error("Cannot find endpoint for service '{service}' in region '{region}' in the service catalog")]
    EndpointNotFound { service: String, region: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OpenStackError {
    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            OpenStackError::ServerApi { status, .. } => Some(*status),
            OpenStackError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// 409, or a rule/group the server reports as already existing
    pub fn is_conflict(&self) -> bool {
        match self {
            OpenStackError::ServerApi { status, body } => {
                *status == 409 || body.contains("already exists")
            }
            _ => false,
        }
    }
}

impl From<OpenStackError> for CloudError {
    fn from(err: OpenStackError) -> Self {
        match err {
            OpenStackError::EndpointNotFound { .. } => CloudError::InvalidConfig(err.to_string()),
            other => CloudError::Provider(Box::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpenStackError>;
