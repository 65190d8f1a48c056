//! Provisioning error types

use thiserror::Error;

/// Provisioning errors
///
/// Configuration problems are fatal and never retried. API failures raised by
/// a concrete provider travel inside [`CloudError::Provider`].
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported access rule type '{0}'")]
    UnsupportedRuleType(String),

    #[error("Invalid port range '{0}'")]
    InvalidPortRange(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Found existing servers matching prefix '{prefix}': {description}")]
    ExistingServers { prefix: String, description: String },

    #[error("No free server name for prefix '{prefix}' after {attempts} attempts")]
    NameSpaceExhausted { prefix: String, attempts: u32 },

    #[error("Timed out waiting for {resource} (last observed status: {last_status})")]
    Timeout {
        resource: String,
        last_status: String,
    },

    #[error("{resource} quota limit exceeded: {used} in use, {planned} more needed, limit {limit}")]
    QuotaExceeded {
        resource: String,
        used: i64,
        planned: i64,
        limit: i64,
    },

    #[error("{resource} entered status {status}")]
    UnexpectedStatus { resource: String, status: String },

    #[error("Provisioning failed: {message}")]
    ProvisioningFailed {
        message: String,
        #[source]
        source: Option<Box<CloudError>>,
    },

    #[error("Provider error: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Wrap `cause` as a provisioning failure with a summary message.
    pub fn provisioning_failed(message: impl Into<String>, cause: CloudError) -> Self {
        CloudError::ProvisioningFailed {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CloudError::Timeout { .. })
    }

    /// Configuration problems are reported as-is, never wrapped or retried.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CloudError::InvalidConfig(_)
                | CloudError::UnsupportedRuleType(_)
                | CloudError::InvalidPortRange(_)
        )
    }

    /// The innermost error of a `ProvisioningFailed` chain.
    pub fn root_cause(&self) -> &CloudError {
        match self {
            CloudError::ProvisioningFailed {
                source: Some(inner),
                ..
            } => inner.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
