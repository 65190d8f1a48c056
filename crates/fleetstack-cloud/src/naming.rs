//! Resource naming scheme
//!
//! Security groups and networks get deterministic names (`prefix + suffix`),
//! so re-running a provisioning step against a half-initialised environment
//! finds what the previous run created. Server names are `prefix + counter`
//! and are checked against the live server list before use.

use crate::error::{CloudError, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

/// Default attempt bound of [`NameAllocator`]
pub const DEFAULT_NAME_ATTEMPTS: u32 = 1000;

/// Replace characters that break DNS names and prefix filters
pub fn sanitize(name: &str) -> String {
    name.replace('.', "-")
}

/// A service identified by its application
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceScope {
    pub application: String,
    pub service: String,
}

impl ServiceScope {
    pub fn new(application: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            service: service.into(),
        }
    }

    /// Parse a fully qualified `application.service` name
    pub fn parse(full_name: &str) -> Result<Self> {
        match full_name.split_once('.') {
            Some((application, service)) if !application.is_empty() && !service.is_empty() => {
                Ok(Self::new(application, service))
            }
            _ => Err(CloudError::InvalidConfig(format!(
                "service name '{}' must be formatted as '<application>.<service>'",
                full_name
            ))),
        }
    }
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.application, self.service)
    }
}

/// Names of everything the engine creates under one management prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePrefixes {
    prefix: String,
}

impl ResourcePrefixes {
    pub fn new(management_group: &str) -> Self {
        Self {
            prefix: sanitize(management_group),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn management_group(&self) -> String {
        format!("{}management", self.prefix)
    }

    pub fn agent_group(&self) -> String {
        format!("{}agent", self.prefix)
    }

    pub fn cluster_group(&self) -> String {
        format!("{}cluster", self.prefix)
    }

    pub fn application_group(&self, application: &str) -> String {
        format!("{}{}", self.prefix, sanitize(application))
    }

    pub fn service_group(&self, scope: &ServiceScope) -> String {
        format!(
            "{}-{}",
            self.application_group(&scope.application),
            sanitize(&scope.service)
        )
    }

    pub fn service_public_group(&self, scope: &ServiceScope) -> String {
        format!("{}-public", self.service_group(scope))
    }

    /// Name of a network the engine creates from a network template
    pub fn network(&self, configured_name: &str) -> String {
        format!("{}{}", self.prefix, sanitize(configured_name))
    }

    pub fn management_router(&self) -> String {
        format!("{}management-public-router", self.prefix)
    }

    /// Server name prefix of the machines of one service
    pub fn service_machines(machine_name_prefix: &str, scope: &ServiceScope) -> String {
        sanitize(&format!(
            "{}{}-{}-",
            machine_name_prefix, scope.application, scope.service
        ))
    }
}

/// Hands out `prefix + counter` server names that are not taken yet
///
/// Counters are kept per prefix and only move forward for the lifetime of
/// the allocator.
#[derive(Debug)]
pub struct NameAllocator {
    counters: Mutex<HashMap<String, u32>>,
    max_attempts: u32,
}

impl Default for NameAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_ATTEMPTS)
    }
}

impl NameAllocator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            max_attempts,
        }
    }

    /// Next free name for `prefix`, skipping every name in `existing`
    pub fn allocate(&self, prefix: &str, existing: &HashSet<String>) -> Result<String> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = counters.entry(prefix.to_string()).or_insert(0);

        for _ in 0..self.max_attempts {
            *counter += 1;
            let candidate = format!("{}{}", prefix, counter);
            if !existing.contains(&candidate) {
                return Ok(candidate);
            }
            tracing::debug!(name = %candidate, "server name already taken");
        }

        Err(CloudError::NameSpaceExhausted {
            prefix: prefix.to_string(),
            attempts: self.max_attempts,
        })
    }
}
