//! Cloud configuration model
//!
//! The already-parsed description of a cloud: compute templates, network
//! templates, access rules and the ports of the management components.
//! Values are immutable once loaded; the engine only reads them.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Default prefix of management machines and every resource the engine creates
pub const DEFAULT_MANAGEMENT_GROUP: &str = "fleetstack-manager-";

/// Multicast port used by lookup discovery between management components.
///
/// Always opened alongside the configured component ports.
pub const DISCOVERY_MULTICAST_PORTS: &str = "4174";

/// Top-level cloud configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Cloud name (used in log messages only)
    pub name: String,

    /// Account used to authenticate against the identity service
    pub user: CloudUser,

    /// Provider level settings
    pub provider: ProviderSettings,

    /// Name of the compute template used for management machines
    pub management_template: String,

    /// Compute templates by name
    pub templates: HashMap<String, ComputeTemplate>,

    /// Network templates
    pub network: CloudNetwork,

    /// Ports of the management components
    pub components: ManagementComponents,
}

impl CloudConfig {
    /// Look up a compute template by name
    pub fn template(&self, name: &str) -> Result<&ComputeTemplate> {
        self.templates.get(name).ok_or_else(|| {
            CloudError::InvalidConfig(format!("compute template '{}' could not be found", name))
        })
    }

    /// The compute template of management machines
    pub fn management_compute_template(&self) -> Result<&ComputeTemplate> {
        self.template(&self.management_template).map_err(|_| {
            CloudError::InvalidConfig(format!(
                "management_template: compute template '{}' could not be found",
                self.management_template
            ))
        })
    }

    /// Prefix shared by management machines and engine-created resources
    pub fn management_group(&self) -> &str {
        self.provider
            .management_group
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or(DEFAULT_MANAGEMENT_GROUP)
    }

    /// Check the invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        self.management_compute_template()?;

        if let Some(management) = &self.network.management {
            management.validate("network.management")?;
        }
        for (key, template) in &self.network.templates {
            template.validate(&format!("network.templates.{}", key))?;
        }

        for (name, template) in &self.templates {
            if template.image_id.split_once('/').is_none() {
                return Err(CloudError::InvalidConfig(format!(
                    "templates.{}.image_id must be formatted as '<region>/<image>' (got '{}')",
                    name, template.image_id
                )));
            }
            if template.hardware_id.split_once('/').is_none() {
                return Err(CloudError::InvalidConfig(format!(
                    "templates.{}.hardware_id must be formatted as '<region>/<flavor>' (got '{}')",
                    name, template.hardware_id
                )));
            }
        }

        Ok(())
    }
}

/// Cloud account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudUser {
    /// `tenant:username`
    pub user: String,

    /// Password or API key
    pub api_key: String,
}

impl CloudUser {
    /// Split `tenant:username` into its two parts
    pub fn tenant_and_username(&self) -> Result<(String, String)> {
        match self.user.split_once(':') {
            Some((tenant, username)) if !tenant.is_empty() && !username.is_empty() => {
                Ok((tenant.to_string(), username.to_string()))
            }
            _ => Err(CloudError::InvalidConfig(
                "user.user must be formatted as '<tenant>:<username>'".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Prefix of management machines and engine-created resources
    pub management_group: Option<String>,

    /// Prefix of service machines
    pub machine_name_prefix: String,

    /// Size of the management cluster
    pub number_of_management_machines: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            management_group: None,
            machine_name_prefix: "fleetstack-agent-".to_string(),
            number_of_management_machines: 1,
        }
    }
}

/// A machine template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeTemplate {
    /// `<region>/<image id>`
    pub image_id: String,

    /// `<region>/<flavor id>`
    pub hardware_id: String,

    /// Provider options (key pair, service names, security groups, ...)
    pub options: HashMap<String, serde_json::Value>,

    /// Free-form custom settings
    pub custom: HashMap<String, serde_json::Value>,

    /// Overrides of provider defaults (endpoint, ...)
    pub overrides: HashMap<String, serde_json::Value>,

    /// Pre-existing networks the machine is attached to
    pub compute_networks: Vec<String>,

    /// Port used to push files to the machine
    pub file_transfer_port: u16,
}

impl Default for ComputeTemplate {
    fn default() -> Self {
        Self {
            image_id: String::new(),
            hardware_id: String::new(),
            options: HashMap::new(),
            custom: HashMap::new(),
            overrides: HashMap::new(),
            compute_networks: Vec::new(),
            file_transfer_port: 22,
        }
    }
}

impl ComputeTemplate {
    /// Region part of the image reference
    pub fn region(&self) -> Option<&str> {
        self.image_id.split_once('/').map(|(region, _)| region)
    }

    /// Image id without the region
    pub fn image_ref(&self) -> &str {
        split_ref(&self.image_id)
    }

    /// Flavor id without the region
    pub fn flavor_ref(&self) -> &str {
        split_ref(&self.hardware_id)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        non_blank(self.options.get(key))
    }

    /// An option holding either a list of strings or a comma separated string
    pub fn option_list(&self, key: &str) -> Vec<String> {
        match self.options.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            Some(serde_json::Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn option_flag(&self, key: &str) -> bool {
        flag(self.options.get(key))
    }

    pub fn custom_str(&self, key: &str) -> Result<Option<&str>> {
        match self.custom.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(CloudError::InvalidConfig(format!(
                "custom property '{}' must be a string",
                key
            ))),
        }
    }

    pub fn override_str(&self, key: &str) -> Option<&str> {
        non_blank(self.overrides.get(key))
    }
}

fn split_ref(reference: &str) -> &str {
    reference
        .split_once('/')
        .map(|(_, id)| id)
        .unwrap_or(reference)
}

fn non_blank(value: Option<&serde_json::Value>) -> Option<&str> {
    value
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// Lenient boolean: `true`, `yes`, `on`, `y`, `t` (any case) or a JSON `true`
pub fn flag(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => is_truthy(s),
        _ => false,
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "y" | "t"
    )
}

/// Network templates of the cloud
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudNetwork {
    /// Network dedicated to management machines
    pub management: Option<NetworkConfiguration>,

    /// Application network templates by key (iterated in key order)
    pub templates: BTreeMap<String, NetworkConfiguration>,
}

/// A network the engine creates on demand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfiguration {
    pub name: Option<String>,
    pub subnets: Vec<SubnetConfig>,
    pub custom: HashMap<String, String>,
}

impl NetworkConfiguration {
    pub fn custom_flag(&self, key: &str) -> bool {
        self.custom.get(key).map(|v| is_truthy(v)).unwrap_or(false)
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.name.is_none() && !self.subnets.is_empty() {
            return Err(CloudError::InvalidConfig(format!(
                "{}: network templates must have a name",
                field
            )));
        }
        for subnet in &self.subnets {
            if subnet.name.trim().is_empty() {
                return Err(CloudError::InvalidConfig(format!(
                    "{}: every subnet must have a name (network '{}')",
                    field,
                    self.name.as_deref().unwrap_or_default()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubnetConfig {
    pub name: String,

    /// CIDR, e.g. `10.4.0.0/24`
    pub range: String,

    /// `dnsNameServers`, `gateway`
    pub options: HashMap<String, String>,
}

/// Network requirements declared by a service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceNetwork {
    /// Key of the network template to use
    pub template: Option<String>,

    pub access_rules: AccessRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessRules {
    pub incoming: Vec<AccessRule>,
    pub outgoing: Vec<AccessRule>,
}

impl AccessRules {
    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }

    pub fn has_public(&self) -> bool {
        self.incoming
            .iter()
            .chain(self.outgoing.iter())
            .any(|r| r.rule_type == AccessRuleType::Public)
    }
}

/// A declarative firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    #[serde(rename = "type")]
    pub rule_type: AccessRuleType,

    /// Port specification, see [`crate::PortRange`]
    pub port_range: String,

    /// Group name for GROUP rules, CIDR for RANGE rules
    #[serde(default)]
    pub target: Option<String>,
}

impl AccessRule {
    pub fn new(rule_type: AccessRuleType, port_range: impl Into<String>) -> Self {
        Self {
            rule_type,
            port_range: port_range.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessRuleType {
    Public,
    Service,
    Application,
    Cluster,
    Group,
    Range,
    Private,
}

impl fmt::Display for AccessRuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessRuleType::Public => "PUBLIC",
            AccessRuleType::Service => "SERVICE",
            AccessRuleType::Application => "APPLICATION",
            AccessRuleType::Cluster => "CLUSTER",
            AccessRuleType::Group => "GROUP",
            AccessRuleType::Range => "RANGE",
            AccessRuleType::Private => "PRIVATE",
        };
        write!(f, "{}", name)
    }
}

/// Ports of the management components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementComponents {
    pub agent_port: u16,
    pub deployer_port: u16,
    pub deployer_webster_port: u16,
    pub discovery_port: u16,
    pub orchestrator_port: u16,
    pub usm_port_range: String,
    pub webui_port: u16,
    pub rest_port: u16,
}

impl Default for ManagementComponents {
    fn default() -> Self {
        Self {
            agent_port: 7002,
            deployer_port: 7000,
            deployer_webster_port: 6666,
            discovery_port: 7001,
            orchestrator_port: 7003,
            usm_port_range: "7010-7110".to_string(),
            webui_port: 8099,
            rest_port: 8100,
        }
    }
}
