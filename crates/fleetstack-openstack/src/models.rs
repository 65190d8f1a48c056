//! Wire types of the compute and networking APIs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============ Compute ============

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: ServerStatus,
    /// Addresses by network name
    #[serde(default)]
    pub addresses: HashMap<String, Vec<ServerAddress>>,
    #[serde(default)]
    pub security_groups: Vec<NamedRef>,
    #[serde(rename = "OS-EXT-AZ:availability_zone", default)]
    pub availability_zone: Option<String>,
}

impl Server {
    pub fn has_address(&self, ip: &str) -> bool {
        self.addresses
            .values()
            .flatten()
            .any(|address| address.addr == ip)
    }

    pub fn has_security_group(&self, name: &str) -> bool {
        self.security_groups.iter().any(|group| group.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub addr: String,
    #[serde(default)]
    pub version: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
}

/// Server status as reported by the compute service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Active,
    #[default]
    Build,
    Rebuild,
    Reboot,
    HardReboot,
    Stopped,
    Shutoff,
    Deleted,
    SoftDeleted,
    Error,
    Unknown,
    #[serde(other)]
    Unrecognized,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerStatus::Active => "ACTIVE",
            ServerStatus::Build => "BUILD",
            ServerStatus::Rebuild => "REBUILD",
            ServerStatus::Reboot => "REBOOT",
            ServerStatus::HardReboot => "HARD_REBOOT",
            ServerStatus::Stopped => "STOPPED",
            ServerStatus::Shutoff => "SHUTOFF",
            ServerStatus::Deleted => "DELETED",
            ServerStatus::SoftDeleted => "SOFT_DELETED",
            ServerStatus::Error => "ERROR",
            ServerStatus::Unknown => "UNKNOWN",
            ServerStatus::Unrecognized => "UNRECOGNIZED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerRequest {
    pub name: String,
    #[serde(rename = "imageRef")]
    pub image_ref: String,
    #[serde(rename = "flavorRef")]
    pub flavor_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<ServerNetwork>,
}

/// A network attachment: either a whole network or a pre-created port
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerNetwork {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl ServerNetwork {
    pub fn network(id: impl Into<String>) -> Self {
        Self {
            uuid: Some(id.into()),
            port: None,
        }
    }

    pub fn port(id: impl Into<String>) -> Self {
        Self {
            uuid: None,
            port: Some(id.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vcpus: i64,
    /// MB
    #[serde(default)]
    pub ram: i64,
}

/// `limits.absolute` of the compute service; `-1` is unlimited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsoluteLimits {
    #[serde(default = "unlimited")]
    pub max_total_instances: i64,
    #[serde(default = "unlimited")]
    pub max_total_cores: i64,
    #[serde(rename = "maxTotalRAMSize", default = "unlimited")]
    pub max_total_ram_size: i64,
    #[serde(default)]
    pub total_instances_used: i64,
    #[serde(default)]
    pub total_cores_used: i64,
    #[serde(rename = "totalRAMUsed", default)]
    pub total_ram_used: i64,
}

impl Default for AbsoluteLimits {
    fn default() -> Self {
        Self {
            max_total_instances: -1,
            max_total_cores: -1,
            max_total_ram_size: -1,
            total_instances_used: 0,
            total_cores_used: 0,
            total_ram_used: 0,
        }
    }
}

fn unlimited() -> i64 {
    -1
}

// ============ Networking ============

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Subnet ids
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub admin_state_up: bool,
    #[serde(rename = "router:external", default)]
    pub router_external: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkRequest {
    pub name: String,
    pub admin_state_up: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub gateway_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubnetRequest {
    pub network_id: String,
    pub name: String,
    pub cidr: String,
    pub ip_version: u8,
    pub enable_dhcp: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns_nameservers: Vec<String>,
    /// Absent: let the service pick. `Some(None)`: explicitly no gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ip: Option<Option<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_routes: Vec<HostRoute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRoute {
    pub destination: String,
    pub nexthop: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Router {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub admin_state_up: bool,
    #[serde(default)]
    pub external_gateway_info: Option<ExternalGatewayInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalGatewayInfo {
    pub network_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterRequest {
    pub name: String,
    pub admin_state_up: bool,
    pub external_gateway_info: ExternalGatewayInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub security_groups: Vec<String>,
}

impl Port {
    pub fn first_ip(&self) -> Option<&str> {
        self.fixed_ips.iter().find_map(|ip| ip.ip_address.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortRequest {
    pub network_id: String,
    pub fixed_ips: Vec<FixedIp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    #[serde(default)]
    pub floating_ip_address: String,
    #[serde(default)]
    pub fixed_ip_address: Option<String>,
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub floating_network_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatingIpRequest {
    pub floating_network_id: String,
    /// Absent: allocate without binding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_ip_address: Option<String>,
}

/// Per-tenant networking quotas; `-1` is unlimited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkQuota {
    #[serde(default = "unlimited")]
    pub floatingip: i64,
    #[serde(default = "unlimited")]
    pub security_group: i64,
    #[serde(default = "unlimited")]
    pub security_group_rule: i64,
    #[serde(default = "unlimited")]
    pub network: i64,
    #[serde(default = "unlimited")]
    pub subnet: i64,
    #[serde(default = "unlimited")]
    pub router: i64,
}

impl Default for NetworkQuota {
    fn default() -> Self {
        Self {
            floatingip: -1,
            security_group: -1,
            security_group_rule: -1,
            network: -1,
            subnet: -1,
            router: -1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub security_group_rules: Vec<SecurityGroupRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => write!(f, "ingress"),
            Direction::Egress => write!(f, "egress"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub id: String,
    #[serde(default)]
    pub security_group_id: String,
    pub direction: Direction,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub port_range_min: Option<u16>,
    #[serde(default)]
    pub port_range_max: Option<u16>,
    #[serde(default)]
    pub remote_ip_prefix: Option<String>,
    #[serde(default)]
    pub remote_group_id: Option<String>,
}

impl SecurityGroupRule {
    /// The allow-all egress rule Neutron puts on every new group
    pub fn is_default_egress(&self) -> bool {
        self.direction == Direction::Egress
            && self.port_range_min.is_none()
            && self.port_range_max.is_none()
            && self.remote_ip_prefix.is_none()
            && self.remote_group_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SecurityGroupRuleRequest {
    pub security_group_id: String,
    pub direction: Direction,
    pub protocol: String,
    pub port_range_min: u16,
    pub port_range_max: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_group_id: Option<String>,
}
