//! FleetStack Cloud Model
//!
//! This crate provides the provider-neutral side of FleetStack: the cloud
//! configuration model, access rules, the naming scheme and the
//! [`ProvisioningDriver`] trait that concrete IaaS engines implement.
//!
//! # Supported Providers
//!
//! - **OpenStack**: Nova compute, Neutron networking (fleetstack-openstack)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 FleetStack CLI                   │
//! │          (fleetstack bootstrap/start)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               fleetstack-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │          Driver Abstraction               │   │
//! │  │  trait ProvisioningDriver { ... }         │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ Cloud Config │  │    Naming    │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │   openstack   │
//! │    driver     │
//! └───────────────┘
//! ```

pub mod config;
pub mod deadline;
pub mod error;
pub mod naming;
pub mod port_range;
pub mod provider;

// Re-exports
pub use config::{
    AccessRule, AccessRuleType, AccessRules, CloudConfig, CloudNetwork, CloudUser,
    ComputeTemplate, DEFAULT_MANAGEMENT_GROUP, DISCOVERY_MULTICAST_PORTS, ManagementComponents,
    NetworkConfiguration, ProviderSettings, ServiceNetwork, SubnetConfig,
};
pub use deadline::Deadline;
pub use error::{CloudError, Result};
pub use naming::{NameAllocator, ResourcePrefixes, ServiceScope};
pub use port_range::{PortRange, PortRangeEntry};
pub use provider::{
    APPLICATION_NETWORK_IP, MachineDetails, MachineRequest, PollConfig, ProvisioningDriver,
};
