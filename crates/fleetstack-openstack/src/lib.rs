//! FleetStack OpenStack Provider
//!
//! This crate provides the OpenStack implementation of
//! [`fleetstack_cloud::ProvisioningDriver`]: Keystone (v2) sessions, Nova
//! compute and Neutron networking clients, and the engine that turns compute
//! templates into running, network-isolated machines.
//!
//! # Architecture
//!
//! ```text
//! OpenStackDriver
//!   ├── CloudValidator            (pre-flight checks, quotas)
//!   ├── FloatingIpManager         (addresses managed apart from machines)
//!   ├── ProvisioningCoordinator   (management cluster fan-out, rollback)
//!   └── MachineOrchestrator       (one machine: create, poll, attach, release)
//!         ├── NetworkTopology     (pure: which networks, floating ip or not)
//!         ├── SecurityGroupSynthesizer
//!         ├── NetworkProvisioner
//!         └── ComputeApi / NetworkApi
//!               └── RestClient ── SessionManager ── Authenticator
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fleetstack_cloud::{CloudConfig, ProvisioningDriver};
//! use fleetstack_openstack::OpenStackDriver;
//! use std::time::Duration;
//!
//! # async fn example(config: CloudConfig) -> fleetstack_cloud::Result<()> {
//! let driver = OpenStackDriver::connect(config)?;
//! let machines = driver
//!     .start_management_machines(1, Duration::from_secs(600))
//!     .await?;
//! for machine in machines {
//!     println!("{}", machine.describe());
//! }
//! # Ok(())
//! # }
//! ```

pub mod compute;
pub mod context;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod floating;
pub mod http;
pub mod lifecycle;
pub mod models;
pub mod network;
pub mod networking;
pub mod security;
pub mod session;
pub mod topology;
pub mod validation;

pub use compute::{ComputeApi, ComputeClient};
pub use context::ProvisioningContext;
pub use coordinator::ProvisioningCoordinator;
pub use driver::OpenStackDriver;
pub use error::{OpenStackError, Result};
pub use floating::FloatingIpManager;
pub use lifecycle::MachineOrchestrator;
pub use network::{CreationLocks, NetworkApi, NetworkClient};
pub use networking::NetworkProvisioner;
pub use security::SecurityGroupSynthesizer;
pub use session::{Authenticator, Credentials, KeystoneAuthenticator, SessionManager, Token};
pub use topology::NetworkTopology;
pub use validation::CloudValidator;
