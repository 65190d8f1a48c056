//! In-memory cloud shared by the integration tests
//!
//! Implements both `ComputeApi` and `NetworkApi` over one state, records every
//! mutating call as an event, and scripts server statuses per server name.

#![allow(dead_code)]

use async_trait::async_trait;
use fleetstack_cloud::{
    CloudConfig, ComputeTemplate, NetworkConfiguration, PollConfig, SubnetConfig,
};
use fleetstack_openstack::compute::ComputeApi;
use fleetstack_openstack::error::{OpenStackError, Result};
use fleetstack_openstack::models::*;
use fleetstack_openstack::network::{CreationLocks, NetworkApi};
use fleetstack_openstack::{MachineOrchestrator, OpenStackDriver};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PREFIX: &str = "fleetstack-manager-";

type StatusScript = Box<dyn Fn(&str) -> Vec<ServerStatus> + Send + Sync>;

struct FakeServer {
    id: String,
    name: String,
    statuses: VecDeque<ServerStatus>,
}

#[derive(Default)]
pub struct State {
    servers: Vec<FakeServer>,
    pub networks: Vec<Network>,
    pub subnets: Vec<Subnet>,
    pub routers: Vec<Router>,
    pub ports: Vec<Port>,
    pub floating_ips: Vec<FloatingIp>,
    pub security_groups: Vec<SecurityGroup>,
    pub images: Vec<Image>,
    pub flavors: Vec<Flavor>,
    pub limits: AbsoluteLimits,
    pub quota: Option<NetworkQuota>,
    pub events: Vec<String>,
    next_id: u32,
    next_ip: u32,
    next_public_ip: u32,
}

impl State {
    fn id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", kind, self.next_id)
    }

    fn private_ip(&mut self) -> String {
        let ip = format!("10.0.0.{}", 5 + self.next_ip);
        self.next_ip += 1;
        ip
    }

    fn network_name(&self, network_id: &str) -> String {
        self.networks
            .iter()
            .find(|n| n.id == network_id)
            .map(|n| n.name.clone())
            .unwrap_or_default()
    }
}

pub struct FakeCloud {
    state: Mutex<State>,
    script: StatusScript,
    locks: CreationLocks,
    crash_on_poll: Mutex<Option<String>>,
}

impl FakeCloud {
    /// Every server becomes ACTIVE on its first poll
    pub fn new() -> Arc<Self> {
        Self::with_script(|_| vec![ServerStatus::Active])
    }

    /// `script(name)` lists the statuses of successive polls; the last repeats
    pub fn with_script(script: impl Fn(&str) -> Vec<ServerStatus> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            script: Box::new(script),
            locks: CreationLocks::default(),
            crash_on_poll: Mutex::new(None),
        })
    }

    /// The first status poll of a server whose name ends with `suffix` panics
    pub fn crash_on_first_poll(&self, suffix: &str) {
        *self.crash_on_poll.lock().unwrap() = Some(suffix.to_string());
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    /// Number of events starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Index of the first event starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.state().events.iter().position(|e| e.starts_with(prefix))
    }

    pub fn server_names(&self) -> Vec<String> {
        self.state().servers.iter().map(|s| s.name.clone()).collect()
    }

    pub fn security_group_names(&self) -> Vec<String> {
        self.state()
            .security_groups
            .iter()
            .map(|g| g.name.clone())
            .collect()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.state().networks.iter().map(|n| n.name.clone()).collect()
    }

    /// Add a pre-existing network with one subnet per CIDR
    pub fn seed_network(&self, name: &str, cidrs: &[&str], external: bool) -> String {
        let mut state = self.state();
        let network_id = state.id("net");
        let mut subnet_ids = Vec::new();
        for (i, cidr) in cidrs.iter().enumerate() {
            let subnet_id = state.id("subnet");
            state.subnets.push(Subnet {
                id: subnet_id.clone(),
                name: format!("{}-subnet-{}", name, i),
                network_id: network_id.clone(),
                cidr: cidr.to_string(),
                gateway_ip: None,
            });
            subnet_ids.push(subnet_id);
        }
        state.networks.push(Network {
            id: network_id.clone(),
            name: name.to_string(),
            subnets: subnet_ids,
            admin_state_up: true,
            router_external: external,
        });
        network_id
    }

    /// Add a running server that the engine did not create
    pub fn seed_server(&self, name: &str) -> String {
        let mut state = self.state();
        let id = state.id("srv");
        state.servers.push(FakeServer {
            id: id.clone(),
            name: name.to_string(),
            statuses: VecDeque::from(vec![ServerStatus::Active]),
        });
        id
    }

    fn record(&self, state: &mut State, event: String) {
        state.events.push(event);
    }

    fn not_found(what: &str) -> OpenStackError {
        OpenStackError::ServerApi {
            status: 404,
            body: format!("{} could not be found", what),
        }
    }

    fn server_view(state: &State, server: &FakeServer, status: ServerStatus) -> Server {
        let mut addresses: HashMap<String, Vec<ServerAddress>> = HashMap::new();
        let mut groups = Vec::new();
        for port in state.ports.iter().filter(|p| p.device_id == server.id) {
            let network = state.network_name(&port.network_id);
            for ip in port.fixed_ips.iter().filter_map(|f| f.ip_address.clone()) {
                addresses.entry(network.clone()).or_default().push(ServerAddress {
                    addr: ip,
                    version: Some(4),
                });
            }
            for group_id in &port.security_groups {
                if let Some(group) = state.security_groups.iter().find(|g| &g.id == group_id) {
                    groups.push(NamedRef {
                        name: group.name.clone(),
                    });
                }
            }
        }

        Server {
            id: server.id.clone(),
            name: server.name.clone(),
            status,
            addresses,
            security_groups: groups,
            availability_zone: Some("nova".to_string()),
        }
    }
}

#[async_trait]
impl ComputeApi for FakeCloud {
    async fn create_server(&self, request: &ServerRequest) -> Result<Server> {
        let mut state = self.state();
        let id = state.id("srv");
        self.record(&mut state, format!("create_server:{}", request.name));

        for attachment in &request.networks {
            if let Some(port_id) = &attachment.port {
                if let Some(port) = state.ports.iter_mut().find(|p| &p.id == port_id) {
                    port.device_id = id.clone();
                }
            } else if let Some(network_id) = &attachment.uuid {
                let subnet_id = state
                    .networks
                    .iter()
                    .find(|n| &n.id == network_id)
                    .and_then(|n| n.subnets.first().cloned())
                    .unwrap_or_default();
                let port_id = state.id("port");
                let ip = state.private_ip();
                state.ports.push(Port {
                    id: port_id,
                    network_id: network_id.clone(),
                    device_id: id.clone(),
                    fixed_ips: vec![FixedIp {
                        subnet_id,
                        ip_address: Some(ip),
                    }],
                    security_groups: Vec::new(),
                });
            }
        }

        let statuses = VecDeque::from((self.script)(&request.name));
        let server = FakeServer {
            id: id.clone(),
            name: request.name.clone(),
            statuses,
        };
        let view = Self::server_view(&state, &server, ServerStatus::Build);
        state.servers.push(server);
        Ok(view)
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let state = self.state();
        Ok(state
            .servers
            .iter()
            .map(|s| Server {
                id: s.id.clone(),
                name: s.name.clone(),
                ..Default::default()
            })
            .collect())
    }

    async fn server_details(&self, server_id: &str) -> Result<Option<Server>> {
        let crash = {
            let state = self.state();
            let name = state.servers.iter().find(|s| s.id == server_id).map(|s| s.name.clone());
            let mut armed = self.crash_on_poll.lock().unwrap();
            let hit = name
                .as_deref()
                .zip(armed.as_deref())
                .is_some_and(|(name, suffix)| name.ends_with(suffix));
            if hit {
                armed.take();
                name
            } else {
                None
            }
        };
        if let Some(name) = crash {
            panic!("status poll of {} crashed", name);
        }

        let mut state = self.state();
        let Some(index) = state.servers.iter().position(|s| s.id == server_id) else {
            return Ok(None);
        };
        let status = {
            let server = &mut state.servers[index];
            if server.statuses.len() > 1 {
                server.statuses.pop_front().unwrap_or(ServerStatus::Active)
            } else {
                server.statuses.front().copied().unwrap_or(ServerStatus::Active)
            }
        };
        let server = &state.servers[index];
        Ok(Some(Self::server_view(&state, server, status)))
    }

    async fn delete_server(&self, server_id: &str) -> Result<()> {
        let mut state = self.state();
        let Some(index) = state.servers.iter().position(|s| s.id == server_id) else {
            return Ok(());
        };
        let server = state.servers.remove(index);
        self.record(&mut state, format!("delete_server:{}", server.name));
        state.ports.retain(|p| p.device_id != server_id);
        Ok(())
    }

    async fn image(&self, image_id: &str) -> Result<Option<Image>> {
        Ok(self.state().images.iter().find(|i| i.id == image_id).cloned())
    }

    async fn images(&self) -> Result<Vec<Image>> {
        Ok(self.state().images.clone())
    }

    async fn flavor(&self, flavor_id: &str) -> Result<Option<Flavor>> {
        Ok(self.state().flavors.iter().find(|f| f.id == flavor_id).cloned())
    }

    async fn flavors(&self) -> Result<Vec<Flavor>> {
        Ok(self.state().flavors.clone())
    }

    async fn limits(&self) -> Result<AbsoluteLimits> {
        Ok(self.state().limits.clone())
    }
}

#[async_trait]
impl NetworkApi for FakeCloud {
    fn creation_locks(&self) -> &CreationLocks {
        &self.locks
    }

    async fn networks(&self) -> Result<Vec<Network>> {
        Ok(self.state().networks.clone())
    }

    async fn network_by_name(&self, name: &str) -> Result<Option<Network>> {
        Ok(self.state().networks.iter().find(|n| n.name == name).cloned())
    }

    async fn external_networks(&self) -> Result<Vec<Network>> {
        Ok(self
            .state()
            .networks
            .iter()
            .filter(|n| n.router_external)
            .cloned()
            .collect())
    }

    async fn create_network(&self, request: &NetworkRequest) -> Result<Network> {
        let mut state = self.state();
        let network = Network {
            id: state.id("net"),
            name: request.name.clone(),
            subnets: Vec::new(),
            admin_state_up: request.admin_state_up,
            router_external: false,
        };
        self.record(&mut state, format!("create_network:{}", request.name));
        state.networks.push(network.clone());
        Ok(network)
    }

    async fn delete_network(&self, network_id: &str) -> Result<()> {
        let mut state = self.state();
        let Some(index) = state.networks.iter().position(|n| n.id == network_id) else {
            return Ok(());
        };
        let network = state.networks.remove(index);
        self.record(&mut state, format!("delete_network:{}", network.name));
        state.ports.retain(|p| p.network_id != network_id);
        state.subnets.retain(|s| s.network_id != network_id);
        Ok(())
    }

    async fn subnets_by_network(&self, network_id: &str) -> Result<Vec<Subnet>> {
        Ok(self
            .state()
            .subnets
            .iter()
            .filter(|s| s.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn create_subnet(&self, request: &SubnetRequest) -> Result<Subnet> {
        let mut state = self.state();
        let subnet = Subnet {
            id: state.id("subnet"),
            name: request.name.clone(),
            network_id: request.network_id.clone(),
            cidr: request.cidr.clone(),
            gateway_ip: request.gateway_ip.clone().flatten(),
        };
        let Some(network) = state.networks.iter_mut().find(|n| n.id == request.network_id) else {
            return Err(Self::not_found("network"));
        };
        network.subnets.push(subnet.id.clone());
        self.record(&mut state, format!("create_subnet:{}", request.name));
        state.subnets.push(subnet.clone());
        Ok(subnet)
    }

    async fn router_by_name(&self, name: &str) -> Result<Option<Router>> {
        Ok(self.state().routers.iter().find(|r| r.name == name).cloned())
    }

    async fn create_router(&self, request: &RouterRequest) -> Result<Router> {
        let mut state = self.state();
        let router = Router {
            id: state.id("router"),
            name: request.name.clone(),
            admin_state_up: request.admin_state_up,
            external_gateway_info: Some(request.external_gateway_info.clone()),
        };
        self.record(&mut state, format!("create_router:{}", request.name));
        state.routers.push(router.clone());
        Ok(router)
    }

    async fn delete_router(&self, router_id: &str) -> Result<()> {
        let mut state = self.state();
        state.routers.retain(|r| r.id != router_id);
        self.record(&mut state, format!("delete_router:{}", router_id));
        Ok(())
    }

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        let mut state = self.state();
        let network_id = state
            .subnets
            .iter()
            .find(|s| s.id == subnet_id)
            .map(|s| s.network_id.clone())
            .ok_or_else(|| Self::not_found("subnet"))?;
        let port_id = state.id("port");
        state.ports.push(Port {
            id: port_id,
            network_id,
            device_id: router_id.to_string(),
            fixed_ips: vec![FixedIp {
                subnet_id: subnet_id.to_string(),
                ip_address: Some("10.0.0.1".to_string()),
            }],
            security_groups: Vec::new(),
        });
        self.record(&mut state, format!("add_router_interface:{}", subnet_id));
        Ok(())
    }

    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        let mut state = self.state();
        state.ports.retain(|p| {
            !(p.device_id == router_id && p.fixed_ips.iter().any(|f| f.subnet_id == subnet_id))
        });
        self.record(&mut state, format!("remove_router_interface:{}", subnet_id));
        Ok(())
    }

    async fn port(&self, device_id: &str, network_id: &str) -> Result<Option<Port>> {
        Ok(self
            .state()
            .ports
            .iter()
            .find(|p| p.device_id == device_id && p.network_id == network_id)
            .cloned())
    }

    async fn ports_by_device(&self, device_id: &str) -> Result<Vec<Port>> {
        Ok(self
            .state()
            .ports
            .iter()
            .filter(|p| p.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn ports_by_network(&self, network_id: &str) -> Result<Vec<Port>> {
        Ok(self
            .state()
            .ports
            .iter()
            .filter(|p| p.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn create_port(&self, request: &PortRequest) -> Result<Port> {
        let mut state = self.state();
        let id = state.id("port");
        let mut fixed_ips = Vec::new();
        for fixed_ip in &request.fixed_ips {
            let ip = state.private_ip();
            fixed_ips.push(FixedIp {
                subnet_id: fixed_ip.subnet_id.clone(),
                ip_address: Some(ip),
            });
        }
        let port = Port {
            id,
            network_id: request.network_id.clone(),
            device_id: String::new(),
            fixed_ips,
            security_groups: Vec::new(),
        };
        self.record(&mut state, format!("create_port:{}", port.id));
        state.ports.push(port.clone());
        Ok(port)
    }

    async fn update_port_security_groups(&self, port_id: &str, security_group_ids: &[String]) -> Result<Port> {
        let mut state = self.state();
        let port = state
            .ports
            .iter_mut()
            .find(|p| p.id == port_id)
            .ok_or_else(|| Self::not_found("port"))?;
        port.security_groups = security_group_ids.to_vec();
        let port = port.clone();
        self.record(&mut state, format!("update_port:{}", port_id));
        Ok(port)
    }

    async fn delete_port(&self, port_id: &str) -> Result<()> {
        let mut state = self.state();
        state.ports.retain(|p| p.id != port_id);
        self.record(&mut state, format!("delete_port:{}", port_id));
        Ok(())
    }

    async fn floating_ips(&self) -> Result<Vec<FloatingIp>> {
        Ok(self.state().floating_ips.clone())
    }

    async fn floating_ip_by_address(&self, address: &str) -> Result<Option<FloatingIp>> {
        Ok(self
            .state()
            .floating_ips
            .iter()
            .find(|f| f.floating_ip_address == address)
            .cloned())
    }

    async fn floating_ip_by_port(&self, port_id: &str) -> Result<Option<FloatingIp>> {
        Ok(self
            .state()
            .floating_ips
            .iter()
            .find(|f| f.port_id.as_deref() == Some(port_id))
            .cloned())
    }

    async fn floating_ip_by_fixed_ip(&self, fixed_ip: &str) -> Result<Option<FloatingIp>> {
        Ok(self
            .state()
            .floating_ips
            .iter()
            .find(|f| f.fixed_ip_address.as_deref() == Some(fixed_ip))
            .cloned())
    }

    async fn create_floating_ip(&self, request: &FloatingIpRequest) -> Result<FloatingIp> {
        let mut state = self.state();
        state.next_public_ip += 1;
        let floating_ip = FloatingIp {
            id: state.id("fip"),
            floating_ip_address: format!("203.0.113.{}", state.next_public_ip),
            fixed_ip_address: request.fixed_ip_address.clone(),
            port_id: request.port_id.clone(),
            floating_network_id: request.floating_network_id.clone(),
        };
        self.record(
            &mut state,
            format!("create_floating_ip:{}", floating_ip.floating_ip_address),
        );
        state.floating_ips.push(floating_ip.clone());
        Ok(floating_ip)
    }

    async fn delete_floating_ip(&self, floating_ip_id: &str) -> Result<()> {
        let mut state = self.state();
        state.floating_ips.retain(|f| f.id != floating_ip_id);
        self.record(&mut state, format!("delete_floating_ip:{}", floating_ip_id));
        Ok(())
    }

    async fn update_floating_ip_port(&self, floating_ip_id: &str, port_id: Option<&str>) -> Result<FloatingIp> {
        let mut state = self.state();
        let fixed_ip = match port_id {
            Some(port_id) => Some(
                state
                    .ports
                    .iter()
                    .find(|p| p.id == port_id)
                    .ok_or_else(|| Self::not_found(port_id))?
                    .first_ip()
                    .map(str::to_string),
            ),
            None => None,
        };
        let floating_ip = {
            let floating_ip = state
                .floating_ips
                .iter_mut()
                .find(|f| f.id == floating_ip_id)
                .ok_or_else(|| Self::not_found(floating_ip_id))?;
            floating_ip.port_id = port_id.map(str::to_string);
            floating_ip.fixed_ip_address = fixed_ip.flatten();
            floating_ip.clone()
        };
        self.record(
            &mut state,
            format!(
                "update_floating_ip:{}:{}",
                floating_ip_id,
                port_id.unwrap_or("none")
            ),
        );
        Ok(floating_ip)
    }

    async fn quotas(&self) -> Result<Option<NetworkQuota>> {
        Ok(self.state().quota.clone())
    }

    async fn security_groups(&self) -> Result<Vec<SecurityGroup>> {
        Ok(self.state().security_groups.clone())
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup> {
        let mut state = self.state();
        let id = state.id("sg");
        let default_egress = SecurityGroupRule {
            id: state.id("rule"),
            security_group_id: id.clone(),
            direction: Direction::Egress,
            protocol: None,
            port_range_min: None,
            port_range_max: None,
            remote_ip_prefix: None,
            remote_group_id: None,
        };
        let group = SecurityGroup {
            id,
            name: name.to_string(),
            description: description.to_string(),
            security_group_rules: vec![default_egress],
        };
        self.record(&mut state, format!("create_security_group:{}", name));
        state.security_groups.push(group.clone());
        Ok(group)
    }

    async fn delete_security_group(&self, security_group_id: &str) -> Result<()> {
        let mut state = self.state();
        let Some(index) = state
            .security_groups
            .iter()
            .position(|g| g.id == security_group_id)
        else {
            return Ok(());
        };
        let group = state.security_groups.remove(index);
        self.record(&mut state, format!("delete_security_group:{}", group.name));
        Ok(())
    }

    async fn create_security_group_rule(
        &self,
        request: &SecurityGroupRuleRequest,
    ) -> Result<Option<SecurityGroupRule>> {
        let mut state = self.state();
        let rule_id = state.id("rule");
        let Some(group) = state
            .security_groups
            .iter_mut()
            .find(|g| g.id == request.security_group_id)
        else {
            return Err(Self::not_found("security group"));
        };

        let duplicate = group.security_group_rules.iter().any(|r| {
            r.direction == request.direction
                && r.port_range_min == Some(request.port_range_min)
                && r.port_range_max == Some(request.port_range_max)
                && r.remote_ip_prefix == request.remote_ip_prefix
                && r.remote_group_id == request.remote_group_id
        });
        if duplicate {
            return Ok(None);
        }

        let rule = SecurityGroupRule {
            id: rule_id,
            security_group_id: request.security_group_id.clone(),
            direction: request.direction,
            protocol: Some(request.protocol.clone()),
            port_range_min: Some(request.port_range_min),
            port_range_max: Some(request.port_range_max),
            remote_ip_prefix: request.remote_ip_prefix.clone(),
            remote_group_id: request.remote_group_id.clone(),
        };
        group.security_group_rules.push(rule.clone());
        let group_name = group.name.clone();
        self.record(
            &mut state,
            format!(
                "create_rule:{}:{}:{}-{}",
                group_name, request.direction, request.port_range_min, request.port_range_max
            ),
        );
        Ok(Some(rule))
    }

    async fn delete_security_group_rule(&self, rule_id: &str) -> Result<()> {
        let mut state = self.state();
        for group in state.security_groups.iter_mut() {
            group.security_group_rules.retain(|r| r.id != rule_id);
        }
        self.record(&mut state, format!("delete_rule:{}", rule_id));
        Ok(())
    }
}

pub fn template(networks: &[&str]) -> ComputeTemplate {
    ComputeTemplate {
        image_id: "region-a/img1".to_string(),
        hardware_id: "region-a/flav1".to_string(),
        compute_networks: networks.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// Management template on the pre-existing `private-net`, no managed networks
pub fn compute_network_config() -> CloudConfig {
    let mut config = CloudConfig {
        name: "test".to_string(),
        management_template: "MGMT".to_string(),
        ..Default::default()
    };
    config
        .templates
        .insert("MGMT".to_string(), template(&["private-net"]));
    config
}

/// Managed management network with floating IPs on bootstrap
pub fn managed_network_config() -> CloudConfig {
    let mut config = compute_network_config();
    config.templates.insert("MGMT".to_string(), template(&[]));
    config.network.management = Some(managed_network("mgmt", "10.4.0.0/24", true));
    config
}

pub fn managed_network(name: &str, range: &str, associate: bool) -> NetworkConfiguration {
    let mut custom = HashMap::new();
    if associate {
        custom.insert(
            "associateFloatingIpOnBootstrap".to_string(),
            "true".to_string(),
        );
    }
    NetworkConfiguration {
        name: Some(name.to_string()),
        subnets: vec![SubnetConfig {
            name: format!("{}-subnet", name),
            range: range.to_string(),
            options: HashMap::new(),
        }],
        custom,
    }
}

pub fn fast_poll() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(500),
    }
}

pub fn orchestrator(cloud: &Arc<FakeCloud>) -> MachineOrchestrator {
    MachineOrchestrator::new(cloud.clone(), cloud.clone()).with_poll(fast_poll())
}

pub fn driver(config: CloudConfig, cloud: &Arc<FakeCloud>) -> OpenStackDriver {
    OpenStackDriver::with_orchestrator(config, orchestrator(cloud)).unwrap()
}
