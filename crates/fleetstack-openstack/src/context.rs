//! Everything resolved once before a machine is started

use crate::topology::NetworkTopology;
use fleetstack_cloud::{
    CloudConfig, ComputeTemplate, MachineRequest, ManagementComponents, ResourcePrefixes, Result,
    ServiceScope,
};

pub const OPT_KEY_PAIR_NAME: &str = "keyPairName";
pub const OPT_COMPUTE_SERVICE_NAME: &str = "computeServiceName";
pub const OPT_NETWORK_SERVICE_NAME: &str = "networkServiceName";
pub const OPT_NETWORK_API_VERSION: &str = "networkApiVersion";
pub const OPT_SECURITY_GROUP_NAMES: &str = "securityGroupNames";

/// Template custom key naming the availability zone
pub const CUSTOM_COMPUTE_ZONE: &str = "openstack.compute.zone";

/// Template override key holding the identity endpoint
pub const OVERRIDE_ENDPOINT: &str = "openstack.endpoint";

/// Immutable per-request state shared by the orchestrator steps
#[derive(Debug, Clone)]
pub struct ProvisioningContext {
    prefixes: ResourcePrefixes,
    scope: Option<ServiceScope>,
    template: ComputeTemplate,
    topology: NetworkTopology,
    location_id: Option<String>,
    server_name_prefix: String,
    components: ManagementComponents,
    management_file_transfer_port: u16,
}

impl ProvisioningContext {
    pub fn new(config: &CloudConfig, request: &MachineRequest) -> Result<Self> {
        let prefixes = ResourcePrefixes::new(config.management_group());
        let topology = NetworkTopology::resolve(config, request, &prefixes)?;
        let management_file_transfer_port = config.management_compute_template()?.file_transfer_port;

        let server_name_prefix = match &request.scope {
            Some(scope) => {
                ResourcePrefixes::service_machines(&config.provider.machine_name_prefix, scope)
            }
            None => prefixes.prefix().to_string(),
        };

        let location_id = match &request.location_id {
            Some(location) => Some(location.clone()),
            None => request
                .template
                .custom_str(CUSTOM_COMPUTE_ZONE)?
                .map(str::to_string),
        };

        Ok(Self {
            prefixes,
            scope: request.scope.clone(),
            template: request.template.clone(),
            topology,
            location_id,
            server_name_prefix,
            components: config.components.clone(),
            management_file_transfer_port,
        })
    }

    /// Context of a management machine
    pub fn management(config: &CloudConfig) -> Result<Self> {
        let template = config.management_compute_template()?.clone();
        Self::new(config, &MachineRequest::management(template))
    }

    pub fn prefixes(&self) -> &ResourcePrefixes {
        &self.prefixes
    }

    pub fn scope(&self) -> Option<&ServiceScope> {
        self.scope.as_ref()
    }

    pub fn is_management(&self) -> bool {
        self.scope.is_none()
    }

    pub fn template(&self) -> &ComputeTemplate {
        &self.template
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    pub fn location_id(&self) -> Option<&str> {
        self.location_id.as_deref()
    }

    pub fn server_name_prefix(&self) -> &str {
        &self.server_name_prefix
    }

    pub fn components(&self) -> &ManagementComponents {
        &self.components
    }

    /// File transfer port of the management template, opened to the internet
    pub fn management_file_transfer_port(&self) -> u16 {
        self.management_file_transfer_port
    }

    pub fn key_pair_name(&self) -> Option<&str> {
        self.template.option_str(OPT_KEY_PAIR_NAME)
    }

    /// Names of the security groups put on every port of the machine
    pub fn assigned_security_groups(&self) -> Vec<String> {
        let mut names = match &self.scope {
            None => vec![
                self.prefixes.management_group(),
                self.prefixes.cluster_group(),
            ],
            Some(scope) => {
                let mut names = vec![
                    self.prefixes.agent_group(),
                    self.prefixes.cluster_group(),
                    self.prefixes.application_group(&scope.application),
                    self.prefixes.service_group(scope),
                ];
                if self.topology.access_rules().has_public() {
                    names.push(self.prefixes.service_public_group(scope));
                }
                names
            }
        };

        for extra in self.template.option_list(OPT_SECURITY_GROUP_NAMES) {
            if !names.contains(&extra) {
                names.push(extra);
            }
        }
        names
    }
}
