//! Network topology resolution
//!
//! Decides from configuration alone which networks a machine is attached to,
//! which of them carries its private address and whether it gets a floating
//! IP. Nothing here talks to the cloud; lookups of the resolved names happen
//! later in the orchestrator.

use fleetstack_cloud::config::flag;
use fleetstack_cloud::{
    AccessRules, CloudConfig, CloudError, ComputeTemplate, MachineRequest, NetworkConfiguration,
    ResourcePrefixes, Result,
};

/// Network custom flag requesting a floating IP for every machine
pub const ASSOCIATE_FLOATING_IP_ON_BOOTSTRAP: &str = "associateFloatingIpOnBootstrap";

pub const OPT_SKIP_EXTERNAL_NETWORKING: &str = "skipExternalNetworking";
pub const OPT_EXTERNAL_ROUTER_NAME: &str = "externalRouterName";
pub const OPT_EXTERNAL_NETWORK_NAME: &str = "externalNetworkName";

/// A network the engine creates, under its prefixed name
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedNetwork {
    pub name: String,
    pub config: NetworkConfiguration,
}

/// How the management network reaches the outside world
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalNetworking {
    pub skip: bool,

    /// Existing router to attach to; a router is created when unset
    pub router_name: Option<String>,

    /// External network of a created router; the first external network when unset
    pub network_name: Option<String>,
}

impl ExternalNetworking {
    pub fn from_template(template: &ComputeTemplate) -> Self {
        Self {
            skip: flag(template.options.get(OPT_SKIP_EXTERNAL_NETWORKING)),
            router_name: template.option_str(OPT_EXTERNAL_ROUTER_NAME).map(str::to_string),
            network_name: template.option_str(OPT_EXTERNAL_NETWORK_NAME).map(str::to_string),
        }
    }

    pub fn creates_router(&self) -> bool {
        self.router_name.is_none()
    }
}

/// Resolved networking of one machine
#[derive(Debug, Clone)]
pub struct NetworkTopology {
    management: bool,
    management_network: Option<ManagedNetwork>,
    application_network: Option<ManagedNetwork>,
    compute_networks: Vec<String>,
    private_ip_network: String,
    application_network_name: Option<String>,
    associate_floating_ip: bool,
    access_rules: AccessRules,
    external: ExternalNetworking,
}

impl NetworkTopology {
    /// Resolve the networking of `request` (no I/O)
    pub fn resolve(
        config: &CloudConfig,
        request: &MachineRequest,
        prefixes: &ResourcePrefixes,
    ) -> Result<Self> {
        let management_template = config.management_compute_template()?;
        let management_compute_networks = management_template.compute_networks.clone();

        let management_network = config
            .network
            .management
            .as_ref()
            .filter(|n| n.name.is_some() && !n.subnets.is_empty())
            .map(|n| ManagedNetwork {
                name: prefixes.network(n.name.as_deref().unwrap_or_default()),
                config: n.clone(),
            });

        if management_network.is_none() && management_compute_networks.is_empty() {
            return Err(CloudError::InvalidConfig(
                "a network must be provided to the management machines \
                 (use either network.management or the compute_networks of the management template)"
                    .to_string(),
            ));
        }

        let external = ExternalNetworking::from_template(management_template);
        let management = request.is_management();

        if management {
            let private_ip_network = match &management_network {
                Some(network) => network.name.clone(),
                None => management_compute_networks[0].clone(),
            };
            let associate_floating_ip = Self::floating_ip_policy(
                true,
                management_network.as_ref(),
                None,
                &management_compute_networks,
            );
            return Ok(Self {
                management,
                management_network,
                application_network: None,
                compute_networks: management_compute_networks,
                private_ip_network,
                application_network_name: None,
                associate_floating_ip,
                access_rules: AccessRules::default(),
                external,
            });
        }

        // Service machine
        let mut compute_networks = request.template.compute_networks.clone();
        let access_rules = request
            .network
            .as_ref()
            .map(|n| n.access_rules.clone())
            .unwrap_or_default();

        let mut uses_template = false;
        let mut service_network: Option<NetworkConfiguration> = None;

        match request.network.as_ref().and_then(|n| n.template.as_deref()) {
            Some(template_name) => {
                let template = config.network.templates.get(template_name).ok_or_else(|| {
                    CloudError::InvalidConfig(format!(
                        "service network template not found '{}'",
                        template_name
                    ))
                })?;
                uses_template = true;
                service_network = Some(template.clone());
            }
            None if compute_networks.is_empty() => {
                if let Some(first) = config.network.templates.values().next() {
                    uses_template = true;
                    service_network = Some(first.clone());
                } else if let Some(network) = &management_network {
                    service_network = Some(network.config.clone());
                } else {
                    compute_networks = management_compute_networks.clone();
                }
            }
            None => {}
        }

        let application_network = if uses_template {
            match &service_network {
                Some(config) => {
                    let name = config.name.as_deref().ok_or_else(|| {
                        CloudError::InvalidConfig("network templates must have a name".to_string())
                    })?;
                    Some(ManagedNetwork {
                        name: prefixes.network(name),
                        config: config.clone(),
                    })
                }
                None => None,
            }
        } else {
            None
        };

        let private_ip_network = if let Some(network) = &management_network {
            network.name.clone()
        } else if let Some(network) = &application_network {
            network.name.clone()
        } else if let Some(first) = compute_networks.first() {
            first.clone()
        } else {
            management_compute_networks[0].clone()
        };

        let application_network_name = if let Some(network) = &application_network {
            Some(network.name.clone())
        } else if let Some(first) = compute_networks.first() {
            Some(first.clone())
        } else if let Some(network) = &management_network {
            Some(network.name.clone())
        } else {
            management_compute_networks.first().cloned()
        };

        let associate_floating_ip = Self::floating_ip_policy(
            false,
            management_network.as_ref(),
            service_network.as_ref(),
            &compute_networks,
        );

        Ok(Self {
            management,
            management_network,
            application_network,
            compute_networks,
            private_ip_network,
            application_network_name,
            associate_floating_ip,
            access_rules,
            external,
        })
    }

    /// Three ordered branches: management machines follow the management
    /// network flag, other machines the flag of their service network, and a
    /// service machine with neither a service network nor compute networks
    /// always gets one.
    fn floating_ip_policy(
        management: bool,
        management_network: Option<&ManagedNetwork>,
        service_network: Option<&NetworkConfiguration>,
        compute_networks: &[String],
    ) -> bool {
        if management && management_network.is_some() {
            management_network
                .map(|n| n.config.custom_flag(ASSOCIATE_FLOATING_IP_ON_BOOTSTRAP))
                .unwrap_or(false)
        } else if let Some(network) = service_network {
            network.custom_flag(ASSOCIATE_FLOATING_IP_ON_BOOTSTRAP)
        } else {
            !management && compute_networks.is_empty()
        }
    }

    pub fn is_management(&self) -> bool {
        self.management
    }

    pub fn management_network(&self) -> Option<&ManagedNetwork> {
        self.management_network.as_ref()
    }

    /// Template network created for the service, if any
    pub fn application_network(&self) -> Option<&ManagedNetwork> {
        self.application_network.as_ref()
    }

    /// Pre-existing networks attached verbatim
    pub fn compute_networks(&self) -> &[String] {
        &self.compute_networks
    }

    /// Network whose fixed IP is the machine's private address
    pub fn private_ip_network(&self) -> &str {
        &self.private_ip_network
    }

    /// Network whose address is exported as the application network IP
    pub fn application_network_name(&self) -> Option<&str> {
        self.application_network_name.as_deref()
    }

    pub fn associate_floating_ip(&self) -> bool {
        self.associate_floating_ip
    }

    pub fn access_rules(&self) -> &AccessRules {
        &self.access_rules
    }

    pub fn external(&self) -> &ExternalNetworking {
        &self.external
    }

    /// Names of the networks to attach, in attachment order
    pub fn attached_networks(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(network) = &self.management_network {
            names.push(network.name.clone());
        }
        for name in &self.compute_networks {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        if let Some(network) = &self.application_network {
            if !names.contains(&network.name) {
                names.push(network.name.clone());
            }
        }
        names
    }
}
