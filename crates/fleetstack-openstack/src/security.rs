//! Security group policy synthesis
//!
//! Turns declarative access rules into concrete security group rules and
//! maintains the fixed hierarchy of groups:
//!
//! ```text
//! <prefix>management   management machines (component ports, public ports)
//! <prefix>agent        every service machine (agent ports)
//! <prefix>cluster      every machine, the remote group of component traffic
//! <prefix><app>        machines of one application
//! <prefix><app>-<svc>  machines of one service (access rules)
//! <prefix><app>-<svc>-public   PUBLIC access rules of the service
//! ```

use crate::context::ProvisioningContext;
use crate::models::{Direction, SecurityGroup, SecurityGroupRuleRequest};
use crate::network::NetworkApi;
use fleetstack_cloud::{
    AccessRule, AccessRuleType, CloudError, DISCOVERY_MULTICAST_PORTS, ManagementComponents,
    PortRange, ResourcePrefixes, Result, ServiceScope,
};
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_PROTOCOL: &str = "tcp";
pub const ANYWHERE: &str = "0.0.0.0/0";

/// Where the traffic of a rule may come from (or go to)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remote {
    Cidr(String),
    Group(String),
}

/// One rule request per contiguous port entry
pub fn rule_requests(
    security_group_id: &str,
    direction: Direction,
    ports: &PortRange,
    remote: &Remote,
) -> Vec<SecurityGroupRuleRequest> {
    ports
        .entries()
        .iter()
        .map(|entry| {
            let (remote_ip_prefix, remote_group_id) = match remote {
                Remote::Cidr(cidr) => (Some(cidr.clone()), None),
                Remote::Group(id) => (None, Some(id.clone())),
            };
            SecurityGroupRuleRequest {
                security_group_id: security_group_id.to_string(),
                direction,
                protocol: DEFAULT_PROTOCOL.to_string(),
                port_range_min: entry.from,
                port_range_max: entry.to,
                remote_ip_prefix,
                remote_group_id,
            }
        })
        .collect()
}

/// Ports of every management component, opened between cluster members
pub fn management_ports(components: &ManagementComponents) -> Result<PortRange> {
    let singles = [
        components.agent_port,
        components.deployer_port,
        components.deployer_webster_port,
        components.discovery_port,
        components.orchestrator_port,
    ]
    .map(|p| p.to_string());

    PortRange::union(
        singles
            .iter()
            .map(String::as_str)
            .chain([DISCOVERY_MULTICAST_PORTS, components.usm_port_range.as_str()]),
    )
}

/// Ports a service machine's agent listens on
pub fn agent_ports(components: &ManagementComponents) -> Result<PortRange> {
    let singles = [
        components.agent_port,
        components.deployer_port,
        components.discovery_port,
    ]
    .map(|p| p.to_string());

    PortRange::union(
        singles
            .iter()
            .map(String::as_str)
            .chain([components.usm_port_range.as_str()]),
    )
}

/// Ports of the management machines reachable from anywhere
pub fn public_management_ports(
    components: &ManagementComponents,
    file_transfer_port: u16,
) -> Result<PortRange> {
    let ports = [file_transfer_port, components.webui_port, components.rest_port].map(|p| p.to_string());
    PortRange::union(ports.iter().map(String::as_str))
}

/// Groups of one service
#[derive(Debug, Clone)]
pub struct ServiceGroups {
    pub application: SecurityGroup,
    pub service: SecurityGroup,
    pub public: Option<SecurityGroup>,
}

/// Creates security groups and installs their rules
pub struct SecurityGroupSynthesizer {
    network: Arc<dyn NetworkApi>,
}

impl SecurityGroupSynthesizer {
    pub fn new(network: Arc<dyn NetworkApi>) -> Self {
        Self { network }
    }

    /// Create the management, agent and cluster groups with their rules
    ///
    /// On failure every group under the prefix is removed again (best-effort).
    pub async fn ensure_management_groups(&self, ctx: &ProvisioningContext) -> Result<()> {
        tracing::info!("Ensuring management security groups");
        match self.install_management_groups(ctx).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("Failed to set up management security groups: {}", e);
                if let Err(clean_err) = self.clean_all(ctx.prefixes()).await {
                    tracing::warn!("Couldn't clean all security groups: {}", clean_err);
                }
                Err(e)
            }
        }
    }

    async fn install_management_groups(&self, ctx: &ProvisioningContext) -> Result<()> {
        let prefixes = ctx.prefixes();
        let cluster = self
            .network
            .create_security_group_if_not_exists(&prefixes.cluster_group())
            .await?;
        let management = self
            .network
            .create_security_group_if_not_exists(&prefixes.management_group())
            .await?;
        let agent = self
            .network
            .create_security_group_if_not_exists(&prefixes.agent_group())
            .await?;

        let components = ctx.components();
        let from_cluster = Remote::Group(cluster.id.clone());

        let management_ports = management_ports(components)?;
        self.install(&management.id, Direction::Ingress, &management_ports, &from_cluster)
            .await?;

        // Management subnets reach the components too, before a port carries the cluster group
        if let Some(network) = ctx.topology().management_network() {
            for subnet in &network.config.subnets {
                let from_subnet = Remote::Cidr(subnet.range.clone());
                self.install(&management.id, Direction::Ingress, &management_ports, &from_subnet)
                    .await?;
            }
        }

        self.install(&agent.id, Direction::Ingress, &agent_ports(components)?, &from_cluster)
            .await?;

        let public = public_management_ports(components, ctx.management_file_transfer_port())?;
        self.install(
            &management.id,
            Direction::Ingress,
            &public,
            &Remote::Cidr(ANYWHERE.to_string()),
        )
        .await?;

        Ok(())
    }

    /// Create the application, service and (if needed) public groups of a service
    pub async fn ensure_service_groups(&self, ctx: &ProvisioningContext) -> Result<ServiceGroups> {
        let scope = require_scope(ctx)?;
        let prefixes = ctx.prefixes();
        tracing::debug!("Ensuring security groups of service {}", scope);

        let application = self
            .network
            .create_security_group_if_not_exists(&prefixes.application_group(&scope.application))
            .await?;
        let service = self
            .network
            .create_security_group_if_not_exists(&prefixes.service_group(scope))
            .await?;
        let public = if ctx.topology().access_rules().has_public() {
            Some(
                self.network
                    .create_security_group_if_not_exists(&prefixes.service_public_group(scope))
                    .await?,
            )
        } else {
            None
        };

        Ok(ServiceGroups {
            application,
            service,
            public,
        })
    }

    /// Install the file transfer rule and the declared access rules of a service
    pub async fn apply_service_rules(&self, ctx: &ProvisioningContext, groups: &ServiceGroups) -> Result<()> {
        let management_name = ctx.prefixes().management_group();
        let management = self
            .network
            .security_group_by_name(&management_name)
            .await?
            .ok_or_else(|| {
                CloudError::ResourceNotFound(format!("security group '{}'", management_name))
            })?;

        let transfer = PortRange::parse(&ctx.template().file_transfer_port.to_string())?;
        self.install(
            &groups.service.id,
            Direction::Ingress,
            &transfer,
            &Remote::Group(management.id),
        )
        .await?;

        let rules = ctx.topology().access_rules();
        for rule in &rules.incoming {
            self.apply_access_rule(ctx, groups, Direction::Ingress, rule).await?;
        }

        if !rules.outgoing.is_empty() {
            // The implicit allow-all egress must go before restrictive egress rules mean anything
            let mut cleared = HashSet::new();
            for rule in &rules.outgoing {
                let target = Self::target_group(groups, rule);
                if cleared.insert(target.id.clone()) {
                    self.delete_default_egress_rules(&target.name).await?;
                }
            }
            for rule in &rules.outgoing {
                self.apply_access_rule(ctx, groups, Direction::Egress, rule).await?;
            }
        }

        Ok(())
    }

    fn target_group<'a>(groups: &'a ServiceGroups, rule: &AccessRule) -> &'a SecurityGroup {
        match (rule.rule_type, &groups.public) {
            (AccessRuleType::Public, Some(public)) => public,
            _ => &groups.service,
        }
    }

    /// Install one access rule; returns the number of rules created
    pub async fn apply_access_rule(
        &self,
        ctx: &ProvisioningContext,
        groups: &ServiceGroups,
        direction: Direction,
        rule: &AccessRule,
    ) -> Result<usize> {
        let prefixes = ctx.prefixes();
        let scope = require_scope(ctx)?;

        let remote_group = match rule.rule_type {
            AccessRuleType::Public => None,
            AccessRuleType::Service => Some(prefixes.service_group(scope)),
            AccessRuleType::Application => Some(prefixes.application_group(&scope.application)),
            AccessRuleType::Cluster => Some(prefixes.cluster_group()),
            AccessRuleType::Group => Some(rule.target.clone().ok_or_else(|| {
                CloudError::InvalidConfig(format!(
                    "no group defined for the GROUP access rule on ports '{}'",
                    rule.port_range
                ))
            })?),
            AccessRuleType::Range => None,
            AccessRuleType::Private => {
                return Err(CloudError::UnsupportedRuleType(rule.rule_type.to_string()));
            }
        };

        let remote = match (rule.rule_type, remote_group) {
            (_, Some(name)) => {
                let group = self
                    .network
                    .security_group_by_name(&name)
                    .await?
                    .ok_or_else(|| {
                        CloudError::ResourceNotFound(format!("security group '{}' does not exist", name))
                    })?;
                Remote::Group(group.id)
            }
            (AccessRuleType::Range, None) => {
                let cidr = rule.target.clone().ok_or_else(|| {
                    CloudError::InvalidConfig(format!(
                        "no IP range defined for the RANGE access rule on ports '{}'",
                        rule.port_range
                    ))
                })?;
                Remote::Cidr(cidr)
            }
            _ => Remote::Cidr(ANYWHERE.to_string()),
        };

        let ports = PortRange::parse(&rule.port_range)?;
        let target = Self::target_group(groups, rule);
        tracing::debug!(
            "Apply {} {} rule on ports {} to {}",
            direction,
            rule.rule_type,
            ports,
            target.name
        );
        self.install(&target.id, direction, &ports, &remote).await
    }

    async fn install(
        &self,
        security_group_id: &str,
        direction: Direction,
        ports: &PortRange,
        remote: &Remote,
    ) -> Result<usize> {
        let mut created = 0;
        for request in rule_requests(security_group_id, direction, ports, remote) {
            if self.network.create_security_group_rule(&request).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Rules installed by earlier starts of the service stay in place
    async fn delete_default_egress_rules(&self, group_name: &str) -> Result<()> {
        let Some(group) = self.network.security_group_by_name(group_name).await? else {
            return Ok(());
        };
        for rule in group
            .security_group_rules
            .iter()
            .filter(|r| r.is_default_egress())
        {
            tracing::debug!("Delete default egress rule {} of {}", rule.id, group_name);
            self.network.delete_security_group_rule(&rule.id).await?;
        }
        Ok(())
    }

    /// Delete the service group and its public variant
    pub async fn delete_service_groups(&self, prefixes: &ResourcePrefixes, scope: &ServiceScope) -> Result<()> {
        let names = [prefixes.service_group(scope), prefixes.service_public_group(scope)];
        for group in self.network.security_groups().await? {
            if names.contains(&group.name) {
                tracing::info!("Delete security group {}", group.name);
                self.network.delete_security_group(&group.id).await?;
            }
        }
        Ok(())
    }

    pub async fn delete_application_group(&self, prefixes: &ResourcePrefixes, application: &str) -> Result<()> {
        let name = prefixes.application_group(application);
        if let Some(group) = self.network.security_group_by_name(&name).await? {
            tracing::info!("Delete security group {}", group.name);
            self.network.delete_security_group(&group.id).await?;
        }
        Ok(())
    }

    /// Delete every group under the prefix; individual failures are logged and skipped
    pub async fn clean_all(&self, prefixes: &ResourcePrefixes) -> Result<()> {
        for group in self.network.security_groups_by_prefix(prefixes.prefix()).await? {
            if let Err(e) = self.network.delete_security_group(&group.id).await {
                tracing::warn!("Couldn't delete security group {}: {}", group.name, e);
            }
        }
        Ok(())
    }
}

fn require_scope(ctx: &ProvisioningContext) -> Result<&ServiceScope> {
    ctx.scope().ok_or_else(|| {
        CloudError::InvalidConfig("service security groups requested for a management machine".to_string())
    })
}
