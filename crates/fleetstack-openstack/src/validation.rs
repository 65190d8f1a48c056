//! Checks a cloud configuration against the live tenant
//!
//! Runs before a bootstrap, so nothing here creates resources. The checks
//! follow the order a bootstrap would fail in: identity endpoint,
//! credentials, images and flavors, then the quotas the management cluster
//! draws from.

use crate::compute::ComputeApi;
use crate::context::{OVERRIDE_ENDPOINT, ProvisioningContext};
use crate::error::OpenStackError;
use crate::models::Flavor;
use crate::network::NetworkApi;
use fleetstack_cloud::{CloudConfig, CloudError, ComputeTemplate, Result};

pub const UNLIMITED_QUOTA: i64 = -1;

/// Rules installed on the management, agent and cluster groups, rounded up
pub const MANAGEMENT_RULES_ESTIMATE: i64 = 20;

/// Planned use of one quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaUsage {
    pub resource: &'static str,
    pub limit: i64,
    pub used: i64,
    pub planned: i64,
}

impl QuotaUsage {
    /// A limit of 0 is reported by some deployments that do not enforce the
    /// quota at all; it is skipped with a warning.
    pub fn check(&self) -> Result<()> {
        if self.limit == UNLIMITED_QUOTA || self.planned == 0 {
            return Ok(());
        }
        if self.limit == 0 {
            tracing::warn!("{} quota is 0, skipping its check", self.resource);
            return Ok(());
        }
        if self.used + self.planned > self.limit {
            return Err(CloudError::QuotaExceeded {
                resource: self.resource.to_string(),
                used: self.used,
                planned: self.planned,
                limit: self.limit,
            });
        }
        tracing::debug!(
            "{} quota: {} in use, {} more needed, limit {}",
            self.resource,
            self.used,
            self.planned,
            self.limit
        );
        Ok(())
    }
}

pub struct CloudValidator<'a> {
    config: &'a CloudConfig,
    management: &'a ProvisioningContext,
    compute: &'a dyn ComputeApi,
    network: &'a dyn NetworkApi,
}

impl<'a> CloudValidator<'a> {
    pub fn new(
        config: &'a CloudConfig,
        management: &'a ProvisioningContext,
        compute: &'a dyn ComputeApi,
        network: &'a dyn NetworkApi,
    ) -> Self {
        Self {
            config,
            management,
            compute,
            network,
        }
    }

    pub async fn run(&self) -> Result<()> {
        tracing::info!("Validating cloud '{}'", self.config.name);
        self.check_endpoint()?;
        self.check_credentials().await?;
        let flavor = self.check_templates().await?;
        self.check_compute_quotas(&flavor).await?;
        self.check_network_quotas().await?;
        tracing::info!("Cloud '{}' is valid", self.config.name);
        Ok(())
    }

    fn check_endpoint(&self) -> Result<()> {
        let template = self.management.template();
        let endpoint = template.override_str(OVERRIDE_ENDPOINT).ok_or_else(|| {
            CloudError::InvalidConfig(format!(
                "templates.{}.overrides.{} is required",
                self.config.management_template, OVERRIDE_ENDPOINT
            ))
        })?;

        let url = reqwest::Url::parse(endpoint).map_err(|e| {
            CloudError::InvalidConfig(format!("identity endpoint '{}' is not a url: {}", endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CloudError::InvalidConfig(format!(
                "identity endpoint '{}' must use http or https",
                endpoint
            )));
        }
        Ok(())
    }

    async fn check_credentials(&self) -> Result<()> {
        match self.compute.list_servers().await {
            Ok(servers) => {
                tracing::debug!("Authenticated, {} server(s) visible", servers.len());
                Ok(())
            }
            Err(OpenStackError::AuthenticationFailed(message)) => Err(CloudError::InvalidConfig(
                format!("user: authentication failed: {}", message),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Check every template of the management region; returns the
    /// management flavor
    async fn check_templates(&self) -> Result<Flavor> {
        let region = self.management.template().region();
        let mut names: Vec<&String> = self.config.templates.keys().collect();
        names.sort();

        let mut management_flavor = None;
        for name in names {
            let template = &self.config.templates[name];
            if template.region() != region {
                tracing::warn!(
                    "Skipping template {}: region {} differs from the management region",
                    name,
                    template.region().unwrap_or("-")
                );
                continue;
            }
            self.check_image(name, template).await?;
            let flavor = self.check_flavor(name, template).await?;
            if *name == self.config.management_template {
                management_flavor = Some(flavor);
            }
        }

        management_flavor.ok_or_else(|| {
            CloudError::InvalidConfig(format!(
                "management_template: compute template '{}' could not be found",
                self.config.management_template
            ))
        })
    }

    async fn check_image(&self, name: &str, template: &ComputeTemplate) -> Result<()> {
        let id = template.image_ref();
        if let Some(image) = self.compute.image(id).await? {
            tracing::debug!("Template {}: image {} ({})", name, image.id, image.name);
            return Ok(());
        }

        let available: Vec<String> = self
            .compute
            .images()
            .await?
            .iter()
            .map(|i| format!("{} ({})", i.id, i.name))
            .collect();
        Err(CloudError::InvalidConfig(format!(
            "templates.{}.image_id: image '{}' not found; available images: {}",
            name,
            id,
            available.join(", ")
        )))
    }

    async fn check_flavor(&self, name: &str, template: &ComputeTemplate) -> Result<Flavor> {
        let id = template.flavor_ref();
        if let Some(flavor) = self.compute.flavor(id).await? {
            tracing::debug!(
                "Template {}: flavor {} ({} vCPUs, {} MB)",
                name,
                flavor.id,
                flavor.vcpus,
                flavor.ram
            );
            return Ok(flavor);
        }

        let available: Vec<String> = self
            .compute
            .flavors()
            .await?
            .iter()
            .map(|f| format!("{} ({})", f.id, f.name))
            .collect();
        Err(CloudError::InvalidConfig(format!(
            "templates.{}.hardware_id: flavor '{}' not found; available flavors: {}",
            name,
            id,
            available.join(", ")
        )))
    }

    async fn check_compute_quotas(&self, flavor: &Flavor) -> Result<()> {
        let count = i64::from(self.config.provider.number_of_management_machines);
        let limits = self.compute.limits().await?;

        let usages = [
            QuotaUsage {
                resource: "server instances",
                limit: limits.max_total_instances,
                used: limits.total_instances_used,
                planned: count,
            },
            QuotaUsage {
                resource: "virtual CPUs",
                limit: limits.max_total_cores,
                used: limits.total_cores_used,
                planned: count * flavor.vcpus,
            },
            QuotaUsage {
                resource: "RAM",
                limit: limits.max_total_ram_size,
                used: limits.total_ram_used,
                planned: count * flavor.ram,
            },
        ];
        usages.iter().try_for_each(QuotaUsage::check)
    }

    async fn check_network_quotas(&self) -> Result<()> {
        let Some(quota) = self.network.quotas().await? else {
            tracing::warn!("Token names no tenant, skipping networking quota checks");
            return Ok(());
        };

        let groups = self.network.security_groups().await?;
        let prefixes = self.management.prefixes();
        let missing_groups = [
            prefixes.cluster_group(),
            prefixes.management_group(),
            prefixes.agent_group(),
        ]
        .iter()
        .filter(|name| !groups.iter().any(|g| &g.name == *name))
        .count() as i64;
        let rules: usize = groups.iter().map(|g| g.security_group_rules.len()).sum();

        QuotaUsage {
            resource: "security groups",
            limit: quota.security_group,
            used: groups.len() as i64,
            planned: missing_groups,
        }
        .check()?;
        QuotaUsage {
            resource: "security group rules",
            limit: quota.security_group_rule,
            used: rules as i64,
            planned: if missing_groups > 0 {
                MANAGEMENT_RULES_ESTIMATE
            } else {
                0
            },
        }
        .check()?;

        if self.management.topology().associate_floating_ip() {
            let used = self.network.floating_ips().await?.len() as i64;
            QuotaUsage {
                resource: "floating IPs",
                limit: quota.floatingip,
                used,
                planned: i64::from(self.config.provider.number_of_management_machines),
            }
            .check()?;
        }
        Ok(())
    }
}
