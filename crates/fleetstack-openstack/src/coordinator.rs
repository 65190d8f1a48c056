//! Management cluster bootstrap
//!
//! Starts N management machines concurrently, all or nothing: when any of
//! them fails, the ones that came up are torn down again before the first
//! failure is reported.

use crate::context::ProvisioningContext;
use crate::lifecycle::MachineOrchestrator;
use crate::models::Server;
use fleetstack_cloud::{CloudError, Deadline, MachineDetails, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Time allowed to tear down the machines of a failed bootstrap
pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ProvisioningCoordinator {
    orchestrator: Arc<MachineOrchestrator>,
}

impl ProvisioningCoordinator {
    pub fn new(orchestrator: Arc<MachineOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn start_management_cluster(
        &self,
        ctx: Arc<ProvisioningContext>,
        count: u32,
        deadline: Deadline,
    ) -> Result<Vec<MachineDetails>> {
        let prefix = ctx.server_name_prefix();
        let existing = self.orchestrator.compute().servers_by_prefix(prefix).await?;
        if !existing.is_empty() {
            let description = existing
                .iter()
                .map(|s| format!("{} [id={}, status={}]", s.name, s.id, s.status))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CloudError::ExistingServers {
                prefix: prefix.to_string(),
                description,
            });
        }

        self.orchestrator.security().ensure_management_groups(&ctx).await?;
        if let Err(e) = self.orchestrator.networks().ensure_management_network(&ctx).await {
            self.clean_shared_resources(&ctx).await;
            return Err(e);
        }

        tracing::info!("Starting {} management machines", count);
        let results = self.fan_out(ctx.clone(), count, deadline).await;

        let mut machines = Vec::new();
        let mut failures = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(details) => machines.push(details),
                Err(e) => failures.push((index, e)),
            }
        }

        if failures.is_empty() {
            return Ok(machines);
        }

        for (index, e) in failures.iter().skip(1) {
            tracing::error!("Management machine #{} also failed: {}", index + 1, e);
        }
        self.rollback(&ctx, &machines).await;

        let failed = failures.len();
        let (index, first) = failures.swap_remove(0);
        Err(CloudError::ProvisioningFailed {
            message: format!(
                "{} of {} management machines failed to start, first failure on machine #{}: {}",
                failed,
                count,
                index + 1,
                first
            ),
            source: Some(Box::new(first)),
        })
    }

    /// One start task per machine; results in machine order
    async fn fan_out(
        &self,
        ctx: Arc<ProvisioningContext>,
        count: u32,
        deadline: Deadline,
    ) -> Vec<Result<MachineDetails>> {
        let mut tasks = JoinSet::new();
        let mut indexes = HashMap::new();
        for index in 0..count as usize {
            let orchestrator = self.orchestrator.clone();
            let ctx = ctx.clone();
            let handle = tasks.spawn(async move { orchestrator.start(&ctx, deadline).await });
            indexes.insert(handle.id(), index);
        }

        let mut results: Vec<Option<Result<MachineDetails>>> = (0..count).map(|_| None).collect();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(join_error) => (
                    join_error.id(),
                    Err(CloudError::ProvisioningFailed {
                        message: format!("machine start task failed: {}", join_error),
                        source: None,
                    }),
                ),
            };
            if let Some(&index) = indexes.get(&id) {
                results[index] = Some(result);
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(CloudError::ProvisioningFailed {
                        message: "machine start task produced no result".to_string(),
                        source: None,
                    })
                })
            })
            .collect()
    }

    /// Tear down the machines that did start, then the shared resources
    ///
    /// A start task that panicked leaves no details behind, so every other
    /// server under the prefix is swept as well. The prefix held no servers
    /// before the bootstrap.
    async fn rollback(&self, ctx: &ProvisioningContext, machines: &[MachineDetails]) {
        tracing::warn!("Rolling back {} started management machines", machines.len());
        let mut servers = Vec::new();
        for machine in machines {
            match self.orchestrator.compute().server_details(&machine.machine_id).await {
                Ok(Some(server)) => servers.push(server),
                Ok(None) => {}
                Err(e) => tracing::warn!("Couldn't look up server {}: {}", machine.describe(), e),
            }
        }

        let prefix = ctx.server_name_prefix();
        match self.orchestrator.compute().list_servers().await {
            Ok(all) => {
                let orphans: Vec<Server> = all
                    .into_iter()
                    .filter(|s| s.name.starts_with(prefix))
                    .filter(|s| !machines.iter().any(|m| m.machine_id == s.id))
                    .collect();
                for orphan in &orphans {
                    tracing::warn!("Server {} ({}) was left behind by a failed start", orphan.name, orphan.id);
                }
                servers.extend(orphans);
            }
            Err(e) => tracing::warn!("Couldn't list servers under {}: {}", prefix, e),
        }

        for server in &servers {
            if let Err(e) = self
                .orchestrator
                .terminate(server, Deadline::after(ROLLBACK_TIMEOUT))
                .await
            {
                tracing::warn!("Couldn't terminate server {} ({}): {}", server.name, server.id, e);
            }
        }
        self.clean_shared_resources(ctx).await;
    }

    /// Best-effort removal of prefixed security groups and networks
    pub async fn clean_shared_resources(&self, ctx: &ProvisioningContext) {
        if let Err(e) = self.orchestrator.security().clean_all(ctx.prefixes()).await {
            tracing::warn!("Couldn't clean security groups: {}", e);
        }
        if let Err(e) = self.orchestrator.networks().clean_all_networks(ctx).await {
            tracing::warn!("Couldn't clean networks: {}", e);
        }
    }
}
