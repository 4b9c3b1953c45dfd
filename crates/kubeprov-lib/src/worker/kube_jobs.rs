//! Kube and Node lifecycle jobs
//!
//! Each job runs under an [`ActionStatus`] registered by resource id, so a
//! second CreateKube for the same Kube is rejected while one is running,
//! and a DeleteKube cancels a running CreateKube at its next wait.

use super::Performable;
use crate::models::{JobType, Kube, KubeJobData, Node};
use crate::observability::ProvisionerMetrics;
use crate::procedure::{ActionRegistry, ActionStatus};
use crate::provider::Provider;
use crate::storage::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Performer for one of the Kube/Node job types
pub struct KubeJob {
    job_type: JobType,
    provider: Arc<dyn Provider>,
    storage: Storage,
    actions: Arc<ActionRegistry>,
    metrics: ProvisionerMetrics,
}

impl KubeJob {
    /// Fails for [`JobType::DeployComponent`], which has its own performer
    pub fn new(
        job_type: JobType,
        provider: Arc<dyn Provider>,
        storage: Storage,
        actions: Arc<ActionRegistry>,
    ) -> Result<Self> {
        if job_type == JobType::DeployComponent {
            anyhow::bail!("{job_type} is not a kube job");
        }
        Ok(Self {
            job_type,
            provider,
            storage,
            actions,
            metrics: ProvisionerMetrics::new(),
        })
    }

    /// Performers for all four kube job types
    pub fn all(
        provider: Arc<dyn Provider>,
        storage: Storage,
        actions: Arc<ActionRegistry>,
    ) -> Vec<(JobType, Arc<dyn Performable>)> {
        [
            JobType::CreateKube,
            JobType::DeleteKube,
            JobType::CreateNode,
            JobType::DeleteNode,
        ]
        .into_iter()
        .map(|job_type| {
            let job: Arc<dyn Performable> = Arc::new(Self {
                job_type,
                provider: provider.clone(),
                storage: storage.clone(),
                actions: actions.clone(),
                metrics: ProvisionerMetrics::new(),
            });
            (job_type, job)
        })
        .collect()
    }

    async fn load_kube(&self, name: &str) -> Result<Kube> {
        self.storage
            .kubes
            .get(&[], name)
            .await
            .with_context(|| format!("Failed to load kube {name}"))
    }

    async fn update_ready_gauge(&self) {
        if let Ok(kubes) = self.storage.kubes.list(&[]).await {
            let ready = kubes.iter().filter(|k| k.ready).count();
            self.metrics.set_kubes_ready(ready as i64);
        }
    }

    async fn create_kube(&self, kube_name: &str) -> Result<()> {
        let mut kube = self.load_kube(kube_name).await?;
        let status = self
            .actions
            .begin(kube_name, "creating kube", self.max_attempts(), false)?;

        let result = self.provider.create_kube(&mut kube, &status).await;
        self.settle(kube_name, &status, &result);

        self.storage
            .kubes
            .save(&[], &kube)
            .await
            .with_context(|| format!("Failed to save kube {kube_name}"))?;
        self.update_ready_gauge().await;
        result
    }

    async fn delete_kube(&self, kube_name: &str) -> Result<()> {
        let mut kube = match self.storage.kubes.get(&[], kube_name).await {
            Ok(kube) => kube,
            Err(e) if e.is_not_found() => {
                info!(kube = %kube_name, "Kube already deleted");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to load kube"),
        };
        let status = self
            .actions
            .begin(kube_name, "deleting kube", self.max_attempts(), true)?;

        let result = self.provider.delete_kube(&mut kube).await;
        self.settle(kube_name, &status, &result);

        match result {
            Ok(()) => {
                match self.storage.kubes.delete(&[], kube_name).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e).context("Failed to delete kube record"),
                }
                info!(kube = %kube_name, "Kube deleted");
                self.update_ready_gauge().await;
                Ok(())
            }
            Err(e) => {
                self.storage
                    .kubes
                    .save(&[], &kube)
                    .await
                    .with_context(|| format!("Failed to save kube {kube_name}"))?;
                Err(e)
            }
        }
    }

    async fn create_node(&self, kube_name: &str, node_name: &str) -> Result<()> {
        let mut node = self
            .storage
            .nodes
            .get(&[kube_name], node_name)
            .await
            .with_context(|| format!("Failed to load node {node_name}"))?;
        let resource_id = format!("{kube_name}/{node_name}");
        let status = self
            .actions
            .begin(&resource_id, "creating node", self.max_attempts(), false)?;

        let result = self.provider.create_node(&mut node, &status).await;
        self.settle(&resource_id, &status, &result);
        result?;

        self.save_node(&node).await
    }

    async fn delete_node(&self, kube_name: &str, node_name: &str) -> Result<()> {
        let mut node = match self.storage.nodes.get(&[kube_name], node_name).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => {
                info!(kube = %kube_name, node = %node_name, "Node already deleted");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to load node"),
        };
        let resource_id = format!("{kube_name}/{node_name}");
        let status = self
            .actions
            .begin(&resource_id, "deleting node", self.max_attempts(), true)?;

        let result = self.provider.delete_node(&mut node).await;
        self.settle(&resource_id, &status, &result);
        result?;

        match self.storage.nodes.delete(&[kube_name], node_name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e).context("Failed to delete node record"),
        }
    }

    fn settle(&self, resource_id: &str, status: &ActionStatus, result: &Result<()>) {
        match result {
            Ok(()) => self.actions.finish(resource_id, status),
            Err(e) => self.actions.fail(resource_id, status, format!("{e:#}")),
        }
    }

    async fn save_node(&self, node: &Node) -> Result<()> {
        self.storage
            .nodes
            .save(&[&node.kube_name], node)
            .await
            .with_context(|| format!("Failed to save node {}", node.name))
    }
}

#[async_trait]
impl Performable for KubeJob {
    fn max_attempts(&self) -> u32 {
        match self.job_type {
            JobType::CreateKube | JobType::DeleteKube => 5,
            _ => 10,
        }
    }

    async fn perform(&self, data: &str) -> Result<()> {
        let message: KubeJobData = serde_json::from_str(data)
            .with_context(|| format!("Invalid {} job data", self.job_type))?;
        let node_name = || {
            message
                .node_name
                .as_deref()
                .with_context(|| format!("{} job is missing node_name", self.job_type))
        };

        match self.job_type {
            JobType::CreateKube => self.create_kube(&message.kube_name).await,
            JobType::DeleteKube => self.delete_kube(&message.kube_name).await,
            JobType::CreateNode => self.create_node(&message.kube_name, node_name()?).await,
            JobType::DeleteNode => self.delete_node(&message.kube_name, node_name()?).await,
            JobType::DeployComponent => anyhow::bail!("{} is not a kube job", self.job_type),
        }
    }
}
