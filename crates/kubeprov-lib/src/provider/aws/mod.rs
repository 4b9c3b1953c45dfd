//! AWS provider
//!
//! - [`capabilities`]: the EC2, IAM, S3, ELB and EFS calls the provider makes
//! - [`simulated`]: in-memory AWS used by tests and local runs
//! - Kube creation and deletion run as [`crate::procedure::Procedure`]s whose
//!   steps persist the Kube after every new identifier

pub mod capabilities;
mod create_kube;
mod delete_kube;
mod iam;
mod node;
pub mod simulated;

#[cfg(test)]
mod tests;

pub use capabilities::{CloudError, CloudErrorKind, CloudResult, Ec2, Efs, Elb, Iam, S3};

use crate::kubernetes::KubernetesConnector;
use crate::models::{Kube, Node};
use crate::observability::StructuredLogger;
use crate::procedure::ActionStatus;
use crate::provider::{EtcdDiscovery, Provider, UserdataRenderer};
use crate::storage::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use capabilities::Image;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Per-service AWS clients, constructed once and injected
#[derive(Clone)]
pub struct AwsClients {
    pub ec2: Arc<dyn Ec2>,
    pub iam: Arc<dyn Iam>,
    pub s3: Arc<dyn S3>,
    pub elb: Arc<dyn Elb>,
    pub efs: Arc<dyn Efs>,
}

/// Services the provider needs besides AWS itself
#[derive(Clone)]
pub struct Collaborators {
    pub userdata: Arc<dyn UserdataRenderer>,
    pub etcd: Arc<dyn EtcdDiscovery>,
    pub kubernetes: Arc<dyn KubernetesConnector>,
}

/// Timeout and polling interval of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollBudget {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Provider configuration
#[derive(Debug, Clone)]
pub struct AwsProviderConfig {
    pub master_launch: PollBudget,
    pub kubernetes_api: PollBudget,
    pub instance_terminate: PollBudget,
    pub gateway_detach: PollBudget,
    pub subnet_delete: PollBudget,
    pub efs_mount_target: PollBudget,
    /// Owner account of the node images
    pub ami_owner: String,
    pub ami_name_pattern: String,
}

impl Default for AwsProviderConfig {
    fn default() -> Self {
        Self {
            master_launch: PollBudget::new(Duration::from_secs(300), Duration::from_secs(3)),
            kubernetes_api: PollBudget::new(Duration::from_secs(1200), Duration::from_secs(1)),
            instance_terminate: PollBudget::new(Duration::from_secs(300), Duration::from_secs(3)),
            gateway_detach: PollBudget::new(Duration::from_secs(300), Duration::from_secs(5)),
            subnet_delete: PollBudget::new(Duration::from_secs(120), Duration::from_secs(5)),
            efs_mount_target: PollBudget::new(Duration::from_secs(1200), Duration::from_secs(1)),
            ami_owner: "595879546273".to_string(),
            ami_name_pattern: "CoreOS-stable-*".to_string(),
        }
    }
}

pub(crate) struct Shared {
    pub clients: AwsClients,
    pub storage: Storage,
    pub collaborators: Collaborators,
    pub config: AwsProviderConfig,
    pub logger: StructuredLogger,
}

impl Shared {
    pub async fn save_kube(&self, kube: &Kube) -> Result<()> {
        self.storage
            .kubes
            .save(&[], kube)
            .await
            .with_context(|| format!("Failed to save kube {}", kube.name))
    }

    pub async fn save_node(&self, node: &Node) -> Result<()> {
        self.storage
            .nodes
            .save(&[&node.kube_name], node)
            .await
            .with_context(|| format!("Failed to save node {}", node.name))
    }

    /// Newest image matching the configured owner and name pattern
    pub async fn latest_ami(&self) -> Result<String> {
        let images = self
            .clients
            .ec2
            .describe_images(&self.config.ami_owner, &self.config.ami_name_pattern)
            .await?;
        newest_image(images)
            .map(|image| image.id)
            .with_context(|| format!("No image matches {}", self.config.ami_name_pattern))
    }

    /// Tag a resource with the cluster tags, the Kube's custom tags and `extra`
    pub async fn tag(&self, kube: &Kube, resource_id: &str, extra: &[(&str, String)]) -> Result<()> {
        let mut tags = kube.aws_config.tags.clone();
        tags.insert("KubernetesCluster".to_string(), kube.name.clone());
        for (key, value) in extra {
            tags.insert((*key).to_string(), value.clone());
        }
        self.clients
            .ec2
            .create_tags(resource_id, &tags)
            .await
            .with_context(|| format!("Failed to tag {resource_id}"))
    }
}

fn newest_image(images: Vec<Image>) -> Option<Image> {
    // ISO-8601 dates order lexically
    images
        .into_iter()
        .max_by(|a, b| a.creation_date.cmp(&b.creation_date))
}

/// Tags for a bucket, which cannot go through EC2
fn bucket_tags(kube: &Kube) -> BTreeMap<String, String> {
    let mut tags = kube.aws_config.tags.clone();
    tags.insert("KubernetesCluster".to_string(), kube.name.clone());
    tags
}

/// [`Provider`] backed by AWS capability clients
#[derive(Clone)]
pub struct AwsProvider {
    shared: Arc<Shared>,
}

impl AwsProvider {
    pub fn new(
        clients: AwsClients,
        storage: Storage,
        collaborators: Collaborators,
        config: AwsProviderConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                clients,
                storage,
                collaborators,
                config,
                logger: StructuredLogger::new("aws-provider"),
            }),
        }
    }
}

#[async_trait]
impl Provider for AwsProvider {
    async fn validate_account(&self) -> Result<()> {
        self.shared
            .clients
            .ec2
            .describe_key_pairs()
            .await
            .context("Failed to validate AWS credentials")?;
        Ok(())
    }

    async fn create_kube(&self, kube: &mut Kube, status: &ActionStatus) -> Result<()> {
        info!(kube = %kube.name, region = %kube.aws_config.region, "Creating kube");
        let mut context = create_kube::KubeContext::new(kube.clone(), self.shared.clone(), status);
        let mut procedure = create_kube::procedure(kube, status);
        let result = procedure.run(&mut context).await;
        *kube = context.kube;

        if let Err(e) = result {
            warn!(kube = %kube.name, step = %e.step(), error = %e, "Kube creation stopped");
            return Err(e.into_inner());
        }
        Ok(())
    }

    async fn delete_kube(&self, kube: &mut Kube) -> Result<()> {
        info!(kube = %kube.name, "Deleting kube");
        let mut context =
            create_kube::KubeContext::new(kube.clone(), self.shared.clone(), &ActionStatus::default());
        let mut procedure = delete_kube::procedure();
        let result = procedure.run(&mut context).await;
        *kube = context.kube;
        result.map_err(|e| e.into_inner())
    }

    async fn create_node(&self, node: &mut Node, status: &ActionStatus) -> Result<()> {
        let kube = self
            .shared
            .storage
            .kubes
            .get(&[], &node.kube_name)
            .await
            .with_context(|| format!("Failed to load kube {}", node.kube_name))?;
        status.set_description("launching node");
        node::launch(&self.shared, &kube, node).await
    }

    async fn delete_node(&self, node: &mut Node) -> Result<()> {
        node::terminate(&self.shared, node).await
    }
}
