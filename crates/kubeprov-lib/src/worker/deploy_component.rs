//! DeployComponent jobs
//!
//! Prepares the Kubernetes side of a component: the app namespace, a
//! dockercfg pull secret per private image repository, and services for
//! the container ports (`{component}` for internal ports, a NodePort
//! `{component}-public` for public ones).

use super::Performable;
use crate::kubernetes::{
    ensure_namespace, ensure_secret, ensure_service, KubernetesClient, SecretDefinition,
    ServiceDefinition, ServicePortDefinition,
};
use crate::models::{Component, DeployComponentData, Port};
use crate::storage::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

const MAX_ATTEMPTS: u32 = 20;

pub struct DeployComponent {
    storage: Storage,
    kubernetes: Arc<dyn KubernetesClient>,
}

impl DeployComponent {
    pub fn new(storage: Storage, kubernetes: Arc<dyn KubernetesClient>) -> Self {
        Self {
            storage,
            kubernetes,
        }
    }

    async fn pull_secrets(&self, namespace: &str, component: &Component) -> Result<()> {
        for repo_name in repo_names(component) {
            let repo = self
                .storage
                .image_repos
                .get(&[], &repo_name)
                .await
                .with_context(|| format!("Failed to load image repo {repo_name}"))?;

            let secret = SecretDefinition {
                name: repo.name.clone(),
                namespace: namespace.to_string(),
                secret_type: "kubernetes.io/dockercfg".to_string(),
                data: BTreeMap::from([(".dockercfg".to_string(), repo.key.clone())]),
            };
            ensure_secret(self.kubernetes.as_ref(), &secret)
                .await
                .with_context(|| format!("Failed to create secret {}", repo.name))?;
        }
        Ok(())
    }

    async fn services(&self, namespace: &str, component: &Component) -> Result<()> {
        let (public, internal): (Vec<&Port>, Vec<&Port>) = component
            .containers
            .iter()
            .flat_map(|c| c.ports.iter())
            .partition(|p| p.public);

        let selector = BTreeMap::from([(
            "deployment".to_string(),
            component
                .current_release_id
                .clone()
                .unwrap_or_else(|| component.name.clone()),
        )]);

        let groups = [
            (component.name.clone(), "ClusterIP", internal),
            (format!("{}-public", component.name), "NodePort", public),
        ];
        for (name, service_type, ports) in groups {
            if ports.is_empty() {
                continue;
            }
            let service = ServiceDefinition {
                name: name.clone(),
                namespace: namespace.to_string(),
                service_type: service_type.to_string(),
                selector: selector.clone(),
                ports: service_ports(&ports),
            };
            ensure_service(self.kubernetes.as_ref(), &service)
                .await
                .with_context(|| format!("Failed to create service {name}"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Performable for DeployComponent {
    fn max_attempts(&self) -> u32 {
        MAX_ATTEMPTS
    }

    async fn perform(&self, data: &str) -> Result<()> {
        let message: DeployComponentData =
            serde_json::from_str(data).context("Invalid DeployComponent job data")?;

        let component = self
            .storage
            .components
            .get(&[&message.app_name], &message.component_name)
            .await
            .with_context(|| {
                format!(
                    "Failed to load component {}/{}",
                    message.app_name, message.component_name
                )
            })?;

        let namespace = message.app_name.as_str();
        ensure_namespace(self.kubernetes.as_ref(), namespace)
            .await
            .with_context(|| format!("Failed to create namespace {namespace}"))?;

        self.pull_secrets(namespace, &component).await?;
        self.services(namespace, &component).await?;

        info!(
            app = %message.app_name,
            component = %component.name,
            "Deployed component"
        );
        Ok(())
    }
}

/// Registry part of every image that names one, deduplicated
fn repo_names(component: &Component) -> BTreeSet<String> {
    component
        .containers
        .iter()
        .filter_map(|c| c.image.split_once('/').map(|(repo, _)| repo.to_string()))
        .collect()
}

/// One port per number; the first protocol listed wins
fn service_ports(ports: &[&Port]) -> Vec<ServicePortDefinition> {
    let mut seen = BTreeSet::new();
    ports
        .iter()
        .filter(|p| seen.insert(p.number))
        .map(|p| ServicePortDefinition {
            name: p.number.to_string(),
            port: p.number,
            protocol: p.protocol.clone(),
        })
        .collect()
}
