//! Kubernetes API seam
//!
//! The provisioner talks to Kubernetes for two things: waiting until a new
//! cluster registers nodes, and deploying component namespaces, secrets and
//! services. Both go through [`KubernetesClient`] so they can be exercised
//! without a cluster.

mod api;
pub mod simulated;

pub use api::{KubeApiClient, KubeApiConnector};
pub use simulated::{SimulatedConnector, SimulatedKubernetes};

use crate::models::Kube;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors returned by a Kubernetes client
#[derive(Debug, Error)]
pub enum KubernetesError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("kubernetes api error: {0}")]
    Api(String),

    #[error("kubernetes client configuration error: {0}")]
    Config(String),
}

/// Opaque secret to create in a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretDefinition {
    pub name: String,
    pub namespace: String,
    pub secret_type: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePortDefinition {
    pub name: String,
    pub port: i32,
    pub protocol: String,
}

/// Service exposing a component's containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub namespace: String,
    pub service_type: String,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePortDefinition>,
}

/// A node registered with the API server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ready: bool,
}

/// Narrow Kubernetes API surface used by the provisioner
#[async_trait]
pub trait KubernetesClient: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<(), KubernetesError>;

    async fn create_namespace(&self, name: &str) -> Result<(), KubernetesError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<(), KubernetesError>;

    async fn create_secret(&self, secret: &SecretDefinition) -> Result<(), KubernetesError>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<(), KubernetesError>;

    async fn create_service(&self, service: &ServiceDefinition) -> Result<(), KubernetesError>;

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, KubernetesError>;
}

/// Builds a client for the API server of a provisioned Kube
#[async_trait]
pub trait KubernetesConnector: Send + Sync {
    async fn connect(&self, kube: &Kube) -> Result<Arc<dyn KubernetesClient>>;
}

/// Create the namespace unless it already exists
pub async fn ensure_namespace(
    client: &dyn KubernetesClient,
    name: &str,
) -> Result<(), KubernetesError> {
    match client.get_namespace(name).await {
        Ok(()) => Ok(()),
        Err(KubernetesError::NotFound(_)) => {
            debug!(namespace = %name, "Creating namespace");
            tolerate_existing(client.create_namespace(name).await)
        }
        Err(e) => Err(e),
    }
}

/// Create the secret unless it already exists
pub async fn ensure_secret(
    client: &dyn KubernetesClient,
    secret: &SecretDefinition,
) -> Result<(), KubernetesError> {
    match client.get_secret(&secret.namespace, &secret.name).await {
        Ok(()) => Ok(()),
        Err(KubernetesError::NotFound(_)) => {
            debug!(namespace = %secret.namespace, secret = %secret.name, "Creating secret");
            tolerate_existing(client.create_secret(secret).await)
        }
        Err(e) => Err(e),
    }
}

/// Create the service unless it already exists
pub async fn ensure_service(
    client: &dyn KubernetesClient,
    service: &ServiceDefinition,
) -> Result<(), KubernetesError> {
    match client.get_service(&service.namespace, &service.name).await {
        Ok(()) => Ok(()),
        Err(KubernetesError::NotFound(_)) => {
            debug!(namespace = %service.namespace, service = %service.name, "Creating service");
            tolerate_existing(client.create_service(service).await)
        }
        Err(e) => Err(e),
    }
}

fn tolerate_existing(result: Result<(), KubernetesError>) -> Result<(), KubernetesError> {
    match result {
        Err(KubernetesError::AlreadyExists(_)) => Ok(()),
        other => other,
    }
}
