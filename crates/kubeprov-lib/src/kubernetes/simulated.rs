//! In-memory Kubernetes API
//!
//! Records namespaces, secrets and services, and reports a fixed set of
//! nodes. [`SimulatedConnector`] hands out the same client for every Kube.

use super::{
    KubernetesClient, KubernetesConnector, KubernetesError, NodeInfo, SecretDefinition,
    ServiceDefinition,
};
use crate::models::Kube;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::{Arc, Mutex};

/// Process-local stand-in for a cluster's API server
#[derive(Default)]
pub struct SimulatedKubernetes {
    namespaces: DashSet<String>,
    secrets: DashMap<(String, String), SecretDefinition>,
    services: DashMap<(String, String), ServiceDefinition>,
    nodes: Mutex<Vec<NodeInfo>>,
    creates: DashMap<&'static str, usize>,
}

impl SimulatedKubernetes {
    /// A cluster with one ready node
    pub fn new() -> Arc<Self> {
        let cluster = Self::default();
        cluster.set_nodes(vec![NodeInfo {
            name: "ip-10-0-0-1.ec2.internal".to_string(),
            ready: true,
        }]);
        Arc::new(cluster)
    }

    /// A cluster whose API answers but has no nodes registered
    pub fn without_nodes() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        *self.nodes.lock().unwrap_or_else(|e| e.into_inner()) = nodes;
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.contains(name)
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<SecretDefinition> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .map(|s| s.clone())
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<ServiceDefinition> {
        self.services
            .get(&(namespace.to_string(), name.to_string()))
            .map(|s| s.clone())
    }

    /// How many create calls were made for `kind` (`namespace`, `secret`, `service`)
    pub fn creates(&self, kind: &str) -> usize {
        self.creates.get(kind).map(|c| *c).unwrap_or(0)
    }

    fn count(&self, kind: &'static str) {
        *self.creates.entry(kind).or_insert(0) += 1;
    }
}

#[async_trait]
impl KubernetesClient for SimulatedKubernetes {
    async fn get_namespace(&self, name: &str) -> Result<(), KubernetesError> {
        if self.namespaces.contains(name) {
            Ok(())
        } else {
            Err(KubernetesError::NotFound(format!("namespace {name}")))
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<(), KubernetesError> {
        self.count("namespace");
        if !self.namespaces.insert(name.to_string()) {
            return Err(KubernetesError::AlreadyExists(format!("namespace {name}")));
        }
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<(), KubernetesError> {
        if self.secret(namespace, name).is_some() {
            Ok(())
        } else {
            Err(KubernetesError::NotFound(format!("secret {namespace}/{name}")))
        }
    }

    async fn create_secret(&self, secret: &SecretDefinition) -> Result<(), KubernetesError> {
        self.count("secret");
        if !self.namespaces.contains(&secret.namespace) {
            return Err(KubernetesError::NotFound(format!("namespace {}", secret.namespace)));
        }
        self.secrets.insert(
            (secret.namespace.clone(), secret.name.clone()),
            secret.clone(),
        );
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<(), KubernetesError> {
        if self.service(namespace, name).is_some() {
            Ok(())
        } else {
            Err(KubernetesError::NotFound(format!("service {namespace}/{name}")))
        }
    }

    async fn create_service(&self, service: &ServiceDefinition) -> Result<(), KubernetesError> {
        self.count("service");
        if !self.namespaces.contains(&service.namespace) {
            return Err(KubernetesError::NotFound(format!("namespace {}", service.namespace)));
        }
        self.services.insert(
            (service.namespace.clone(), service.name.clone()),
            service.clone(),
        );
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, KubernetesError> {
        Ok(self.nodes.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

/// Connects every Kube to one shared [`SimulatedKubernetes`]
#[derive(Clone)]
pub struct SimulatedConnector {
    cluster: Arc<SimulatedKubernetes>,
}

impl SimulatedConnector {
    pub fn new(cluster: Arc<SimulatedKubernetes>) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &Arc<SimulatedKubernetes> {
        &self.cluster
    }
}

#[async_trait]
impl KubernetesConnector for SimulatedConnector {
    async fn connect(&self, kube: &Kube) -> Result<Arc<dyn KubernetesClient>> {
        if kube.master_public_ip.is_empty() {
            anyhow::bail!("Kube {} has no master public IP yet", kube.name);
        }
        Ok(self.cluster.clone())
    }
}
