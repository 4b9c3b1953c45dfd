//! [`KubernetesClient`] backed by the `kube` crate

use super::{
    KubernetesClient, KubernetesConnector, KubernetesError, NodeInfo, SecretDefinition,
    ServiceDefinition,
};
use crate::models::Kube;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Namespace, Node, Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::sync::Arc;

/// Kubernetes client talking to a real API server
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
}

impl KubeApiClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client authenticating to `host` with basic auth
    pub async fn for_master(
        cluster: &str,
        host: &str,
        username: &str,
        password: &str,
        insecure: bool,
    ) -> Result<Self> {
        let server = if host.starts_with("https://") || host.starts_with("http://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        let user = format!("{cluster}-admin");

        // JSON is valid YAML and sidesteps quoting of credentials
        let document = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{
                "name": cluster,
                "cluster": {
                    "server": server,
                    "insecure-skip-tls-verify": insecure,
                },
            }],
            "users": [{
                "name": user,
                "user": { "username": username, "password": password },
            }],
            "contexts": [{
                "name": cluster,
                "context": { "cluster": cluster, "user": user },
            }],
            "current-context": cluster,
        });

        let kubeconfig = Kubeconfig::from_yaml(&document.to_string())
            .context("Failed to build kubeconfig")?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("Failed to load kubeconfig")?;
        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;

        Ok(Self::new(client))
    }
}

fn object_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn map_error(resource: String, err: kube::Error) -> KubernetesError {
    match err {
        kube::Error::Api(response) if response.code == 404 => KubernetesError::NotFound(resource),
        kube::Error::Api(response) if response.code == 409 => {
            KubernetesError::AlreadyExists(resource)
        }
        kube::Error::Api(response) => KubernetesError::Api(response.message),
        other => KubernetesError::Api(other.to_string()),
    }
}

#[async_trait]
impl KubernetesClient for KubeApiClient {
    async fn get_namespace(&self, name: &str) -> Result<(), KubernetesError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map(|_| ())
            .map_err(|e| map_error(format!("namespace {name}"), e))
    }

    async fn create_namespace(&self, name: &str) -> Result<(), KubernetesError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: object_meta(name),
            ..Default::default()
        };
        api.create(&PostParams::default(), &namespace)
            .await
            .map(|_| ())
            .map_err(|e| map_error(format!("namespace {name}"), e))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<(), KubernetesError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map(|_| ())
            .map_err(|e| map_error(format!("secret {namespace}/{name}"), e))
    }

    async fn create_secret(&self, secret: &SecretDefinition) -> Result<(), KubernetesError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &secret.namespace);
        let object = Secret {
            metadata: object_meta(&secret.name),
            type_: Some(secret.secret_type.clone()),
            string_data: Some(secret.data.clone()),
            ..Default::default()
        };
        api.create(&PostParams::default(), &object)
            .await
            .map(|_| ())
            .map_err(|e| map_error(format!("secret {}/{}", secret.namespace, secret.name), e))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<(), KubernetesError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map(|_| ())
            .map_err(|e| map_error(format!("service {namespace}/{name}"), e))
    }

    async fn create_service(&self, service: &ServiceDefinition) -> Result<(), KubernetesError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &service.namespace);
        let ports = service
            .ports
            .iter()
            .map(|p| ServicePort {
                name: Some(p.name.clone()),
                port: p.port,
                protocol: Some(p.protocol.clone()),
                ..Default::default()
            })
            .collect();
        let object = Service {
            metadata: object_meta(&service.name),
            spec: Some(ServiceSpec {
                type_: Some(service.service_type.clone()),
                selector: Some(service.selector.clone()),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        };
        api.create(&PostParams::default(), &object)
            .await
            .map(|_| ())
            .map_err(|e| map_error(format!("service {}/{}", service.namespace, service.name), e))
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, KubernetesError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error("nodes".to_string(), e))?;

        Ok(nodes
            .items
            .into_iter()
            .map(|node| {
                let ready = node
                    .status
                    .as_ref()
                    .and_then(|s| s.conditions.as_ref())
                    .map(|conditions| {
                        conditions
                            .iter()
                            .any(|c| c.type_ == "Ready" && c.status == "True")
                    })
                    .unwrap_or(false);
                NodeInfo {
                    name: node.metadata.name.unwrap_or_default(),
                    ready,
                }
            })
            .collect())
    }
}

/// Connects to a Kube's master using the credentials stored on the Kube
#[derive(Debug, Clone, Default)]
pub struct KubeApiConnector {
    pub insecure: bool,
}

impl KubeApiConnector {
    pub fn new(insecure: bool) -> Self {
        Self { insecure }
    }
}

#[async_trait]
impl KubernetesConnector for KubeApiConnector {
    async fn connect(&self, kube: &Kube) -> Result<Arc<dyn KubernetesClient>> {
        if kube.master_public_ip.is_empty() {
            anyhow::bail!("Kube {} has no master public IP", kube.name);
        }
        let client = KubeApiClient::for_master(
            &kube.name,
            &kube.master_public_ip,
            &kube.username,
            &kube.password,
            self.insecure,
        )
        .await?;
        Ok(Arc::new(client))
    }
}
