//! etcd cluster discovery tokens

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Default public discovery service
pub const DEFAULT_DISCOVERY_URL: &str = "https://discovery.etcd.io/new";

/// Obtains a discovery URL for an etcd cluster of `size` members
#[async_trait]
pub trait EtcdDiscovery: Send + Sync {
    async fn new_cluster_url(&self, size: u32) -> Result<String>;
}

/// Requests a fresh token from an etcd discovery service
pub struct HttpEtcdDiscovery {
    client: Client,
    endpoint: Url,
}

impl HttpEtcdDiscovery {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DEFAULT_DISCOVERY_URL)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        let endpoint = Url::parse(endpoint).context("Invalid etcd discovery URL")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl EtcdDiscovery for HttpEtcdDiscovery {
    async fn new_cluster_url(&self, size: u32) -> Result<String> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("size", &size.to_string());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach etcd discovery service")?;

        if !response.status().is_success() {
            anyhow::bail!("etcd discovery error ({})", response.status());
        }

        let body = response
            .text()
            .await
            .context("Failed to read etcd discovery response")?;
        Ok(body.trim().to_string())
    }
}

/// Hands out a fixed discovery URL; for local and simulated runs
#[derive(Debug, Clone)]
pub struct StaticEtcdDiscovery {
    url: String,
}

impl StaticEtcdDiscovery {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl EtcdDiscovery for StaticEtcdDiscovery {
    async fn new_cluster_url(&self, size: u32) -> Result<String> {
        Ok(format!("{}?size={}", self.url, size))
    }
}
