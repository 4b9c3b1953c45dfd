//! API client for the provisioner daemon

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// API client for the provisioner HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }

    /// Make a DELETE request
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .delete(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        anyhow::bail!("API error ({}): {}", status, message);
    }

    response.json().await.context("Failed to parse response")
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub data: String,
    pub status: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    pub data: String,
}

/// A Kube as returned by the daemon; fields the CLI does not show are kept
/// so that JSON output is the full record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kube {
    pub name: String,
    #[serde(default)]
    pub master_node_size: String,
    #[serde(default)]
    pub kube_master_count: u32,
    #[serde(default)]
    pub master_public_ip: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Kube {
    pub fn region(&self) -> &str {
        self.rest
            .get("aws_config")
            .and_then(|c| c.get("region"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kube_name: String,
    pub size: String,
    #[serde(default)]
    pub provider_id: Value,
    #[serde(default)]
    pub private_dns_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_creation_timestamp: Option<String>,
}

impl Node {
    /// Instance id once the node has been launched
    pub fn instance_id(&self) -> Option<&str> {
        self.provider_id.get("id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNodeRequest {
    pub size: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_parses_jobs() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/jobs")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"id":"00000000000000000001","type":"create_kube","data":"{\"kube_name\":\"prod\"}","status":"QUEUED","attempts":0}]"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let jobs: Vec<Job> = client.get("api/v1/jobs").await.unwrap();

        mock.assert_async().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_type, "create_kube");
        assert_eq!(jobs[0].error, None);
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/kubes/ghost")
            .with_status(404)
            .with_body(r#"{"error":"kube not found: ghost"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.get::<Kube>("api/v1/kubes/ghost").await.unwrap_err();

        assert_eq!(err.to_string(), "API error (404 Not Found): kube not found: ghost");
    }

    #[tokio::test]
    async fn test_kube_keeps_unknown_fields() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/kubes/prod")
            .with_status(200)
            .with_body(
                r#"{"name":"prod","master_node_size":"m4.large","kube_master_count":1,"ready":true,"aws_config":{"region":"us-west-2"}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let kube: Kube = client.get("api/v1/kubes/prod").await.unwrap();

        assert_eq!(kube.region(), "us-west-2");
        let json = serde_json::to_value(&kube).unwrap();
        assert_eq!(json["aws_config"]["region"], "us-west-2");
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/kubes/prod/nodes")
            .match_body(mockito::Matcher::Json(serde_json::json!({"size": "m4.xlarge"})))
            .with_status(202)
            .with_body(r#"{"name":"prod-minion-abcde","kube_name":"prod","size":"m4.xlarge","provider_id":{"state":"unprovisioned"}}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let node: Node = client
            .post(
                "api/v1/kubes/prod/nodes",
                &AddNodeRequest {
                    size: "m4.xlarge".to_string(),
                },
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(node.name, "prod-minion-abcde");
        assert_eq!(node.instance_id(), None);
    }
}
