//! Provisioner configuration
//!
//! Command-line flags (each with an environment fallback) cover the
//! connection settings; everything else comes from the `config` crate:
//! built-in defaults, an optional config file, then `KUBEPROV_*`
//! environment variables.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use kubeprov_lib::kubernetes::{
    KubeApiConnector, KubernetesConnector, SimulatedConnector, SimulatedKubernetes,
};
use kubeprov_lib::provider::discovery::DEFAULT_DISCOVERY_URL;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Exit code when the core cluster credentials are missing
pub const EXIT_MISSING_CREDENTIALS: i32 = 5;

/// Command-line flags
#[derive(Debug, Clone, Parser)]
#[command(name = "provisioner", version, about = "Kubernetes cluster provisioning daemon")]
pub struct Cli {
    /// Host of the core Kubernetes API that components are deployed to
    #[arg(long, env = "KUBEPROV_K8S_HOST", default_value = "localhost")]
    pub k8s_host: String,

    /// Username for the core Kubernetes API
    #[arg(long, env = "KUBEPROV_K8S_USER")]
    pub k8s_user: Option<String>,

    /// Password for the core Kubernetes API
    #[arg(long, env = "KUBEPROV_K8S_PASS", hide_env_values = true)]
    pub k8s_pass: Option<String>,

    /// Region of the simulated cloud
    #[arg(long, env = "KUBEPROV_AWS_REGION")]
    pub aws_region: Option<String>,

    /// Skip TLS verification when talking to Kubernetes masters
    #[arg(long, env = "KUBEPROV_INSECURE_HTTPS")]
    pub insecure_https: bool,

    /// Default tracing filter when RUST_LOG is unset
    #[arg(long, env = "KUBEPROV_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Optional configuration file (TOML, YAML or JSON)
    #[arg(long, env = "KUBEPROV_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Basic-auth credentials of the core cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl Cli {
    /// Core cluster credentials, or `None` if either is missing or empty
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.k8s_user.as_deref().filter(|u| !u.is_empty())?;
        let password = self.k8s_pass.as_deref().filter(|p| !p.is_empty())?;
        Some(Credentials {
            host: self.k8s_host.clone(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Print usage and exit unless the core cluster credentials are set
    pub fn require_credentials(&self) -> Credentials {
        match self.credentials() {
            Some(credentials) => credentials,
            None => {
                eprintln!("--k8s-user and --k8s-pass are required\n");
                // Printing help only fails if stdout is gone, and we exit anyway
                let _ = Cli::command().print_help();
                std::process::exit(EXIT_MISSING_CREDENTIALS);
            }
        }
    }
}

/// How the daemon reaches the API server of a Kube it created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KubeApiMode {
    /// In-memory cluster answering for every Kube
    #[default]
    Simulated,
    /// The Kube master's public IP with the Kube's stored credentials
    Live,
}

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// API server port for health, metrics and the job API
    pub api_port: u16,

    /// Directory of the store snapshot; unset keeps state in memory only
    pub data_dir: Option<PathBuf>,

    /// Worker poll interval in milliseconds
    pub worker_interval_ms: u64,

    /// Region of the simulated cloud
    pub aws_region: String,

    /// etcd discovery service used for new Kubes
    pub etcd_discovery_endpoint: String,

    /// Kube API servers polled while a Kube comes up
    pub kube_api: KubeApiMode,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            api_port: 8080,
            data_dir: None,
            worker_interval_ms: 1000,
            aws_region: "us-east-1".to_string(),
            etcd_discovery_endpoint: DEFAULT_DISCOVERY_URL.to_string(),
            kube_api: KubeApiMode::default(),
        }
    }
}

impl ProvisionerConfig {
    /// Load configuration, letting command-line flags win
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("KUBEPROV").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let mut config: ProvisionerConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        if let Some(region) = &cli.aws_region {
            config.aws_region = region.clone();
        }
        Ok(config)
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }

    pub fn kube_connector(&self, insecure_https: bool) -> Arc<dyn KubernetesConnector> {
        match self.kube_api {
            KubeApiMode::Simulated => Arc::new(SimulatedConnector::new(SimulatedKubernetes::new())),
            KubeApiMode::Live => Arc::new(KubeApiConnector::new(insecure_https)),
        }
    }

    /// Snapshot file inside `data_dir`
    pub fn store_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("store.json"))
    }
}
