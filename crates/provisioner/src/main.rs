//! Provisioner - Kubernetes cluster provisioning daemon
//!
//! Runs the job worker that creates and deletes Kubes and their nodes,
//! deploys components to the core cluster, and serves the HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use kubeprov_lib::{
    health::{components, HealthRegistry},
    kubernetes::{KubeApiClient, KubernetesClient},
    models::JobType,
    observability::{ProvisionerMetrics, StructuredLogger},
    procedure::ActionRegistry,
    provider::aws::{simulated::SimulatedAws, AwsProvider, AwsProviderConfig, Collaborators},
    provider::{CloudConfigRenderer, HttpEtcdDiscovery, Provider},
    storage::Storage,
    store::{KeyedStore, LocalStore, LocalStoreConfig},
    worker::{DeployComponent, KubeJob, WorkerBuilder},
};
use provisioner::{
    api,
    config::{Cli, ProvisionerConfig},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROVISIONER_VERSION: &str = env!("CARGO_PKG_VERSION");
const CLOUD_BACKEND: &str = "simulated";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let credentials = cli.require_credentials();

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(fmt::layer().json())
        .init();

    info!("Starting provisioner");

    // Load configuration
    let config = ProvisionerConfig::load(&cli)?;
    info!(
        api_port = config.api_port,
        region = %config.aws_region,
        data_dir = ?config.data_dir,
        kube_api = ?config.kube_api,
        "Provisioner configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::WORKER).await;
    health_registry.register(components::STORE).await;
    health_registry.register(components::PROVIDER).await;

    let metrics = ProvisionerMetrics::new();
    let logger = StructuredLogger::new("provisioner");
    logger.log_startup(PROVISIONER_VERSION, CLOUD_BACKEND);

    // Keyed store and typed repositories
    if let Some(dir) = &config.data_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    }
    let store: Arc<dyn KeyedStore> = Arc::new(LocalStore::with_config(LocalStoreConfig {
        persistence_path: config.store_path(),
    })?);
    let storage = Storage::new(store);
    health_registry.set_healthy(components::STORE).await;

    // Cloud provider
    let cloud = SimulatedAws::new(&config.aws_region);
    let collaborators = Collaborators {
        userdata: Arc::new(CloudConfigRenderer),
        etcd: Arc::new(HttpEtcdDiscovery::with_endpoint(&config.etcd_discovery_endpoint)?),
        kubernetes: config.kube_connector(cli.insecure_https),
    };
    let provider: Arc<dyn Provider> = Arc::new(AwsProvider::new(
        cloud.clients(),
        storage.clone(),
        collaborators,
        AwsProviderConfig::default(),
    ));
    let validation = provider.validate_account().await;
    if let Err(e) = &validation {
        warn!(error = %format!("{:#}", e), "Cloud account validation failed");
    }
    health_registry
        .report(components::PROVIDER, &validation.map_err(|e| format!("{:#}", e)))
        .await;

    // Core cluster that components are deployed to
    let core: Arc<dyn KubernetesClient> = Arc::new(
        KubeApiClient::for_master(
            "core",
            &credentials.host,
            &credentials.username,
            &credentials.password,
            cli.insecure_https,
        )
        .await?,
    );

    // Job worker
    let actions = Arc::new(ActionRegistry::new());
    let mut builder = WorkerBuilder::new()
        .jobs(storage.jobs.clone())
        .interval(config.worker_interval())
        .health(health_registry.clone())
        .performer(
            JobType::DeployComponent,
            Arc::new(DeployComponent::new(storage.clone(), core)),
        );
    for (job_type, performer) in KubeJob::all(provider, storage.clone(), actions.clone()) {
        builder = builder.performer(job_type, performer);
    }
    let worker = builder.build()?;

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        storage,
        worker.queue(),
        actions,
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let worker_handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Mark provisioner as ready after initialization
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    worker_handle.await?;
    api_handle.await??;
    info!("Shutting down");

    Ok(())
}
