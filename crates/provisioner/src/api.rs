//! HTTP API for health checks, Prometheus metrics and the provisioning queue
//!
//! Kube and node mutations never run inline: the handlers store the record
//! (where there is one to store) and enqueue the job that does the work.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use kubeprov_lib::{
    health::{ComponentStatus, HealthRegistry},
    models::{Job, JobStatus, JobType, Kube, KubeJobData, Node},
    observability::ProvisionerMetrics,
    procedure::{ActionRegistry, ActionSnapshot},
    provider::minion_name,
    storage::{Storage, StorageError},
    worker::JobQueue,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ProvisionerMetrics,
    pub storage: Storage,
    pub queue: JobQueue,
    pub actions: Arc<ActionRegistry>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ProvisionerMetrics,
        storage: Storage,
        queue: JobQueue,
        actions: Arc<ActionRegistry>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            storage,
            queue,
            actions,
        }
    }
}

/// Error response with a JSON `{"error": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
            StorageError::AlreadyExists { .. } => StatusCode::CONFLICT,
            StorageError::InvalidName { .. } | StorageError::Scope { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "Storage request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// A job as shown by the API, including its store-assigned id
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub data: String,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            data: job.data,
            status: job.status,
            attempts: job.attempts,
            error: job.error,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    pub size: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub resource_id: String,
    #[serde(flatten)]
    pub status: ActionSnapshot,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<JobResponse>>> {
    let jobs = state.queue.list().await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

async fn enqueue_job(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EnqueueJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let Json(request) = body?;
    let job = state.queue.enqueue(request.job_type, request.data).await?;
    info!(job_id = %job.id, job_type = %job.job_type, "Job enqueued");
    Ok((StatusCode::CREATED, Json(job.into())))
}

async fn list_actions(State(state): State<Arc<AppState>>) -> Json<Vec<ActionResponse>> {
    let actions = state
        .actions
        .list()
        .into_iter()
        .map(|(resource_id, status)| ActionResponse {
            resource_id,
            status,
        })
        .collect();
    Json(actions)
}

async fn list_kubes(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Kube>>> {
    Ok(Json(state.storage.kubes.list(&[]).await?))
}

async fn get_kube(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Kube>> {
    Ok(Json(state.storage.kubes.get(&[], &name).await?))
}

async fn create_kube(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Kube>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Kube>)> {
    let Json(kube) = body?;
    if kube.kube_master_count == 0 {
        return Err(ApiError::bad_request("kube_master_count must be at least 1"));
    }

    let kube = state.storage.kubes.create(&[], kube).await?;
    let job = state
        .queue
        .enqueue_json(
            JobType::CreateKube,
            &KubeJobData {
                kube_name: kube.name.clone(),
                node_name: None,
            },
        )
        .await?;
    info!(kube = %kube.name, job_id = %job.id, "Kube creation queued");
    Ok((StatusCode::CREATED, Json(kube)))
}

async fn delete_kube(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    state.storage.kubes.get(&[], &name).await?;
    let job = state
        .queue
        .enqueue_json(
            JobType::DeleteKube,
            &KubeJobData {
                kube_name: name.clone(),
                node_name: None,
            },
        )
        .await?;
    info!(kube = %name, job_id = %job.id, "Kube deletion queued");
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Path(kube_name): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    state.storage.kubes.get(&[], &kube_name).await?;
    Ok(Json(state.storage.nodes.list(&[&kube_name]).await?))
}

async fn add_node(
    State(state): State<Arc<AppState>>,
    Path(kube_name): Path<String>,
    body: Result<Json<AddNodeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let Json(request) = body?;
    if request.size.is_empty() {
        return Err(ApiError::bad_request("size is required"));
    }
    state.storage.kubes.get(&[], &kube_name).await?;

    let mut node = Node::new(&kube_name, request.size);
    node.name = minion_name(&kube_name);
    let node = state.storage.nodes.create(&[&kube_name], node).await?;

    let job = state
        .queue
        .enqueue_json(
            JobType::CreateNode,
            &KubeJobData {
                kube_name: kube_name.clone(),
                node_name: Some(node.name.clone()),
            },
        )
        .await?;
    info!(kube = %kube_name, node = %node.name, job_id = %job.id, "Node creation queued");
    Ok((StatusCode::ACCEPTED, Json(node)))
}

async fn remove_node(
    State(state): State<Arc<AppState>>,
    Path((kube_name, node_name)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    state.storage.nodes.get(&[&kube_name], &node_name).await?;
    let job = state
        .queue
        .enqueue_json(
            JobType::DeleteNode,
            &KubeJobData {
                kube_name: kube_name.clone(),
                node_name: Some(node_name.clone()),
            },
        )
        .await?;
    info!(kube = %kube_name, node = %node_name, job_id = %job.id, "Node deletion queued");
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/jobs", get(list_jobs).post(enqueue_job))
        .route("/api/v1/actions", get(list_actions))
        .route("/api/v1/kubes", get(list_kubes).post(create_kube))
        .route("/api/v1/kubes/:name", get(get_kube).delete(delete_kube))
        .route("/api/v1/kubes/:name/nodes", get(list_nodes).post(add_node))
        .route(
            "/api/v1/kubes/:name/nodes/:node",
            axum::routing::delete(remove_node),
        )
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
