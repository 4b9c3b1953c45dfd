//! Integration tests for the provisioner API endpoints

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use kubeprov_lib::{
    health::{components, HealthRegistry},
    models::{JobType, KubeJobData},
    observability::ProvisionerMetrics,
    procedure::ActionRegistry,
    storage::Storage,
    store::LocalStore,
    worker::{Performable, Worker, WorkerBuilder},
};
use provisioner::api::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Records the payload of every job it performs
#[derive(Default)]
struct Recorder {
    calls: AtomicUsize,
    payloads: Mutex<Vec<String>>,
}

#[async_trait]
impl Performable for Recorder {
    fn max_attempts(&self) -> u32 {
        3
    }

    async fn perform(&self, data: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(data.to_string());
        Ok(())
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    worker: Worker,
    recorder: Arc<Recorder>,
}

async fn setup_test_app() -> TestApp {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::WORKER).await;
    health_registry.register(components::STORE).await;

    let storage = Storage::new(Arc::new(LocalStore::new()));
    let recorder = Arc::new(Recorder::default());
    let worker = WorkerBuilder::new()
        .jobs(storage.jobs.clone())
        .performer(JobType::CreateKube, recorder.clone())
        .build()
        .unwrap();

    let state = Arc::new(AppState::new(
        health_registry,
        ProvisionerMetrics::new(),
        storage,
        worker.queue(),
        Arc::new(ActionRegistry::new()),
    ));
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        worker,
        recorder,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_prod(app: &Router) {
    let (status, _) = send(
        app,
        "POST",
        "/api/v1/kubes",
        Some(json!({"name": "prod", "username": "admin", "password": "secret"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let (status, health) = send(&app.router, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["worker"].is_object());
    assert!(health["components"]["store"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;

    app.state
        .health_registry
        .set_degraded(components::WORKER, "Job storage unavailable")
        .await;

    let (status, health) = send(&app.router, "GET", "/healthz", None).await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;

    app.state
        .health_registry
        .set_unhealthy(components::STORE, "Snapshot not writable")
        .await;

    let (status, health) = send(&app.router, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let app = setup_test_app().await;

    let (status, readiness) = send(&app.router, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true).await;

    let (status, readiness) = send(&app.router, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app().await;

    app.state.metrics.observe_step_duration("create_kube", 0.5);
    app.state.metrics.set_queue_depth(2);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("kubeprov_step_duration_seconds_bucket"));
    assert!(metrics_text.contains("kubeprov_job_queue_depth"));
    assert!(metrics_text.contains("kubeprov_kubes_ready"));
}

#[tokio::test]
async fn test_create_kube_stores_record_and_enqueues_job() {
    let app = setup_test_app().await;

    let (status, kube) = send(
        &app.router,
        "POST",
        "/api/v1/kubes",
        Some(json!({"name": "prod", "username": "admin", "password": "secret"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(kube["name"], "prod");
    assert_eq!(kube["kube_master_count"], 1);

    let (status, jobs) = send(&app.router, "GET", "/api/v1/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["type"], "create_kube");
    assert_eq!(jobs[0]["status"], "QUEUED");
    assert!(!jobs[0]["id"].as_str().unwrap().is_empty());

    let data: KubeJobData = serde_json::from_str(jobs[0]["data"].as_str().unwrap()).unwrap();
    assert_eq!(data.kube_name, "prod");
    assert_eq!(data.node_name, None);

    let (status, kube) = send(&app.router, "GET", "/api/v1/kubes/prod", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(kube["username"], "admin");

    let (status, kubes) = send(&app.router, "GET", "/api/v1/kubes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(kubes.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_kube_conflicts() {
    let app = setup_test_app().await;
    create_prod(&app.router).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/v1/kubes",
        Some(json!({"name": "prod"})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "kube already exists: prod");

    // No second CreateKube was queued
    let (_, jobs) = send(&app.router, "GET", "/api/v1/jobs", None).await;
    assert_eq!(jobs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_kube_requests_are_rejected() {
    let app = setup_test_app().await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/v1/kubes",
        Some(json!({"username": "admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/v1/kubes",
        Some(json!({"name": "prod", "kube_master_count": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "kube_master_count must be at least 1");
}

#[tokio::test]
async fn test_missing_kube_returns_404() {
    let app = setup_test_app().await;

    let (status, body) = send(&app.router, "GET", "/api/v1/kubes/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "kube not found: ghost");

    let (status, _) = send(&app.router, "DELETE", "/api/v1/kubes/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app.router, "GET", "/api/v1/kubes/ghost/nodes", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/kubes/ghost/nodes",
        Some(json!({"size": "m4.large"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_kube_enqueues_job() {
    let app = setup_test_app().await;
    create_prod(&app.router).await;

    let (status, job) = send(&app.router, "DELETE", "/api/v1/kubes/prod", None).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(job["type"], "delete_kube");
    assert_eq!(job["status"], "QUEUED");

    // The record stays until the job has deleted the cloud resources
    let (status, _) = send(&app.router, "GET", "/api/v1/kubes/prod", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_add_and_remove_node() {
    let app = setup_test_app().await;
    create_prod(&app.router).await;

    let (status, node) = send(
        &app.router,
        "POST",
        "/api/v1/kubes/prod/nodes",
        Some(json!({"size": "m4.xlarge"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let node_name = node["name"].as_str().unwrap().to_string();
    assert!(node_name.starts_with("prod-minion-"));
    assert_eq!(node["size"], "m4.xlarge");

    let (status, nodes) = send(&app.router, "GET", "/api/v1/kubes/prod/nodes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(nodes.as_array().unwrap().len(), 1);

    let (_, jobs) = send(&app.router, "GET", "/api/v1/jobs", None).await;
    let create_node = jobs
        .as_array()
        .unwrap()
        .iter()
        .find(|j| j["type"] == "create_node")
        .unwrap();
    let data: KubeJobData = serde_json::from_str(create_node["data"].as_str().unwrap()).unwrap();
    assert_eq!(data.node_name.as_deref(), Some(node_name.as_str()));

    let uri = format!("/api/v1/kubes/prod/nodes/{node_name}");
    let (status, job) = send(&app.router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(job["type"], "delete_node");

    let (status, _) = send(&app.router, "DELETE", "/api/v1/kubes/prod/nodes/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_add_node_requires_size() {
    let app = setup_test_app().await;
    create_prod(&app.router).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/v1/kubes/prod/nodes",
        Some(json!({"size": ""})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "size is required");
}

#[tokio::test]
async fn test_enqueue_job() {
    let app = setup_test_app().await;

    let (status, job) = send(
        &app.router,
        "POST",
        "/api/v1/jobs",
        Some(json!({"type": "deploy_component", "data": "{\"app_name\":\"shop\",\"component_name\":\"web\"}"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["type"], "deploy_component");
    assert_eq!(job["attempts"], 0);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/jobs",
        Some(json!({"type": "rebuild_everything"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_queued_job_is_performed_by_worker() {
    let app = setup_test_app().await;
    create_prod(&app.router).await;

    let results = app.worker.run_pass().await.unwrap();

    assert_eq!(results.succeeded, 1);
    assert_eq!(app.recorder.calls.load(Ordering::SeqCst), 1);
    let payload = app.recorder.payloads.lock().unwrap()[0].clone();
    assert!(payload.contains("\"kube_name\":\"prod\""));

    let (_, jobs) = send(&app.router, "GET", "/api/v1/jobs", None).await;
    assert!(jobs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_actions_lists_running_actions() {
    let app = setup_test_app().await;

    let status = app
        .state
        .actions
        .begin("prod", "creating kube", 5, false)
        .unwrap();
    status.set_description("Waiting for Kubernetes master launch");

    let (code, actions) = send(&app.router, "GET", "/api/v1/actions", None).await;

    assert_eq!(code, StatusCode::OK);
    let actions = actions.as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["resource_id"], "prod");
    assert_eq!(actions[0]["description"], "Waiting for Kubernetes master launch");
    assert_eq!(actions[0]["cancelled"], false);
    assert_eq!(actions[0]["finished"], false);
    assert_eq!(actions[0]["retries"], 0);
}
