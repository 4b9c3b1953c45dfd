use super::*;
use crate::kubernetes::{KubernetesClient, SimulatedConnector, SimulatedKubernetes};
use crate::models::{
    Component, Container, DeployComponentData, ImageRepo, Kube, KubeJobData, Node, Port,
};
use crate::procedure::ActionRegistry;
use crate::provider::aws::simulated::SimulatedAws;
use crate::provider::aws::{AwsProvider, AwsProviderConfig, Collaborators, PollBudget};
use crate::provider::{CloudConfigRenderer, Provider, StaticEtcdDiscovery};
use crate::storage::Storage;
use crate::store::LocalStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Performer failing with a fixed message
struct AlwaysFails {
    max_attempts: u32,
    calls: AtomicUsize,
}

impl AlwaysFails {
    fn new(max_attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            max_attempts,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Performable for AlwaysFails {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn perform(&self, _data: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("boom")
    }
}

/// Performer recording the payloads it ran
#[derive(Default)]
struct Records {
    seen: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Performable for Records {
    fn max_attempts(&self) -> u32 {
        1
    }

    async fn perform(&self, data: &str) -> Result<()> {
        self.seen.lock().unwrap().push(data.to_string());
        Ok(())
    }
}

/// Performer that claims every other queued job while it runs
struct Interferes {
    jobs: JobStorage,
}

#[async_trait]
impl Performable for Interferes {
    fn max_attempts(&self) -> u32 {
        1
    }

    async fn perform(&self, _data: &str) -> Result<()> {
        for job in self.jobs.list().await? {
            if job.status == JobStatus::Queued {
                self.jobs.claim(&job).await?;
            }
        }
        Ok(())
    }
}

fn storage() -> Storage {
    Storage::new(Arc::new(LocalStore::new()))
}

fn worker_with(storage: &Storage, job_type: JobType, performer: Arc<dyn Performable>) -> Worker {
    WorkerBuilder::new()
        .jobs(storage.jobs.clone())
        .performer(job_type, performer)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_failing_job_with_single_attempt_fails() {
    let storage = storage();
    let job = storage
        .jobs
        .create(Job::new(JobType::DeployComponent, "{}"))
        .await
        .unwrap();
    let worker = worker_with(&storage, JobType::DeployComponent, AlwaysFails::new(1));

    let results = worker.run_pass().await.unwrap();

    assert_eq!(results.claimed, 1);
    assert_eq!(results.failed, 1);
    let stored = storage.jobs.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_retry_until_max_attempts() {
    let storage = storage();
    let job = storage
        .jobs
        .create(Job::new(JobType::DeployComponent, "{}"))
        .await
        .unwrap();
    let performer = AlwaysFails::new(3);
    let worker = worker_with(&storage, JobType::DeployComponent, performer.clone());

    for expected_attempts in 1..=2 {
        let results = worker.run_pass().await.unwrap();
        assert_eq!(results.requeued, 1);
        let stored = storage.jobs.get(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.attempts, expected_attempts);
    }

    let results = worker.run_pass().await.unwrap();
    assert_eq!(results.failed, 1);
    let stored = storage.jobs.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 3);

    // Failed jobs stay in the queue but are never run again
    let results = worker.run_pass().await.unwrap();
    assert_eq!(results, PassResults::default());
    assert_eq!(performer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_successful_job_is_deleted() {
    let storage = storage();
    let performer = Arc::new(Records::default());
    let worker = worker_with(&storage, JobType::DeployComponent, performer.clone());
    storage
        .jobs
        .create(Job::new(JobType::DeployComponent, "first"))
        .await
        .unwrap();
    storage
        .jobs
        .create(Job::new(JobType::DeployComponent, "second"))
        .await
        .unwrap();

    let results = worker.run_pass().await.unwrap();

    assert_eq!(results.succeeded, 2);
    assert!(storage.jobs.list().await.unwrap().is_empty());
    assert_eq!(*performer.seen.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_job_without_performer_fails() {
    let storage = storage();
    let job = storage
        .jobs
        .create(Job::new(JobType::CreateKube, "{}"))
        .await
        .unwrap();
    let worker = worker_with(&storage, JobType::DeployComponent, AlwaysFails::new(5));

    let results = worker.run_pass().await.unwrap();

    assert_eq!(results.failed, 1);
    let stored = storage.jobs.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(
        stored.error.as_deref(),
        Some("No performer registered for job type create_kube")
    );
}

#[tokio::test]
async fn test_lost_claim_is_a_conflict() {
    let storage = storage();
    let worker = worker_with(
        &storage,
        JobType::DeployComponent,
        Arc::new(Interferes {
            jobs: storage.jobs.clone(),
        }),
    );
    storage
        .jobs
        .create(Job::new(JobType::DeployComponent, "a"))
        .await
        .unwrap();
    let second = storage
        .jobs
        .create(Job::new(JobType::DeployComponent, "b"))
        .await
        .unwrap();

    let results = worker.run_pass().await.unwrap();

    assert_eq!(results.claimed, 1);
    assert_eq!(results.succeeded, 1);
    assert_eq!(results.conflicts, 1);
    let stored = storage.jobs.get(&second.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Started);
    assert_eq!(stored.attempts, 0);
}

#[tokio::test]
async fn test_notified_worker_runs_new_job() {
    let storage = storage();
    let performer = Arc::new(Records::default());
    let worker = WorkerBuilder::new()
        .jobs(storage.jobs.clone())
        .performer(JobType::DeployComponent, performer.clone())
        .interval(Duration::from_secs(3600))
        .build()
        .unwrap();
    let queue = worker.queue();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    // Let the immediate first tick pass
    tokio::time::sleep(Duration::from_millis(50)).await;
    queue
        .enqueue_json(
            JobType::DeployComponent,
            &DeployComponentData {
                app_name: "shop".to_string(),
                component_name: "web".to_string(),
            },
        )
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !queue.list().await.unwrap().is_empty() {
        assert!(Instant::now() < deadline, "job was not picked up");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(performer.seen.lock().unwrap().len(), 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[test]
fn test_builder_requires_job_storage() {
    let err = WorkerBuilder::new().build().err().unwrap();
    assert_eq!(err.to_string(), "Job storage is required");
}

fn fast() -> PollBudget {
    PollBudget::new(Duration::from_secs(2), Duration::from_millis(5))
}

fn aws_provider(storage: &Storage) -> (Arc<SimulatedAws>, Arc<dyn Provider>) {
    let aws = SimulatedAws::new("us-east-1");
    let collaborators = Collaborators {
        userdata: Arc::new(CloudConfigRenderer),
        etcd: Arc::new(StaticEtcdDiscovery::new("https://discovery.local/token")),
        kubernetes: Arc::new(SimulatedConnector::new(SimulatedKubernetes::new())),
    };
    let config = AwsProviderConfig {
        master_launch: fast(),
        kubernetes_api: fast(),
        instance_terminate: fast(),
        gateway_detach: fast(),
        subnet_delete: fast(),
        efs_mount_target: fast(),
        ..Default::default()
    };
    let provider = AwsProvider::new(aws.clients(), storage.clone(), collaborators, config);
    (aws, Arc::new(provider))
}

fn kube_worker(storage: &Storage, provider: Arc<dyn Provider>, actions: Arc<ActionRegistry>) -> Worker {
    KubeJob::all(provider, storage.clone(), actions)
        .into_iter()
        .fold(WorkerBuilder::new().jobs(storage.jobs.clone()), |builder, (job_type, job)| {
            builder.performer(job_type, job)
        })
        .build()
        .unwrap()
}

fn kube_job(kube: &str, node: Option<&str>) -> String {
    serde_json::to_string(&KubeJobData {
        kube_name: kube.to_string(),
        node_name: node.map(str::to_string),
    })
    .unwrap()
}

#[tokio::test]
async fn test_kube_lifecycle_through_jobs() {
    let storage = storage();
    let (aws, provider) = aws_provider(&storage);
    let actions = Arc::new(ActionRegistry::new());
    let worker = kube_worker(&storage, provider, actions.clone());
    let queue = worker.queue();

    storage.kubes.create(&[], Kube::new("prod")).await.unwrap();
    queue
        .enqueue(JobType::CreateKube, kube_job("prod", None))
        .await
        .unwrap();
    let results = worker.run_pass().await.unwrap();
    assert_eq!(results.succeeded, 1, "{:?}", storage.jobs.list().await.unwrap());

    let kube = storage.kubes.get(&[], "prod").await.unwrap();
    assert!(kube.ready);
    assert!(actions.is_empty());

    let mut node = Node::new("prod", "m4.large");
    node.name = "prod-minion-extra".to_string();
    storage.nodes.create(&["prod"], node).await.unwrap();
    queue
        .enqueue(JobType::CreateNode, kube_job("prod", Some("prod-minion-extra")))
        .await
        .unwrap();
    worker.run_pass().await.unwrap();
    let node = storage
        .nodes
        .get(&["prod"], "prod-minion-extra")
        .await
        .unwrap();
    assert!(node.provider_id.is_provisioned());

    queue
        .enqueue(JobType::DeleteNode, kube_job("prod", Some("prod-minion-extra")))
        .await
        .unwrap();
    worker.run_pass().await.unwrap();
    assert!(storage
        .nodes
        .get(&["prod"], "prod-minion-extra")
        .await
        .unwrap_err()
        .is_not_found());

    queue
        .enqueue(JobType::DeleteKube, kube_job("prod", None))
        .await
        .unwrap();
    let results = worker.run_pass().await.unwrap();
    assert_eq!(results.succeeded, 1);
    assert!(storage.kubes.get(&[], "prod").await.unwrap_err().is_not_found());
    assert!(storage.nodes.list(&["prod"]).await.unwrap().is_empty());
    assert_eq!(aws.vpc_count(), 0);
    assert_eq!(aws.running_instances(), 0);
}

#[tokio::test]
async fn test_create_kube_rejected_while_running() {
    let storage = storage();
    let (_aws, provider) = aws_provider(&storage);
    let actions = Arc::new(ActionRegistry::new());
    storage.kubes.create(&[], Kube::new("prod")).await.unwrap();
    let _running = actions.begin("prod", "creating kube", 5, false).unwrap();

    let job = KubeJob::new(JobType::CreateKube, provider, storage.clone(), actions).unwrap();
    let err = job.perform(&kube_job("prod", None)).await.unwrap_err();

    assert_eq!(err.to_string(), "Already performing action for prod");
    assert_eq!(job.max_attempts(), 5);
}

#[tokio::test]
async fn test_delete_missing_records_succeeds() {
    let storage = storage();
    let (aws, provider) = aws_provider(&storage);
    let actions = Arc::new(ActionRegistry::new());

    let delete_kube =
        KubeJob::new(JobType::DeleteKube, provider.clone(), storage.clone(), actions.clone())
            .unwrap();
    delete_kube.perform(&kube_job("ghost", None)).await.unwrap();

    let delete_node = KubeJob::new(JobType::DeleteNode, provider, storage, actions).unwrap();
    delete_node
        .perform(&kube_job("ghost", Some("ghost-minion-1")))
        .await
        .unwrap();
    assert_eq!(delete_node.max_attempts(), 10);
    assert_eq!(aws.calls("terminate_instance"), 0);
}

#[tokio::test]
async fn test_node_job_requires_node_name() {
    let storage = storage();
    let (_aws, provider) = aws_provider(&storage);
    let job = KubeJob::new(
        JobType::CreateNode,
        provider,
        storage,
        Arc::new(ActionRegistry::new()),
    )
    .unwrap();

    let err = job.perform(&kube_job("prod", None)).await.unwrap_err();
    assert_eq!(err.to_string(), "create_node job is missing node_name");
}

fn web_component() -> Component {
    let port = |number, public| Port {
        protocol: "TCP".to_string(),
        number,
        public,
    };
    Component {
        name: "web".to_string(),
        app_name: "shop".to_string(),
        containers: vec![Container {
            name: "web".to_string(),
            image: "acme/web:1.0".to_string(),
            ports: vec![port(8080, false), port(80, true)],
            env: BTreeMap::new(),
        }],
        current_release_id: Some("r1".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_deploy_component_creates_kubernetes_objects() {
    let storage = storage();
    let cluster = SimulatedKubernetes::new();
    storage
        .components
        .create(&["shop"], web_component())
        .await
        .unwrap();
    storage
        .image_repos
        .create(
            &[],
            ImageRepo {
                name: "acme".to_string(),
                key: "c2VjcmV0".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let client: Arc<dyn KubernetesClient> = cluster.clone();
    let job = DeployComponent::new(storage, client);
    let data = r#"{"app_name":"shop","component_name":"web"}"#;
    job.perform(data).await.unwrap();
    job.perform(data).await.unwrap();

    assert!(cluster.has_namespace("shop"));
    let secret = cluster.secret("shop", "acme").unwrap();
    assert_eq!(secret.secret_type, "kubernetes.io/dockercfg");
    assert_eq!(secret.data[".dockercfg"], "c2VjcmV0");

    let internal = cluster.service("shop", "web").unwrap();
    assert_eq!(internal.service_type, "ClusterIP");
    assert_eq!(internal.ports[0].port, 8080);
    assert_eq!(internal.selector["deployment"], "r1");
    let public = cluster.service("shop", "web-public").unwrap();
    assert_eq!(public.service_type, "NodePort");
    assert_eq!(public.ports[0].port, 80);

    // Second run found everything in place
    assert_eq!(cluster.creates("namespace"), 1);
    assert_eq!(cluster.creates("service"), 2);
    assert_eq!(job.max_attempts(), 20);
}

#[tokio::test]
async fn test_deploy_component_missing_repo_fails() {
    let storage = storage();
    storage
        .components
        .create(&["shop"], web_component())
        .await
        .unwrap();

    let job = DeployComponent::new(storage, SimulatedKubernetes::new());
    let err = job
        .perform(r#"{"app_name":"shop","component_name":"web"}"#)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Failed to load image repo acme");
}

#[tokio::test]
async fn test_failed_job_records_error_cause() {
    let storage = storage();
    let job = storage
        .jobs
        .create(Job::new(
            JobType::DeployComponent,
            r#"{"app_name":"shop","component_name":"web"}"#,
        ))
        .await
        .unwrap();
    let performer = DeployComponent::new(storage.clone(), SimulatedKubernetes::new());
    let worker = worker_with(&storage, JobType::DeployComponent, Arc::new(performer));

    worker.run_pass().await.unwrap();

    let stored = storage.jobs.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    let error = stored.error.unwrap();
    assert!(error.starts_with("Failed to load component shop/web: "), "{error}");
    assert!(error.contains("component not found: web"), "{error}");
}

#[tokio::test]
async fn test_failed_kube_job_reports_retries() {
    let storage = storage();
    let (aws, provider) = aws_provider(&storage);
    let actions = Arc::new(ActionRegistry::new());
    let worker = kube_worker(&storage, provider, actions.clone());
    let queue = worker.queue();

    storage.kubes.create(&[], Kube::new("prod")).await.unwrap();
    aws.fail(
        "create_vpc",
        crate::provider::aws::CloudError::from_message("CreateVpc ERROR"),
    );
    let job = queue
        .enqueue(JobType::CreateKube, kube_job("prod", None))
        .await
        .unwrap();

    worker.run_pass().await.unwrap();
    worker.run_pass().await.unwrap();

    let stored = storage.jobs.get(&job.id).await.unwrap();
    assert_eq!(stored.attempts, 2);
    let (id, action) = &actions.list()[0];
    assert_eq!(id, "prod");
    assert_eq!(action.retries, stored.attempts);
    assert_eq!(action.max_retries, 5);
    assert_eq!(action.error.as_deref(), Some("CreateVpc ERROR"));

    aws.clear_failure("create_vpc");
    worker.run_pass().await.unwrap();
    assert!(storage.jobs.list().await.unwrap().is_empty());
    assert!(actions.is_empty());
}
