//! Job worker
//!
//! A single loop that, once per tick or whenever notified:
//! - lists every job once
//! - claims each QUEUED job with a compare-and-swap to STARTED
//! - dispatches it to the [`Performable`] registered for its type
//! - deletes it on success, or records the error and requeues or fails it
//!
//! Jobs run one after another; a long CreateKube holds up the pass.

mod deploy_component;
mod kube_jobs;

#[cfg(test)]
mod tests;

pub use deploy_component::DeployComponent;
pub use kube_jobs::KubeJob;

use crate::health::{components, HealthRegistry};
use crate::models::{Job, JobStatus, JobType};
use crate::observability::{outcomes, ProvisionerMetrics, StructuredLogger};
use crate::storage::{JobStorage, StorageError};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A kind of job the worker can run
#[async_trait]
pub trait Performable: Send + Sync {
    /// Attempts before the job is left FAILED
    fn max_attempts(&self) -> u32;

    async fn perform(&self, data: &str) -> Result<()>;
}

/// Configuration for the worker loop
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between passes when nothing is enqueued (default: 1 second)
    pub interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Counts from one pass over the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassResults {
    pub claimed: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub failed: usize,
    /// QUEUED jobs another worker changed first
    pub conflicts: usize,
}

/// Wakes the worker so that it runs a pass right away
#[derive(Debug, Clone)]
pub struct WorkerNotifier {
    notify: Arc<Notify>,
}

impl WorkerNotifier {
    pub fn notify(&self) {
        self.notify.notify_one();
    }
}

/// Enqueues jobs and wakes the worker
#[derive(Clone)]
pub struct JobQueue {
    jobs: JobStorage,
    notifier: WorkerNotifier,
}

impl JobQueue {
    pub fn new(jobs: JobStorage, notifier: WorkerNotifier) -> Self {
        Self { jobs, notifier }
    }

    pub async fn enqueue(&self, job_type: JobType, data: impl Into<String>) -> Result<Job, StorageError> {
        let job = self.jobs.create(Job::new(job_type, data)).await?;
        self.notifier.notify();
        Ok(job)
    }

    /// Enqueue with a JSON-encoded payload
    pub async fn enqueue_json<T: serde::Serialize>(&self, job_type: JobType, data: &T) -> Result<Job> {
        let data = serde_json::to_string(data)?;
        Ok(self.enqueue(job_type, data).await?)
    }

    pub async fn list(&self) -> Result<Vec<Job>, StorageError> {
        self.jobs.list().await
    }
}

/// Runs queued jobs
pub struct Worker {
    jobs: JobStorage,
    performers: HashMap<JobType, Arc<dyn Performable>>,
    config: WorkerConfig,
    notify: Arc<Notify>,
    health: Option<HealthRegistry>,
    metrics: ProvisionerMetrics,
    logger: StructuredLogger,
}

impl Worker {
    pub fn notifier(&self) -> WorkerNotifier {
        WorkerNotifier {
            notify: self.notify.clone(),
        }
    }

    /// A [`JobQueue`] over this worker's storage that wakes this worker
    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.jobs.clone(), self.notifier())
    }

    /// Run passes until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            performers = self.performers.len(),
            "Starting job worker"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.notify.notified() => {
                    debug!("Worker notified");
                }
                _ = shutdown.recv() => {
                    info!("Shutting down job worker");
                    break;
                }
            }

            let start = Instant::now();
            let result = self.run_pass().await;
            if let Some(health) = &self.health {
                health
                    .report(components::WORKER, &result.as_ref().map(|_| ()))
                    .await;
            }
            match result {
                Ok(results) if results.claimed > 0 || results.conflicts > 0 => {
                    info!(
                        claimed = results.claimed,
                        succeeded = results.succeeded,
                        requeued = results.requeued,
                        failed = results.failed,
                        conflicts = results.conflicts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Worker pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Worker pass failed"),
            }
        }
    }

    /// One scan of the queue
    pub async fn run_pass(&self) -> Result<PassResults, StorageError> {
        let jobs = self.jobs.list().await?;
        let queued: Vec<Job> = jobs
            .into_iter()
            .filter(|job| job.status == JobStatus::Queued)
            .collect();
        self.metrics.set_queue_depth(queued.len() as i64);

        let mut results = PassResults::default();
        for job in queued {
            match self.jobs.claim(&job).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %job.id, "Job claimed elsewhere");
                    results.conflicts += 1;
                    self.metrics.inc_jobs(outcomes::CONFLICT);
                    continue;
                }
                Err(e) if e.is_not_found() => {
                    debug!(job_id = %job.id, "Job removed before it could be claimed");
                    results.conflicts += 1;
                    self.metrics.inc_jobs(outcomes::CONFLICT);
                    continue;
                }
                Err(e) => return Err(e),
            }

            results.claimed += 1;
            let mut job = job;
            job.status = JobStatus::Started;
            self.process(&mut job, &mut results).await;
        }

        Ok(results)
    }

    async fn process(&self, job: &mut Job, results: &mut PassResults) {
        let job_type = job.job_type.to_string();
        self.logger.log_job_claimed(&job.id, &job_type, job.attempts);

        let (outcome, max_attempts) = match self.performers.get(&job.job_type) {
            Some(performer) => (performer.perform(&job.data).await, performer.max_attempts()),
            None => (
                Err(anyhow::anyhow!("No performer registered for job type {job_type}")),
                0,
            ),
        };

        match outcome {
            Ok(()) => {
                self.logger.log_job_finished(&job.id, &job_type);
                results.succeeded += 1;
                self.metrics.inc_jobs(outcomes::SUCCEEDED);
                if let Err(e) = self.jobs.delete(&job.id).await {
                    warn!(job_id = %job.id, error = %e, "Failed to delete finished job");
                }
            }
            Err(e) => {
                let error = format!("{e:#}");
                job.attempts += 1;
                job.error = Some(error.clone());
                if job.attempts < max_attempts {
                    job.status = JobStatus::Queued;
                    results.requeued += 1;
                    self.metrics.inc_jobs(outcomes::REQUEUED);
                } else {
                    job.status = JobStatus::Failed;
                    results.failed += 1;
                    self.metrics.inc_jobs(outcomes::FAILED);
                }
                self.logger
                    .log_job_failed(&job.id, &job_type, job.attempts, max_attempts, &error);

                if let Err(e) = self.jobs.update(job).await {
                    warn!(job_id = %job.id, error = %e, "Failed to record job failure");
                }
            }
        }
    }
}

/// Builder for [`Worker`]
pub struct WorkerBuilder {
    jobs: Option<JobStorage>,
    performers: HashMap<JobType, Arc<dyn Performable>>,
    config: WorkerConfig,
    health: Option<HealthRegistry>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            jobs: None,
            performers: HashMap::new(),
            config: WorkerConfig::default(),
            health: None,
        }
    }

    /// Set the job storage
    pub fn jobs(mut self, jobs: JobStorage) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Register the performer for a job type, replacing any earlier one
    pub fn performer(mut self, job_type: JobType, performer: Arc<dyn Performable>) -> Self {
        self.performers.insert(job_type, performer);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Report pass outcomes to a health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<Worker> {
        let jobs = self
            .jobs
            .ok_or_else(|| anyhow::anyhow!("Job storage is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Worker interval must be greater than zero");
        }

        Ok(Worker {
            jobs,
            performers: self.performers,
            config: self.config,
            notify: Arc::new(Notify::new()),
            health: self.health,
            metrics: ProvisionerMetrics::new(),
            logger: StructuredLogger::new("worker"),
        })
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
