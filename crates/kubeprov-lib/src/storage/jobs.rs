//! Job queue persistence
//!
//! Jobs live under `/jobs/{id}` where the id is generated by the store in
//! creation order. The id is part of the key only; the stored value is the
//! job without it, so the serialized form read back by [`JobStorage::list`]
//! is byte-identical to what was written and can be used as the
//! compare-and-swap precondition.

use super::StorageError;
use crate::models::{Job, JobStatus};
use crate::store::{KeyedStore, StoreError};
use std::sync::Arc;
use tracing::debug;

const JOBS_DIR: &str = "/jobs";
const KIND: &str = "job";

/// Repository for queued jobs
#[derive(Clone)]
pub struct JobStorage {
    store: Arc<dyn KeyedStore>,
}

impl JobStorage {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    fn key(id: &str) -> String {
        format!("{}/{}", JOBS_DIR, id)
    }

    fn encode(job: &Job) -> Result<String, StorageError> {
        serde_json::to_string(job).map_err(|source| StorageError::Serialization { kind: KIND, source })
    }

    fn decode(id: &str, value: &str) -> Result<Job, StorageError> {
        let mut job: Job = serde_json::from_str(value)
            .map_err(|source| StorageError::Serialization { kind: KIND, source })?;
        job.id = id.to_string();
        Ok(job)
    }

    fn map_err(err: StoreError, id: &str) -> StorageError {
        match err {
            StoreError::NotFound(_) => StorageError::NotFound {
                kind: KIND,
                name: id.to_string(),
            },
            other => StorageError::Store(other),
        }
    }

    /// Enqueue a job; the returned copy carries the generated id
    pub async fn create(&self, mut job: Job) -> Result<Job, StorageError> {
        let value = Self::encode(&job)?;
        let node = self.store.create_in_order(JOBS_DIR, &value).await?;
        job.id = node.name().to_string();

        debug!(job_id = %job.id, job_type = %job.job_type, "Enqueued job");
        Ok(job)
    }

    /// All jobs ordered by id
    pub async fn list(&self) -> Result<Vec<Job>, StorageError> {
        let nodes = match self.store.list(JOBS_DIR).await {
            Ok(nodes) => nodes,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(value) = &node.value {
                jobs.push(Self::decode(node.name(), value)?);
            }
        }
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    pub async fn get(&self, id: &str) -> Result<Job, StorageError> {
        let node = self
            .store
            .get(&Self::key(id))
            .await
            .map_err(|e| Self::map_err(e, id))?;
        match node.value {
            Some(value) => Self::decode(id, &value),
            None => Err(StorageError::NotFound {
                kind: KIND,
                name: id.to_string(),
            }),
        }
    }

    pub async fn update(&self, job: &Job) -> Result<(), StorageError> {
        let value = Self::encode(job)?;
        self.store
            .update(&Self::key(&job.id), &value)
            .await
            .map_err(|e| Self::map_err(e, &job.id))?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.store
            .delete(&Self::key(id))
            .await
            .map_err(|e| Self::map_err(e, id))
    }

    /// Atomically move a queued job to STARTED.
    ///
    /// Returns `false` when the stored job no longer matches `job`, meaning
    /// another worker claimed or changed it first.
    pub async fn claim(&self, job: &Job) -> Result<bool, StorageError> {
        if job.status != JobStatus::Queued {
            return Ok(false);
        }

        let prev = Self::encode(job)?;
        let mut started = job.clone();
        started.status = JobStatus::Started;
        let new = Self::encode(&started)?;

        self.store
            .compare_and_swap(&Self::key(&job.id), &prev, &new)
            .await
            .map_err(|e| Self::map_err(e, &job.id))
    }
}
