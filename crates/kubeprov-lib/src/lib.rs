//! Kubernetes cluster provisioning library
//!
//! This crate provides the core functionality for:
//! - Hierarchical key/value storage and typed resource repositories
//! - Resumable multi-step procedures with cancellable waits
//! - The asynchronous job queue and its worker
//! - Cloud providers (AWS behind capability interfaces)
//! - The Kubernetes API seam
//! - Health checks and observability

pub mod health;
pub mod kubernetes;
pub mod models;
pub mod observability;
pub mod procedure;
pub mod provider;
pub mod storage;
pub mod store;
pub mod worker;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ProvisionerMetrics, StructuredLogger};
pub use procedure::{ActionRegistry, ActionStatus, Procedure};
pub use provider::Provider;
pub use storage::{Storage, StorageError};
pub use store::{KeyedStore, LocalStore};
pub use worker::{JobQueue, PassResults, Performable, Worker, WorkerBuilder, WorkerNotifier};
