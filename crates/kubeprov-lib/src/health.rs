//! Health tracking for the provisioner daemon
//!
//! The worker, the store and the cloud provider report into one
//! [`HealthRegistry`]. A component that keeps failing escalates from
//! degraded to unhealthy, and an unhealthy component takes the daemon out
//! of readiness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failed reports after which a component is unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but the daemon keeps serving
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failed reports in a row; reset by the first success
    #[serde(default)]
    pub consecutive_failures: u32,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            consecutive_failures: 0,
            checked_at: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// The worst component status; healthy when nothing is registered
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const WORKER: &str = "worker";
    pub const STORE: &str = "store";
    pub const PROVIDER: &str = "provider";
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared health state; clones observe the same components
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Record the outcome of one unit of work.
    ///
    /// Failures degrade the component; [`UNHEALTHY_AFTER_FAILURES`] failures
    /// in a row make it unhealthy.
    pub async fn report<E: Display>(&self, name: &str, result: &Result<(), E>) {
        let mut state = self.state.write().await;
        let health = match result {
            Ok(()) => ComponentHealth::healthy(),
            Err(e) => {
                let failures = state
                    .components
                    .get(name)
                    .map_or(0, |h| h.consecutive_failures)
                    + 1;
                let status = if failures >= UNHEALTHY_AFTER_FAILURES {
                    ComponentStatus::Unhealthy
                } else {
                    ComponentStatus::Degraded
                };
                ComponentHealth {
                    consecutive_failures: failures,
                    ..ComponentHealth::with_status(status, Some(e.to_string()))
                }
            }
        };
        state.components.insert(name.to_string(), health);
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once initialized and while no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Provisioner not yet initialized".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, h)| !h.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();
        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", unhealthy.join(", "))),
            }
        }
    }
}
