//! In-flight actions and cooperative cancellation
//!
//! An [`ActionStatus`] is shared between the code performing an action and
//! whoever wants to observe or cancel it. Cancellation is only checked
//! between polls of [`ActionStatus::wait_for`]; cloud calls already in
//! flight are never interrupted.

use super::wait::{poll, WaitError};
use super::BoxFuture;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Raised when an action is already running for a resource
#[derive(Debug, Error)]
#[error("Already performing action for {resource_id}")]
pub struct RepeatedActionError {
    pub resource_id: String,
}

#[derive(Debug, Default)]
struct StatusInner {
    description: Mutex<String>,
    error: Mutex<Option<String>>,
    cancelled: AtomicBool,
    /// Set once a failed attempt has been recorded through the registry
    finished: AtomicBool,
    retries: AtomicU32,
    max_retries: u32,
}

/// Observable, cancellable state of one action
#[derive(Debug, Clone, Default)]
pub struct ActionStatus {
    inner: Arc<StatusInner>,
}

/// Point-in-time copy of an [`ActionStatus`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSnapshot {
    pub description: String,
    pub cancelled: bool,
    pub finished: bool,
    pub retries: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionStatus {
    pub fn new(description: impl Into<String>, max_retries: u32) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                description: Mutex::new(description.into()),
                max_retries,
                ..Default::default()
            }),
        }
    }

    pub fn description(&self) -> String {
        self.inner
            .description
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_description(&self, description: &str) {
        *self
            .inner
            .description
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = description.to_string();
    }

    pub fn error(&self) -> Option<String> {
        self.inner
            .error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_error(&self, error: impl Into<String>) {
        *self.inner.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.into());
    }

    /// Count a failed attempt; returns true while retries remain
    pub fn record_failure(&self, error: impl Into<String>) -> bool {
        self.set_error(error);
        let retries = self.inner.retries.fetch_add(1, Ordering::SeqCst) + 1;
        retries < self.inner.max_retries
    }

    pub fn retries(&self) -> u32 {
        self.inner.retries.load(Ordering::SeqCst)
    }

    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot {
            description: self.description(),
            cancelled: self.is_cancelled(),
            finished: self.is_finished(),
            retries: self.retries(),
            max_retries: self.inner.max_retries,
            error: self.error(),
        }
    }

    /// Like [`super::wait_for`], but gives up once this action is cancelled
    pub async fn wait_for<S, F>(
        &self,
        description: &str,
        timeout: Duration,
        interval: Duration,
        state: &mut S,
        condition: F,
    ) -> Result<(), WaitError>
    where
        S: Send,
        F: for<'s> FnMut(&'s mut S) -> BoxFuture<'s, anyhow::Result<bool>> + Send,
    {
        poll(
            description,
            timeout,
            interval,
            state,
            Some(&self.inner.cancelled),
            condition,
        )
        .await
    }

    fn same_as(&self, other: &ActionStatus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Registry of running actions keyed by resource id
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: DashMap<String, ActionStatus>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new action for `resource_id`.
    ///
    /// With `cancel_existing` a running action is cancelled and replaced,
    /// otherwise its presence is an error. A failed action with the same
    /// description is replaced and its retry count carried over.
    pub fn begin(
        &self,
        resource_id: &str,
        description: &str,
        max_retries: u32,
        cancel_existing: bool,
    ) -> Result<ActionStatus, RepeatedActionError> {
        let status = ActionStatus::new(description, max_retries);

        match self.actions.entry(resource_id.to_string()) {
            Entry::Occupied(mut existing) => {
                let previous = existing.get();
                if previous.is_finished() {
                    if previous.description() == description {
                        status
                            .inner
                            .retries
                            .store(previous.retries(), Ordering::SeqCst);
                    }
                } else if cancel_existing {
                    info!(resource_id = %resource_id, "Cancelling existing action");
                    previous.cancel();
                } else {
                    return Err(RepeatedActionError {
                        resource_id: resource_id.to_string(),
                    });
                }
                existing.insert(status.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(status.clone());
            }
        }

        Ok(status)
    }

    /// Remove the action if it is still the registered one
    pub fn finish(&self, resource_id: &str, status: &ActionStatus) {
        self.actions
            .remove_if(resource_id, |_, current| current.same_as(status));
    }

    /// Record a failed attempt. The action stays listed with its error
    /// until the next attempt for the resource begins.
    pub fn fail(&self, resource_id: &str, status: &ActionStatus, error: impl Into<String>) {
        status.inner.finished.store(true, Ordering::SeqCst);
        if !status.record_failure(error) {
            info!(
                resource_id = %resource_id,
                retries = status.retries(),
                "Action out of retries"
            );
        }
    }

    /// Cancel the running action, returning whether one existed
    pub fn cancel(&self, resource_id: &str) -> bool {
        match self.actions.get(resource_id) {
            Some(status) if !status.is_finished() => {
                status.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, resource_id: &str) -> Option<ActionStatus> {
        self.actions.get(resource_id).map(|r| r.value().clone())
    }

    pub fn list(&self) -> Vec<(String, ActionSnapshot)> {
        let mut actions: Vec<(String, ActionSnapshot)> = self
            .actions
            .iter()
            .map(|r| (r.key().clone(), r.value().snapshot()))
            .collect();
        actions.sort_by(|a, b| a.0.cmp(&b.0));
        actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
