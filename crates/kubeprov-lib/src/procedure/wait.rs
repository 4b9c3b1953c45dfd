//! Bounded polling for eventually-consistent cloud state

use super::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Why a wait ended without its condition becoming true
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Timed out waiting for {0}")]
    TimedOut(String),

    #[error("Action cancelled while waiting for {0}")]
    Cancelled(String),

    /// The condition itself failed; polling stops immediately
    #[error(transparent)]
    Condition(#[from] anyhow::Error),
}

/// Poll `condition` every `interval` until it returns `true`.
///
/// The condition receives `state` mutably on every call, which lets it
/// record what it observed (an IP address, a lifecycle state) as it goes.
pub async fn wait_for<S, F>(
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
    poll(description, timeout, interval, state, None, condition).await
}

pub(crate) async fn poll<S, F>(
    description: &str,
    timeout: Duration,
    interval: Duration,
    state: &mut S,
    cancelled: Option<&AtomicBool>,
    mut condition: F,
) -> Result<(), WaitError>
where
    S: Send,
    F: for<'s> FnMut(&'s mut S) -> BoxFuture<'s, anyhow::Result<bool>> + Send,
{
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        if cancelled.map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(false) {
            return Err(WaitError::Cancelled(description.to_string()));
        }

        polls += 1;
        if condition(state).await? {
            debug!(description = %description, polls, "Wait condition met");
            return Ok(());
        }

        if started.elapsed() > timeout {
            return Err(WaitError::TimedOut(description.to_string()));
        }

        sleep(interval).await;
    }
}
