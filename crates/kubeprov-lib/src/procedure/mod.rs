//! Ordered, resumable step execution
//!
//! A [`Procedure`] runs named steps against a mutable context (the record
//! being provisioned plus its clients). Steps are expected to guard
//! themselves: each checks whether its target already exists and returns
//! early, so a failed procedure is recovered by running it again.
//!
//! - [`Procedure::run`] stops at the first failing step, no rollback
//! - [`wait`]: bounded, cancellable polling used by long-running steps
//! - [`action`]: per-resource registry of in-flight actions

pub mod action;
pub mod wait;


pub use action::{ActionRegistry, ActionSnapshot, ActionStatus, RepeatedActionError};
pub use wait::{wait_for, WaitError};

use crate::observability::ProvisionerMetrics;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tracing::{info, warn};

/// Boxed, sendable future borrowing for `'a`
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type StepFn<C> =
    Box<dyn for<'c> Fn(&'c mut C) -> BoxFuture<'c, anyhow::Result<()>> + Send + Sync>;

struct Step<C> {
    description: String,
    run: StepFn<C>,
}

/// Execution state of a procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureState {
    Pending,
    Running { step: usize },
    Succeeded,
    Failed { step: usize, error: String },
}

/// Failure of one step, displayed as the step's own error message
#[derive(Debug)]
pub struct ProcedureError {
    procedure: String,
    step: String,
    error: anyhow::Error,
}

impl ProcedureError {
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Description of the step that failed
    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.error
    }
}

impl fmt::Display for ProcedureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for ProcedureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Named, ordered list of steps over a context `C`
pub struct Procedure<C> {
    name: String,
    steps: Vec<Step<C>>,
    state: ProcedureState,
    status: Option<ActionStatus>,
    metrics: ProvisionerMetrics,
}

impl<C: Send> Procedure<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            state: ProcedureState::Pending,
            status: None,
            metrics: ProvisionerMetrics::new(),
        }
    }

    /// Report the running step through an action status
    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Append a step
    pub fn add_step<F>(&mut self, description: impl Into<String>, step: F) -> &mut Self
    where
        F: for<'c> Fn(&'c mut C) -> BoxFuture<'c, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.steps.push(Step {
            description: description.into(),
            run: Box::new(step),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn descriptions(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.description.as_str()).collect()
    }

    pub fn state(&self) -> &ProcedureState {
        &self.state
    }

    /// Run every step in order, stopping at the first error
    pub async fn run(&mut self, context: &mut C) -> Result<(), ProcedureError> {
        info!(procedure = %self.name, steps = self.steps.len(), "Starting procedure");

        for (index, step) in self.steps.iter().enumerate() {
            self.state = ProcedureState::Running { step: index };
            if let Some(status) = &self.status {
                status.set_description(&step.description);
            }
            info!(procedure = %self.name, step = %step.description, "Running step");

            let started = Instant::now();
            let result = (step.run)(context).await;
            self.metrics
                .observe_step_duration(&self.name, started.elapsed().as_secs_f64());

            if let Err(error) = result {
                warn!(
                    procedure = %self.name,
                    step = %step.description,
                    error = %error,
                    "Step failed"
                );
                self.metrics.inc_procedure_failures(&self.name);
                self.state = ProcedureState::Failed {
                    step: index,
                    error: error.to_string(),
                };
                if let Some(status) = &self.status {
                    status.set_error(error.to_string());
                }
                return Err(ProcedureError {
                    procedure: self.name.clone(),
                    step: step.description.clone(),
                    error,
                });
            }
        }

        self.state = ProcedureState::Succeeded;
        info!(procedure = %self.name, "Procedure completed");
        Ok(())
    }
}
