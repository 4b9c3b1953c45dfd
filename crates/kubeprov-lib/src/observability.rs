//! Observability infrastructure for the provisioner
//!
//! Provides:
//! - Prometheus metrics (step latency, procedure failures, job outcomes, queue depth)
//! - Structured JSON logging of job and procedure lifecycle events

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for step durations (in seconds); steps range from a
/// single API call to a 20 minute wait
const STEP_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0, 1200.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MetricsInner> = OnceLock::new();

struct MetricsInner {
    step_duration_seconds: HistogramVec,
    procedure_failures: IntCounterVec,
    jobs_processed: IntCounterVec,
    queue_depth: IntGauge,
    kubes_ready: IntGauge,
}

impl MetricsInner {
    fn new() -> Self {
        Self {
            step_duration_seconds: register_histogram_vec!(
                "kubeprov_step_duration_seconds",
                "Time spent executing a single procedure step",
                &["procedure"],
                STEP_BUCKETS.to_vec()
            )
            .expect("Failed to register step_duration_seconds"),

            procedure_failures: register_int_counter_vec!(
                "kubeprov_procedure_failures_total",
                "Procedures that stopped on a failing step",
                &["procedure"]
            )
            .expect("Failed to register procedure_failures"),

            jobs_processed: register_int_counter_vec!(
                "kubeprov_jobs_processed_total",
                "Jobs handled by the worker, by outcome",
                &["outcome"]
            )
            .expect("Failed to register jobs_processed"),

            queue_depth: register_int_gauge!(
                "kubeprov_job_queue_depth",
                "Jobs waiting in QUEUED state at the last worker pass"
            )
            .expect("Failed to register queue_depth"),

            kubes_ready: register_int_gauge!(
                "kubeprov_kubes_ready",
                "Kubes whose Kubernetes API reported registered nodes"
            )
            .expect("Failed to register kubes_ready"),
        }
    }
}

/// Outcome labels for [`ProvisionerMetrics::inc_jobs`]
pub mod outcomes {
    pub const SUCCEEDED: &str = "succeeded";
    pub const REQUEUED: &str = "requeued";
    pub const FAILED: &str = "failed";
    pub const CONFLICT: &str = "conflict";
}

/// Lightweight handle to the global metrics; clones share the collectors
#[derive(Clone)]
pub struct ProvisionerMetrics {
    _private: (),
}

impl Default for ProvisionerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProvisionerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionerMetrics").finish()
    }
}

impl ProvisionerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MetricsInner {
        GLOBAL_METRICS.get_or_init(MetricsInner::new)
    }

    pub fn observe_step_duration(&self, procedure: &str, duration_secs: f64) {
        self.inner()
            .step_duration_seconds
            .with_label_values(&[procedure])
            .observe(duration_secs);
    }

    pub fn inc_procedure_failures(&self, procedure: &str) {
        self.inner()
            .procedure_failures
            .with_label_values(&[procedure])
            .inc();
    }

    pub fn inc_jobs(&self, outcome: &str) {
        self.inner().jobs_processed.with_label_values(&[outcome]).inc();
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.inner().queue_depth.set(depth);
    }

    pub fn set_kubes_ready(&self, count: i64) {
        self.inner().kubes_ready.set(count);
    }
}

/// Structured logger for provisioning events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_job_claimed(&self, job_id: &str, job_type: &str, attempts: u32) {
        info!(
            event = "job_claimed",
            instance = %self.instance,
            job_id = %job_id,
            job_type = %job_type,
            attempts = attempts,
            "Claimed job"
        );
    }

    pub fn log_job_finished(&self, job_id: &str, job_type: &str) {
        info!(
            event = "job_succeeded",
            instance = %self.instance,
            job_id = %job_id,
            job_type = %job_type,
            "Job completed"
        );
    }

    pub fn log_job_failed(
        &self,
        job_id: &str,
        job_type: &str,
        attempts: u32,
        max_attempts: u32,
        error: &str,
    ) {
        let terminal = attempts >= max_attempts;
        warn!(
            event = if terminal { "job_failed" } else { "job_requeued" },
            instance = %self.instance,
            job_id = %job_id,
            job_type = %job_type,
            attempts = attempts,
            max_attempts = max_attempts,
            error = %error,
            "Job attempt failed"
        );
    }

    pub fn log_kube_ready(&self, kube: &str, master_public_ip: &str) {
        info!(
            event = "kube_ready",
            instance = %self.instance,
            kube = %kube,
            master_public_ip = %master_public_ip,
            "Kube is ready"
        );
    }

    pub fn log_startup(&self, version: &str, cloud_backend: &str) {
        info!(
            event = "provisioner_started",
            instance = %self.instance,
            version = %version,
            cloud_backend = %cloud_backend,
            "Provisioner started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "provisioner_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Provisioner shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_collectors() {
        let metrics = ProvisionerMetrics::new();
        let clone = metrics.clone();

        metrics.observe_step_duration("test", 0.5);
        clone.inc_procedure_failures("test");
        clone.inc_jobs(outcomes::SUCCEEDED);
        metrics.set_queue_depth(3);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "kubeprov_step_duration_seconds"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("worker-1");
        assert_eq!(logger.instance, "worker-1");
    }
}
