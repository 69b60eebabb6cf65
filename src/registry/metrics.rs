//! Prometheus counters for the reload pipeline

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Reload and validation counters.
///
/// Lock-free so the service's `/metrics` handler never contends with a reload.
#[derive(Debug, Default)]
pub struct ReloadMetrics {
    pub checks_total: AtomicU64,
    pub activations_total: AtomicU64,
    pub metadata_errors_total: AtomicU64,
    pub load_failures_total: AtomicU64,
    /// Failures absorbed while an older model kept serving
    pub stale_serves_total: AtomicU64,
    pub validations_passed_total: AtomicU64,
    pub validations_failed_total: AtomicU64,
    pub validations_errored_total: AtomicU64,
    /// Validation results discarded because a newer version superseded them
    pub validations_stale_total: AtomicU64,
    /// Activations that skipped validation because no validator was supplied
    pub validation_bypass_total: AtomicU64,
    pub loaded: AtomicBool,
}

impl ReloadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::Relaxed);
    }

    /// Render in the Prometheus text exposition format.
    pub fn to_prometheus(&self, strategy: &str) -> String {
        let labels = format!("strategy=\"{}\"", strategy);
        let counters: [(&str, &str, &AtomicU64); 10] = [
            (
                "model_reload_checks_total",
                "Reload checks performed",
                &self.checks_total,
            ),
            (
                "model_reload_activations_total",
                "Models promoted to serving",
                &self.activations_total,
            ),
            (
                "model_reload_metadata_errors_total",
                "Metadata lookups that failed",
                &self.metadata_errors_total,
            ),
            (
                "model_reload_load_failures_total",
                "Candidates that failed to load or sanity check",
                &self.load_failures_total,
            ),
            (
                "model_reload_stale_serves_total",
                "Failures absorbed by keeping the current model",
                &self.stale_serves_total,
            ),
            (
                "model_validation_passed_total",
                "Shadow validations that passed",
                &self.validations_passed_total,
            ),
            (
                "model_validation_failed_total",
                "Shadow validations that rejected the candidate",
                &self.validations_failed_total,
            ),
            (
                "model_validation_errored_total",
                "Shadow validations that raised an error",
                &self.validations_errored_total,
            ),
            (
                "model_validation_stale_total",
                "Validation results discarded as superseded",
                &self.validations_stale_total,
            ),
            (
                "model_validation_bypass_total",
                "Activations without a configured validator",
                &self.validation_bypass_total,
            ),
        ];

        let mut output = String::new();
        for (name, help, counter) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!(
                "{}{{{}}} {}\n",
                name,
                labels,
                counter.load(Ordering::Relaxed)
            ));
        }

        output.push_str("# HELP model_loaded Whether a model is currently serving\n");
        output.push_str("# TYPE model_loaded gauge\n");
        output.push_str(&format!(
            "model_loaded{{{}}} {}\n",
            labels,
            u8::from(self.loaded.load(Ordering::Relaxed))
        ));

        output
    }
}
