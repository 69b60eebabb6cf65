//! Hot-reloading model registry
//!
//! Keeps one `(model, metadata)` pair serving per strategy, polls the metadata
//! store for a newer version, loads and sanity-checks the candidate, optionally
//! shadow-validates it against the serving model, then swaps it in.
//!
//! Locking rules:
//! - all mutable state lives in one `RegistryState` behind one mutex
//! - the mutex is never held across loader, validator, scheduler or hook calls
//! - accessors only clone an `Arc` out of the state
//!
//! Async validations are tagged with a generation id. A result is applied only
//! if its id is still the live pending id when it finishes; anything else was
//! superseded and is dropped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::ModelError;
use super::metrics::ReloadMetrics;
use super::traits::{CandidateValidator, MetadataStore, Model, ModelLoader};
use crate::models::{ModelMetadata, ValidationResult};

/// Deferred validation handed to a scheduler. Must be invoked exactly once.
pub type ValidationJob = Box<dyn FnOnce() + Send + 'static>;

/// "Run later" primitive supplied by the host (thread pool, tokio blocking pool...).
pub type ValidationScheduler = Arc<dyn Fn(ValidationJob) + Send + Sync>;

/// Called after a candidate has been promoted, outside the registry lock.
pub type ActivationHook = Arc<dyn Fn(&ModelMetadata) + Send + Sync>;

/// Per-call knobs for [`ModelRegistry::check_and_reload`].
#[derive(Clone, Default)]
pub struct ReloadOptions {
    pub validator: Option<Arc<dyn CandidateValidator>>,
    pub shadow_validation_enabled: bool,
    pub skip_shadow_validation: bool,
    /// When set, validation runs through this scheduler and the call returns immediately.
    pub schedule_validation: Option<ValidationScheduler>,
    pub on_activated: Option<ActivationHook>,
}

impl ReloadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with shadow validation switched on and `validator` supplied.
    pub fn validated_by(validator: Arc<dyn CandidateValidator>) -> Self {
        Self::new().shadow_validation(true).with_validator(validator)
    }

    /// Supplies the validator without touching `shadow_validation_enabled`.
    pub fn with_validator(mut self, validator: Arc<dyn CandidateValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn shadow_validation(mut self, enabled: bool) -> Self {
        self.shadow_validation_enabled = enabled;
        self
    }

    pub fn skip_validation(mut self, skip: bool) -> Self {
        self.skip_shadow_validation = skip;
        self
    }

    pub fn scheduled_by(mut self, scheduler: ValidationScheduler) -> Self {
        self.schedule_validation = Some(scheduler);
        self
    }

    pub fn on_activated(mut self, hook: ActivationHook) -> Self {
        self.on_activated = Some(hook);
        self
    }
}

#[derive(Default)]
struct RegistryState {
    current_model: Option<Arc<dyn Model>>,
    current_metadata: Option<Arc<ModelMetadata>>,
    pending_model: Option<Arc<dyn Model>>,
    pending_metadata: Option<Arc<ModelMetadata>>,
    pending_validation_in_progress: bool,
    pending_validation_id: u64,
    last_check: Option<DateTime<Utc>>,
    closed: bool,
}

impl RegistryState {
    fn clear_pending(&mut self) {
        self.pending_model = None;
        self.pending_metadata = None;
        self.pending_validation_in_progress = false;
    }

    /// Drop the pending record and advance the generation so its job goes stale.
    fn supersede_pending(&mut self) {
        self.clear_pending();
        self.pending_validation_id += 1;
    }

    fn is_live(&self, validation_id: u64) -> bool {
        !self.closed
            && self.pending_validation_in_progress
            && self.pending_validation_id == validation_id
    }

    fn pending_version(&self) -> Option<&str> {
        if !self.pending_validation_in_progress {
            return None;
        }
        self.pending_metadata.as_deref().map(|m| m.version.as_str())
    }

    fn promote(&mut self, model: Arc<dyn Model>, metadata: Arc<ModelMetadata>) {
        self.current_model = Some(model);
        self.current_metadata = Some(metadata);
        self.last_check = Some(Utc::now());
    }
}

struct Shared {
    state: Mutex<RegistryState>,
    metrics: ReloadMetrics,
}

/// Owns the serving model for one strategy.
pub struct ModelRegistry {
    shared: Arc<Shared>,
    store: Arc<dyn MetadataStore>,
    loader: Arc<dyn ModelLoader>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn MetadataStore>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState::default()),
                metrics: ReloadMetrics::new(),
            }),
            store,
            loader,
        }
    }

    /// Active metadata row for `strategy`, straight from the store.
    pub fn get_active_metadata(&self, strategy: &str) -> Result<ModelMetadata, ModelError> {
        self.store.get_active_model(strategy)
    }

    /// Poll the store and promote a newer version if one is available.
    ///
    /// Returns `Ok(true)` only when a new model is serving on return. Failures
    /// are absorbed (`Ok(false)`) whenever a model is already loaded; at cold
    /// start they propagate so the host can fail its readiness check.
    pub fn check_and_reload(
        &self,
        strategy: &str,
        opts: &ReloadOptions,
    ) -> Result<bool, ModelError> {
        if self.shared.state.lock().closed {
            return Err(ModelError::Closed);
        }
        ReloadMetrics::incr(&self.shared.metrics.checks_total);

        let metadata = match self.get_active_metadata(strategy) {
            Ok(metadata) => Arc::new(metadata),
            Err(err) => {
                ReloadMetrics::incr(&self.shared.metrics.metadata_errors_total);
                return self.keep_serving(strategy, "metadata lookup", err);
            }
        };

        {
            let mut state = self.shared.state.lock();
            let current_version = state.current_metadata.as_deref().map(|m| m.version.clone());

            if current_version.as_deref() == Some(metadata.version.as_str()) {
                state.last_check = Some(Utc::now());
                if let Some(pending) = state.pending_version() {
                    // Upstream rolled back to what is already serving.
                    info!(
                        strategy,
                        pending = pending,
                        version = %metadata.version,
                        "dropping pending validation, active version is already serving"
                    );
                    state.supersede_pending();
                }
                debug!(strategy, version = %metadata.version, "model up to date");
                return Ok(false);
            }

            if let Some(pending) = state.pending_version() {
                if pending == metadata.version {
                    debug!(
                        strategy,
                        version = %metadata.version,
                        validation_id = state.pending_validation_id,
                        "validation already in flight for this version"
                    );
                    return Ok(false);
                }
                info!(
                    strategy,
                    superseded = pending,
                    version = %metadata.version,
                    "newer version supersedes pending validation"
                );
                state.supersede_pending();
            }
        }

        info!(
            strategy,
            from = ?self.current_metadata().map(|m| m.version.clone()),
            to = %metadata.version,
            path = %metadata.artifact_path,
            "new model version detected, loading"
        );

        let candidate = match self.load_candidate(&metadata) {
            Ok(model) => model,
            Err(err) => {
                ReloadMetrics::incr(&self.shared.metrics.load_failures_total);
                return self.keep_serving(strategy, "candidate load", err);
            }
        };

        let has_current = self.is_loaded();
        let wants_validation = opts.shadow_validation_enabled && !opts.skip_shadow_validation;
        let validator = match (&opts.validator, wants_validation && has_current) {
            (Some(validator), true) => Some(validator.clone()),
            (None, true) => {
                warn!(
                    strategy,
                    version = %metadata.version,
                    "no shadow validator supplied, activating without validation"
                );
                ReloadMetrics::incr(&self.shared.metrics.validation_bypass_total);
                None
            }
            _ => None,
        };

        match validator {
            Some(validator) => {
                self.start_validation(strategy, validator, candidate, metadata, opts)
            }
            None => self.activate_now(strategy, candidate, metadata, opts),
        }
    }

    fn start_validation(
        &self,
        strategy: &str,
        validator: Arc<dyn CandidateValidator>,
        candidate: Arc<dyn Model>,
        metadata: Arc<ModelMetadata>,
        opts: &ReloadOptions,
    ) -> Result<bool, ModelError> {
        let validation_id = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(ModelError::Closed);
            }
            if state.pending_version() == Some(metadata.version.as_str()) {
                return Ok(false);
            }
            state.pending_validation_id += 1;
            state.pending_model = Some(candidate.clone());
            state.pending_metadata = Some(metadata.clone());
            state.pending_validation_in_progress = true;
            state.last_check = Some(Utc::now());
            state.pending_validation_id
        };

        let run = ValidationRun {
            shared: self.shared.clone(),
            strategy: strategy.to_string(),
            validator,
            candidate,
            metadata,
            validation_id,
            on_activated: opts.on_activated.clone(),
        };

        match &opts.schedule_validation {
            Some(schedule) => {
                info!(
                    strategy,
                    version = %run.metadata.version,
                    validation_id,
                    "shadow validation scheduled"
                );
                schedule(Box::new(move || {
                    run.execute();
                }));
                Ok(false)
            }
            None => Ok(run.execute()),
        }
    }

    fn activate_now(
        &self,
        strategy: &str,
        candidate: Arc<dyn Model>,
        metadata: Arc<ModelMetadata>,
        opts: &ReloadOptions,
    ) -> Result<bool, ModelError> {
        let previous = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(ModelError::Closed);
            }
            if state.pending_validation_in_progress {
                state.supersede_pending();
            }
            let previous = state.current_metadata.as_deref().map(|m| m.version.clone());
            state.promote(candidate, metadata.clone());
            previous
        };

        ReloadMetrics::incr(&self.shared.metrics.activations_total);
        self.shared.metrics.set_loaded(true);
        info!(
            strategy,
            from = ?previous,
            to = %metadata.version,
            "model activated"
        );
        notify_activated(opts.on_activated.as_ref(), &metadata);
        Ok(true)
    }

    fn load_candidate(&self, metadata: &ModelMetadata) -> Result<Arc<dyn Model>, ModelError> {
        let loader = &self.loader;
        let model = guarded("model loader", ModelError::InvalidFormat, || {
            loader.load(&metadata.artifact_path)
        })?;

        let trial_rows = vec![vec![0.0; model.num_features()]];
        let sanity = guarded("trial prediction", ModelError::Prediction, || {
            model.predict(&trial_rows)
        })
        .and_then(|out| {
            if out.len() == trial_rows.len() {
                Ok(())
            } else {
                Err(ModelError::Prediction(format!(
                    "expected 1 prediction, got {}",
                    out.len()
                )))
            }
        });

        match sanity {
            Ok(()) => Ok(model),
            Err(err) => Err(ModelError::SanityCheckFailed {
                version: metadata.version.clone(),
                reason: err.to_string(),
            }),
        }
    }

    /// Graceful degradation: absorb `err` if something is already serving.
    fn keep_serving(
        &self,
        strategy: &str,
        stage: &'static str,
        err: ModelError,
    ) -> Result<bool, ModelError> {
        match self.current_metadata() {
            Some(current) => {
                ReloadMetrics::incr(&self.shared.metrics.stale_serves_total);
                warn!(
                    strategy,
                    stage,
                    kind = err.kind(),
                    error = %err,
                    serving = %current.version,
                    "reload failed, keeping current model"
                );
                Ok(false)
            }
            None => {
                error!(
                    strategy,
                    stage,
                    kind = err.kind(),
                    error = %err,
                    "reload failed with no model loaded"
                );
                Err(err)
            }
        }
    }

    pub fn current_model(&self) -> Option<Arc<dyn Model>> {
        self.shared.state.lock().current_model.clone()
    }

    pub fn current_metadata(&self) -> Option<Arc<ModelMetadata>> {
        self.shared.state.lock().current_metadata.clone()
    }

    /// Model and metadata copied under one lock acquisition.
    pub fn snapshot(&self) -> Option<(Arc<dyn Model>, Arc<ModelMetadata>)> {
        let state = self.shared.state.lock();
        match (&state.current_model, &state.current_metadata) {
            (Some(model), Some(metadata)) => Some((model.clone(), metadata.clone())),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.state.lock().current_model.is_some()
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.shared.state.lock().last_check
    }

    /// Whether a candidate is waiting on shadow validation.
    pub fn pending_validation(&self) -> bool {
        self.shared.state.lock().pending_validation_in_progress
    }

    pub fn pending_validation_id(&self) -> u64 {
        self.shared.state.lock().pending_validation_id
    }

    pub fn pending_metadata(&self) -> Option<Arc<ModelMetadata>> {
        let state = self.shared.state.lock();
        if state.pending_validation_in_progress {
            state.pending_metadata.clone()
        } else {
            None
        }
    }

    pub fn metrics(&self) -> &ReloadMetrics {
        &self.shared.metrics
    }

    /// Release the serving model and the store's connections.
    ///
    /// In-flight validations find their generation gone and discard themselves.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.current_model = None;
            state.current_metadata = None;
            state.supersede_pending();
        }
        self.shared.metrics.set_loaded(false);
        self.store.close();
        info!("model registry closed");
    }
}

/// Everything a deferred validation needs, detached from the registry borrow.
struct ValidationRun {
    shared: Arc<Shared>,
    strategy: String,
    validator: Arc<dyn CandidateValidator>,
    candidate: Arc<dyn Model>,
    metadata: Arc<ModelMetadata>,
    validation_id: u64,
    on_activated: Option<ActivationHook>,
}

impl ValidationRun {
    /// Returns true if the candidate was promoted.
    fn execute(self) -> bool {
        let strategy = self.strategy.as_str();
        let version = self.metadata.version.as_str();
        let validation_id = self.validation_id;

        let serving = {
            let state = self.shared.state.lock();
            if state.is_live(validation_id) {
                state.current_model.clone()
            } else {
                None
            }
        };
        let Some(serving) = serving else {
            self.discard_stale("before validation");
            return false;
        };

        let validator = &self.validator;
        let candidate = &self.candidate;
        let outcome = guarded("shadow validator", ModelError::Validation, || {
            validator.validate(serving.as_ref(), candidate.as_ref())
        })
        .and_then(check_well_formed);

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                ReloadMetrics::incr(&self.shared.metrics.validations_errored_total);
                error!(
                    strategy,
                    version,
                    validation_id,
                    kind = err.kind(),
                    error = %err,
                    "shadow validation errored, discarding candidate"
                );
                self.clear_if_live();
                return false;
            }
        };

        if !result.passed {
            ReloadMetrics::incr(&self.shared.metrics.validations_failed_total);
            warn!(
                strategy,
                version,
                validation_id,
                correlation = result.correlation,
                mean_abs_diff_ratio = result.mean_abs_diff_ratio,
                sign_change_rate = result.sign_change_rate,
                samples = result.sample_count,
                "shadow validation rejected candidate: {}",
                result.message
            );
            self.clear_if_live();
            return false;
        }

        ReloadMetrics::incr(&self.shared.metrics.validations_passed_total);
        let promoted = {
            let mut state = self.shared.state.lock();
            if state.is_live(validation_id) {
                state.promote(self.candidate.clone(), self.metadata.clone());
                state.clear_pending();
                true
            } else {
                false
            }
        };

        if !promoted {
            self.discard_stale("after validation");
            return false;
        }

        ReloadMetrics::incr(&self.shared.metrics.activations_total);
        self.shared.metrics.set_loaded(true);
        info!(
            strategy,
            version,
            validation_id,
            correlation = result.correlation,
            mean_abs_diff_ratio = result.mean_abs_diff_ratio,
            "shadow validation passed, model activated"
        );
        notify_activated(self.on_activated.as_ref(), &self.metadata);
        true
    }

    fn clear_if_live(&self) {
        let mut state = self.shared.state.lock();
        if state.is_live(self.validation_id) {
            state.clear_pending();
        }
    }

    fn discard_stale(&self, stage: &'static str) {
        ReloadMetrics::incr(&self.shared.metrics.validations_stale_total);
        warn!(
            strategy = %self.strategy,
            version = %self.metadata.version,
            validation_id = self.validation_id,
            stage,
            "validation superseded, discarding result"
        );
    }
}

fn check_well_formed(result: ValidationResult) -> Result<ValidationResult, ModelError> {
    if result.correlation.is_nan() || result.mean_abs_diff_ratio.is_nan() {
        return Err(ModelError::Validation(format!(
            "non-finite statistics (correlation={}, mean_abs_diff_ratio={})",
            result.correlation, result.mean_abs_diff_ratio
        )));
    }
    Ok(result)
}

fn notify_activated(hook: Option<&ActivationHook>, metadata: &ModelMetadata) {
    let Some(hook) = hook else {
        return;
    };
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(metadata))) {
        error!(
            version = %metadata.version,
            panic = %panic_message(payload.as_ref()),
            "activation hook panicked"
        );
    }
}

/// Run external code, turning a panic into `wrap(message)`.
fn guarded<T>(
    what: &str,
    wrap: fn(String) -> ModelError,
    f: impl FnOnce() -> Result<T, ModelError>,
) -> Result<T, ModelError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(wrap(format!(
            "{} panicked: {}",
            what,
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_converts_panic() {
        let result: Result<(), ModelError> = guarded("scorer", ModelError::Prediction, || {
            panic!("kaboom");
        });
        match result {
            Err(ModelError::Prediction(msg)) => {
                assert!(msg.contains("scorer panicked"));
                assert!(msg.contains("kaboom"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_guarded_passes_errors_through() {
        let result: Result<(), ModelError> =
            guarded("loader", ModelError::InvalidFormat, || {
                Err(ModelError::NotFound("missing.json".into()))
            });
        assert_eq!(result, Err(ModelError::NotFound("missing.json".into())));
    }

    #[test]
    fn test_state_liveness() {
        let mut state = RegistryState::default();
        state.pending_validation_id = 3;
        state.pending_validation_in_progress = true;
        assert!(state.is_live(3));
        assert!(!state.is_live(2));

        state.supersede_pending();
        assert!(!state.is_live(3));
        assert!(!state.is_live(4));
        assert_eq!(state.pending_validation_id, 4);
    }

    #[test]
    fn test_nan_result_is_malformed() {
        let result = ValidationResult {
            passed: true,
            correlation: f64::NAN,
            mean_abs_diff_ratio: 0.0,
            sign_change_rate: 0.0,
            sample_count: 10,
            old_range: 1.0,
            new_range: 1.0,
            message: String::new(),
        };
        assert!(matches!(
            check_well_formed(result),
            Err(ModelError::Validation(_))
        ));
    }
}
