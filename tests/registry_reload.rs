//! Integration tests for ModelRegistry hot-reload
//!
//! Everything external is faked in memory: the metadata store hands out
//! whatever version the test sets, the loader maps artifact paths to models
//! or failures, and validators return scripted verdicts.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use betterbot_models::{
    ActivationHook, CandidateValidator, MetadataStore, Model, ModelError, ModelLoader,
    ModelMetadata, ModelRegistry, ReloadOptions, ValidationJob, ValidationResult,
    ValidationScheduler,
};

const STRATEGY: &str = "momentum";

// ============================================================================
// Fakes
// ============================================================================

/// predict(row) = scale * sum(row)
struct ScaledSum {
    features: usize,
    scale: f64,
}

impl Model for ScaledSum {
    fn num_features(&self) -> usize {
        self.features
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        Ok(rows.iter().map(|r| self.scale * r.iter().sum::<f64>()).collect())
    }
}

/// Loads fine, fails its trial prediction.
struct BrokenPredict;

impl Model for BrokenPredict {
    fn num_features(&self) -> usize {
        3
    }

    fn predict(&self, _rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        Err(ModelError::Prediction("weights corrupted".into()))
    }
}

/// Returns no predictions at all.
struct EmptyPredict;

impl Model for EmptyPredict {
    fn num_features(&self) -> usize {
        2
    }

    fn predict(&self, _rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        Ok(Vec::new())
    }
}

struct FakeStore {
    active: Mutex<Result<ModelMetadata, ModelError>>,
    closes: AtomicUsize,
}

impl FakeStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(Err(ModelError::NotFound("no active model".into()))),
            closes: AtomicUsize::new(0),
        })
    }

    fn set_active(&self, version: &str) {
        *self.active.lock() = Ok(ModelMetadata::new(STRATEGY, version, &artifact(version)));
    }

    fn set_error(&self, err: ModelError) {
        *self.active.lock() = Err(err);
    }
}

impl MetadataStore for FakeStore {
    fn get_active_model(&self, _strategy: &str) -> Result<ModelMetadata, ModelError> {
        self.active.lock().clone()
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
enum Artifact {
    Model(Arc<dyn Model>),
    Fail(ModelError),
    Panic,
}

struct FakeLoader {
    artifacts: Mutex<HashMap<String, Artifact>>,
    loads: AtomicUsize,
}

impl FakeLoader {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            artifacts: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        })
    }

    /// Version "vN" gets a model with N features so tests can tell models apart.
    fn add_version(&self, version: &str, scale: f64) {
        let features = version.trim_start_matches('v').parse().unwrap_or(1);
        self.put(version, Artifact::Model(Arc::new(ScaledSum { features, scale })));
    }

    fn put(&self, version: &str, artifact: Artifact) {
        self.artifacts.lock().insert(self::artifact(version), artifact);
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for FakeLoader {
    fn load(&self, path: &str) -> Result<Arc<dyn Model>, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let artifact = self.artifacts.lock().get(path).cloned();
        match artifact {
            Some(Artifact::Model(model)) => Ok(model),
            Some(Artifact::Fail(err)) => Err(err),
            Some(Artifact::Panic) => panic!("artifact {} is truncated", path),
            None => Err(ModelError::NotFound(path.to_string())),
        }
    }
}

enum Script {
    Verdict(bool),
    Fail(ModelError),
    Panic,
    Nan,
}

struct ScriptedValidator {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedValidator {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CandidateValidator for ScriptedValidator {
    fn validate(&self, old: &dyn Model, new: &dyn Model) -> Result<ValidationResult, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Verdict(passed) => Ok(verdict(*passed, old, new)),
            Script::Fail(err) => Err(err.clone()),
            Script::Panic => panic!("feature store went away"),
            Script::Nan => {
                let mut result = verdict(true, old, new);
                result.correlation = f64::NAN;
                Ok(result)
            }
        }
    }
}

fn verdict(passed: bool, old: &dyn Model, new: &dyn Model) -> ValidationResult {
    ValidationResult {
        passed,
        correlation: if passed { 0.99 } else { 0.1 },
        mean_abs_diff_ratio: if passed { 0.01 } else { 0.9 },
        sign_change_rate: 0.0,
        sample_count: 50,
        old_range: old.num_features() as f64,
        new_range: new.num_features() as f64,
        message: if passed { "PASS" } else { "FAIL" }.to_string(),
    }
}

fn artifact(version: &str) -> String {
    format!("models/{}.json", version)
}

/// Scheduler that parks jobs so the test decides when (and whether) they run.
fn parked_scheduler() -> (ValidationScheduler, Arc<Mutex<Vec<ValidationJob>>>) {
    let jobs: Arc<Mutex<Vec<ValidationJob>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = jobs.clone();
    let scheduler: ValidationScheduler = Arc::new(move |job: ValidationJob| sink.lock().push(job));
    (scheduler, jobs)
}

fn setup() -> (Arc<FakeStore>, Arc<FakeLoader>, ModelRegistry) {
    let store = FakeStore::new();
    let loader = FakeLoader::new();
    let registry = ModelRegistry::new(store.clone(), loader.clone());
    (store, loader, registry)
}

/// Registry already serving v1.
fn serving_v1() -> (Arc<FakeStore>, Arc<FakeLoader>, ModelRegistry) {
    let (store, loader, registry) = setup();
    store.set_active("v1");
    loader.add_version("v1", 1.0);
    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(true));
    (store, loader, registry)
}

fn serving_version(registry: &ModelRegistry) -> Option<String> {
    registry.current_metadata().map(|m| m.version.clone())
}

fn count(counter: &std::sync::atomic::AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

// ============================================================================
// Cold start
// ============================================================================

#[test]
fn test_cold_start_loads_active_version() {
    let (_store, loader, registry) = serving_v1();

    assert!(registry.is_loaded());
    assert_eq!(serving_version(&registry).as_deref(), Some("v1"));
    assert_eq!(registry.current_model().map(|m| m.num_features()), Some(1));
    assert!(registry.last_check().is_some());
    assert_eq!(loader.loads(), 1);
    assert_eq!(count(&registry.metrics().activations_total), 1);
}

#[test]
fn test_cold_start_propagates_metadata_errors() {
    let (store, _loader, registry) = setup();

    store.set_error(ModelError::Transient("connection refused".into()));
    let err = registry.check_and_reload(STRATEGY, &ReloadOptions::new()).unwrap_err();
    assert!(err.is_transient());

    store.set_error(ModelError::NotFound("no active model".into()));
    let err = registry.check_and_reload(STRATEGY, &ReloadOptions::new()).unwrap_err();
    assert!(err.is_not_found());

    assert!(!registry.is_loaded());
    assert_eq!(count(&registry.metrics().metadata_errors_total), 2);
}

#[test]
fn test_cold_start_propagates_load_failures() {
    let (store, loader, registry) = setup();
    store.set_active("v1");

    loader.put("v1", Artifact::Fail(ModelError::InvalidFormat("bad header".into())));
    let err = registry.check_and_reload(STRATEGY, &ReloadOptions::new()).unwrap_err();
    assert!(matches!(err, ModelError::InvalidFormat(_)));

    loader.put("v1", Artifact::Panic);
    let err = registry.check_and_reload(STRATEGY, &ReloadOptions::new()).unwrap_err();
    match err {
        ModelError::InvalidFormat(msg) => assert!(msg.contains("panicked"), "{}", msg),
        other => panic!("unexpected: {:?}", other),
    }

    assert!(!registry.is_loaded());
    assert_eq!(count(&registry.metrics().load_failures_total), 2);
}

#[test]
fn test_sanity_check_rejects_broken_models() {
    let (store, loader, registry) = setup();
    store.set_active("v1");

    loader.put("v1", Artifact::Model(Arc::new(BrokenPredict)));
    let err = registry.check_and_reload(STRATEGY, &ReloadOptions::new()).unwrap_err();
    assert!(matches!(err, ModelError::SanityCheckFailed { ref version, .. } if version == "v1"));

    loader.put("v1", Artifact::Model(Arc::new(EmptyPredict)));
    let err = registry.check_and_reload(STRATEGY, &ReloadOptions::new()).unwrap_err();
    assert!(err.is_load_failure());
    assert!(!registry.is_loaded());
}

#[test]
fn test_first_load_skips_validation() {
    let (store, loader, registry) = setup();
    store.set_active("v1");
    loader.add_version("v1", 1.0);

    let validator = ScriptedValidator::new(Script::Verdict(false));
    let opts = ReloadOptions::validated_by(validator.clone());

    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(true));
    assert_eq!(validator.calls(), 0);
}

// ============================================================================
// Steady state
// ============================================================================

#[test]
fn test_same_version_is_idempotent() {
    let (_store, loader, registry) = serving_v1();
    let first_check = registry.last_check();

    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(false));
    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(false));

    assert_eq!(loader.loads(), 1);
    assert!(registry.last_check() >= first_check);
    assert_eq!(count(&registry.metrics().checks_total), 3);
}

#[test]
fn test_newer_version_activates_without_validation() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", 2.0);

    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(true));

    let (model, metadata) = registry.snapshot().unwrap();
    assert_eq!(metadata.version, "v2");
    assert_eq!(model.predict(&[vec![1.0, 2.0]]).unwrap(), vec![6.0]);
}

#[test]
fn test_failures_keep_current_model_serving() {
    let (store, loader, registry) = serving_v1();

    // Artifact for v2 never made it to disk
    store.set_active("v2");
    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(false));
    assert_eq!(serving_version(&registry).as_deref(), Some("v1"));

    loader.put("v2", Artifact::Panic);
    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(false));

    store.set_error(ModelError::Transient("database is locked".into()));
    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(false));

    store.set_error(ModelError::InvalidFormat("bad performance_metrics".into()));
    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(false));

    assert_eq!(serving_version(&registry).as_deref(), Some("v1"));
    assert_eq!(count(&registry.metrics().load_failures_total), 2);
    assert_eq!(count(&registry.metrics().metadata_errors_total), 2);
    assert_eq!(count(&registry.metrics().stale_serves_total), 4);

    // Recovery once the artifact shows up
    store.set_active("v2");
    loader.add_version("v2", 1.0);
    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(true));
    assert_eq!(serving_version(&registry).as_deref(), Some("v2"));
}

// ============================================================================
// Shadow validation (inline)
// ============================================================================

#[test]
fn test_passing_validation_promotes() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", 1.01);

    let validator = ScriptedValidator::new(Script::Verdict(true));
    let opts = ReloadOptions::validated_by(validator.clone());

    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(true));
    assert_eq!(serving_version(&registry).as_deref(), Some("v2"));
    assert!(!registry.pending_validation());
    assert_eq!(validator.calls(), 1);
    assert_eq!(count(&registry.metrics().validations_passed_total), 1);
}

#[test]
fn test_failing_validation_keeps_current() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", -1.0);

    let validator = ScriptedValidator::new(Script::Verdict(false));
    let opts = ReloadOptions::validated_by(validator.clone());

    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));
    assert_eq!(serving_version(&registry).as_deref(), Some("v1"));
    assert!(!registry.pending_validation());
    assert!(registry.pending_metadata().is_none());
    assert_eq!(count(&registry.metrics().validations_failed_total), 1);

    // Rejected versions are retried on the next poll
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));
    assert_eq!(validator.calls(), 2);
}

#[test]
fn test_validator_errors_and_panics_are_absorbed() {
    for script in [
        Script::Fail(ModelError::InsufficientSamples {
            required: 200,
            available: 12,
        }),
        Script::Panic,
        Script::Nan,
    ] {
        let (store, loader, registry) = serving_v1();
        store.set_active("v2");
        loader.add_version("v2", 1.0);

        let opts = ReloadOptions::validated_by(ScriptedValidator::new(script));
        assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));
        assert_eq!(serving_version(&registry).as_deref(), Some("v1"));
        assert!(!registry.pending_validation());
        assert_eq!(count(&registry.metrics().validations_errored_total), 1);
    }
}

#[test]
fn test_missing_validator_activates_anyway() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", 1.0);

    let opts = ReloadOptions::new().shadow_validation(true);
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(true));
    assert_eq!(serving_version(&registry).as_deref(), Some("v2"));
    assert_eq!(count(&registry.metrics().validation_bypass_total), 1);
}

#[test]
fn test_skip_flag_bypasses_validator() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", -1.0);

    let validator = ScriptedValidator::new(Script::Verdict(false));
    let opts = ReloadOptions::validated_by(validator.clone()).skip_validation(true);

    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(true));
    assert_eq!(validator.calls(), 0);
    assert_eq!(count(&registry.metrics().validation_bypass_total), 0);
}

// ============================================================================
// Scheduled validation
// ============================================================================

#[test]
fn test_scheduled_validation_promotes_when_job_runs() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", 1.01);

    let (scheduler, jobs) = parked_scheduler();
    let opts = ReloadOptions::validated_by(ScriptedValidator::new(Script::Verdict(true)))
        .scheduled_by(scheduler);

    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));
    assert!(registry.pending_validation());
    assert_eq!(registry.pending_metadata().map(|m| m.version.clone()).as_deref(), Some("v2"));
    assert_eq!(serving_version(&registry).as_deref(), Some("v1"));

    // Polling again while v2 is in flight neither reloads nor reschedules
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));
    assert_eq!(loader.loads(), 2);
    assert_eq!(jobs.lock().len(), 1);

    let job = jobs.lock().pop().unwrap();
    job();

    assert_eq!(serving_version(&registry).as_deref(), Some("v2"));
    assert!(!registry.pending_validation());
    assert!(registry.metrics().loaded.load(Ordering::Relaxed));
}

#[test]
fn test_newer_version_supersedes_pending_validation() {
    let (store, loader, registry) = serving_v1();
    let validator = ScriptedValidator::new(Script::Verdict(true));

    // v2 validation parked
    store.set_active("v2");
    loader.add_version("v2", 1.0);
    let (scheduler, jobs) = parked_scheduler();
    let async_opts = ReloadOptions::validated_by(validator.clone()).scheduled_by(scheduler);
    assert_eq!(registry.check_and_reload(STRATEGY, &async_opts), Ok(false));
    let stale_id = registry.pending_validation_id();

    // v3 lands and validates inline
    store.set_active("v3");
    loader.add_version("v3", 1.0);
    let sync_opts = ReloadOptions::validated_by(validator.clone());
    assert_eq!(registry.check_and_reload(STRATEGY, &sync_opts), Ok(true));
    assert_eq!(serving_version(&registry).as_deref(), Some("v3"));
    assert!(registry.pending_validation_id() > stale_id);
    assert!(registry.pending_metadata().map_or(true, |m| m.version != "v2"));

    // The old v2 job finally runs and must not roll serving back
    let job = jobs.lock().pop().unwrap();
    job();

    assert_eq!(serving_version(&registry).as_deref(), Some("v3"));
    assert_eq!(registry.current_model().map(|m| m.num_features()), Some(3));
    assert_eq!(validator.calls(), 1);
    assert_eq!(count(&registry.metrics().validations_stale_total), 1);
}

#[test]
fn test_rollback_drops_pending_validation() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", 1.0);

    let (scheduler, jobs) = parked_scheduler();
    let opts = ReloadOptions::validated_by(ScriptedValidator::new(Script::Verdict(true)))
        .scheduled_by(scheduler);
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));
    assert!(registry.pending_validation());

    // Upstream reverts to v1
    store.set_active("v1");
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));
    assert!(!registry.pending_validation());

    let job = jobs.lock().pop().unwrap();
    job();
    assert_eq!(serving_version(&registry).as_deref(), Some("v1"));
}

#[test]
fn test_unvalidated_activation_supersedes_pending() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", 1.0);

    let (scheduler, jobs) = parked_scheduler();
    let opts = ReloadOptions::validated_by(ScriptedValidator::new(Script::Verdict(true)))
        .scheduled_by(scheduler);
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));

    store.set_active("v3");
    loader.add_version("v3", 1.0);
    assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(true));

    let job = jobs.lock().pop().unwrap();
    job();
    assert_eq!(serving_version(&registry).as_deref(), Some("v3"));
}

/// Publishes v3 and reloads the registry while the v2 comparison is running.
struct SupersedingValidator {
    registry: Arc<ModelRegistry>,
    store: Arc<FakeStore>,
    loader: Arc<FakeLoader>,
    inner_reload: Mutex<Option<Result<bool, ModelError>>>,
}

impl CandidateValidator for SupersedingValidator {
    fn validate(&self, old: &dyn Model, new: &dyn Model) -> Result<ValidationResult, ModelError> {
        self.store.set_active("v3");
        self.loader.add_version("v3", 1.0);
        let reloaded = self.registry.check_and_reload(STRATEGY, &ReloadOptions::new());
        *self.inner_reload.lock() = Some(reloaded);
        Ok(verdict(true, old, new))
    }
}

#[test]
fn test_result_superseded_during_validation_is_discarded() {
    let (store, loader, registry) = serving_v1();
    let registry = Arc::new(registry);
    store.set_active("v2");
    loader.add_version("v2", 1.0);

    let validator = Arc::new(SupersedingValidator {
        registry: registry.clone(),
        store: store.clone(),
        loader: loader.clone(),
        inner_reload: Mutex::new(None),
    });
    let opts = ReloadOptions::validated_by(validator.clone());

    // v2 passes, but v3 took over before the verdict came back
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));
    assert_eq!(*validator.inner_reload.lock(), Some(Ok(true)));

    assert_eq!(serving_version(&registry).as_deref(), Some("v3"));
    assert_eq!(registry.current_model().map(|m| m.num_features()), Some(3));
    assert!(!registry.pending_validation());
    assert_eq!(count(&registry.metrics().validations_passed_total), 1);
    assert_eq!(count(&registry.metrics().validations_stale_total), 1);
}

#[test]
fn test_disabled_validation_stays_off_when_validator_added() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", -1.0);

    let validator = ScriptedValidator::new(Script::Verdict(false));
    let opts = ReloadOptions::new()
        .shadow_validation(false)
        .with_validator(validator.clone());

    assert!(!opts.shadow_validation_enabled);
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(true));
    assert_eq!(serving_version(&registry).as_deref(), Some("v2"));
    assert_eq!(validator.calls(), 0);
}

// ============================================================================
// Hooks, readers, shutdown
// ============================================================================

#[test]
fn test_activation_hook_sees_new_metadata() {
    let (store, loader, registry) = setup();
    store.set_active("v1");
    loader.add_version("v1", 1.0);
    loader.add_version("v2", 1.0);

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let hook: ActivationHook =
        Arc::new(move |m: &ModelMetadata| sink.lock().push(m.version.clone()));
    let opts = ReloadOptions::validated_by(ScriptedValidator::new(Script::Verdict(true)))
        .on_activated(hook);

    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(true));
    store.set_active("v2");
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(true));

    assert_eq!(*seen.lock(), vec!["v1".to_string(), "v2".to_string()]);
}

#[test]
fn test_panicking_hook_does_not_undo_activation() {
    let (store, loader, registry) = setup();
    store.set_active("v1");
    loader.add_version("v1", 1.0);

    let hook: ActivationHook = Arc::new(|_m: &ModelMetadata| panic!("downstream cache offline"));
    let opts = ReloadOptions::new().on_activated(hook);

    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(true));
    assert_eq!(serving_version(&registry).as_deref(), Some("v1"));
}

#[test]
fn test_readers_always_see_matching_model_and_metadata() {
    let (store, loader, registry) = serving_v1();
    let registry = Arc::new(registry);
    for n in 2..=8 {
        loader.add_version(&format!("v{}", n), 1.0);
    }

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    let (model, metadata) = registry.snapshot().unwrap();
                    let expected: usize = metadata.version[1..].parse().unwrap();
                    assert_eq!(model.num_features(), expected);
                }
            })
        })
        .collect();

    for n in 2..=8 {
        store.set_active(&format!("v{}", n));
        assert_eq!(registry.check_and_reload(STRATEGY, &ReloadOptions::new()), Ok(true));
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(serving_version(&registry).as_deref(), Some("v8"));
}

#[test]
fn test_close_releases_everything() {
    let (store, loader, registry) = serving_v1();
    store.set_active("v2");
    loader.add_version("v2", 1.0);

    let (scheduler, jobs) = parked_scheduler();
    let opts = ReloadOptions::validated_by(ScriptedValidator::new(Script::Verdict(true)))
        .scheduled_by(scheduler);
    assert_eq!(registry.check_and_reload(STRATEGY, &opts), Ok(false));

    registry.close();
    registry.close();

    assert!(!registry.is_loaded());
    assert!(registry.snapshot().is_none());
    assert!(!registry.pending_validation());
    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    assert_eq!(
        registry.check_and_reload(STRATEGY, &ReloadOptions::new()),
        Err(ModelError::Closed)
    );

    // In-flight job finds the registry closed
    let job = jobs.lock().pop().unwrap();
    job();
    assert!(!registry.is_loaded());
    let text = registry.metrics().to_prometheus(STRATEGY);
    assert!(text.contains("model_loaded{strategy=\"momentum\"} 0"));
}
