//! Model Watcher - keeps the signal service's prediction model hot
//!
//! `run`     poll the registry on an interval, serve /metrics /health /ready
//! `promote` register and activate a model version
//! `status`  print the active model metadata

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Router};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use betterbot_models::{
    config::{ReloadConfig, ShadowValidationConfig, StoreConfig},
    loader::JsonModelLoader,
    store::{SqliteFeatureProvider, SqliteMetadataStore},
    ActivationHook, CandidateValidator, MetadataStore, ModelError, ModelMetadata, ModelRegistry,
    ReloadOptions, ShadowValidator, ValidationJob, ValidationScheduler,
};

#[derive(Parser, Debug)]
#[command(name = "model_watcher")]
#[command(about = "Hot-reload and shadow-validate the live signal model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll for new model versions until Ctrl+C
    Run {
        #[arg(long, env = "MODEL_RELOAD_STRATEGY")]
        strategy: Option<String>,

        #[arg(long)]
        interval_secs: Option<u64>,

        /// Port for /metrics, /health and /ready
        #[arg(long, default_value = "9105")]
        metrics_port: u16,

        /// Validate inside the check instead of on the blocking pool
        #[arg(long)]
        sync_validation: bool,

        /// Directory that relative artifact paths resolve against
        #[arg(long, env = "MODEL_ARTIFACT_ROOT")]
        artifact_root: Option<PathBuf>,
    },
    /// Register a model version and make it active
    Promote {
        #[arg(long)]
        strategy: String,

        #[arg(long)]
        version: String,

        #[arg(long)]
        artifact: String,
    },
    /// Show the active model for a strategy
    Status {
        #[arg(long)]
        strategy: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let store_cfg = StoreConfig::from_env();

    match cli.command {
        Command::Run {
            strategy,
            interval_secs,
            metrics_port,
            sync_validation,
            artifact_root,
        } => {
            let mut reload_cfg = ReloadConfig::from_env();
            if let Some(s) = strategy {
                reload_cfg.strategy = s;
            }
            if let Some(secs) = interval_secs {
                reload_cfg.check_interval_secs = secs.max(1);
            }
            if sync_validation {
                reload_cfg.async_validation = false;
            }
            run_watcher(reload_cfg, store_cfg, metrics_port, artifact_root).await
        }
        Command::Promote {
            strategy,
            version,
            artifact,
        } => {
            let store = SqliteMetadataStore::from_config(&store_cfg);
            store
                .register_model(&strategy, &version, &artifact, &HashMap::new(), &HashMap::new())
                .context("register model version")?;
            let metadata = store
                .activate(&strategy, &version)
                .context("activate model version")?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            store.close();
            Ok(())
        }
        Command::Status { strategy } => {
            let store = SqliteMetadataStore::from_config(&store_cfg);
            let metadata = store
                .get_active_model(&strategy)
                .with_context(|| format!("no active model for {}", strategy))?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            store.close();
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "betterbot_models=info,model_watcher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_watcher(
    cfg: ReloadConfig,
    store_cfg: StoreConfig,
    metrics_port: u16,
    artifact_root: Option<PathBuf>,
) -> Result<()> {
    let strategy = cfg.strategy.clone();
    info!(
        strategy = %strategy,
        interval_secs = cfg.check_interval_secs,
        shadow_validation = cfg.shadow_validation_enabled,
        async_validation = cfg.async_validation,
        metadata_db = %store_cfg.metadata_db_path,
        "starting model watcher"
    );

    let store = Arc::new(SqliteMetadataStore::from_config(&store_cfg));
    let loader = Arc::new(JsonModelLoader::new(artifact_root));
    let registry = Arc::new(ModelRegistry::new(store, loader));

    let features = Arc::new(SqliteFeatureProvider::from_config(&store_cfg));
    let validator: Option<Arc<dyn CandidateValidator>> = if cfg.shadow_validation_enabled {
        match ShadowValidator::new(ShadowValidationConfig::from_env(), features.clone()) {
            Ok(v) => Some(Arc::new(v) as Arc<dyn CandidateValidator>),
            Err(e) => {
                warn!(error = %e, "shadow validator unavailable");
                None
            }
        }
    } else {
        None
    };

    let on_activated: ActivationHook = Arc::new(|m: &ModelMetadata| {
        info!(
            strategy = %m.strategy_name,
            version = %m.version,
            path = %m.artifact_path,
            "serving new model"
        );
    });
    let mut opts = ReloadOptions {
        validator,
        shadow_validation_enabled: cfg.shadow_validation_enabled,
        skip_shadow_validation: cfg.skip_shadow_validation,
        schedule_validation: None,
        on_activated: Some(on_activated),
    };
    if cfg.async_validation {
        let handle = tokio::runtime::Handle::current();
        let scheduler: ValidationScheduler = Arc::new(move |job: ValidationJob| {
            handle.spawn_blocking(job);
        });
        opts.schedule_validation = Some(scheduler);
    }

    // Cold start: anything short of a loaded model is fatal.
    let loaded = check_once(&registry, &strategy, &opts)
        .await?
        .with_context(|| format!("cold start failed for strategy {}", strategy))?;
    info!(strategy = %strategy, loaded, "initial model check complete");

    spawn_health_server(registry.clone(), strategy.clone(), metrics_port).await?;

    let mut ticker = interval(Duration::from_secs(cfg.check_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match check_once(&registry, &strategy, &opts).await {
                    Ok(Ok(true)) => info!(strategy = %strategy, "model reloaded"),
                    Ok(Ok(false)) => debug!(strategy = %strategy, "no reload"),
                    Ok(Err(e)) => warn!(strategy = %strategy, error = %e, "reload check failed"),
                    Err(e) => error!(strategy = %strategy, error = %e, "reload task panicked"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    registry.close();
    features.close();
    Ok(())
}

/// Run one check on the blocking pool; loading touches disk and SQLite.
async fn check_once(
    registry: &Arc<ModelRegistry>,
    strategy: &str,
    opts: &ReloadOptions,
) -> Result<Result<bool, ModelError>> {
    let registry = registry.clone();
    let strategy = strategy.to_string();
    let opts = opts.clone();
    let outcome =
        tokio::task::spawn_blocking(move || registry.check_and_reload(&strategy, &opts)).await?;
    Ok(outcome)
}

async fn spawn_health_server(
    registry: Arc<ModelRegistry>,
    strategy: String,
    port: u16,
) -> Result<()> {
    let metrics_registry = registry.clone();
    let ready_registry = registry.clone();

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let r = metrics_registry.clone();
                let s = strategy.clone();
                async move { r.metrics().to_prometheus(&s) }
            }),
        )
        .route("/health", get(|| async { "OK" }))
        .route(
            "/ready",
            get(move || {
                let r = ready_registry.clone();
                async move {
                    if r.is_loaded() {
                        (StatusCode::OK, "READY")
                    } else {
                        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
                    }
                }
            }),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind health server on {}", addr))?;
    info!("Prometheus metrics available at http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "health server exited");
        }
    });
    Ok(())
}
