//! Process bootstrap and HTTP routing (spec §6.1, §6.2). Wires configuration,
//! the job store, object storage, the provider pair, and the background
//! `Processor` into a single `AppState`, then serves the axum `Router` with
//! graceful shutdown extended to stop the processor (§11).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Router, extract::DefaultBodyLimit};
use object_store::aws::AmazonS3Builder;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{error, services, state::AppState};
use crate::config::{Config, ProviderKind, StorageProvider};
use crate::job_store::JobStore;
use crate::observability::Metrics;
use crate::processor::http::{HttpClient, HttpConfig};
use crate::processor::Processor;
use crate::providers::{
    BackgroundProvider, HttpBackgroundProvider, HttpSegmentationProvider, MockBackgroundProvider,
    MockSegmentationProvider, SegmentationProvider,
};
use crate::storage::StorageClient;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything `build_app` wires up, handed back so both `run` (which binds
/// a listener and serves forever) and integration tests (which drive the
/// `Router` directly via `tower::ServiceExt::oneshot`) can reuse the same
/// construction path.
pub struct AppComponents {
    pub app: Router,
    pub config: Arc<Config>,
    pub job_store: Arc<JobStore>,
    pub processor: Arc<Processor>,
}

/// Builds the full `AppState` + axum `Router` from an already-loaded
/// `Config`, without binding a socket. `start_processor` mirrors the
/// `--no-processor` CLI flag; tests generally pass `false` and drive the
/// processor explicitly.
pub async fn build_app(config: Config, start_processor: bool) -> Result<AppComponents, AnyError> {
    error::set_environment(config.telemetry.environment);
    let config = Arc::new(config);

    info!(path = %config.server.job_store_path.display(), "opening job store");
    let job_store = Arc::new(JobStore::open(&config.server.job_store_path)?);

    let storage = Arc::new(build_storage(&config).await?);
    let download_client = Arc::new(HttpClient::new(HttpConfig::default(), None)?);
    let segmentation = build_segmentation_provider(&config)?;
    let background = build_background_provider(&config)?;
    let metrics = Arc::new(Metrics::new());

    let processor = Arc::new(Processor::new(
        config.clone(),
        job_store.clone(),
        storage.clone(),
        download_client,
        segmentation,
        background,
        metrics.clone(),
    ));

    if start_processor {
        processor.start().await;
    }

    let state = AppState::new(config.clone(), job_store.clone(), storage, processor.clone(), metrics);

    let webhook_routes = Router::new()
        .route("/webhooks/source/images", post(services::ingest_webhook))
        .layer(DefaultBodyLimit::max(config.webhook.max_bytes.as_u64() as usize))
        .with_state(state.clone());

    let job_routes = Router::new()
        .route("/jobs", get(services::list_jobs))
        .route("/jobs/stats", get(services::stats))
        .route("/jobs/{id}", get(services::get_job))
        .route("/jobs/{id}/retry", post(services::retry_job))
        .route("/jobs/{id}/fail", post(services::fail_job))
        .route("/jobs/{id}/presign", get(services::presign_artifact))
        .route("/processor/start", post(services::processor_start))
        .route("/processor/stop", post(services::processor_stop))
        .route("/processor/status", get(services::processor_status))
        .route("/health", get(services::health))
        .with_state(state);

    let app = Router::new()
        .merge(webhook_routes)
        .merge(job_routes)
        .layer(build_cors(&config.server.allowed_origins))
        .layer(RequestDecompressionLayer::new());

    Ok(AppComponents {
        app,
        config,
        job_store,
        processor,
    })
}

/// Entry point invoked by the `imagepipe serve` CLI command. `address_override`
/// lets `--address` win over `server.bind_addr`; `start_processor` is `false`
/// for `--no-processor` (API-only deployments that share a job store with a
/// separately-run processor process).
pub async fn run(address_override: Option<SocketAddr>, start_processor: bool) -> Result<(), AnyError> {
    info!("loading configuration");
    let config = Config::load()?;
    let address = address_override.unwrap_or(config.server.bind_addr);

    let components = build_app(config, start_processor).await?;
    let prune_handle = spawn_pruning_loop(components.config.clone(), components.job_store.clone());

    let listener = TcpListener::bind(address).await?;
    info!(%address, "imagepipe API listening");

    axum::serve(listener, components.app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(components.processor))
        .await?;

    prune_handle.abort();
    Ok(())
}

/// Periodic sweep of terminal jobs older than `retention.job_ttl_days`
/// (§4.2 `pruneTerminal`, §11 "Pruning / retention"). This is the "external
/// cleanup policy" §3 alludes to, wired in-process behind its own config
/// section rather than left as a dangling knob.
fn spawn_pruning_loop(config: Arc<Config>, job_store: Arc<JobStore>) -> tokio::task::JoinHandle<()> {
    let interval = std::time::Duration::from_secs(config.retention.prune_interval_secs.max(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match job_store.prune_terminal(config.retention.job_ttl_days) {
                Ok(stats) => {
                    if stats.jobs_pruned > 0 {
                        info!(
                            pruned = stats.jobs_pruned,
                            scanned = stats.jobs_scanned,
                            "retention sweep removed terminal jobs"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "retention sweep failed"),
            }
        }
    })
}

async fn build_storage(config: &Config) -> Result<StorageClient, AnyError> {
    match config.storage.provider {
        StorageProvider::Memory => Ok(StorageClient::in_memory()),
        StorageProvider::S3 => {
            let bucket = config
                .storage
                .bucket
                .clone()
                .ok_or("storage.bucket is required for the s3 provider")?;
            let region = config
                .storage
                .region
                .clone()
                .ok_or("storage.region is required for the s3 provider")?;

            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(&bucket)
                .with_region(&region);
            if let Some(access_key) = &config.storage.access_key {
                builder = builder.with_access_key_id(access_key);
            }
            if let Some(secret_key) = &config.storage.secret_key {
                builder = builder.with_secret_access_key(secret_key);
            }

            let s3 = builder.build()?;
            Ok(StorageClient::new(Arc::new(s3), bucket))
        }
    }
}

fn build_segmentation_provider(config: &Config) -> Result<Arc<dyn SegmentationProvider>, AnyError> {
    match config.providers.segmentation {
        ProviderKind::Mock => Ok(Arc::new(MockSegmentationProvider)),
        ProviderKind::Http => {
            let endpoint = config
                .providers
                .segmentation_endpoint
                .clone()
                .ok_or("providers.segmentation_endpoint is required for the http provider")?;
            let client = HttpClient::new(HttpConfig::default(), None)?;
            Ok(Arc::new(HttpSegmentationProvider::new(client, endpoint)))
        }
    }
}

fn build_background_provider(config: &Config) -> Result<Arc<dyn BackgroundProvider>, AnyError> {
    match config.providers.background {
        ProviderKind::Mock => Ok(Arc::new(MockBackgroundProvider)),
        ProviderKind::Http => {
            let endpoint = config
                .providers
                .background_endpoint
                .clone()
                .ok_or("providers.background_endpoint is required for the http provider")?;
            let client = HttpClient::new(HttpConfig::default(), None)?;
            Ok(Arc::new(HttpBackgroundProvider::new(client, endpoint)))
        }
    }
}

/// Permissive in development (no origins configured); restricted to the
/// configured whitelist otherwise (§6.4 "allowed_origins").
fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal(processor: Arc<Processor>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping processor");
    processor.stop().await;
}
