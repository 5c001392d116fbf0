//! The scheduler core (spec §4.4, §5): a single poll loop that wakes every
//! `poll_interval_ms`, claims up to `concurrency - in_flight` NEW jobs, and
//! hands each to a worker task that runs its stages strictly sequentially.
//! Modeled as an owned value with explicit lifecycle methods rather than a
//! module-level singleton (§9 "Global processor singleton").

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::models::JobListFilter;
use crate::config::Config;
use crate::job_store::JobStore;
use crate::observability::Metrics;
use crate::processor::http::HttpClient;
use crate::processor::stages::{self, StageContext};
use crate::providers::{BackgroundProvider, SegmentationProvider};
use crate::state_machine::JobStatus;
use crate::storage::StorageClient;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStatus {
    pub running: bool,
    pub in_flight: usize,
    pub concurrency: usize,
}

/// Owned scheduler value. `in_flight` is written by the poll loop (insert
/// before dispatch) and by each worker's completion path (remove); both
/// sides only ever add/remove their own job id, so no cross-worker
/// contention arises even though the set is behind an async mutex rather
/// than the single-writer discipline spec.md sketches (§5 "single writer +
/// single remover per worker").
pub struct Processor {
    ctx: Arc<StageContext>,
    running: Arc<AtomicBool>,
    in_flight: Arc<AsyncMutex<HashSet<String>>>,
    loop_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Processor {
    pub fn new(
        config: Arc<Config>,
        job_store: Arc<JobStore>,
        storage: Arc<StorageClient>,
        http: Arc<HttpClient>,
        segmentation: Arc<dyn SegmentationProvider>,
        background: Arc<dyn BackgroundProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let ctx = Arc::new(StageContext {
            job_store,
            storage,
            http,
            segmentation,
            background,
            config,
            metrics,
        });

        Self {
            ctx,
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AsyncMutex::new(HashSet::new())),
            loop_handle: AsyncMutex::new(None),
        }
    }

    /// Starts the poll loop as a background task. Idempotent: calling
    /// `start` while already running is a no-op.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("processor starting");
        let ctx = self.ctx.clone();
        let running = self.running.clone();
        let in_flight = self.in_flight.clone();

        let handle = tokio::spawn(async move {
            poll_loop(ctx, running, in_flight).await;
        });

        *self.loop_handle.lock().await = Some(handle);
    }

    /// Stops the poll loop and waits for in-flight workers to finish their
    /// current job (§5 "graceful shutdown stops the poll loop, waits for
    /// workers").
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("processor stopping");
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }

        loop {
            if self.in_flight.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        info!("processor stopped");
    }

    pub async fn status(&self) -> ProcessorStatus {
        ProcessorStatus {
            running: self.running.load(Ordering::SeqCst),
            in_flight: self.in_flight.lock().await.len(),
            concurrency: self.ctx.config.processor.concurrency,
        }
    }
}

async fn poll_loop(
    ctx: Arc<StageContext>,
    running: Arc<AtomicBool>,
    in_flight: Arc<AsyncMutex<HashSet<String>>>,
) {
    let poll_interval = std::time::Duration::from_millis(ctx.config.processor.poll_interval_ms);
    let concurrency = ctx.config.processor.concurrency.max(1);

    while running.load(Ordering::SeqCst) {
        let available = {
            let guard = in_flight.lock().await;
            concurrency.saturating_sub(guard.len())
        };

        if available > 0 {
            match claim_jobs(&ctx, &in_flight, available).await {
                Ok(claimed) => {
                    for job_id in claimed {
                        spawn_worker(ctx.clone(), in_flight.clone(), job_id);
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to poll for new jobs");
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Selects up to `limit` NEW jobs not already claimed, marking them
/// in-flight before returning so a subsequent tick of this same loop never
/// double-dispatches (§5 "add before dispatch").
async fn claim_jobs(
    ctx: &StageContext,
    in_flight: &AsyncMutex<HashSet<String>>,
    limit: usize,
) -> crate::job_store::Result<Vec<String>> {
    let filter = JobListFilter {
        status: Some(JobStatus::New),
        sku: None,
        theme: None,
        limit: limit.max(1) * 4,
        offset: 0,
    };
    let candidates = ctx.job_store.list_jobs(&filter)?;

    let mut guard = in_flight.lock().await;
    let mut claimed = Vec::new();
    for job in candidates {
        if claimed.len() >= limit {
            break;
        }
        if guard.insert(job.id.clone()) {
            claimed.push(job.id);
        }
    }
    Ok(claimed)
}

fn spawn_worker(ctx: Arc<StageContext>, in_flight: Arc<AsyncMutex<HashSet<String>>>, job_id: String) {
    tokio::spawn(async move {
        let job = match ctx.job_store.get_job(&job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "claimed job vanished before dispatch");
                in_flight.lock().await.remove(&job_id);
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to load claimed job");
                in_flight.lock().await.remove(&job_id);
                return;
            }
        };

        if let Err(stage_err) = stages::run(job, &ctx).await {
            warn!(job_id = %job_id, error = %stage_err, "job failed");
            ctx.metrics.job_failed();
            if let Err(e) =
                ctx.job_store
                    .fail_job(&job_id, stage_err.kind().code().to_string(), stage_err.to_string(), None)
            {
                error!(job_id = %job_id, error = %e, "failed to persist job failure");
            }
        }

        in_flight.lock().await.remove(&job_id);
    });
}
