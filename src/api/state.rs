use std::sync::Arc;

use crate::config::Config;
use crate::job_store::JobStore;
use crate::observability::Metrics;
use crate::processor::Processor;
use crate::storage::StorageClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub job_store: Arc<JobStore>,
    pub storage: Arc<StorageClient>,
    pub processor: Arc<Processor>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        job_store: Arc<JobStore>,
        storage: Arc<StorageClient>,
        processor: Arc<Processor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            job_store,
            storage,
            processor,
            metrics,
        }
    }
}
