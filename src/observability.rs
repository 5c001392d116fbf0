//! Process-wide counters surfaced at `GET /jobs/stats` and logged
//! periodically; distinct from per-job accounting in `JobStore::stats`
//! (spec §4.2), which reads the durable store directly. These counters
//! track process lifetime activity for quick operational visibility.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    jobs_created: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    stage_duration_ms_total: AtomicU64,
    cost_usd_total: Mutex<f64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_created(&self) {
        self.jobs_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_created", "metric incremented");
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_completed", "metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "metric incremented");
    }

    pub fn stage_duration(&self, elapsed_ms: u64) {
        self.stage_duration_ms_total
            .fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn add_cost(&self, delta_usd: f64) {
        let mut total = self.cost_usd_total.lock().unwrap();
        *total += delta_usd;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            stage_duration_ms_total: self.stage_duration_ms_total.load(Ordering::Relaxed),
            cost_usd_total: *self.cost_usd_total.lock().unwrap(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub stage_duration_ms_total: u64,
    pub cost_usd_total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.job_created();
        metrics.job_created();
        metrics.job_completed();
        metrics.job_failed();
        metrics.add_cost(0.05);
        metrics.add_cost(0.02);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_created, 2);
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(snapshot.jobs_failed, 1);
        assert!((snapshot.cost_usd_total - 0.07).abs() < 1e-9);
    }
}
