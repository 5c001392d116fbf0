//! Retention / pruning policy for terminal jobs (§4.2 `pruneTerminal`).
//!
//! Unlike logs-oriented retention, a job row carries its own `completed_at`
//! (DONE) or `updated_at` (FAILED) timestamp, so pruning can filter on actual
//! age rather than a last-prune-timestamp heuristic.

use fjall::PartitionHandle;
use tracing::info;

use crate::api::models::Job;
use crate::state_machine::JobStatus;

use super::error::Result;
use super::partitions::encode_idem_key;

pub const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Default, Clone, Copy)]
pub struct PruneStats {
    pub jobs_pruned: usize,
    pub jobs_scanned: usize,
}

/// Remove terminal (DONE or FAILED) jobs whose terminal timestamp is older
/// than `older_than_days`. Non-terminal jobs are never touched.
pub fn prune_terminal(
    jobs: &PartitionHandle,
    idem: &PartitionHandle,
    older_than_days: u32,
) -> Result<PruneStats> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days as i64);
    let mut stats = PruneStats::default();
    let mut to_remove = Vec::new();

    for item in jobs.iter() {
        let (key, value) = item?;
        stats.jobs_scanned += 1;
        let job: Job = serde_json::from_slice(&value)?;

        if !job.status.is_terminal() {
            continue;
        }

        let terminal_at = match job.status {
            JobStatus::Done => job.completed_at.unwrap_or(job.updated_at),
            _ => job.updated_at,
        };

        if terminal_at < cutoff {
            to_remove.push((key.to_vec(), job));
        }
    }

    for (key, job) in to_remove {
        jobs.remove(key)?;
        idem.remove(encode_idem_key(&job.sku, &job.sha256, &job.theme))?;
        stats.jobs_pruned += 1;
    }

    info!(pruned = stats.jobs_pruned, scanned = stats.jobs_scanned, "pruned terminal jobs");
    Ok(stats)
}
