use std::path::Path;
use std::sync::Mutex;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::api::models::{Job, JobListFilter, JobStats, ShopifyMapEntry};
use crate::state_machine::{self, ErrorInfo, JobStatus};

use super::error::{JobStoreError, Result};
use super::partitions::{encode_idem_key, encode_job_key, encode_shopify_key};
use super::pruning::{self, PruneStats};

/// Result of [`JobStore::create_job_checked`]: idempotency is resolved
/// before the per-sku limit is ever consulted.
pub enum CreateOutcome {
    /// (sku, sha256, theme) already had a row; `max_per_sku` was not
    /// consulted.
    Existing(Job),
    /// A new row was created; the sku was under `max_per_sku`.
    Created(Job),
    /// No existing row, and the sku is already at `max_per_sku`.
    LimitReached,
}

/// Durable, uniqueness-enforcing persistence for [`Job`] rows (§4.2).
///
/// Fjall provides per-partition atomicity but not cross-partition
/// transactions, so every operation that must appear atomic to callers
/// (create, status transition, artifact merge) takes `write_lock` for its
/// duration. Reads never block on it — they are non-blocking snapshots
/// per §4.2's concurrency contract.
pub struct JobStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    idem: PartitionHandle,
    shopify_map: PartitionHandle,
    metadata: PartitionHandle,
    write_lock: Mutex<()>,
}

impl JobStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening job store");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let idem = keyspace.open_partition("idem", PartitionCreateOptions::default())?;
        let shopify_map =
            keyspace.open_partition("shopify_map", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            jobs,
            idem,
            shopify_map,
            metadata,
            write_lock: Mutex::new(()),
        })
    }

    fn get_raw(&self, id: &str) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_raw(&self, job: &Job) -> Result<()> {
        self.jobs
            .insert(encode_job_key(&job.id), serde_json::to_vec(job)?)?;
        Ok(())
    }

    /// Idempotent create on (sku, sha256, theme). Returns the existing row
    /// with `created = false` on a duplicate (§3 Uniqueness, §4.2).
    pub fn create_job(
        &self,
        sku: String,
        source_url: String,
        sha256: String,
        theme: String,
    ) -> Result<(Job, bool)> {
        let _guard = self.write_lock.lock().unwrap();

        let idem_key = encode_idem_key(&sku, &sha256, &theme);
        if let Some(existing_id) = self.idem.get(&idem_key)? {
            let id = String::from_utf8_lossy(&existing_id).to_string();
            if let Some(job) = self.get_raw(&id)? {
                return Ok((job, false));
            }
        }

        let job = Job::new(sku, sha256, theme, source_url);
        self.idem.insert(idem_key, job.id.as_bytes())?;
        self.put_raw(&job)?;
        debug!(job_id = %job.id, "created job");
        Ok((job, true))
    }

    /// Idempotent create gated by the per-sku admission limit, both
    /// resolved under the same `write_lock` acquisition (§4.2, §8 property
    /// 1). Idempotency wins first: a webhook retry for an (sku, sha256,
    /// theme) triple that already has a row always returns that row, even
    /// if the sku has since reached `max_per_sku` — the limit only ever
    /// blocks a row that would otherwise be newly created.
    pub fn create_job_checked(
        &self,
        sku: String,
        source_url: String,
        sha256: String,
        theme: String,
        max_per_sku: u32,
    ) -> Result<CreateOutcome> {
        let _guard = self.write_lock.lock().unwrap();

        let idem_key = encode_idem_key(&sku, &sha256, &theme);
        if let Some(existing_id) = self.idem.get(&idem_key)? {
            let id = String::from_utf8_lossy(&existing_id).to_string();
            if let Some(job) = self.get_raw(&id)? {
                return Ok(CreateOutcome::Existing(job));
            }
        }

        if max_per_sku > 0 {
            let mut count = 0u32;
            for item in self.jobs.iter() {
                let (_, value) = item?;
                let job: Job = serde_json::from_slice(&value)?;
                if job.sku == sku && job.status != JobStatus::Failed {
                    count += 1;
                    if count >= max_per_sku {
                        return Ok(CreateOutcome::LimitReached);
                    }
                }
            }
        }

        let job = Job::new(sku, sha256, theme, source_url);
        self.idem.insert(idem_key, job.id.as_bytes())?;
        self.put_raw(&job)?;
        debug!(job_id = %job.id, "created job");
        Ok(CreateOutcome::Created(job))
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.get_raw(id)
    }

    pub fn list_jobs(&self, filter: &JobListFilter) -> Result<Vec<Job>> {
        let mut matched = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;

            if let Some(status) = filter.status {
                if job.status != status {
                    continue;
                }
            }
            if let Some(ref sku) = filter.sku {
                if &job.sku != sku {
                    continue;
                }
            }
            if let Some(ref theme) = filter.theme {
                if &job.theme != theme {
                    continue;
                }
            }
            matched.push(job);
        }

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    /// Wraps [`state_machine::transition`]; atomic at the row level.
    pub fn update_status(
        &self,
        id: &str,
        target: JobStatus,
        updates: impl FnOnce(&mut Job),
    ) -> Result<Job> {
        let _guard = self.write_lock.lock().unwrap();

        let job = self
            .get_raw(id)?
            .ok_or_else(|| JobStoreError::JobNotFound(id.to_string()))?;

        let mut next = state_machine::transition(&job, target, updates)?;
        next.updated_at = chrono::Utc::now();
        if target == JobStatus::Done {
            next.completed_at = Some(next.updated_at);
        }

        self.put_raw(&next)?;
        Ok(next)
    }

    /// Merges artifact keys without a status change (§4.2 `updateArtifacts`).
    pub fn update_artifacts(&self, id: &str, merge: impl FnOnce(&mut Job)) -> Result<Job> {
        let _guard = self.write_lock.lock().unwrap();

        let mut job = self
            .get_raw(id)?
            .ok_or_else(|| JobStoreError::JobNotFound(id.to_string()))?;
        merge(&mut job);
        job.updated_at = chrono::Utc::now();
        self.put_raw(&job)?;
        Ok(job)
    }

    /// Any non-terminal job -> FAILED (§4.2 `failJob`).
    pub fn fail_job(
        &self,
        id: &str,
        code: String,
        message: String,
        stack: Option<String>,
    ) -> Result<Job> {
        let _guard = self.write_lock.lock().unwrap();

        let job = self
            .get_raw(id)?
            .ok_or_else(|| JobStoreError::JobNotFound(id.to_string()))?;

        if job.status.is_terminal() {
            return Err(JobStoreError::Transition(
                crate::state_machine::TransitionError::IllegalTransition {
                    from: job.status,
                    to: JobStatus::Failed,
                },
            ));
        }

        let mut next = job;
        next.status = JobStatus::Failed;
        next.error = Some(ErrorInfo {
            code,
            message,
            stack,
        });
        next.updated_at = chrono::Utc::now();
        self.put_raw(&next)?;
        Ok(next)
    }

    /// Admin-triggered retry (§9 Open Question Decisions): FAILED -> NEW.
    pub fn retry_job(&self, id: &str) -> Result<Job> {
        let _guard = self.write_lock.lock().unwrap();

        let job = self
            .get_raw(id)?
            .ok_or_else(|| JobStoreError::JobNotFound(id.to_string()))?;
        let mut next = state_machine::retry(&job)?;
        next.updated_at = chrono::Utc::now();
        self.put_raw(&next)?;
        Ok(next)
    }

    pub fn increment_attempt(&self, id: &str) -> Result<Job> {
        let _guard = self.write_lock.lock().unwrap();
        let mut job = self
            .get_raw(id)?
            .ok_or_else(|| JobStoreError::JobNotFound(id.to_string()))?;
        job.attempt += 1;
        job.updated_at = chrono::Utc::now();
        self.put_raw(&job)?;
        Ok(job)
    }

    pub fn add_cost(&self, id: &str, delta: f64) -> Result<Job> {
        let _guard = self.write_lock.lock().unwrap();
        let mut job = self
            .get_raw(id)?
            .ok_or_else(|| JobStoreError::JobNotFound(id.to_string()))?;
        job.cost_usd += delta;
        job.updated_at = chrono::Utc::now();
        self.put_raw(&job)?;
        Ok(job)
    }

    /// True iff `sku` already has `max_per_sku` or more non-failed jobs
    /// (§4.2 `hasReachedImageLimit`). `max_per_sku == 0` disables the check.
    pub fn has_reached_image_limit(&self, sku: &str, max_per_sku: u32) -> Result<bool> {
        if max_per_sku == 0 {
            return Ok(false);
        }
        let mut count = 0u32;
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if job.sku == sku && job.status != JobStatus::Failed {
                count += 1;
                if count >= max_per_sku {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn stats(&self) -> Result<JobStats> {
        let mut stats = JobStats::default();
        let mut cost_sum = 0.0;
        let mut failed = 0u64;
        let mut completion_total_ms = 0i64;
        let mut completion_count = 0u64;

        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;

            *stats
                .counts_by_status
                .entry(format!("{:?}", job.status))
                .or_insert(0) += 1;
            stats.total += 1;
            cost_sum += job.cost_usd;

            if job.status == JobStatus::Failed {
                failed += 1;
            }
            if let Some(completed_at) = job.completed_at {
                completion_total_ms += (completed_at - job.created_at).num_milliseconds();
                completion_count += 1;
            }
        }

        stats.cost_usd_sum = cost_sum;
        stats.cost_usd_avg = if stats.total > 0 {
            cost_sum / stats.total as f64
        } else {
            0.0
        };
        stats.failure_rate = if stats.total > 0 {
            failed as f64 / stats.total as f64
        } else {
            0.0
        };
        stats.mean_completion_ms = if completion_count > 0 {
            Some(completion_total_ms as f64 / completion_count as f64)
        } else {
            None
        };

        Ok(stats)
    }

    /// §4.2 `pruneTerminal` — external cleanup policy for completed jobs.
    pub fn prune_terminal(&self, older_than_days: u32) -> Result<PruneStats> {
        let _guard = self.write_lock.lock().unwrap();
        pruning::prune_terminal(&self.jobs, &self.idem, older_than_days)
    }

    pub fn upsert_shopify_mapping(&self, entry: ShopifyMapEntry) -> Result<()> {
        let key = encode_shopify_key(&entry.sku);
        self.shopify_map.insert(key, serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    pub fn get_shopify_mapping(&self, sku: &str) -> Result<Option<ShopifyMapEntry>> {
        match self.shopify_map.get(encode_shopify_key(sku))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.metadata
            .insert(super::partitions::encode_meta_key(key), value.as_bytes())?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        match self.metadata.get(super::partitions::encode_meta_key(key))? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            None => Ok(None),
        }
    }

    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (JobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("jobs")).unwrap();
        (store, dir)
    }

    #[test]
    fn create_job_is_idempotent() {
        let (store, _dir) = store();
        let (first, created1) = store
            .create_job(
                "SKU-1".into(),
                "http://img/a.jpg".into(),
                "a".repeat(64),
                "default".into(),
            )
            .unwrap();
        assert!(created1);

        let (second, created2) = store
            .create_job(
                "SKU-1".into(),
                "http://img/a.jpg".into(),
                "a".repeat(64),
                "default".into(),
            )
            .unwrap();
        assert!(!created2);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn distinct_theme_is_a_distinct_job() {
        let (store, _dir) = store();
        let (a, _) = store
            .create_job(
                "SKU-1".into(),
                "http://img/a.jpg".into(),
                "a".repeat(64),
                "default".into(),
            )
            .unwrap();
        let (b, created) = store
            .create_job(
                "SKU-1".into(),
                "http://img/a.jpg".into(),
                "a".repeat(64),
                "kitchen".into(),
            )
            .unwrap();
        assert!(created);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn update_status_requires_fields() {
        let (store, _dir) = store();
        let (job, _) = store
            .create_job(
                "SKU-1".into(),
                "http://img/a.jpg".into(),
                "a".repeat(64),
                "default".into(),
            )
            .unwrap();

        let err = store
            .update_status(&job.id, JobStatus::BgRemoved, |_| {})
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Transition(_)));

        let ok = store
            .update_status(&job.id, JobStatus::BgRemoved, |j| {
                j.artifacts.cutout_key = Some("cutouts/SKU-1/aa.png".into());
                j.artifacts.mask_key = Some("masks/SKU-1/aa.png".into());
            })
            .unwrap();
        assert_eq!(ok.status, JobStatus::BgRemoved);
    }

    #[test]
    fn fail_job_sets_error_and_is_terminal() {
        let (store, _dir) = store();
        let (job, _) = store
            .create_job(
                "SKU-1".into(),
                "http://img/a.jpg".into(),
                "a".repeat(64),
                "default".into(),
            )
            .unwrap();

        let failed = store
            .fail_job(&job.id, "SEGMENT_FAILED".into(), "boom".into(), None)
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.is_some());
    }

    #[test]
    fn create_job_checked_lets_duplicates_through_a_full_sku() {
        let (store, _dir) = store();
        for theme in ["default", "kitchen", "luxury"] {
            store
                .create_job(
                    "SKU-1".into(),
                    "http://img/a.jpg".into(),
                    "a".repeat(64),
                    theme.into(),
                )
                .unwrap();
        }

        // The sku is now at the limit for a 4th *new* theme...
        let outcome = store
            .create_job_checked(
                "SKU-1".into(),
                "http://img/a.jpg".into(),
                "b".repeat(64),
                "outdoor".into(),
                3,
            )
            .unwrap();
        assert!(matches!(outcome, CreateOutcome::LimitReached));

        // ...but a retry of an already-existing (sku, sha256, theme) still
        // returns that row rather than being blocked by the limit.
        let outcome = store
            .create_job_checked(
                "SKU-1".into(),
                "http://img/a.jpg".into(),
                "a".repeat(64),
                "default".into(),
                3,
            )
            .unwrap();
        match outcome {
            CreateOutcome::Existing(job) => assert_eq!(job.theme, "default"),
            _ => panic!("expected the existing default-theme job"),
        }
    }

    #[test]
    fn has_reached_image_limit_counts_non_failed() {
        let (store, _dir) = store();
        for theme in ["default", "kitchen", "luxury"] {
            store
                .create_job(
                    "SKU-1".into(),
                    "http://img/a.jpg".into(),
                    "a".repeat(64),
                    theme.into(),
                )
                .unwrap();
        }
        assert!(store.has_reached_image_limit("SKU-1", 3).unwrap());
        assert!(!store.has_reached_image_limit("SKU-1", 4).unwrap());
        assert!(!store.has_reached_image_limit("SKU-1", 0).unwrap());
    }

    #[test]
    fn stats_aggregates_by_status() {
        let (store, _dir) = store();
        store
            .create_job(
                "SKU-1".into(),
                "http://img/a.jpg".into(),
                "a".repeat(64),
                "default".into(),
            )
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.counts_by_status.get("New"), Some(&1));
    }
}
