//! Pure state machine enforcing legal job status transitions and the
//! per-status required-field contract. Nothing in this module touches
//! storage; `job_store` is the only component allowed to call `transition`
//! and persist the result atomically.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::models::{ErrorInfo, Job};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    New,
    BgRemoved,
    BackgroundReady,
    Composited,
    Derivatives,
    ShopifyPush,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    DownloadFailed,
    SegmentFailed,
    BackgroundFailed,
    CompositeFailed,
    DerivativeFailed,
    ManifestFailed,
    StorageFailed,
    Network,
    Unknown,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::DownloadFailed => "DOWNLOAD_FAILED",
            ErrorKind::SegmentFailed => "SEGMENT_FAILED",
            ErrorKind::BackgroundFailed => "BACKGROUND_FAILED",
            ErrorKind::CompositeFailed => "COMPOSITE_FAILED",
            ErrorKind::DerivativeFailed => "DERIVATIVE_FAILED",
            ErrorKind::ManifestFailed => "MANIFEST_FAILED",
            ErrorKind::StorageFailed => "STORAGE_FAILED",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
    #[error("missing required fields for {status:?}: {missing:?}")]
    MissingFields {
        status: JobStatus,
        missing: Vec<&'static str>,
    },
}

/// The DAG of §4.1, excluding the universal `* -> Failed` edge.
pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    if to == Failed {
        return from != Done && from != Failed;
    }
    matches!(
        (from, to),
        (New, BgRemoved)
            | (BgRemoved, BackgroundReady)
            | (BackgroundReady, Composited)
            | (Composited, Derivatives)
            | (Derivatives, ShopifyPush)
            | (ShopifyPush, Done)
    )
}

/// Fields that must be non-null before a job may enter `status`.
pub fn validate_fields(job: &Job, status: JobStatus) -> Result<(), Vec<&'static str>> {
    let mut missing = Vec::new();

    match status {
        JobStatus::BgRemoved => {
            if job.artifacts.cutout_key.is_none() {
                missing.push("cutout_key");
            }
            if job.artifacts.mask_key.is_none() {
                missing.push("mask_key");
            }
        }
        JobStatus::BackgroundReady => {
            if job.artifacts.background_keys.is_empty() {
                missing.push("backgrounds[]");
            }
        }
        JobStatus::Composited => {
            if job.artifacts.composite_keys.is_empty() {
                missing.push("composites[]");
            } else if job.artifacts.composite_keys.len() != job.artifacts.background_keys.len() {
                missing.push("composites[] (length mismatch with backgrounds[])");
            }
        }
        JobStatus::Derivatives => {
            if job.artifacts.derivative_keys.is_empty() {
                missing.push("derivatives[]");
            }
        }
        JobStatus::ShopifyPush => {
            if job.artifacts.manifest_key.is_none() {
                missing.push("manifest_key");
            }
        }
        JobStatus::Done => {}
        JobStatus::Failed => {
            if job.error.is_none() {
                missing.push("error.code");
            }
        }
        JobStatus::New => {}
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

/// Apply `updates` to a clone of `job` and move it to `target`, failing the
/// whole operation (leaving `job` conceptually unchanged) if the transition
/// or the field contract is violated. Callers persist the returned job.
pub fn transition(
    job: &Job,
    target: JobStatus,
    updates: impl FnOnce(&mut Job),
) -> Result<Job, TransitionError> {
    if !is_valid_transition(job.status, target) {
        return Err(TransitionError::IllegalTransition {
            from: job.status,
            to: target,
        });
    }

    let mut next = job.clone();
    updates(&mut next);
    next.status = target;

    if let Err(missing) = validate_fields(&next, target) {
        return Err(TransitionError::MissingFields {
            status: target,
            missing,
        });
    }

    Ok(next)
}

/// Resets a terminal FAILED job back to NEW, per §4.1 retry semantics.
pub fn retry(job: &Job) -> Result<Job, TransitionError> {
    if job.status != JobStatus::Failed {
        return Err(TransitionError::IllegalTransition {
            from: job.status,
            to: JobStatus::New,
        });
    }
    let mut next = job.clone();
    next.status = JobStatus::New;
    next.completed_at = None;
    next.error = None::<ErrorInfo>;
    next.attempt += 1;
    Ok(next)
}

pub fn can_retry(job: &Job, max_retries: u32) -> bool {
    job.status == JobStatus::Failed && job.attempt < max_retries
}

/// `base_ms * 2^attempt`, per §4.1.
pub fn retry_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(1u64 << attempt.min(32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Job;

    fn new_job() -> Job {
        Job::new(
            "SKU-1".to_string(),
            "a".repeat(64),
            "default".to_string(),
            "http://img/a.jpg".to_string(),
        )
    }

    #[test]
    fn legal_path_is_accepted_in_order() {
        use JobStatus::*;
        let path = [
            New,
            BgRemoved,
            BackgroundReady,
            Composited,
            Derivatives,
            ShopifyPush,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(is_valid_transition(pair[0], pair[1]));
        }
    }

    #[test]
    fn skipping_a_stage_is_illegal() {
        assert!(!is_valid_transition(JobStatus::New, JobStatus::Composited));
    }

    #[test]
    fn failed_is_reachable_from_any_nonterminal_state() {
        for s in [
            JobStatus::New,
            JobStatus::BgRemoved,
            JobStatus::BackgroundReady,
            JobStatus::Composited,
            JobStatus::Derivatives,
            JobStatus::ShopifyPush,
        ] {
            assert!(is_valid_transition(s, JobStatus::Failed));
        }
        assert!(!is_valid_transition(JobStatus::Done, JobStatus::Failed));
        assert!(!is_valid_transition(JobStatus::Failed, JobStatus::Failed));
    }

    #[test]
    fn transition_rejects_missing_required_fields() {
        let job = new_job();
        let err = transition(&job, JobStatus::BgRemoved, |_| {}).unwrap_err();
        assert!(matches!(err, TransitionError::MissingFields { .. }));
    }

    #[test]
    fn transition_accepts_when_fields_populated() {
        let job = new_job();
        let next = transition(&job, JobStatus::BgRemoved, |j| {
            j.artifacts.cutout_key = Some("cutouts/SKU-1/aa.png".to_string());
            j.artifacts.mask_key = Some("masks/SKU-1/aa.png".to_string());
        })
        .unwrap();
        assert_eq!(next.status, JobStatus::BgRemoved);
    }

    #[test]
    fn retry_only_allowed_from_failed() {
        let job = new_job();
        assert!(retry(&job).is_err());

        let mut failed = job.clone();
        failed.status = JobStatus::Failed;
        failed.error = Some(ErrorInfo {
            code: ErrorKind::SegmentFailed.code().to_string(),
            message: "boom".to_string(),
            stack: None,
        });
        failed.completed_at = None;
        let reset = retry(&failed).unwrap();
        assert_eq!(reset.status, JobStatus::New);
        assert!(reset.error.is_none());
        assert_eq!(reset.attempt, failed.attempt + 1);
    }

    #[test]
    fn can_retry_respects_max_retries() {
        let mut job = new_job();
        job.status = JobStatus::Failed;
        job.attempt = 2;
        assert!(can_retry(&job, 3));
        job.attempt = 3;
        assert!(!can_retry(&job, 3));
    }

    #[test]
    fn retry_delay_follows_exponential_backoff() {
        assert_eq!(retry_delay_ms(60_000, 0), 60_000);
        assert_eq!(retry_delay_ms(60_000, 1), 120_000);
        assert_eq!(retry_delay_ms(60_000, 3), 480_000);
    }
}
