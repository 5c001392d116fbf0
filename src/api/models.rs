//! Core data model for the image pipeline: [`Job`], its artifact and timing
//! maps, and the small caches ([`ShopifyMapEntry`]) and admin-facing request
//! bodies that ride alongside it over the wire.
//!
//! A complete job record, once DONE, looks like (JSON, abbreviated):
//!
//! ```json
//! {
//!   "id": "01977b3e-...",
//!   "sku": "SKU-1",
//!   "sha256": "aa...aa",
//!   "theme": "default",
//!   "status": "DONE",
//!   "artifacts": { "cutout_key": "cutouts/SKU-1/aa.png", "...": "..." },
//!   "timings": { "segmentation_ms": 842, "...": null },
//!   "cost_usd": 0.014
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::state_machine::JobStatus;

/// Artifact keys produced along the pipeline (§3 "artifact keys"). Once a
/// field is set to `Some` in a non-failed job it is never overwritten except
/// by retry (§3 "Artifact monotonicity").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifacts {
    pub original_key: Option<String>,
    pub cutout_key: Option<String>,
    pub mask_key: Option<String>,
    #[serde(default)]
    pub background_keys: Vec<String>,
    #[serde(default)]
    pub composite_keys: Vec<String>,
    #[serde(default)]
    pub derivative_keys: Vec<String>,
    pub manifest_key: Option<String>,
}

/// Per-stage elapsed-millisecond timings (§3 "timings").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub download_ms: Option<u64>,
    pub segmentation_ms: Option<u64>,
    pub backgrounds_ms: Option<u64>,
    pub compositing_ms: Option<u64>,
    pub derivatives_ms: Option<u64>,
    pub manifest_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// The central entity (spec §3). Created by webhook ingress with status
/// `NEW`; mutated only by the Processor or by administrative retry/fail
/// calls; never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub sku: String,
    pub sha256: String,
    pub theme: String,
    pub source_url: String,
    pub status: JobStatus,
    #[serde(default)]
    pub artifacts: Artifacts,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub attempt: u32,
    pub error: Option<ErrorInfo>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub provider_metadata: Value,
}

impl Job {
    pub fn new(sku: String, sha256: String, theme: String, source_url: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            sku,
            sha256,
            theme,
            source_url,
            status: JobStatus::New,
            artifacts: Artifacts::default(),
            timings: Timings::default(),
            cost_usd: 0.0,
            attempt: 0,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            provider_metadata: Value::Object(Default::default()),
        }
    }

    /// The idempotency key enforced unique by the job store (§3, GLOSSARY).
    pub fn idempotency_key(sku: &str, sha256: &str, theme: &str) -> String {
        format!("{sku}:{sha256}:{theme}")
    }
}

/// Cache mapping sku -> external product id (§3 "ShopifyMap"). The core only
/// reads/writes key/value; the out-of-scope push stage is the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopifyMapEntry {
    pub sku: String,
    pub external_product_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Aggregate counters returned by `GET /jobs/stats` (§4.2 `stats()`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobStats {
    pub counts_by_status: HashMap<String, u64>,
    pub total: u64,
    pub cost_usd_sum: f64,
    pub cost_usd_avg: f64,
    pub failure_rate: f64,
    pub mean_completion_ms: Option<f64>,
}

/// Filters accepted by `GET /jobs` (§6.2).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListFilter {
    pub status: Option<JobStatus>,
    pub sku: Option<String>,
    pub theme: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct FailJobRequest {
    #[serde(default = "default_fail_code")]
    pub code: String,
    #[serde(default = "default_fail_message")]
    pub message: String,
}

fn default_fail_code() -> String {
    crate::state_machine::ErrorKind::Unknown.code().to_string()
}

fn default_fail_message() -> String {
    "failed by administrative action".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub variant: Option<usize>,
    pub size: Option<String>,
    pub format: Option<String>,
}

/// Webhook ingress request body (§4.3). Unknown fields are ignored by
/// `serde`'s default behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub event: Option<String>,
    pub sku: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    pub sha256: String,
    #[serde(rename = "takenAt", default)]
    pub taken_at: Option<String>,
}
