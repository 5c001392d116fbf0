//! Manifest assembly (spec §4.7): the single JSON document enumerating
//! every artifact, timing, and cost for a job. Presigned URLs use a 24h
//! TTL distinct from the general `presign_ttl_seconds` default (§9
//! "Presigned URL 24h lifetime").

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::api::models::Job;
use crate::storage::StorageClient;

use super::derivatives::{DerivativeError, DerivativeUnit};
use super::{PipelineError, Result};

/// §4.7: "All URLs are presigned with a long-lived (e.g. 24 h) expiry".
pub const MANIFEST_PRESIGN_TTL: Duration = Duration::from_secs(24 * 3600);

const MANIFEST_VERSION: &str = "2.0";

pub struct BackgroundArtifact {
    pub variant: usize,
    pub key: String,
    pub cost_usd: f64,
}

pub struct CompositeArtifactInfo {
    pub variant: usize,
    pub key: String,
}

pub struct DerivativeArtifact {
    pub variant: usize,
    pub key: String,
    pub unit: DerivativeUnit,
}

/// Everything the manifest builder needs that isn't already durable on the
/// `Job` row (pixel dimensions, byte sizes, per-unit errors) — accumulated
/// in memory across the processor's stage loop and handed to `build` once,
/// at stage 5 (§4.4 Stage 5).
pub struct ManifestInput {
    pub original_key: String,
    pub cutout_key: String,
    pub mask_key: String,
    pub backgrounds: Vec<BackgroundArtifact>,
    pub composites: Vec<CompositeArtifactInfo>,
    pub derivatives: Vec<DerivativeArtifact>,
    pub derivative_errors: Vec<DerivativeError>,
    pub segmentation_cost_usd: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyUrl {
    key: String,
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OriginalSection {
    key: String,
    url: String,
    source_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackgroundRemovalSection {
    cutout: KeyUrl,
    mask: KeyUrl,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackgroundEntry {
    variant: usize,
    key: String,
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompositeEntry {
    variant: usize,
    key: String,
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DerivativeEntry {
    variant: usize,
    size: String,
    format: String,
    key: String,
    url: String,
    width: u32,
    height: u32,
    bytes: usize,
    quality: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimingSection {
    download: Option<u64>,
    segmentation: Option<u64>,
    backgrounds: Option<u64>,
    compositing: Option<u64>,
    derivatives: Option<u64>,
    manifest: Option<u64>,
    total: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CostsSection {
    segmentation: f64,
    background_generation: f64,
    total: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    version: &'static str,
    job_id: String,
    sku: String,
    theme: String,
    sha256: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    original: OriginalSection,
    background_removal: BackgroundRemovalSection,
    backgrounds: Vec<BackgroundEntry>,
    composites: Vec<CompositeEntry>,
    derivatives: Vec<DerivativeEntry>,
    derivative_errors: Vec<DerivativeErrorEntry>,
    timing: TimingSection,
    costs: CostsSection,
    provider_metadata: Value,
    error: Option<crate::api::models::ErrorInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DerivativeErrorEntry {
    size: String,
    format: String,
    message: String,
}

/// Builds the manifest JSON for `job` and returns the serialized bytes
/// ready for upload (§4.7). The manifest is uploaded once to learn its own
/// `manifest_ms`, then re-uploaded with the final timing embedded — callers
/// invoke `build` twice, second time with `manifest_ms` populated on `job`.
/// Async because real S3 presigning (`StorageClient::presign_get`) is
/// itself a signed-request round trip through `object_store`'s `Signer`.
pub async fn build(job: &Job, input: &ManifestInput, storage: &StorageClient) -> Result<Vec<u8>> {
    async fn presign(storage: &StorageClient, key: &str) -> Result<String> {
        storage
            .presign_get(key, MANIFEST_PRESIGN_TTL)
            .await
            .map_err(|e| PipelineError::ManifestFailed(e.to_string()))
    }

    let original = OriginalSection {
        key: input.original_key.clone(),
        url: presign(storage, &input.original_key).await?,
        source_url: job.source_url.clone(),
    };

    let background_removal = BackgroundRemovalSection {
        cutout: KeyUrl {
            key: input.cutout_key.clone(),
            url: presign(storage, &input.cutout_key).await?,
        },
        mask: KeyUrl {
            key: input.mask_key.clone(),
            url: presign(storage, &input.mask_key).await?,
        },
    };

    let mut backgrounds = Vec::with_capacity(input.backgrounds.len());
    let mut background_cost = 0.0;
    for bg in &input.backgrounds {
        background_cost += bg.cost_usd;
        backgrounds.push(BackgroundEntry {
            variant: bg.variant,
            key: bg.key.clone(),
            url: presign(storage, &bg.key).await?,
        });
    }

    let mut composites = Vec::with_capacity(input.composites.len());
    for c in &input.composites {
        composites.push(CompositeEntry {
            variant: c.variant,
            key: c.key.clone(),
            url: presign(storage, &c.key).await?,
        });
    }

    let mut derivatives = Vec::with_capacity(input.derivatives.len());
    for d in &input.derivatives {
        derivatives.push(DerivativeEntry {
            variant: d.variant,
            size: d.unit.size.to_string(),
            format: d.unit.format.name().to_string(),
            key: d.key.clone(),
            url: presign(storage, &d.key).await?,
            width: d.unit.width,
            height: d.unit.height,
            bytes: d.unit.bytes.len(),
            quality: d.unit.quality,
        });
    }

    let derivative_errors = input
        .derivative_errors
        .iter()
        .map(|e| DerivativeErrorEntry {
            size: e.size.to_string(),
            format: e.format.to_string(),
            message: e.message.clone(),
        })
        .collect();

    let t = &job.timings;
    let total_ms = [
        t.download_ms,
        t.segmentation_ms,
        t.backgrounds_ms,
        t.compositing_ms,
        t.derivatives_ms,
        t.manifest_ms,
    ]
    .into_iter()
    .flatten()
    .sum();

    let document = ManifestDocument {
        version: MANIFEST_VERSION,
        job_id: job.id.clone(),
        sku: job.sku.clone(),
        theme: job.theme.clone(),
        sha256: job.sha256.clone(),
        status: format!("{:?}", job.status),
        created_at: job.created_at,
        updated_at: job.updated_at,
        completed_at: job.completed_at,
        original,
        background_removal,
        backgrounds,
        composites,
        derivatives,
        derivative_errors,
        timing: TimingSection {
            download: t.download_ms,
            segmentation: t.segmentation_ms,
            backgrounds: t.backgrounds_ms,
            compositing: t.compositing_ms,
            derivatives: t.derivatives_ms,
            manifest: t.manifest_ms,
            total: total_ms,
        },
        costs: CostsSection {
            segmentation: input.segmentation_cost_usd,
            background_generation: background_cost,
            total: job.cost_usd,
        },
        provider_metadata: job.provider_metadata.clone(),
        error: job.error.clone(),
    };

    serde_json::to_vec_pretty(&document).map_err(|e| PipelineError::ManifestFailed(e.to_string()))
}
