//! Per-job stage execution (spec §4.4). `run` drives one job through every
//! stage in order and returns the final job on success; the scheduler
//! (`processor::scheduler`) is the single place that catches a [`StageError`]
//! and converts it into `failJob` — no stage function here ever swallows an
//! error itself (§9 "exceptions anywhere" -> "catch-and-convert is a single
//! line at the top of the worker").

use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, GenericImageView, ImageEncoder};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::api::models::Job;
use crate::config::Config;
use crate::job_store::{JobStore, JobStoreError};
use crate::observability::Metrics;
use crate::pipeline::compositor::{self, CompositeOptions};
use crate::pipeline::derivatives;
use crate::pipeline::encode::OutputFormat;
use crate::pipeline::manifest::{self, BackgroundArtifact, CompositeArtifactInfo, DerivativeArtifact, ManifestInput};
use crate::processor::http::HttpClient;
use crate::providers::{BackgroundProvider, SegmentationProvider};
use crate::state_machine::{ErrorKind, JobStatus};
use crate::storage::{keys, StorageClient};

/// Quality used when re-encoding generated backgrounds to JPEG for storage;
/// not named in the §6.4 configuration table, so fixed at the same default
/// the compositor uses for its own master encode.
const BACKGROUND_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("segmentation failed: {0}")]
    Segmentation(String),
    #[error("background synthesis failed: {0}")]
    Background(String),
    #[error("compositing failed: {0}")]
    Composite(String),
    #[error("derivative generation failed: {0}")]
    Derivative(String),
    #[error("manifest assembly failed: {0}")]
    Manifest(String),
    #[error("storage failed: {0}")]
    Storage(String),
    #[error("job store error: {0}")]
    JobStore(#[from] JobStoreError),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Download(_) => ErrorKind::DownloadFailed,
            StageError::Segmentation(_) => ErrorKind::SegmentFailed,
            StageError::Background(_) => ErrorKind::BackgroundFailed,
            StageError::Composite(_) => ErrorKind::CompositeFailed,
            StageError::Derivative(_) => ErrorKind::DerivativeFailed,
            StageError::Manifest(_) => ErrorKind::ManifestFailed,
            StageError::Storage(_) => ErrorKind::StorageFailed,
            StageError::JobStore(_) => ErrorKind::Unknown,
        }
    }
}

/// Everything a running job needs, shared read-only across the worker pool.
pub struct StageContext {
    pub job_store: Arc<JobStore>,
    pub storage: Arc<StorageClient>,
    pub http: Arc<HttpClient>,
    pub segmentation: Arc<dyn SegmentationProvider>,
    pub background: Arc<dyn BackgroundProvider>,
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
}

fn encode_png(img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let rgba = img.to_rgba8();
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf).write_image(
        rgba.as_raw(),
        rgba.width(),
        rgba.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(buf)
}

fn encode_mask_png(mask: &image::GrayImage) -> image::ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf).write_image(
        mask.as_raw(),
        mask.width(),
        mask.height(),
        image::ExtendedColorType::L8,
    )?;
    Ok(buf)
}

/// Runs every stage of §4.4 for `job`, in order, persisting after each one.
/// Returns the job as it stood after the last successful stage; on any
/// failure returns the `StageError` the scheduler will pass to `failJob`.
pub async fn run(mut job: Job, ctx: &StageContext) -> Result<Job, StageError> {
    let job_id = job.id.clone();

    // Stage 0: fetch the source image. Not itself a state-machine
    // transition (only BG_REMOVED names required fields), but its elapsed
    // time is tracked as `download_ms` (§3 Timings) and its bytes feed the
    // segmentation call.
    let t_download = Instant::now();
    let original_bytes = ctx
        .http
        .download(&job.source_url, Vec::new())
        .await
        .map_err(|e| StageError::Download(e.to_string()))?
        .to_vec();
    let original_key = keys::original_key(&job.sku, &job.sha256);
    ctx.storage
        .upload(&original_key, original_bytes.clone(), "image/jpeg")
        .await
        .map_err(|e| StageError::Storage(e.to_string()))?;
    let download_ms = t_download.elapsed().as_millis() as u64;
    job = ctx.job_store.update_artifacts(&job_id, |j| {
        j.artifacts.original_key = Some(original_key.clone());
        j.timings.download_ms = Some(download_ms);
    })?;
    ctx.metrics.stage_duration(download_ms);

    // Stage 1: segmentation.
    info!(job_id = %job_id, stage = "segmentation", "starting");
    let t1 = Instant::now();
    let segmentation = ctx
        .segmentation
        .remove_background(&job.source_url, &original_bytes)
        .await
        .map_err(|e| StageError::Segmentation(e.to_string()))?;

    let cutout_key = keys::cutout_key(&job.sku, &job.sha256);
    let mask_key = keys::mask_key(&job.sku, &job.sha256);
    let cutout_bytes = encode_png(&DynamicImage::ImageRgba8(segmentation.cutout.clone()))
        .map_err(|e| StageError::Segmentation(e.to_string()))?;
    let mask_bytes =
        encode_mask_png(&segmentation.mask).map_err(|e| StageError::Segmentation(e.to_string()))?;
    ctx.storage
        .upload(&cutout_key, cutout_bytes, "image/png")
        .await
        .map_err(|e| StageError::Storage(e.to_string()))?;
    ctx.storage
        .upload(&mask_key, mask_bytes, "image/png")
        .await
        .map_err(|e| StageError::Storage(e.to_string()))?;

    let segmentation_ms = t1.elapsed().as_millis() as u64;
    job = ctx.job_store.add_cost(&job_id, segmentation.cost_usd)?;
    job = ctx.job_store.update_status(&job_id, JobStatus::BgRemoved, |j| {
        j.artifacts.cutout_key = Some(cutout_key.clone());
        j.artifacts.mask_key = Some(mask_key.clone());
        j.timings.segmentation_ms = Some(segmentation_ms);
    })?;
    ctx.metrics.stage_duration(segmentation_ms);
    ctx.metrics.add_cost(segmentation.cost_usd);
    info!(job_id = %job_id, stage = "segmentation", elapsed_ms = segmentation_ms, "done");

    // Stage 2: background synthesis.
    info!(job_id = %job_id, stage = "backgrounds", "starting");
    let t2 = Instant::now();
    let (cutout_w, cutout_h) = segmentation.cutout.dimensions();
    let background_count = ctx.config.providers.background_count.max(1);
    let backgrounds = ctx
        .background
        .generate(&job.theme, background_count, cutout_w, cutout_h)
        .await
        .map_err(|e| StageError::Background(e.to_string()))?;

    let mut background_keys = Vec::with_capacity(backgrounds.len());
    let mut background_infos = Vec::with_capacity(backgrounds.len());
    for (variant, (bg, cost)) in backgrounds.iter().enumerate() {
        let key = keys::background_key(&job.theme, &job.sku, &job.sha256, variant);
        let bytes = crate::pipeline::encode::encode(
            &DynamicImage::ImageRgb8(bg.clone()),
            OutputFormat::Jpeg,
            BACKGROUND_JPEG_QUALITY,
        )
        .map_err(|e| StageError::Background(e.to_string()))?;
        ctx.storage
            .upload(&key, bytes, "image/jpeg")
            .await
            .map_err(|e| StageError::Storage(e.to_string()))?;
        ctx.job_store.add_cost(&job_id, *cost)?;
        ctx.metrics.add_cost(*cost);
        background_infos.push(BackgroundArtifact {
            variant,
            key: key.clone(),
            cost_usd: *cost,
        });
        background_keys.push(key);
    }

    let backgrounds_ms = t2.elapsed().as_millis() as u64;
    job = ctx
        .job_store
        .update_status(&job_id, JobStatus::BackgroundReady, |j| {
            j.artifacts.background_keys = background_keys.clone();
            j.timings.backgrounds_ms = Some(backgrounds_ms);
        })?;
    ctx.metrics.stage_duration(backgrounds_ms);
    info!(job_id = %job_id, stage = "backgrounds", elapsed_ms = backgrounds_ms, produced = background_keys.len(), "done");

    // Stage 3: compositing.
    info!(job_id = %job_id, stage = "compositing", "starting");
    let t3 = Instant::now();
    let options = CompositeOptions::default();
    let mut composite_keys = Vec::with_capacity(backgrounds.len());
    let mut composite_images = Vec::with_capacity(backgrounds.len());
    let mut composite_infos = Vec::with_capacity(backgrounds.len());
    for (variant, (bg, _cost)) in backgrounds.iter().enumerate() {
        let artifact = compositor::composite(
            &segmentation.cutout,
            segmentation.has_alpha,
            bg,
            variant,
            &options,
        )
        .map_err(|e| StageError::Composite(e.to_string()))?;

        let key = keys::composite_key(
            &job.theme,
            &job.sku,
            &job.sha256,
            &options.aspect,
            variant,
            &options.kind,
            artifact.format.ext(),
        );
        ctx.storage
            .upload(&key, artifact.bytes.clone(), artifact.format.content_type())
            .await
            .map_err(|e| StageError::Storage(e.to_string()))?;

        composite_infos.push(CompositeArtifactInfo {
            variant,
            key: key.clone(),
        });
        composite_keys.push(key);
        composite_images.push(artifact.image);
    }

    let compositing_ms = t3.elapsed().as_millis() as u64;
    job = ctx.job_store.update_status(&job_id, JobStatus::Composited, |j| {
        j.artifacts.composite_keys = composite_keys.clone();
        j.timings.compositing_ms = Some(compositing_ms);
    })?;
    ctx.metrics.stage_duration(compositing_ms);
    info!(job_id = %job_id, stage = "compositing", elapsed_ms = compositing_ms, produced = composite_keys.len(), "done");

    // Stage 4: derivative generation. Partial per-unit failure is
    // tolerated (§4.4 "Partial success tolerance"); a composite that ends
    // with zero derivatives fails the whole stage.
    info!(job_id = %job_id, stage = "derivatives", "starting");
    let t4 = Instant::now();
    let mut derivative_keys = Vec::with_capacity(composite_images.len() * 9);
    let mut derivative_infos = Vec::new();
    let mut derivative_errors = Vec::new();
    for (variant, composite_image) in composite_images.iter().enumerate() {
        let (units, errors) = derivatives::generate(composite_image);
        if units.is_empty() {
            return Err(StageError::Derivative(format!(
                "composite {variant} produced zero derivatives"
            )));
        }
        for unit in units {
            let key = keys::derivative_key(
                &job.theme,
                &job.sku,
                &job.sha256,
                variant,
                unit.size,
                unit.format.ext(),
            );
            ctx.storage
                .upload(&key, unit.bytes.clone(), unit.format.content_type())
                .await
                .map_err(|e| StageError::Storage(e.to_string()))?;
            derivative_keys.push(key.clone());
            derivative_infos.push(DerivativeArtifact {
                variant,
                key,
                unit,
            });
        }
        derivative_errors.extend(errors);
    }

    let derivatives_ms = t4.elapsed().as_millis() as u64;
    let derivative_error_json: Vec<_> = derivative_errors
        .iter()
        .map(|e| json!({"size": e.size, "format": e.format, "message": e.message}))
        .collect();
    job = ctx.job_store.update_status(&job_id, JobStatus::Derivatives, |j| {
        j.artifacts.derivative_keys = derivative_keys.clone();
        j.timings.derivatives_ms = Some(derivatives_ms);
        if !derivative_error_json.is_empty() {
            j.provider_metadata["derivativeErrors"] = json!(derivative_error_json);
        }
    })?;
    ctx.metrics.stage_duration(derivatives_ms);
    info!(job_id = %job_id, stage = "derivatives", elapsed_ms = derivatives_ms, produced = derivative_keys.len(), failed = derivative_errors.len(), "done");

    // Stage 5: manifest. Built and uploaded once to learn `manifest_ms`,
    // then rebuilt and re-uploaded with that timing embedded (§4.7).
    info!(job_id = %job_id, stage = "manifest", "starting");
    let t5 = Instant::now();
    let manifest_key = keys::manifest_key(&job.sku, &job.sha256, &job.theme);
    let segmentation_cost_usd = segmentation.cost_usd;
    let input = ManifestInput {
        original_key: original_key.clone(),
        cutout_key: cutout_key.clone(),
        mask_key: mask_key.clone(),
        backgrounds: background_infos,
        composites: composite_infos,
        derivatives: derivative_infos,
        derivative_errors,
        segmentation_cost_usd,
    };

    let draft = manifest::build(&job, &input, &ctx.storage)
        .await
        .map_err(|e| StageError::Manifest(e.to_string()))?;
    ctx.storage
        .upload(&manifest_key, draft, "application/json")
        .await
        .map_err(|e| StageError::Storage(e.to_string()))?;
    let manifest_ms = t5.elapsed().as_millis() as u64;

    let mut job_with_timing = job.clone();
    job_with_timing.timings.manifest_ms = Some(manifest_ms);
    let final_manifest = manifest::build(&job_with_timing, &input, &ctx.storage)
        .await
        .map_err(|e| StageError::Manifest(e.to_string()))?;
    ctx.storage
        .upload(&manifest_key, final_manifest, "application/json")
        .await
        .map_err(|e| StageError::Storage(e.to_string()))?;

    job = ctx.job_store.update_status(&job_id, JobStatus::ShopifyPush, |j| {
        j.artifacts.manifest_key = Some(manifest_key.clone());
        j.timings.manifest_ms = Some(manifest_ms);
    })?;
    ctx.metrics.stage_duration(manifest_ms);
    info!(job_id = %job_id, stage = "manifest", elapsed_ms = manifest_ms, "done");

    // Stage 6: the downstream push is out of scope (§1); the core advances
    // straight to DONE (§4.4 Stage 6).
    job = ctx.job_store.update_status(&job_id, JobStatus::Done, |_| {})?;
    ctx.metrics.job_completed();
    info!(job_id = %job_id, stage = "done", "job complete");

    Ok(job)
}
