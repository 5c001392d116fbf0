//! HTTP handlers for webhook ingress (§4.3, §6.1) and job management
//! (§6.2). Each handler is a thin translation layer: validation and
//! business rules live in `api::validation`, `job_store`, and
//! `state_machine`; handlers only parse the request, call into those, and
//! shape the response.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
};
use std::collections::HashMap;

use super::{
    error::ApiError,
    models::{
        FailJobRequest, HealthResponse, Job, JobAcceptedResponse, JobListFilter, JobStats,
        PresignQuery, WebhookPayload,
    },
    state::AppState,
    utils, validation,
};
use crate::job_store::CreateOutcome;
use crate::storage::keys;

/// `POST /webhooks/source/images` (§4.3, §6.1). Body size is capped by the
/// `DefaultBodyLimit` layer applied to this route in `server::run`, which
/// rejects with 413 before the handler ever runs (§8 property 6).
pub async fn ingest_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    utils::parse_content_type(content_type)?;

    verify_signature(&state, &headers, &body)?;

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(vec![format!("body: invalid JSON ({e})")]))?;

    validation::validate_payload(&payload).map_err(|errors| {
        ApiError::Validation(
            errors
                .iter()
                .map(|e| format!("{}: {}", e.field(), e))
                .collect(),
        )
    })?;

    let theme = state.config.admission.default_theme.clone();

    // Idempotency wins over admission: a webhook retry for a row that
    // already exists always returns it, even if the sku is at its limit
    // (§3 "Webhook retries return the existing job", §8 property 1).
    let outcome = state.job_store.create_job_checked(
        payload.sku.clone(),
        payload.image_url.clone(),
        payload.sha256.clone(),
        theme,
        state.config.admission.max_images_per_sku,
    )?;

    match outcome {
        CreateOutcome::Created(job) => {
            state.metrics.job_created();
            tracing::info!(job_id = %job.id, sku = %payload.sku, "job created");
            Ok((
                axum::http::StatusCode::CREATED,
                Json(JobAcceptedResponse {
                    job_id: job.id,
                    status: "created",
                }),
            ))
        }
        CreateOutcome::Existing(job) => {
            tracing::debug!(job_id = %job.id, sku = %payload.sku, "duplicate webhook, returning existing job");
            Ok((
                axum::http::StatusCode::OK,
                Json(JobAcceptedResponse {
                    job_id: job.id,
                    status: "duplicate",
                }),
            ))
        }
        CreateOutcome::LimitReached => Err(ApiError::RateLimited),
    }
}

/// Verifies `hex(HMAC-SHA256(secret, raw_body))` against the configured
/// signature header, honoring the production/development split of §4.3.
fn verify_signature(state: &AppState, headers: &HeaderMap, raw_body: &[u8]) -> Result<(), ApiError> {
    let config = &state.config;
    let header_name = &config.webhook.signature_header;

    if config.telemetry.environment.is_production() {
        let secret = config
            .webhook
            .secret
            .as_ref()
            .ok_or_else(|| ApiError::Misconfigured("webhook_secret is required in production".to_string()))?;

        let signature = headers
            .get(header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        if !validation::verify_signature(secret, raw_body, signature) {
            return Err(ApiError::Unauthorized);
        }
        return Ok(());
    }

    if config.webhook.allow_unsigned {
        return Ok(());
    }

    if let Some(secret) = &config.webhook.secret {
        let signature = headers
            .get(header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        if !validation::verify_signature(secret, raw_body, signature) {
            return Err(ApiError::Unauthorized);
        }
    }

    Ok(())
}

/// `GET /jobs` (§6.2).
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(filter): Query<JobListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.job_store.list_jobs(&filter)?;
    Ok(Json(jobs))
}

/// `GET /jobs/:id` (§6.2).
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .job_store
        .get_job(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;
    Ok(Json(job))
}

/// `POST /jobs/:id/retry` (§6.2) — requires terminal FAILED.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.job_store.retry_job(&id)?;
    Ok(Json(job))
}

/// `POST /jobs/:id/fail` (§6.2) — administrative fail; any non-terminal ->
/// FAILED.
pub async fn fail_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<FailJobRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or(FailJobRequest {
        code: crate::state_machine::ErrorKind::Unknown.code().to_string(),
        message: "failed by administrative action".to_string(),
    });

    let job = state
        .job_store
        .fail_job(&id, request.code, request.message, None)?;
    state.metrics.job_failed();
    Ok(Json(job))
}

/// `GET /jobs/:id/presign?type=...` (§6.2). Returns a presigned GET URL for
/// a named artifact; the key is derived from the job row (never taken
/// directly from the query) so this endpoint can't be used to presign
/// arbitrary store paths.
pub async fn presign_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PresignQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .job_store
        .get_job(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;

    let key = resolve_artifact_key(&job, &query)?;
    let ttl = std::time::Duration::from_secs(state.config.storage.presign_ttl_seconds);
    let url = state.storage.presign_get(&key, ttl).await?;

    Ok(Json(HashMap::from([("key", key), ("url", url)])))
}

fn resolve_artifact_key(job: &Job, query: &PresignQuery) -> Result<String, ApiError> {
    let missing = || ApiError::NotFound(format!("artifact {} not yet produced", query.artifact_type));

    match query.artifact_type.as_str() {
        "original" => job.artifacts.original_key.clone().ok_or_else(missing),
        "cutout" => job.artifacts.cutout_key.clone().ok_or_else(missing),
        "mask" => job.artifacts.mask_key.clone().ok_or_else(missing),
        "background" => {
            let variant = query
                .variant
                .ok_or_else(|| ApiError::Validation(vec!["variant is required for type=background".to_string()]))?;
            job.artifacts
                .background_keys
                .get(variant)
                .cloned()
                .ok_or_else(missing)
        }
        "composite" => {
            let variant = query
                .variant
                .ok_or_else(|| ApiError::Validation(vec!["variant is required for type=composite".to_string()]))?;
            job.artifacts
                .composite_keys
                .get(variant)
                .cloned()
                .ok_or_else(missing)
        }
        "derivative" => {
            let variant = query
                .variant
                .ok_or_else(|| ApiError::Validation(vec!["variant is required for type=derivative".to_string()]))?;
            let size = query
                .size
                .as_deref()
                .ok_or_else(|| ApiError::Validation(vec!["size is required for type=derivative".to_string()]))?;
            let format = query
                .format
                .as_deref()
                .ok_or_else(|| ApiError::Validation(vec!["format is required for type=derivative".to_string()]))?;
            let key = keys::derivative_key(&job.theme, &job.sku, &job.sha256, variant, size, format);
            if !job.artifacts.derivative_keys.contains(&key) {
                return Err(missing());
            }
            Ok(key)
        }
        "manifest" => job.artifacts.manifest_key.clone().ok_or_else(missing),
        other => Err(ApiError::Validation(vec![format!("unknown artifact type: {other}")])),
    }
}

/// `GET /jobs/stats` (§6.2, §4.2 `stats()`).
pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats: JobStats = state.job_store.stats()?;
    Ok(Json(stats))
}

/// `POST /processor/start` (§6.2).
pub async fn processor_start(State(state): State<AppState>) -> impl IntoResponse {
    state.processor.start().await;
    Json(state.processor.status().await)
}

/// `POST /processor/stop` (§6.2).
pub async fn processor_stop(State(state): State<AppState>) -> impl IntoResponse {
    state.processor.stop().await;
    Json(state.processor.status().await)
}

/// `GET /processor/status` (§6.2).
pub async fn processor_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.processor.status().await)
}

/// `GET /health` (§6.2), with a per-component breakdown (§11 "Health
/// endpoint component breakdown").
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();

    let job_store_healthy = state.job_store.stats().is_ok();
    components.insert(
        "job_store".to_string(),
        healthy_label(job_store_healthy).to_string(),
    );

    let object_store_healthy = state.storage.exists("__health_check__").await.is_ok();
    components.insert(
        "object_store".to_string(),
        healthy_label(object_store_healthy).to_string(),
    );

    let processor_status = state.processor.status().await;
    components.insert(
        "processor".to_string(),
        if processor_status.running { "healthy" } else { "stopped" }.to_string(),
    );

    let all_healthy = job_store_healthy && object_store_healthy;
    let overall_status = healthy_label(all_healthy);
    let status_code = if all_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

fn healthy_label(ok: bool) -> &'static str {
    if ok { "healthy" } else { "unhealthy" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_artifacts() -> Job {
        let mut job = Job::new(
            "SKU-1".to_string(),
            "a".repeat(64),
            "default".to_string(),
            "http://img/a.jpg".to_string(),
        );
        job.artifacts.original_key = Some("originals/SKU-1/aa.jpg".to_string());
        job.artifacts.background_keys = vec!["backgrounds/default/SKU-1/aa_0.jpg".to_string()];
        job.artifacts.derivative_keys =
            vec![keys::derivative_key("default", "SKU-1", &job.sha256, 0, "hero", "jpg")];
        job
    }

    #[test]
    fn resolves_original_key() {
        let job = job_with_artifacts();
        let query = PresignQuery {
            artifact_type: "original".to_string(),
            variant: None,
            size: None,
            format: None,
        };
        assert_eq!(
            resolve_artifact_key(&job, &query).unwrap(),
            "originals/SKU-1/aa.jpg"
        );
    }

    #[test]
    fn missing_variant_for_background_is_a_validation_error() {
        let job = job_with_artifacts();
        let query = PresignQuery {
            artifact_type: "background".to_string(),
            variant: None,
            size: None,
            format: None,
        };
        assert!(matches!(
            resolve_artifact_key(&job, &query),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn resolves_derivative_key_matching_produced_artifact() {
        let job = job_with_artifacts();
        let query = PresignQuery {
            artifact_type: "derivative".to_string(),
            variant: Some(0),
            size: Some("hero".to_string()),
            format: Some("jpg".to_string()),
        };
        assert!(resolve_artifact_key(&job, &query).is_ok());
    }

    #[test]
    fn rejects_derivative_key_never_produced() {
        let job = job_with_artifacts();
        let query = PresignQuery {
            artifact_type: "derivative".to_string(),
            variant: Some(0),
            size: Some("thumb".to_string()),
            format: Some("avif".to_string()),
        };
        assert!(matches!(
            resolve_artifact_key(&job, &query),
            Err(ApiError::NotFound(_))
        ));
    }
}
