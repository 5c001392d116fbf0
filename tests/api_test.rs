//! Integration tests driving the axum `Router` directly via
//! `tower::ServiceExt::oneshot` (§10.4), covering the webhook + job-management
//! surface end to end rather than handler-by-handler in isolation.
//!
//! Scenario numbering follows the scenario list in §8: S1 happy path, S2
//! duplicate webhook, S4 payload-too-large, S6 production signature
//! enforcement.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbImage};
use sha2::Sha256;
use tower::ServiceExt;

use imagepipe::api::build_app;
use imagepipe::config::{
    AdmissionConfig, Config, Environment, ProcessorConfig, ProviderKind, ProvidersConfig,
    RetentionConfig, ServerConfig, StorageConfig, StorageProvider, TelemetryConfig, WebhookConfig,
};
use imagepipe::humanize::ByteSize;

/// Base config shared by every scenario: in-memory storage, mock providers, a
/// fresh job-store directory per test so fjall partitions never collide.
fn base_config() -> Config {
    let dir = tempfile::TempDir::new().unwrap();
    let job_store_path = dir.path().join("jobs");
    std::mem::forget(dir); // kept alive for the test process; tmp cleanup isn't this test's concern

    Config {
        server: ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            job_store_path,
            allowed_origins: Vec::new(),
        },
        processor: ProcessorConfig {
            poll_interval_ms: 20,
            concurrency: 2,
            max_retries: 3,
            retry_base_delay_ms: 60_000,
        },
        admission: AdmissionConfig {
            max_images_per_sku: 4,
            default_theme: "default".to_string(),
        },
        webhook: WebhookConfig {
            secret: None,
            max_bytes: ByteSize(10 * 1024 * 1024),
            signature_header: "x-source-signature".to_string(),
            allow_unsigned: true,
        },
        storage: StorageConfig {
            provider: StorageProvider::Memory,
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            presign_ttl_seconds: 3_600,
        },
        providers: ProvidersConfig {
            segmentation: ProviderKind::Mock,
            segmentation_endpoint: None,
            background: ProviderKind::Mock,
            background_endpoint: None,
            background_count: 1,
        },
        retention: RetentionConfig {
            job_ttl_days: 30,
            prune_interval_secs: 3_600,
        },
        telemetry: TelemetryConfig {
            environment: Environment::Development,
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            otlp_endpoint: None,
        },
    }
}

/// Spins up an embedded axum server on a random port serving a generated
/// valid PNG, grounded on the teacher's `tests/e2e.rs` embedded mock-server
/// idiom rather than adding a mock-HTTP-server dependency.
async fn start_mock_image_server() -> String {
    let image = RgbImage::from_pixel(32, 32, image::Rgb([200, 40, 40]));
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(image.as_raw(), 32, 32, image::ExtendedColorType::Rgb8)
        .unwrap();

    let junk = b"not an image".to_vec();

    let app = Router::new()
        .route("/image.png", get(move || {
            let png = png.clone();
            async move { axum::body::Bytes::from(png) }
        }))
        .route("/junk.bin", get(move || {
            let junk = junk.clone();
            async move { axum::body::Bytes::from(junk) }
        }));

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    format!("http://{addr}")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn webhook_request(body: &[u8], signature_header: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/source/images")
        .header("content-type", "application/json");
    if let Some((name, value)) = signature_header {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

fn webhook_payload(sku: &str, image_url: &str, sha256: &str) -> Vec<u8> {
    serde_json::json!({
        "sku": sku,
        "imageUrl": image_url,
        "sha256": sha256,
    })
    .to_string()
    .into_bytes()
}

/// S1: a webhook creates a job, and the processor drives it through every
/// stage to DONE.
#[tokio::test]
async fn s1_happy_path_reaches_done() {
    let mock = start_mock_image_server().await;
    let config = base_config();
    let components = build_app(config, true).await.unwrap();
    let app = components.app;

    let body = webhook_payload("SKU-S1", &format!("{mock}/image.png"), &"a".repeat(64));
    let response = app
        .clone()
        .oneshot(webhook_request(&body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let job_id = created["job_id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "created");

    let job = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/jobs/{job_id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let job = body_json(response).await;
            let status = job["status"].as_str().unwrap().to_string();
            if status == "DONE" || status == "FAILED" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state in time");

    assert_eq!(job["status"], "DONE", "job failed: {job:?}");
    assert!(job["artifacts"]["cutout_key"].is_string());
    assert!(job["artifacts"]["manifest_key"].is_string());

    components.processor.stop().await;
}

/// S2: a duplicate webhook for the same (sku, sha256, theme) returns the
/// existing job with status "duplicate" instead of creating a second row.
#[tokio::test]
async fn s2_duplicate_webhook_returns_existing_job() {
    let config = base_config();
    let components = build_app(config, false).await.unwrap();
    let app = components.app;

    let body = webhook_payload("SKU-S2", "http://example.invalid/a.jpg", &"b".repeat(64));

    let first = app.clone().oneshot(webhook_request(&body, None)).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first = body_json(first).await;

    let second = app.clone().oneshot(webhook_request(&body, None)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second = body_json(second).await;

    assert_eq!(second["status"], "duplicate");
    assert_eq!(second["job_id"], first["job_id"]);
}

/// S4: a webhook body exceeding the configured `webhook.max_bytes` is
/// rejected with 413 by the `DefaultBodyLimit` layer before the handler runs.
#[tokio::test]
async fn s4_oversized_webhook_body_is_413() {
    let mut config = base_config();
    config.webhook.max_bytes = ByteSize(16);
    let components = build_app(config, false).await.unwrap();
    let app = components.app;

    let body = webhook_payload("SKU-S4", "http://example.invalid/a.jpg", &"c".repeat(64));
    assert!(body.len() > 16);

    let response = app.oneshot(webhook_request(&body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

/// S6: in production, a missing or incorrect signature is rejected with 401;
/// a correct HMAC-SHA256 signature over the raw body is accepted with 201.
#[tokio::test]
async fn s6_production_requires_a_valid_signature() {
    let mut config = base_config();
    config.telemetry.environment = Environment::Production;
    config.webhook.secret = Some("top-secret".to_string());
    config.webhook.allow_unsigned = false;
    config.server.allowed_origins = vec!["https://admin.example.com".to_string()];

    let components = build_app(config, false).await.unwrap();
    let app = components.app;

    let body = webhook_payload("SKU-S6", "http://example.invalid/a.jpg", &"d".repeat(64));

    let unsigned = app.clone().oneshot(webhook_request(&body, None)).await.unwrap();
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .clone()
        .oneshot(webhook_request(&body, Some(("x-source-signature", "00"))))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let mut mac = Hmac::<Sha256>::new_from_slice(b"top-secret").unwrap();
    mac.update(&body);
    let signature = hex::encode(mac.finalize().into_bytes());

    let signed = app
        .clone()
        .oneshot(webhook_request(&body, Some(("x-source-signature", &signature))))
        .await
        .unwrap();
    assert_eq!(signed.status(), StatusCode::CREATED);
}

/// S5 (supplemental): a source image that fails to decode drives the job to
/// FAILED rather than panicking the processor.
#[tokio::test]
async fn s5_segmentation_failure_marks_job_failed() {
    let mock = start_mock_image_server().await;
    let config = base_config();
    let components = build_app(config, true).await.unwrap();
    let app = components.app;

    let body = webhook_payload("SKU-S5", &format!("{mock}/junk.bin"), &"e".repeat(64));
    let response = app.clone().oneshot(webhook_request(&body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();

    let job = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/jobs/{job_id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let job = body_json(response).await;
            let status = job["status"].as_str().unwrap().to_string();
            if status == "DONE" || status == "FAILED" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state in time");

    assert_eq!(job["status"], "FAILED");

    components.processor.stop().await;
}
