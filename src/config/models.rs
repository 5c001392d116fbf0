use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration (§6.4 "Configuration (recognized settings)").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP server and job-store binding.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_job_store_path")]
    pub job_store_path: PathBuf,
    /// CORS whitelist (§6.4 "allowed_origins"); required in production.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            job_store_path: default_job_store_path(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_job_store_path() -> PathBuf {
    PathBuf::from("data/jobs")
}

/// Scheduler tuning (§4.4, §6.4).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_concurrency() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    60_000
}

/// Admission control at ingress (§4.3, §6.4).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_max_images_per_sku")]
    pub max_images_per_sku: u32,
    #[serde(default = "default_theme")]
    pub default_theme: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_images_per_sku: default_max_images_per_sku(),
            default_theme: default_theme(),
        }
    }
}

fn default_max_images_per_sku() -> u32 {
    4
}

fn default_theme() -> String {
    "default".to_string()
}

/// Webhook ingress (§4.3, §6.4).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    /// HMAC secret. `None` means unconfigured; required in production.
    #[serde(skip)]
    pub secret: Option<String>,
    #[serde(default = "default_webhook_max_bytes")]
    pub max_bytes: ByteSize,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Outside production, skip signature verification even with no secret.
    #[serde(default)]
    pub allow_unsigned: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            max_bytes: default_webhook_max_bytes(),
            signature_header: default_signature_header(),
            allow_unsigned: false,
        }
    }
}

fn default_webhook_max_bytes() -> ByteSize {
    ByteSize(10 * 1024 * 1024)
}

fn default_signature_header() -> String {
    "x-source-signature".to_string()
}

/// Object store backend selector (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    Memory,
}

impl Default for StorageProvider {
    fn default() -> Self {
        StorageProvider::Memory
    }
}

/// Object store configuration. `bucket`/`region` are mandatory per §4.8 and
/// §6.4 ("absence is fatal") — they carry no default and are checked by
/// `config::validation`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// S3 access key (loaded from environment, never from the TOML file).
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, never from the TOML file).
    #[serde(skip)]
    pub secret_key: Option<String>,
    #[serde(default = "default_presign_ttl_seconds")]
    pub presign_ttl_seconds: u64,
}

fn default_presign_ttl_seconds() -> u64 {
    3_600
}

/// Provider selection for the two pluggable external collaborators (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mock,
    Http,
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::Mock
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub segmentation: ProviderKind,
    pub segmentation_endpoint: Option<String>,
    #[serde(default)]
    pub background: ProviderKind,
    pub background_endpoint: Option<String>,
    #[serde(default = "default_background_count")]
    pub background_count: usize,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            segmentation: ProviderKind::default(),
            segmentation_endpoint: None,
            background: ProviderKind::default(),
            background_endpoint: None,
            background_count: default_background_count(),
        }
    }
}

fn default_background_count() -> usize {
    2
}

/// Retention / pruning policy (§4.2 `pruneTerminal`, supplemented — §11).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_job_ttl_days")]
    pub job_ttl_days: u32,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl_days: default_job_ttl_days(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

fn default_job_ttl_days() -> u32 {
    30
}

fn default_prune_interval_secs() -> u64 {
    3_600
}

/// Deployment environment; gates signature enforcement and error-body
/// verbosity (§4.3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            metrics_addr: default_metrics_addr(),
            otlp_endpoint: None,
        }
    }
}

fn default_metrics_addr() -> SocketAddr {
    "0.0.0.0:9090".parse().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config {
            server: ServerConfig::default(),
            processor: ProcessorConfig::default(),
            admission: AdmissionConfig::default(),
            webhook: WebhookConfig::default(),
            storage: StorageConfig::default(),
            providers: ProvidersConfig::default(),
            retention: RetentionConfig::default(),
            telemetry: TelemetryConfig::default(),
        };

        assert_eq!(config.processor.poll_interval_ms, 5_000);
        assert_eq!(config.processor.concurrency, 1);
        assert_eq!(config.processor.max_retries, 3);
        assert_eq!(config.processor.retry_base_delay_ms, 60_000);
        assert_eq!(config.admission.max_images_per_sku, 4);
        assert_eq!(config.webhook.max_bytes.as_u64(), 10 * 1024 * 1024);
        assert_eq!(config.storage.presign_ttl_seconds, 3_600);
        assert_eq!(config.telemetry.environment, Environment::Development);
    }
}
