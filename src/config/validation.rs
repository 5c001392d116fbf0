use super::models::{Config, Environment};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("object_store_bucket is required and was not configured")]
    MissingStorageBucket,

    #[error("object_store_region is required and was not configured")]
    MissingStorageRegion,

    #[error("webhook_secret is required in production")]
    MissingWebhookSecretInProduction,

    #[error("allowed_origins must be non-empty in production")]
    MissingAllowedOriginsInProduction,

    #[error("processor.concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("webhook.max_bytes must be positive")]
    InvalidWebhookMaxBytes,

    #[error("providers.segmentation_endpoint is required when providers.segmentation = \"http\"")]
    MissingSegmentationEndpoint,

    #[error("providers.background_endpoint is required when providers.background = \"http\"")]
    MissingBackgroundEndpoint,
}

/// Validates cross-field invariants the `Deserialize` impls can't express
/// (§4.8, §4.3, §6.4 "absence is fatal").
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_storage(config)?;
    validate_production_requirements(config)?;
    validate_processor(config)?;
    validate_providers(config)?;
    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.bucket.as_ref().is_none_or(|b| b.is_empty()) {
        return Err(ValidationError::MissingStorageBucket);
    }
    if config.storage.region.as_ref().is_none_or(|r| r.is_empty()) {
        return Err(ValidationError::MissingStorageRegion);
    }
    Ok(())
}

fn validate_production_requirements(config: &Config) -> Result<(), ValidationError> {
    if config.telemetry.environment != Environment::Production {
        return Ok(());
    }

    if config.webhook.secret.as_ref().is_none_or(|s| s.is_empty()) {
        return Err(ValidationError::MissingWebhookSecretInProduction);
    }

    if config.server.allowed_origins.is_empty() {
        return Err(ValidationError::MissingAllowedOriginsInProduction);
    }

    Ok(())
}

fn validate_processor(config: &Config) -> Result<(), ValidationError> {
    if config.processor.concurrency == 0 {
        return Err(ValidationError::InvalidConcurrency);
    }
    if config.webhook.max_bytes.as_u64() == 0 {
        return Err(ValidationError::InvalidWebhookMaxBytes);
    }
    Ok(())
}

/// A `ProviderKind::Http` selection names a vendor; it needs somewhere to
/// send the request (§9 "Wire the concrete implementation at process
/// startup via configuration").
fn validate_providers(config: &Config) -> Result<(), ValidationError> {
    use super::models::ProviderKind;

    if config.providers.segmentation == ProviderKind::Http
        && config
            .providers
            .segmentation_endpoint
            .as_ref()
            .is_none_or(|e| e.is_empty())
    {
        return Err(ValidationError::MissingSegmentationEndpoint);
    }

    if config.providers.background == ProviderKind::Http
        && config
            .providers
            .background_endpoint
            .as_ref()
            .is_none_or(|e| e.is_empty())
    {
        return Err(ValidationError::MissingBackgroundEndpoint);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{
        ProcessorConfig, ServerConfig, StorageConfig, TelemetryConfig, WebhookConfig,
    };

    fn base_config() -> Config {
        Config {
            server: ServerConfig::default(),
            processor: ProcessorConfig::default(),
            admission: Default::default(),
            webhook: WebhookConfig::default(),
            storage: StorageConfig {
                bucket: Some("imagepipe".into()),
                region: Some("us-east-1".into()),
                ..Default::default()
            },
            providers: Default::default(),
            retention: Default::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    #[test]
    fn missing_bucket_is_fatal() {
        let mut config = base_config();
        config.storage.bucket = None;
        assert_eq!(validate(&config), Err(ValidationError::MissingStorageBucket));
    }

    #[test]
    fn missing_region_is_fatal() {
        let mut config = base_config();
        config.storage.region = None;
        assert_eq!(validate(&config), Err(ValidationError::MissingStorageRegion));
    }

    #[test]
    fn development_allows_missing_secret() {
        let config = base_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn production_requires_secret_and_origins() {
        let mut config = base_config();
        config.telemetry.environment = Environment::Production;
        assert_eq!(
            validate(&config),
            Err(ValidationError::MissingWebhookSecretInProduction)
        );

        config.webhook.secret = Some("s3cr3t".into());
        assert_eq!(
            validate(&config),
            Err(ValidationError::MissingAllowedOriginsInProduction)
        );

        config.server.allowed_origins = vec!["https://shop.example".into()];
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let mut config = base_config();
        config.processor.concurrency = 0;
        assert_eq!(validate(&config), Err(ValidationError::InvalidConcurrency));
    }

    #[test]
    fn http_segmentation_requires_endpoint() {
        use crate::config::models::ProviderKind;
        let mut config = base_config();
        config.providers.segmentation = ProviderKind::Http;
        assert_eq!(
            validate(&config),
            Err(ValidationError::MissingSegmentationEndpoint)
        );
        config.providers.segmentation_endpoint = Some("https://vendor.example/segment".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn http_background_requires_endpoint() {
        use crate::config::models::ProviderKind;
        let mut config = base_config();
        config.providers.background = ProviderKind::Http;
        assert_eq!(
            validate(&config),
            Err(ValidationError::MissingBackgroundEndpoint)
        );
        config.providers.background_endpoint = Some("https://vendor.example/backgrounds".into());
        assert!(validate(&config).is_ok());
    }
}
