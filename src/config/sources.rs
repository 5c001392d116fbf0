use super::models::Config;
use config::{ConfigError, Environment as EnvSource, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "IMAGEPIPE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/imagepipe.toml";
const ENV_PREFIX: &str = "IMAGEPIPE";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in struct `Default` impls)
/// 2. TOML file (if it exists)
/// 3. `.env` file (via dotenvy) populating process environment
/// 4. `IMAGEPIPE__SECTION__KEY` environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);
    Ok(config)
}

/// Secrets that are never read from the TOML file, only from the process
/// environment (§4.3 `webhook_secret`, object-store credentials).
fn load_secrets(config: &mut Config) {
    if let Ok(secret) = env::var("IMAGEPIPE_WEBHOOK_SECRET") {
        config.webhook.secret = Some(secret);
    }

    if let Ok(access_key) = env::var("AWS_ACCESS_KEY_ID") {
        config.storage.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("AWS_SECRET_ACCESS_KEY") {
        config.storage.secret_key = Some(secret_key);
    }
}

/// Load configuration from a specific path. Useful for testing with custom
/// config files, bypassing the `.env`/secrets carve-out.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("loading configuration from {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            path = %config_path.display(),
            "configuration file not found, using defaults and environment overrides"
        );
    }

    builder = builder.add_source(
        EnvSource::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_only_when_file_absent() {
        let dir = TempDir::new().unwrap();
        let config = load_from_sources(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.processor.poll_interval_ms, 5_000);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.toml");
        fs::write(
            &path,
            r#"
[server]
bind_addr = "127.0.0.1:9000"

[processor]
concurrency = 4
poll_interval_ms = 2000

[storage]
bucket = "imagepipe-prod"
region = "us-east-1"
"#,
        )
        .unwrap();

        let config = load_from_sources(path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.processor.concurrency, 4);
        assert_eq!(config.processor.poll_interval_ms, 2000);
        assert_eq!(config.storage.bucket.as_deref(), Some("imagepipe-prod"));
    }
}
