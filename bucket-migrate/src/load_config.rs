/// `load_config` module: Loads a static YAML config, injects environment secrets, and maps it onto core options.
///
/// This module is the only place where untrusted YAML is parsed and mapped to strongly-typed structs.
///
/// # Responsibilities
/// - Parse the user-supplied YAML file into [`CliConfig`], filling defaults for omitted keys
/// - Inject environment variables for secrets (destination HMAC keys) and the cache URL override
/// - Produce clear diagnostics: any failure in loading must say which file and which step failed
///
/// # Environment
///
/// | Variable | Required | Description |
/// |---|---|---|
/// | `DEST_ACCESS_KEY_ID` | Yes | HMAC access key for the destination bucket |
/// | `DEST_SECRET_ACCESS_KEY` | Yes | HMAC secret for the destination bucket |
/// | `REDIS_URL` | No | Overrides `cache.url` |
///
/// Source credentials are resolved by the standard AWS chain (`AWS_ACCESS_KEY_ID`, profiles, ...).
///
/// # Errors
/// All errors in this module use `anyhow::Error` and are surfaced at the CLI boundary.
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use bucket_migrate_core::config::{MigrateOptions, DEFAULT_TTL};
use bucket_migrate_core::store::DEFAULT_NAMESPACE;
use serde::Deserialize;
use tracing::{error, info};

pub const DEFAULT_DESTINATION_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub source: SourceSection,
    pub destination: DestinationSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub transfer: TransferSection,
}

#[derive(Debug, Deserialize)]
pub struct SourceSection {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_source_region")]
    pub region: String,
    /// Custom S3 endpoint, e.g. for S3-compatible sources.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DestinationSection {
    pub bucket: String,
    #[serde(default = "default_destination_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_destination_region")]
    pub region: String,
    /// Base for public URLs and the summary; defaults to `{endpoint}/{bucket}`.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub make_public: bool,
}

impl DestinationSection {
    pub fn base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}/{}", self.endpoint.trim_end_matches('/'), self.bucket),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// A cache command without a reply after this long fails.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
            key_prefix: default_key_prefix(),
            ttl_secs: default_ttl_secs(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransferSection {
    #[serde(default)]
    pub force_update: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            force_update: false,
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            completion_timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_source_region() -> String {
    "us-west-2".into()
}
fn default_destination_endpoint() -> String {
    DEFAULT_DESTINATION_ENDPOINT.into()
}
fn default_destination_region() -> String {
    "auto".into()
}
fn default_cache_url() -> String {
    "redis://127.0.0.1:6379".into()
}
fn default_key_prefix() -> String {
    DEFAULT_NAMESPACE.into()
}
fn default_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}
fn default_response_timeout_ms() -> u64 {
    5000
}
fn default_concurrency() -> usize {
    1
}
fn default_max_attempts() -> u32 {
    1
}
fn default_retry_base_delay_ms() -> u64 {
    2000
}
fn default_completion_timeout_secs() -> u64 {
    300
}

impl CliConfig {
    pub fn migrate_options(&self) -> MigrateOptions {
        MigrateOptions {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            concurrency: self.transfer.concurrency.max(1),
            max_attempts: self.transfer.max_attempts.max(1),
            retry_base_delay: Duration::from_millis(self.transfer.retry_base_delay_ms),
            completion_timeout: Duration::from_secs(self.transfer.completion_timeout_secs),
            make_public: self.destination.make_public,
        }
    }
}

/// HMAC credentials for the destination bucket.
#[derive(Clone)]
pub struct DestinationCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for DestinationCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Reads the destination credentials from the environment.
pub fn destination_credentials_from_env() -> Result<DestinationCredentials> {
    let access_key_id = require_env("DEST_ACCESS_KEY_ID")?;
    let secret_access_key = require_env("DEST_SECRET_ACCESS_KEY")?;
    Ok(DestinationCredentials {
        access_key_id,
        secret_access_key,
    })
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => {
            error!(variable = name, "Missing required environment variable");
            Err(anyhow::anyhow!("Missing environment variable: {name}"))
        }
    }
}

/// Loads the YAML config file and applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Ok(url) = std::env::var("REDIS_URL") {
        if !url.is_empty() {
            info!("Cache URL taken from REDIS_URL");
            config.cache.url = url;
        }
    }

    validate(&config).with_context(|| format!("Invalid config file {path_ref:?}"))?;
    Ok(config)
}

fn validate(config: &CliConfig) -> Result<()> {
    anyhow::ensure!(!config.source.bucket.is_empty(), "source.bucket must not be empty");
    anyhow::ensure!(
        !config.destination.bucket.is_empty(),
        "destination.bucket must not be empty"
    );
    anyhow::ensure!(config.cache.ttl_secs > 0, "cache.ttl_secs must be positive");
    anyhow::ensure!(
        config.cache.response_timeout_ms > 0,
        "cache.response_timeout_ms must be positive"
    );
    anyhow::ensure!(
        config.transfer.completion_timeout_secs > 0,
        "transfer.completion_timeout_secs must be positive"
    );
    Ok(())
}
