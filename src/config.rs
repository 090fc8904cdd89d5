//! Configuration types.
//!
//! Each section reads itself from `CREATIONS_*` environment variables and
//! falls back to its `Default` for anything unset.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Sweep and assembly tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Time between sweeps.
    pub sweep_interval: Duration,
    /// Download attempts per part before the slot is given up.
    pub download_attempts: u32,
    /// Fixed delay between download attempts.
    pub download_retry_delay: Duration,
    /// Wall-clock ceiling for a generating job, from dispatch. `None` disables.
    pub generation_timeout: Option<Duration>,
    /// Jobs handled concurrently within one sweep phase.
    pub max_concurrent_jobs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(15),
            download_attempts: 3,
            download_retry_delay: Duration::from_secs(2),
            generation_timeout: Some(Duration::from_secs(30 * 60)),
            max_concurrent_jobs: 8,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout_secs: u64 = env_or(
            "CREATIONS_GENERATION_TIMEOUT_SECS",
            defaults.generation_timeout.map_or(0, |d| d.as_secs()),
        )?;

        Ok(Self {
            sweep_interval: positive_secs(
                "CREATIONS_SWEEP_INTERVAL_SECS",
                env_or(
                    "CREATIONS_SWEEP_INTERVAL_SECS",
                    defaults.sweep_interval.as_secs(),
                )?,
            )?,
            download_attempts: env_or("CREATIONS_DOWNLOAD_ATTEMPTS", defaults.download_attempts)?
                .max(1),
            download_retry_delay: Duration::from_millis(env_or(
                "CREATIONS_DOWNLOAD_RETRY_DELAY_MS",
                defaults.download_retry_delay.as_millis() as u64,
            )?),
            generation_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            max_concurrent_jobs: env_or(
                "CREATIONS_MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
            )?
            .max(1),
        })
    }
}

/// Remote generation API settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: SecretString,
    /// Model used when a part doesn't name one.
    pub model: String,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    pub const DEFAULT_MODEL: &'static str = "veo3_fast";

    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.into()),
            model: Self::DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = required("CREATIONS_PROVIDER_URL")?;
        let api_key = required("CREATIONS_PROVIDER_API_KEY")?;
        let mut config = Self::new(base_url, api_key);
        if let Ok(model) = std::env::var("CREATIONS_PROVIDER_MODEL") {
            config.model = model;
        }
        config.request_timeout = Duration::from_secs(env_or(
            "CREATIONS_REQUEST_TIMEOUT_SECS",
            config.request_timeout.as_secs(),
        )?);
        Ok(config)
    }
}

/// HTTP server and storage locations.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Store assets as files here instead of in the database.
    pub asset_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/creations.db"),
            asset_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            port: env_or("CREATIONS_PORT", defaults.port)?,
            db_path: std::env::var("CREATIONS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            asset_dir: std::env::var("CREATIONS_ASSET_DIR").ok().map(PathBuf::from),
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
