//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PIXSTASH_*)
//! 2. TOML config file (if PIXSTASH_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::codec::{EncodeFormat, EncodeOptions};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PIXSTASH_*)
/// 2. TOML config file (if PIXSTASH_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the disk tier.
    ///
    /// Set via PIXSTASH_CACHE_DIR environment variable.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via PIXSTASH_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per image.
    ///
    /// Set via PIXSTASH_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via PIXSTASH_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Format used when writing decoded images to disk.
    ///
    /// Set via PIXSTASH_ENCODE_FORMAT environment variable (png, jpeg, webp).
    #[serde(default)]
    pub encode_format: EncodeFormat,

    /// Encode quality, 1-100. Only lossy formats use it.
    ///
    /// Set via PIXSTASH_ENCODE_QUALITY environment variable.
    #[serde(default = "default_encode_quality")]
    pub encode_quality: u8,

    /// Maximum simultaneous network fetches; 0 means unbounded.
    ///
    /// Set via PIXSTASH_FETCH_CONCURRENCY environment variable.
    #[serde(default)]
    pub fetch_concurrency: usize,

    /// Let only one resolve per key run at a time.
    ///
    /// Set via PIXSTASH_COALESCE_REQUESTS environment variable.
    #[serde(default)]
    pub coalesce_requests: bool,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pixstash")
        .join("images")
}

fn default_user_agent() -> String {
    "pixstash/0.1".into()
}

fn default_max_bytes() -> usize {
    20 * 1024 * 1024 // 20MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_encode_quality() -> u8 {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            encode_format: EncodeFormat::default(),
            encode_quality: default_encode_quality(),
            fetch_concurrency: 0,
            coalesce_requests: false,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Encode options for the disk tier.
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions { format: self.encode_format, quality: self.encode_quality }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PIXSTASH_`
    /// 2. TOML file from `PIXSTASH_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// The layered provider stack used by [`AppConfig::load`].
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PIXSTASH_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("PIXSTASH_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Extract and validate a configuration from an arbitrary figment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::LoadFailed` on extraction errors and
    /// `ConfigError::Invalid` when validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
