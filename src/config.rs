// Engine configuration
//
// Resolution order: built-in defaults, then the optional TOML file, then
// MEDIAFETCH_* environment variables. `validate` runs last.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::downloader::controller::BackoffPolicy;
use crate::downloader::executor::ExecutorSettings;
use crate::downloader::store::StoreLimits;

pub const ENV_TOOL_PATH: &str = "MEDIAFETCH_TOOL_PATH";
pub const ENV_SCRATCH_DIR: &str = "MEDIAFETCH_SCRATCH_DIR";
pub const ENV_MAX_FILES: &str = "MEDIAFETCH_MAX_FILES";
pub const ENV_MAX_AGE_SECS: &str = "MEDIAFETCH_MAX_AGE_SECS";
pub const ENV_PROXY: &str = "MEDIAFETCH_PROXY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Raw file contents; every key is optional
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub tool_path: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub max_files: Option<usize>,
    pub max_age_secs: Option<u64>,
    pub info_timeout_secs: Option<u64>,
    pub audio_timeout_secs: Option<u64>,
    pub video_timeout_secs: Option<u64>,
    pub socket_timeout_secs: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub delivery_grace_ms: Option<u64>,
    pub proxy: Option<String>,
    pub max_title_len: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Extraction tool; auto-detected when `None`
    pub tool_path: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub max_files: usize,
    pub max_age_secs: u64,
    pub info_timeout_secs: u64,
    pub audio_timeout_secs: u64,
    pub video_timeout_secs: u64,
    pub socket_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub delivery_grace_ms: u64,
    pub proxy: Option<String>,
    pub max_title_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_path: None,
            scratch_dir: default_scratch_dir(),
            max_files: 50,
            max_age_secs: 3600,
            info_timeout_secs: 30,
            audio_timeout_secs: 300,
            video_timeout_secs: 900,
            socket_timeout_secs: 30,
            backoff_base_ms: 2000,
            backoff_max_ms: 10_000,
            delivery_grace_ms: 5000,
            proxy: None,
            max_title_len: 100,
        }
    }
}

fn default_scratch_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mediafetch")
}

impl EngineConfig {
    /// Defaults, overridden by the file (if any) and then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.apply_file(FileConfig::load(path)?);
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_file(toml::from_str(content)?);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if file.tool_path.is_some() {
            self.tool_path = file.tool_path;
        }
        if let Some(v) = file.scratch_dir {
            self.scratch_dir = v;
        }
        if let Some(v) = file.max_files {
            self.max_files = v;
        }
        if let Some(v) = file.max_age_secs {
            self.max_age_secs = v;
        }
        if let Some(v) = file.info_timeout_secs {
            self.info_timeout_secs = v;
        }
        if let Some(v) = file.audio_timeout_secs {
            self.audio_timeout_secs = v;
        }
        if let Some(v) = file.video_timeout_secs {
            self.video_timeout_secs = v;
        }
        if let Some(v) = file.socket_timeout_secs {
            self.socket_timeout_secs = v;
        }
        if let Some(v) = file.backoff_base_ms {
            self.backoff_base_ms = v;
        }
        if let Some(v) = file.backoff_max_ms {
            self.backoff_max_ms = v;
        }
        if let Some(v) = file.delivery_grace_ms {
            self.delivery_grace_ms = v;
        }
        if file.proxy.is_some() {
            self.proxy = file.proxy;
        }
        if let Some(v) = file.max_title_len {
            self.max_title_len = v;
        }
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup(ENV_TOOL_PATH) {
            self.tool_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_SCRATCH_DIR) {
            self.scratch_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_MAX_FILES) {
            self.max_files = parse_number(ENV_MAX_FILES, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_AGE_SECS) {
            self.max_age_secs = parse_number(ENV_MAX_AGE_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_PROXY) {
            self.proxy = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::Invalid {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.max_files == 0 {
            return Err(invalid("max_files", "must be at least 1"));
        }
        for (key, value) in [
            ("max_age_secs", self.max_age_secs),
            ("info_timeout_secs", self.info_timeout_secs),
            ("audio_timeout_secs", self.audio_timeout_secs),
            ("video_timeout_secs", self.video_timeout_secs),
            ("socket_timeout_secs", self.socket_timeout_secs),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(invalid("backoff_max_ms", "must not be below backoff_base_ms"));
        }
        if self.max_title_len == 0 {
            return Err(invalid("max_title_len", "must be at least 1"));
        }
        Ok(())
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_files: self.max_files,
            max_age: Duration::from_secs(self.max_age_secs),
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            audio_timeout: Duration::from_secs(self.audio_timeout_secs),
            video_timeout: Duration::from_secs(self.video_timeout_secs),
            socket_timeout: Duration::from_secs(self.socket_timeout_secs),
            proxy: self.proxy.clone(),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn info_timeout(&self) -> Duration {
        Duration::from_secs(self.info_timeout_secs)
    }

    pub fn delivery_grace(&self) -> Duration {
        Duration::from_millis(self.delivery_grace_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("'{}' is not a number", value),
    })
}
