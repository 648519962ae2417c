//! Portal configuration: built-in defaults, then an optional `config.json` in
//! the platform config directory, then environment overrides.
//!
//! # Environment Variables
//!
//! - `PARCEL_PORTAL_API_URL` - Backend base URL (default: http://localhost:3000/)
//! - `PARCEL_PORTAL_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `PARCEL_PORTAL_STALE_SECS` - Default query stale time (default: 0)
//! - `PARCEL_PORTAL_GC_SECS` - Unused query retention (default: 300)
//! - `PARCEL_PORTAL_QUERY_RETRY` - Retries for failed queries (default: 3)
//! - `PARCEL_PORTAL_WAREHOUSES` - Path to a warehouse list replacing the bundled one

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::infra::QueryConfig;
use crate::util::persistence::project_dirs;

const DEFAULT_API_URL: &str = "http://localhost:3000/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GC_SECS: u64 = 5 * 60;
const DEFAULT_QUERY_RETRY: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Invalid config file {path}: {reason}")]
    InvalidFile { path: String, reason: String },
    #[error("Invalid API URL {0}: {1}")]
    InvalidUrl(String, url::ParseError),
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Backend base URL, validated and ending with `/` so relative joins keep its path.
    pub api_url: String,
    pub request_timeout: Duration,
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub query_retry: u32,
    pub warehouses_path: Option<PathBuf>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(DEFAULT_GC_SECS),
            query_retry: DEFAULT_QUERY_RETRY,
            warehouses_path: None,
        }
    }
}

/// Shape of `config.json`; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
struct FileConfig {
    api_url: Option<String>,
    timeout_secs: Option<u64>,
    stale_secs: Option<u64>,
    gc_secs: Option<u64>,
    query_retry: Option<u32>,
    warehouses: Option<PathBuf>,
}

impl PortalConfig {
    /// Load from the default config file (if any) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = config_file().filter(|path| path.exists()) {
            config.apply_file(&path)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidFile {
            path: path.display().to_string(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|err| invalid(err.to_string()))?;
        let file: FileConfig = serde_json::from_str(&raw).map_err(|err| invalid(err.to_string()))?;

        if let Some(url) = file.api_url {
            self.api_url = parse_base_url(&url)?.into();
        }
        if let Some(secs) = file.timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.stale_secs {
            self.stale_time = Duration::from_secs(secs);
        }
        if let Some(secs) = file.gc_secs {
            self.gc_time = Duration::from_secs(secs);
        }
        if let Some(retry) = file.query_retry {
            self.query_retry = retry;
        }
        if let Some(path) = file.warehouses {
            self.warehouses_path = Some(path);
        }
        Ok(())
    }

    /// Apply overrides from `lookup`, normally `std::env::var`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("PARCEL_PORTAL_API_URL") {
            self.api_url = parse_base_url(&url)?.into();
        }
        if let Some(secs) = get("PARCEL_PORTAL_TIMEOUT_SECS") {
            self.request_timeout = Duration::from_secs(parse_env("PARCEL_PORTAL_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("PARCEL_PORTAL_STALE_SECS") {
            self.stale_time = Duration::from_secs(parse_env("PARCEL_PORTAL_STALE_SECS", &secs)?);
        }
        if let Some(secs) = get("PARCEL_PORTAL_GC_SECS") {
            self.gc_time = Duration::from_secs(parse_env("PARCEL_PORTAL_GC_SECS", &secs)?);
        }
        if let Some(retry) = get("PARCEL_PORTAL_QUERY_RETRY") {
            self.query_retry = parse_env("PARCEL_PORTAL_QUERY_RETRY", &retry)?;
        }
        if let Some(path) = get("PARCEL_PORTAL_WAREHOUSES") {
            self.warehouses_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.api_url)
    }

    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            stale_time: self.stale_time,
            gc_time: self.gc_time,
            retry: self.query_retry,
            ..QueryConfig::default()
        }
    }
}

pub fn config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|e| ConfigError::InvalidUrl(raw.to_string(), e))
}
