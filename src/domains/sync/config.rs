use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{ServiceError, ServiceResult};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_TRANSPORT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_ENDPOINT_PATH: &str = "/api/sync/mutations";

/// Runtime settings for the sync queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncQueueConfig {
    /// Attempts per item before it is reported as failed
    pub max_retries: u32,
    /// Period of the background flush trigger
    pub flush_interval_secs: u64,
    /// Upper bound on a single transport call
    pub transport_timeout_secs: u64,
    pub compression_enabled: bool,
    pub api_base_url: String,
    pub endpoint_path: String,
    pub api_token: Option<String>,
    /// Initial connectivity assumption until the host reports otherwise
    pub start_online: bool,
}

impl Default for SyncQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            transport_timeout_secs: DEFAULT_TRANSPORT_TIMEOUT_SECS,
            compression_enabled: true,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            api_token: None,
            start_online: true,
        }
    }
}

impl SyncQueueConfig {
    /// Defaults, overlaid with `SYNC_*` variables from the environment or a `.env` file.
    pub fn from_env() -> ServiceResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> ServiceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            max_retries: parse_var(&lookup, "SYNC_MAX_RETRIES", defaults.max_retries)?,
            flush_interval_secs: parse_var(&lookup, "SYNC_FLUSH_INTERVAL_SECS", defaults.flush_interval_secs)?,
            transport_timeout_secs: parse_var(&lookup, "SYNC_TRANSPORT_TIMEOUT_SECS", defaults.transport_timeout_secs)?,
            compression_enabled: parse_var(&lookup, "SYNC_COMPRESSION_ENABLED", defaults.compression_enabled)?,
            api_base_url: lookup("SYNC_API_BASE_URL").unwrap_or(defaults.api_base_url),
            endpoint_path: lookup("SYNC_ENDPOINT_PATH").unwrap_or(defaults.endpoint_path),
            api_token: lookup("SYNC_API_TOKEN").filter(|t| !t.is_empty()),
            start_online: parse_var(&lookup, "SYNC_START_ONLINE", defaults.start_online)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.max_retries == 0 {
            return Err(ServiceError::Configuration("max_retries must be at least 1".to_string()));
        }
        if self.flush_interval_secs == 0 {
            return Err(ServiceError::Configuration("flush_interval_secs must be positive".to_string()));
        }
        if self.transport_timeout_secs == 0 {
            return Err(ServiceError::Configuration("transport_timeout_secs must be positive".to_string()));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ServiceError::Configuration("api_base_url must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }

    pub fn endpoint_url(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        if self.endpoint_path.starts_with('/') {
            format!("{}{}", base, self.endpoint_path)
        } else {
            format!("{}/{}", base, self.endpoint_path)
        }
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> ServiceResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>()
            .map_err(|_| ServiceError::Configuration(format!("Invalid value for {}: {}", name, raw))),
        None => Ok(default),
    }
}
