//! Runtime configuration, read from `SCANWATCH_*` environment variables

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/api/v3";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 32 * 1024 * 1024;
pub const DEFAULT_HISTORY_CAP: usize = 20;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Polling budget for one analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Everything the CLI needs to assemble an orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub poll: PollSettings,
    pub max_file_bytes: u64,
    pub history_cap: usize,
    pub cache_path: PathBuf,
    pub history_url: Option<String>,
    #[serde(skip_serializing)]
    pub history_key: Option<String>,
    pub http_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            poll: PollSettings::default(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            history_cap: DEFAULT_HISTORY_CAP,
            cache_path: default_cache_path(),
            history_url: None,
            history_key: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

fn default_cache_path() -> PathBuf {
    env::temp_dir().join("scanwatch").join("history.json")
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match non_empty(key) {
        Some(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("Ignoring invalid {}={:?}, using default", key, raw);
                default
            }
        },
        None => default,
    }
}

impl ScanConfig {
    /// Build from the environment, falling back to defaults per field
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_key = non_empty("SCANWATCH_API_KEY").or_else(|| non_empty("VT_API_KEY"));
        if let Some(ref key) = api_key {
            log::debug!("Engine API key present (len={})", key.len());
        }

        Self {
            base_url: non_empty("SCANWATCH_BASE_URL").unwrap_or(defaults.base_url),
            api_key,
            poll: PollSettings {
                interval_ms: parse_or("SCANWATCH_POLL_INTERVAL_MS", defaults.poll.interval_ms),
                max_attempts: parse_or("SCANWATCH_MAX_ATTEMPTS", defaults.poll.max_attempts)
                    .max(1),
            },
            max_file_bytes: parse_or("SCANWATCH_MAX_FILE_BYTES", defaults.max_file_bytes),
            history_cap: parse_or("SCANWATCH_HISTORY_CAP", defaults.history_cap).max(1),
            cache_path: non_empty("SCANWATCH_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_path),
            history_url: non_empty("SCANWATCH_HISTORY_URL"),
            history_key: non_empty("SCANWATCH_HISTORY_KEY"),
            http_timeout_secs: parse_or("SCANWATCH_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
