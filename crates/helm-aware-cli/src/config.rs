use std::path::{Path, PathBuf};
use std::time::Duration;

use helm_aware::BatchOptions;
use helm_aware::batch::{DEFAULT_CONCURRENCY, DEFAULT_ITEM_TIMEOUT, DEFAULT_OVERALL_TIMEOUT};
use helm_aware::cache::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RECORD_ID};
use helm_aware_repo::{DEFAULT_HTTP_TIMEOUT, DEFAULT_OCI_TIMEOUT};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Database file; defaults to `<cache_dir>/helm-aware/cache.db`.
    pub path: Option<PathBuf>,
    pub record: String,
    pub max_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            record: DEFAULT_RECORD_ID.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl CacheConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(default_cache_path)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub helm_binary: String,
    pub http_timeout_secs: u64,
    pub oci_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            helm_binary: "helm".into(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
            oci_timeout_secs: DEFAULT_OCI_TIMEOUT.as_secs(),
            user_agent: concat!("helm-aware/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl ResolverConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn oci_timeout(&self) -> Duration {
        Duration::from_secs(self.oci_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub item_timeout_secs: u64,
    pub overall_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            item_timeout_secs: DEFAULT_ITEM_TIMEOUT.as_secs(),
            overall_timeout_secs: DEFAULT_OVERALL_TIMEOUT.as_secs(),
        }
    }
}

impl BatchConfig {
    pub fn options(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.concurrency.clamp(1, Semaphore::MAX_PERMITS),
            item_timeout: Duration::from_secs(self.item_timeout_secs),
            overall_timeout: Duration::from_secs(self.overall_timeout_secs),
        }
    }
}

/// Config file path: `~/.config/helm-aware/config.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("helm-aware").join("config.toml"))
}

fn default_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("helm-aware").join("cache.db"))
}

/// Load config from `explicit` or the default location, falling back to
/// defaults if the file is missing or unparseable.
pub fn load_config(explicit: Option<&Path>) -> AppConfig {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => config_path(),
    };

    let Some(path) = path else {
        return AppConfig::default();
    };

    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) => {
            if explicit.is_some() {
                eprintln!(
                    "warning: could not read config at {}: {e}, using defaults",
                    path.display()
                );
            }
            return AppConfig::default();
        }
    };

    match toml::from_str::<AppConfig>(&contents) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "warning: failed to parse config at {}: {e}, using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}
