//! Service configuration loaded from environment variables

use crate::store::Backend;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the lookup service.
#[derive(Debug, Clone)]
pub struct Config {
    /// TTL for the in-memory result cache.
    pub cache_ttl: Duration,
    /// Path to the offline GeoLite2-ASN database.
    pub mmdb_path: PathBuf,
    /// API token for ipinfo.io; absent means the provider stays a stub.
    pub ipinfo_token: Option<String>,
    /// API key for ipdata.co; absent means the provider stays a stub.
    pub ipdata_api_key: Option<String>,
    /// Explicit provider priority ordering; empty keeps the default.
    pub enabled_providers: Vec<String>,
    /// Whether the persistent cache tier is enabled.
    pub persistent_cache: bool,
    /// Which persistent backend to use.
    pub persistent_cache_type: Backend,
    /// Connection string for the persistent backend.
    pub persistent_cache_dsn: String,
    /// TTL for persistent entries, independent of the memory-cache TTL.
    pub persistent_cache_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(6 * 3600),
            mmdb_path: PathBuf::from("data/GeoLite2-ASN.mmdb"),
            ipinfo_token: None,
            ipdata_api_key: None,
            enabled_providers: Vec::new(),
            persistent_cache: false,
            persistent_cache_type: Backend::Sqlite,
            persistent_cache_dsn: "data/ipintel-cache.db".to_string(),
            persistent_cache_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_ttl: Duration::from_secs(env_u64("CACHE_TTL_HOURS", 6).saturating_mul(3600)),
            mmdb_path: std::env::var("MMDB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.mmdb_path),
            ipinfo_token: env_nonempty("IPINFO_TOKEN"),
            ipdata_api_key: env_nonempty("IPDATA_API_KEY"),
            enabled_providers: env_nonempty("ENABLED_PROVIDERS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            persistent_cache: env_bool("PERSISTENT_CACHE"),
            persistent_cache_type: env_nonempty("PERSISTENT_CACHE_TYPE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.persistent_cache_type),
            persistent_cache_dsn: env_nonempty("PERSISTENT_CACHE_DSN")
                .unwrap_or(defaults.persistent_cache_dsn),
            persistent_cache_ttl: Duration::from_secs(
                env_u64("PERSISTENT_CACHE_TTL_DAYS", 7).saturating_mul(24 * 3600),
            ),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_nonempty(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str) -> bool {
    matches!(
        env_nonempty(key).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}
