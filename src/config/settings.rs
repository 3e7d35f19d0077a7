use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub beacon: BeaconSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Namespace prepended to every derived cache key
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
    /// Default TTL applied when a service configures no explicit TTL
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconSettings {
    /// Whether entity mutations publish beacon events
    #[serde(default)]
    pub enabled: bool,
    /// Whether notification creation hands off to push delivery
    #[serde(default)]
    pub push_enabled: bool,
}

fn default_cache_namespace() -> String {
    "database".to_string()
}

fn default_cache_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: default_cache_namespace(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for BeaconSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            push_enabled: false,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("cache.namespace", "database")?
            .set_default("cache.ttl_seconds", 86_400)?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("beacon.enabled", false)?
            .set_default("beacon.push_enabled", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // CACHE_NAMESPACE, CACHE_TTL_SECONDS, REDIS_URL, BEACON_ENABLED, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }
}
