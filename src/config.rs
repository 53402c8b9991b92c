use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Background refresh interval in minutes, 0 disables it
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Categories ingested by the background refresher
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite:newsdesk.db?mode=rwc".to_string()
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://newsapi.org".to_string()
}

fn default_country() -> String {
    "us".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            country: default_country(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// Upper bound on concurrent per-item store lookups/inserts
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_page_size() -> u32 {
    10
}

fn default_max_page_size() -> u32 {
    100
}

fn default_concurrency() -> usize {
    8
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            database_url: default_database_url(),
            refresh_interval: default_refresh_interval(),
            categories: Vec::new(),
            identity_header: default_identity_header(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `NEWS_API_KEY` and `DATABASE_URL` on top of the file values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var("NEWS_API_KEY").ok(),
            std::env::var("DATABASE_URL").ok(),
        )
    }

    fn with_overrides(mut self, api_key: Option<String>, database_url: Option<String>) -> Self {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.upstream.api_key = key;
        }
        if let Some(url) = database_url.filter(|u| !u.is_empty()) {
            self.database_url = url;
        }
        self
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.cache.concurrency == 0 {
            anyhow::bail!("cache.concurrency must be at least 1");
        }
        if self.cache.default_page_size == 0 {
            anyhow::bail!("cache.default_page_size must be at least 1");
        }
        if self.cache.default_page_size > self.cache.max_page_size {
            anyhow::bail!("cache.default_page_size must not exceed cache.max_page_size");
        }
        Ok(())
    }
}
