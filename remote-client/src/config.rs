//! Client-side configuration, following the teacher's `client/src/config.rs`
//! `serde` + `toml` pattern, extended with the `server_url` the teacher
//! hardcoded as `http://localhost:8080` throughout `api_client.rs`.

use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    Ttl,
    Lru,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_cache_strategy")]
    pub cache_strategy: CacheStrategy,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_cache_lru_capacity")]
    pub cache_lru_capacity: usize,
    #[serde(default = "default_kernel_timeout_seconds")]
    pub kernel_attr_timeout_seconds: u64,
    #[serde(default = "default_kernel_timeout_seconds")]
    pub kernel_entry_timeout_seconds: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_cache_strategy() -> CacheStrategy {
    CacheStrategy::Ttl
}

fn default_cache_ttl_seconds() -> u64 {
    60
}

fn default_cache_lru_capacity() -> usize {
    1000
}

fn default_kernel_timeout_seconds() -> u64 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            cache_strategy: default_cache_strategy(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_lru_capacity: default_cache_lru_capacity(),
            kernel_attr_timeout_seconds: default_kernel_timeout_seconds(),
            kernel_entry_timeout_seconds: default_kernel_timeout_seconds(),
        }
    }
}

pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Config::default();
    }
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config file, using defaults");
            return Config::default();
        }
    };
    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
            Config::default()
        }
    }
}
