//! Daemon configuration loaded from environment variables.
//!
//! Every setting has a default so the daemon starts with zero configuration
//! against a `./vault` directory.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use interbrain_core::{RetryPolicy, SyncConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding every node repository.
    /// Env: `VAULT_PATH`
    /// Default: `./vault`
    pub vault_path: PathBuf,

    /// Socket address of the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `127.0.0.1:8480`
    pub http_addr: SocketAddr,

    /// Registry database. `None` uses the platform data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Key file used to sign share links.
    /// Env: `IDENTITY_PATH`
    /// Default: `<vault>/.interbrain/identity.json`
    pub identity_path: PathBuf,

    /// Seconds between background sync previews (0 disables them).
    /// Env: `SYNC_INTERVAL_SECS`
    /// Default: `300`
    pub sync_interval: Duration,

    /// Env: `FETCH_TIMEOUT_SECS`
    /// Default: `60`
    pub fetch_timeout: Duration,

    /// Env: `MAX_PARALLEL_FETCHES`
    /// Default: `4`
    pub max_parallel_fetches: usize,

    /// Attempts per fetch, including the first.
    /// Env: `FETCH_RETRIES`
    /// Default: `3`
    pub fetch_retries: u32,

    /// Env: `GIT_BIN`
    pub git_bin: String,

    /// Env: `RAD_BIN`
    pub rad_bin: String,

    /// Bearer token required on every API route except `/health`.
    /// Env: `API_TOKEN`
    /// Default: empty (no authentication, loopback use only).
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let vault_path = PathBuf::from("./vault");
        Self {
            identity_path: vault_path.join(".interbrain").join("identity.json"),
            vault_path,
            http_addr: ([127, 0, 0, 1], 8480).into(),
            database_path: None,
            sync_interval: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(60),
            max_parallel_fetches: 4,
            fetch_retries: 3,
            git_bin: "git".to_string(),
            rad_bin: "rad".to_string(),
            api_token: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = var("VAULT_PATH") {
            config.vault_path = PathBuf::from(path);
            config.identity_path = config.vault_path.join(".interbrain").join("identity.json");
        }

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(path) = var("IDENTITY_PATH") {
            config.identity_path = PathBuf::from(path);
        }

        if let Some(secs) = var("SYNC_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            config.sync_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = var("FETCH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.fetch_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = var("MAX_PARALLEL_FETCHES").and_then(|v| v.parse::<usize>().ok()) {
            config.max_parallel_fetches = n.max(1);
        }

        if let Some(n) = var("FETCH_RETRIES").and_then(|v| v.parse::<u32>().ok()) {
            config.fetch_retries = n.max(1);
        }

        if let Some(bin) = var("GIT_BIN") {
            config.git_bin = bin;
        }

        if let Some(bin) = var("RAD_BIN") {
            config.rad_bin = bin;
        }

        if let Some(token) = var("API_TOKEN") {
            if !token.is_empty() {
                config.api_token = Some(token);
            }
        }

        config
    }

    pub fn sync_config(&self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            fetch_timeout: self.fetch_timeout,
            max_parallel_fetches: self.max_parallel_fetches,
            retry: RetryPolicy {
                attempts: self.fetch_retries,
                ..RetryPolicy::default()
            },
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 8480).into());
        assert!(config.api_token.is_none());
        assert_eq!(config.sync_config().max_parallel_fetches, 4);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("VAULT_PATH", "/data/vault"),
            ("HTTP_ADDR", "not an address"),
            ("FETCH_RETRIES", "5"),
            ("MAX_PARALLEL_FETCHES", "0"),
            ("API_TOKEN", ""),
        ]
        .into();
        let config = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.vault_path, PathBuf::from("/data/vault"));
        assert_eq!(config.identity_path, PathBuf::from("/data/vault/.interbrain/identity.json"));
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.sync_config().retry.attempts, 5);
        assert_eq!(config.max_parallel_fetches, 1);
        assert!(config.api_token.is_none());
    }
}
