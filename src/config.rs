//! Configuration for the authentication service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::store::{MemoryBackend, SqliteBackend, StoreBackend, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Session and credential store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Bcrypt work factor for newly set passwords.
    /// Existing hashes keep the cost they were created with.
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    /// Extra entries merged into the built-in password denylist,
    /// e.g. the shop name and its common misspellings.
    #[serde(default)]
    pub password_denylist: Vec<String>,

    /// Log level filter string.
    /// Set via config file or SFA_LOG_LEVEL env var. Overridden by RUST_LOG.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// SQLite database on disk
    Sqlite {
        /// Database file path, created on first use
        path: PathBuf,
    },

    /// In-memory store; everything is lost on restart. For local
    /// experimentation only.
    Memory,
}

// Default value functions for serde
fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_log_level() -> String {
    "storefront_auth=debug".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite {
            path: PathBuf::from("./storefront_auth.db"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            bcrypt_cost: default_bcrypt_cost(),
            password_denylist: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if std::env::var("SFA_MEMORY_STORE").map(|v| v == "true" || v == "1") == Ok(true) {
            config.store = StoreConfig::Memory;
        } else if let Ok(path) = std::env::var("SFA_DB_PATH") {
            config.store = StoreConfig::Sqlite {
                path: PathBuf::from(path),
            };
        }

        if let Ok(cost) = std::env::var("SFA_BCRYPT_COST") {
            if let Ok(parsed) = cost.parse() {
                config.bcrypt_cost = parsed;
            }
        }

        if let Ok(denylist) = std::env::var("SFA_PASSWORD_DENYLIST") {
            config.password_denylist = denylist
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }

        if let Ok(level) = std::env::var("SFA_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("SFA_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["storefront_auth.toml", "/etc/storefront_auth/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// Open the configured storage backend.
    pub fn open_backend(&self) -> Result<Arc<dyn StoreBackend>, StoreError> {
        match &self.store {
            StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteBackend::open(path)?)),
            StoreConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
