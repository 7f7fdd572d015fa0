//! Configuration management
//!
//! Env-driven configuration for the engine host. Catalogs are code-level
//! registrations by collaborating subsystems, not configuration; only
//! infrastructure knobs live here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, the engine runs in-memory only)
    pub postgres_enabled: bool,
    /// Connection pool size
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug)
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// History page size when the caller does not specify one
    pub default_page_size: usize,
    /// Hard cap on requested history page sizes
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                postgres_url: String::new(),
                postgres_enabled: false,
                max_connections: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            ledger: LedgerConfig {
                default_page_size: 50,
                max_page_size: 500,
            },
        }
    }
}

impl EngineConfig {
    /// Load from environment, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("TRUST_LEDGER_POSTGRES_URL") {
            config.database.postgres_url = url;
            config.database.postgres_enabled = true;
        } else {
            warn!("TRUST_LEDGER_POSTGRES_URL not set, running without persistence");
        }

        if let Ok(enabled) = env::var("TRUST_LEDGER_POSTGRES_ENABLED") {
            config.database.postgres_enabled = enabled
                .parse()
                .context("TRUST_LEDGER_POSTGRES_ENABLED must be true or false")?;
        }

        if let Ok(max) = env::var("TRUST_LEDGER_MAX_CONNECTIONS") {
            config.database.max_connections = max
                .parse()
                .context("TRUST_LEDGER_MAX_CONNECTIONS must be an integer")?;
        }

        if let Ok(level) = env::var("TRUST_LEDGER_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(size) = env::var("TRUST_LEDGER_HISTORY_PAGE_SIZE") {
            config.ledger.default_page_size = size
                .parse()
                .context("TRUST_LEDGER_HISTORY_PAGE_SIZE must be an integer")?;
        }

        Ok(config)
    }
}
