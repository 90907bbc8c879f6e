//! Configuration for the wallet ledger
//!
//! Policy knobs (currency list, invariant tolerance) are supplied from
//! outside; nothing here is hardcoded business policy.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::Currency;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Currencies the ledger accepts
    pub currencies: Vec<Currency>,

    /// Tolerance for the three-way system equation (currency units)
    pub tolerance: Decimal,

    /// How many times to regenerate a colliding transaction reference
    /// before treating it as a bug
    pub reference_max_attempts: u32,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "wallet-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            currencies: vec![Currency::USD, Currency::XOF],
            tolerance: Decimal::new(1, 2), // 0.01
            reference_max_attempts: 8,
            rocksdb: RocksDbConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 128,
            max_write_buffer_number: 4,
            target_file_size_mb: 128,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("WALLET_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(currencies) = std::env::var("WALLET_CURRENCIES") {
            let parsed: Option<Vec<Currency>> = currencies
                .split(',')
                .map(|s| Currency::from_code(s.trim()))
                .collect();
            config.currencies = parsed
                .ok_or_else(|| crate::Error::Config(format!("Unknown currency in {}", currencies)))?;
        }

        if let Ok(tolerance) = std::env::var("WALLET_TOLERANCE") {
            config.tolerance = tolerance
                .parse()
                .map_err(|_| crate::Error::Config(format!("Bad tolerance: {}", tolerance)))?;
        }

        Ok(config)
    }
}
