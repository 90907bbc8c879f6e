//! Configuration for the audit subsystem
//!
//! Backoff cap, severity thresholds, claim lease and job timeout are all
//! externally supplied policy, mirroring the ledger's tolerance setting.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Audit subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Data directory for the audit RocksDB instance
    pub data_dir: PathBuf,

    /// Tolerance for value comparisons (currency units)
    pub tolerance: Decimal,

    /// Default attempt budget for enqueued jobs
    pub default_max_attempts: u32,

    /// Retry backoff base (seconds); delay is `base * 2^attempts`
    pub backoff_base_secs: u64,

    /// Retry backoff cap (seconds)
    pub backoff_cap_secs: u64,

    /// How far out an exhausted job is parked (seconds)
    pub exhausted_park_secs: u64,

    /// How long a worker's claim on a job is honored before it is
    /// considered abandoned (seconds)
    pub claim_lease_secs: u64,

    /// Per-job execution timeout for workers (seconds)
    pub job_timeout_secs: u64,

    /// Worker poll interval when the queue is idle (milliseconds)
    pub poll_interval_ms: u64,

    /// Interval between snapshot sweeps (seconds)
    pub snapshot_interval_secs: u64,

    /// Interval between scheduled per-wallet audits (seconds)
    pub periodic_audit_interval_secs: u64,

    /// Interval between full global audits (seconds)
    pub global_audit_interval_secs: u64,

    /// Severity thresholds as fractions of the expected value
    pub severity: SeverityThresholds,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/audit"),
            tolerance: Decimal::new(1, 2), // 0.01
            default_max_attempts: 3,
            backoff_base_secs: 60,
            backoff_cap_secs: 3600,
            exhausted_park_secs: 24 * 3600,
            claim_lease_secs: 300,
            job_timeout_secs: 120,
            poll_interval_ms: 1000,
            snapshot_interval_secs: 24 * 3600,
            periodic_audit_interval_secs: 6 * 3600,
            global_audit_interval_secs: 24 * 3600,
            severity: SeverityThresholds::default(),
        }
    }
}

/// Relative-difference buckets for severity classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityThresholds {
    /// Below this fraction: Low
    pub low: Decimal,
    /// Below this fraction: Medium
    pub medium: Decimal,
    /// Below this fraction: High; beyond: Critical
    pub high: Decimal,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: Decimal::new(1, 3),    // 0.1%
            medium: Decimal::new(1, 2), // 1%
            high: Decimal::new(5, 2),   // 5%
        }
    }
}

impl AuditConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AuditConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = AuditConfig::default();

        if let Ok(data_dir) = std::env::var("AUDIT_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(cap) = std::env::var("AUDIT_BACKOFF_CAP_SECS") {
            config.backoff_cap_secs = cap
                .parse()
                .map_err(|_| crate::Error::Config(format!("Bad backoff cap: {}", cap)))?;
        }

        if let Ok(tolerance) = std::env::var("AUDIT_TOLERANCE") {
            config.tolerance = tolerance
                .parse()
                .map_err(|_| crate::Error::Config(format!("Bad tolerance: {}", tolerance)))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuditConfig::default();
        assert_eq!(config.backoff_base_secs, 60);
        assert_eq!(config.backoff_cap_secs, 3600);
        assert_eq!(config.default_max_attempts, 3);
        assert!(config.severity.low < config.severity.medium);
        assert!(config.severity.medium < config.severity.high);
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let config = AuditConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: AuditConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.backoff_cap_secs, config.backoff_cap_secs);
        assert_eq!(parsed.severity.high, config.severity.high);
    }
}
