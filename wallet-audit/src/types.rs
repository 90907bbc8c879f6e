//! Core types for the audit subsystem

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// The closed set of auditable entities
///
/// A tagged variant with a strongly-typed identifier, resolved by explicit
/// lookup — never a string pair resolved at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEntity {
    /// A per-user wallet
    Wallet(Uuid),
    /// A system wallet
    SystemWallet(Uuid),
    /// A single transaction
    Transaction(Uuid),
}

impl AuditEntity {
    /// Stable kind label (used in fingerprints and logs)
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEntity::Wallet(_) => "wallet",
            AuditEntity::SystemWallet(_) => "system_wallet",
            AuditEntity::Transaction(_) => "transaction",
        }
    }

    /// The entity's identifier
    pub fn id(&self) -> Uuid {
        match self {
            AuditEntity::Wallet(id)
            | AuditEntity::SystemWallet(id)
            | AuditEntity::Transaction(id) => *id,
        }
    }
}

impl fmt::Display for AuditEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Which auditor a job or finding belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditType {
    /// Narrow, cheap check right after a single wallet mutation
    Realtime,
    /// Scheduled per-wallet drift check against the last snapshot
    Periodic,
    /// Full-system sweep including the three-way equation
    Global,
}

/// Finding severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Relative difference below the low threshold
    Low,
    /// Relative difference below the medium threshold
    Medium,
    /// Relative difference below the high threshold
    High,
    /// Everything beyond, plus integrity failures
    Critical,
}

/// Finding lifecycle status
///
/// `Resolved` and `FalsePositive` are terminal; entries are excluded from
/// pending views but retained permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingStatus {
    /// Detected, nobody looked yet
    Pending,
    /// An operator is on it
    Investigating,
    /// Fixed or accepted (terminal)
    Resolved,
    /// Detection was wrong (terminal)
    FalsePositive,
}

impl FindingStatus {
    /// Terminal findings never reopen
    pub fn is_terminal(&self) -> bool {
        matches!(self, FindingStatus::Resolved | FindingStatus::FalsePositive)
    }
}

/// The closed set of rules an auditor can find broken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Invariant {
    /// Stored wallet balance differs from the ledger-derived balance
    BalanceMismatch,
    /// A transaction's balance_before does not match its predecessor's
    /// balance_after
    ChainBroken,
    /// `balance != total_earned - total_withdrawn` for a currency
    EarnedWithdrawnMismatch,
    /// `merchant_balance != user_engagement + platform_profit`
    SystemEquation,
    /// `user_engagement` does not cover the sum of user wallet balances
    EngagementCoverage,
    /// A snapshot's checksum no longer matches its contents
    /// (tamper/corruption, not an accounting mistake)
    SnapshotIntegrity,
}

impl Invariant {
    /// Stable rule name (used in fingerprints and operator views)
    pub fn name(&self) -> &'static str {
        match self {
            Invariant::BalanceMismatch => "balance_mismatch",
            Invariant::ChainBroken => "chain_broken",
            Invariant::EarnedWithdrawnMismatch => "earned_withdrawn_mismatch",
            Invariant::SystemEquation => "system_equation",
            Invariant::EngagementCoverage => "engagement_coverage",
            Invariant::SnapshotIntegrity => "snapshot_integrity",
        }
    }
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A durable audit finding
///
/// Created by an auditor as one atomic insert; only the status (and its
/// resolution fields) ever change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditFinding {
    /// Finding ID (UUIDv7)
    pub id: Uuid,

    /// Which auditor detected it
    pub audit_type: AuditType,

    /// What was audited
    pub entity: AuditEntity,

    /// The rule that was broken
    pub invariant: Invariant,

    /// Value recomputed from the ledger
    pub expected: Decimal,

    /// Value actually stored
    pub actual: Decimal,

    /// `actual - expected`
    pub difference: Decimal,

    /// Severity bucket
    pub severity: Severity,

    /// Lifecycle status
    pub status: FindingStatus,

    /// Stable identity hash of the violation, used for dedup
    pub fingerprint: String,

    /// Free-form structured context
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// First detection time
    pub detected_at: DateTime<Utc>,

    /// Most recent re-detection of the same open violation
    pub last_seen_at: DateTime<Utc>,

    /// When the finding reached a terminal status
    pub resolved_at: Option<DateTime<Utc>>,

    /// Who resolved it (not set for false positives)
    pub resolved_by: Option<Uuid>,
}

impl AuditFinding {
    /// Compute the stable fingerprint of a violation's identity.
    ///
    /// The difference is bucketed (rounded to whole currency units) so a
    /// slowly drifting value does not fan out into many rows while the
    /// underlying issue is still the same.
    pub fn fingerprint_of(
        invariant: Invariant,
        entity: &AuditEntity,
        difference: Decimal,
    ) -> String {
        let bucket = difference.abs().round();
        let mut hasher = blake3::Hasher::new();
        hasher.update(invariant.name().as_bytes());
        hasher.update(entity.kind().as_bytes());
        hasher.update(entity.id().as_bytes());
        hasher.update(bucket.to_string().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Result of one auditor run
#[derive(Debug, Clone, Default)]
pub struct AuditResult {
    /// Number of individual checks performed
    pub checks_performed: u64,

    /// Findings recorded during the run
    pub anomalies: Vec<AuditFinding>,
}

impl AuditResult {
    /// Whether the run found nothing wrong
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: AuditResult) {
        self.checks_performed += other.checks_performed;
        self.anomalies.extend(other.anomalies);
    }
}

/// A queued audit job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditJob {
    /// Job ID (UUIDv7)
    pub id: Uuid,

    /// Logical queue the job belongs to
    pub queue_name: String,

    /// What to audit
    pub entity: AuditEntity,

    /// Which auditor should run
    pub audit_type: AuditType,

    /// Priority, 1 = highest
    pub priority: u8,

    /// Failed attempts so far
    pub attempts: u32,

    /// Attempt budget before the job is parked for triage
    pub max_attempts: u32,

    /// Earliest time the job may run
    pub scheduled_at: DateTime<Utc>,

    /// Worker currently holding the claim, if any
    pub claimed_by: Option<Uuid>,

    /// When the claim was taken (leases expire)
    pub claimed_at: Option<DateTime<Utc>>,

    /// Last failure message, for triage
    pub last_error: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl AuditJob {
    /// Whether the job is runnable at `now`, ignoring claims
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now && self.attempts < self.max_attempts
    }

    /// Whether the attempt budget is spent
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
