//! Wallet ledger audit subsystem
//!
//! Out-of-band consistency verification for the wallet ledger. The ledger
//! keeps writes fast and simple; this crate proves them right after the
//! fact.
//!
//! # Architecture
//!
//! - **Snapshots**: one checksummed record per wallet per day, anchoring
//!   drift detection and detecting tampering
//! - **Queue**: prioritized audit jobs with exponential-backoff retry and
//!   parking on exhaustion
//! - **Auditors**: realtime (chain tail), periodic (full chain replay),
//!   global (system equation and engagement coverage)
//! - **Findings**: durable anomaly log, deduplicated by fingerprint while
//!   open, resolvable by operators
//!
//! The audit subsystem reads the ledger through its storage handle and
//! never writes it; audit state lives in a separate database.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod auditor;
pub mod config;
pub mod engine;
pub mod error;
pub mod findings;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod worker;

// Re-exports
pub use auditor::Auditor;
pub use config::{AuditConfig, SeverityThresholds};
pub use engine::{AuditEngine, AuditRuntime};
pub use error::{Error, Result};
pub use findings::{Detection, FindingStore};
pub use queue::AuditQueue;
pub use scheduler::AuditScheduler;
pub use snapshot::{AuditSnapshot, SnapshotStore};
pub use storage::AuditStorage;
pub use types::{
    AuditEntity, AuditFinding, AuditJob, AuditResult, AuditType, FindingStatus, Invariant,
    Severity,
};
pub use worker::AuditWorker;
