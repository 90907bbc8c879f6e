//! Durable audit findings log
//!
//! Findings are deduplicated by fingerprint against OPEN entries only: while
//! a violation is pending or under investigation, re-detections bump
//! `last_seen_at` on the existing row instead of fanning out. Once a finding
//! reaches a terminal status its fingerprint is released, so a recurrence of
//! the same violation opens a fresh row.

use crate::{
    error::Result,
    storage::AuditStorage,
    types::{AuditEntity, AuditFinding, AuditType, FindingStatus, Invariant, Severity},
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// What an auditor hands over when it detects a violation
#[derive(Debug, Clone)]
pub struct Detection {
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
    /// Severity bucket
    pub severity: Severity,
    /// Structured context
    pub metadata: HashMap<String, String>,
}

/// Findings persistence with fingerprint dedup
pub struct FindingStore {
    storage: Arc<AuditStorage>,
}

impl FindingStore {
    /// Create a store over the audit database
    pub fn new(storage: Arc<AuditStorage>) -> Self {
        Self { storage }
    }

    /// Record a detection.
    ///
    /// If an open finding with the same fingerprint exists, its
    /// `last_seen_at` (and current values) are refreshed and it is
    /// returned; otherwise a new finding is inserted.
    pub fn record(&self, detection: Detection) -> Result<AuditFinding> {
        let difference = detection.actual - detection.expected;
        let fingerprint =
            AuditFinding::fingerprint_of(detection.invariant, &detection.entity, difference);

        if let Some(mut existing) = self.storage.open_finding_by_fingerprint(&fingerprint)? {
            existing.last_seen_at = Utc::now();
            existing.expected = detection.expected;
            existing.actual = detection.actual;
            existing.difference = difference;
            // A violation may worsen while open; never quietly downgrade
            existing.severity = existing.severity.max(detection.severity);
            self.storage.update_finding(&existing)?;

            tracing::debug!(
                finding_id = %existing.id,
                fingerprint = %fingerprint,
                "Re-detected open finding"
            );
            return Ok(existing);
        }

        let now = Utc::now();
        let finding = AuditFinding {
            id: Uuid::now_v7(),
            audit_type: detection.audit_type,
            entity: detection.entity,
            invariant: detection.invariant,
            expected: detection.expected,
            actual: detection.actual,
            difference,
            severity: detection.severity,
            status: FindingStatus::Pending,
            fingerprint,
            metadata: detection.metadata,
            detected_at: now,
            last_seen_at: now,
            resolved_at: None,
            resolved_by: None,
        };
        self.storage.insert_finding(&finding)?;

        tracing::warn!(
            finding_id = %finding.id,
            entity = %finding.entity,
            invariant = %finding.invariant,
            severity = ?finding.severity,
            expected = %finding.expected,
            actual = %finding.actual,
            "Recorded audit finding"
        );

        Ok(finding)
    }

    /// Move a finding to `Investigating`
    pub fn start_investigation(&self, finding_id: Uuid) -> Result<AuditFinding> {
        let mut finding = self.storage.get_finding(finding_id)?;
        if finding.status == FindingStatus::Pending {
            finding.status = FindingStatus::Investigating;
            self.storage.update_finding(&finding)?;
        }
        Ok(finding)
    }

    /// Resolve a finding.
    ///
    /// Idempotent: resolving an already-terminal finding returns it
    /// unchanged rather than erroring, so operator retries are safe.
    pub fn resolve(&self, finding_id: Uuid, resolved_by: Uuid) -> Result<AuditFinding> {
        let mut finding = self.storage.get_finding(finding_id)?;
        if finding.status.is_terminal() {
            return Ok(finding);
        }

        finding.status = FindingStatus::Resolved;
        finding.resolved_at = Some(Utc::now());
        finding.resolved_by = Some(resolved_by);
        self.storage.update_finding(&finding)?;

        tracing::info!(finding_id = %finding_id, resolved_by = %resolved_by, "Finding resolved");
        Ok(finding)
    }

    /// Mark a finding as a false positive. Idempotent like `resolve`.
    pub fn mark_false_positive(&self, finding_id: Uuid) -> Result<AuditFinding> {
        let mut finding = self.storage.get_finding(finding_id)?;
        if finding.status.is_terminal() {
            return Ok(finding);
        }

        finding.status = FindingStatus::FalsePositive;
        finding.resolved_at = Some(Utc::now());
        self.storage.update_finding(&finding)?;

        tracing::info!(finding_id = %finding_id, "Finding marked false positive");
        Ok(finding)
    }

    /// Get finding by ID
    pub fn get(&self, finding_id: Uuid) -> Result<AuditFinding> {
        self.storage.get_finding(finding_id)
    }

    /// All non-terminal findings, most severe first
    pub fn pending(&self) -> Result<Vec<AuditFinding>> {
        let mut open: Vec<_> = self
            .storage
            .iter_findings()?
            .into_iter()
            .filter(|f| !f.status.is_terminal())
            .collect();
        open.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.detected_at.cmp(&b.detected_at)));
        Ok(open)
    }

    /// Open critical findings only
    pub fn critical(&self) -> Result<Vec<AuditFinding>> {
        Ok(self
            .pending()?
            .into_iter()
            .filter(|f| f.severity == Severity::Critical)
            .collect())
    }

    /// Every finding ever recorded, terminal ones included
    pub fn all(&self) -> Result<Vec<AuditFinding>> {
        self.storage.iter_findings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (FindingStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(AuditStorage::open(temp_dir.path()).unwrap());
        (FindingStore::new(storage), temp_dir)
    }

    fn detection(entity: AuditEntity, expected: i64, actual: i64) -> Detection {
        Detection {
            audit_type: AuditType::Periodic,
            entity,
            invariant: Invariant::BalanceMismatch,
            expected: Decimal::from(expected),
            actual: Decimal::from(actual),
            severity: Severity::Medium,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_duplicate_detection_bumps_existing() {
        let (store, _temp) = test_store();
        let entity = AuditEntity::Wallet(Uuid::new_v4());

        let first = store.record(detection(entity, 100, 110)).unwrap();
        let second = store.record(detection(entity, 100, 110)).unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.last_seen_at >= first.last_seen_at);
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_recurrence_after_resolution_opens_new_finding() {
        let (store, _temp) = test_store();
        let entity = AuditEntity::Wallet(Uuid::new_v4());

        let first = store.record(detection(entity, 100, 110)).unwrap();
        store.resolve(first.id, Uuid::new_v4()).unwrap();

        let second = store.record(detection(entity, 100, 110)).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.all().unwrap().len(), 2);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let (store, _temp) = test_store();
        let entity = AuditEntity::Wallet(Uuid::new_v4());
        let finding = store.record(detection(entity, 100, 110)).unwrap();

        let operator = Uuid::new_v4();
        let resolved = store.resolve(finding.id, operator).unwrap();
        let again = store.resolve(finding.id, Uuid::new_v4()).unwrap();

        assert_eq!(resolved.status, FindingStatus::Resolved);
        // Second call must not overwrite who resolved it
        assert_eq!(again.resolved_by, Some(operator));
    }

    #[test]
    fn test_false_positive_excluded_from_pending() {
        let (store, _temp) = test_store();
        let entity = AuditEntity::Wallet(Uuid::new_v4());
        let finding = store.record(detection(entity, 100, 110)).unwrap();

        assert_eq!(store.pending().unwrap().len(), 1);
        store.mark_false_positive(finding.id).unwrap();
        assert!(store.pending().unwrap().is_empty());
        // Retained permanently
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_severity_never_downgrades_while_open() {
        let (store, _temp) = test_store();
        let entity = AuditEntity::Wallet(Uuid::new_v4());

        let mut hot = detection(entity, 100, 110);
        hot.severity = Severity::High;
        store.record(hot).unwrap();

        let mut cooled = detection(entity, 100, 110);
        cooled.severity = Severity::Low;
        let updated = store.record(cooled).unwrap();
        assert_eq!(updated.severity, Severity::High);
    }

    #[test]
    fn test_pending_sorted_most_severe_first() {
        let (store, _temp) = test_store();

        let mut low = detection(AuditEntity::Wallet(Uuid::new_v4()), 100, 101);
        low.severity = Severity::Low;
        store.record(low).unwrap();

        let mut critical = detection(AuditEntity::Wallet(Uuid::new_v4()), 100, 200);
        critical.severity = Severity::Critical;
        store.record(critical).unwrap();

        let pending = store.pending().unwrap();
        assert_eq!(pending[0].severity, Severity::Critical);
        assert_eq!(pending[1].severity, Severity::Low);

        let critical_only = store.critical().unwrap();
        assert_eq!(critical_only.len(), 1);
    }
}
