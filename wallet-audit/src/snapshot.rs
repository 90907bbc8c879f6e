//! Daily wallet snapshots
//!
//! One checksummed snapshot per wallet per calendar day. Snapshots anchor
//! the periodic auditor (drift since the last known-good state) and are
//! themselves integrity-checked: a snapshot whose checksum no longer
//! matches its contents is a tamper or corruption signal, not an
//! accounting mistake.

use crate::{
    error::{Error, Result},
    storage::AuditStorage,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use wallet_core::types::{Currency, Wallet};

/// A point-in-time record of one wallet's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSnapshot {
    /// Snapshot ID (UUIDv7)
    pub id: Uuid,

    /// The wallet this snapshot covers
    pub wallet_id: Uuid,

    /// Calendar day the snapshot belongs to
    pub snapshot_date: NaiveDate,

    /// Per-currency balances at capture time
    pub balances: HashMap<Currency, Decimal>,

    /// Chain length at capture time
    pub transaction_count: u64,

    /// Tail of the chain at capture time, if the chain is non-empty
    pub last_transaction_id: Option<Uuid>,

    /// SHA-256 over the canonical serialization of the fields above
    pub checksum: String,

    /// Capture timestamp
    pub created_at: DateTime<Utc>,
}

impl AuditSnapshot {
    /// Capture a snapshot of `wallet` for `date`
    pub fn capture(
        wallet: &Wallet,
        date: NaiveDate,
        transaction_count: u64,
        last_transaction_id: Option<Uuid>,
    ) -> Self {
        let mut snapshot = Self {
            id: Uuid::now_v7(),
            wallet_id: wallet.id,
            snapshot_date: date,
            balances: wallet.balances.clone(),
            transaction_count,
            last_transaction_id,
            checksum: String::new(),
            created_at: Utc::now(),
        };
        snapshot.checksum = snapshot.compute_checksum();
        snapshot
    }

    /// Recompute the checksum from current field values.
    ///
    /// Balances are folded in currency-code order so the digest does not
    /// depend on HashMap iteration order.
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.wallet_id.as_bytes());
        hasher.update(self.snapshot_date.to_string().as_bytes());

        let mut entries: Vec<_> = self.balances.iter().collect();
        entries.sort_by_key(|(currency, _)| currency.code());
        for (currency, balance) in entries {
            hasher.update(currency.code().as_bytes());
            hasher.update(balance.to_string().as_bytes());
        }

        hasher.update(self.transaction_count.to_be_bytes());
        if let Some(last) = self.last_transaction_id {
            hasher.update(last.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Whether the stored checksum still matches the contents
    pub fn is_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// Snapshot persistence and capture
pub struct SnapshotStore {
    storage: Arc<AuditStorage>,
    ledger: Arc<wallet_core::Storage>,
}

impl SnapshotStore {
    /// Create a store over the audit database and the ledger it observes
    pub fn new(storage: Arc<AuditStorage>, ledger: Arc<wallet_core::Storage>) -> Self {
        Self { storage, ledger }
    }

    /// Capture and persist today's snapshot for one wallet.
    ///
    /// Idempotent per (wallet, day): a re-run on the same day overwrites
    /// the earlier capture rather than accumulating duplicates.
    pub fn capture_wallet(&self, wallet_id: Uuid, date: NaiveDate) -> Result<AuditSnapshot> {
        let wallet = self.ledger.get_wallet(wallet_id)?;
        let count = self.ledger.wallet_transaction_count(wallet_id)?;
        let last = self
            .ledger
            .last_wallet_transaction(wallet_id)?
            .map(|txn| txn.id);

        let snapshot = AuditSnapshot::capture(&wallet, date, count, last);
        self.storage.put_snapshot(&snapshot)?;

        tracing::debug!(
            wallet_id = %wallet_id,
            date = %date,
            transaction_count = count,
            "Captured wallet snapshot"
        );

        Ok(snapshot)
    }

    /// Capture today's snapshot for every wallet in the ledger.
    /// Returns the number of wallets captured.
    pub fn capture_all(&self, date: NaiveDate) -> Result<usize> {
        let wallets = self.ledger.iter_wallets()?;
        let total = wallets.len();
        for wallet in &wallets {
            self.capture_wallet(wallet.id, date)?;
        }

        tracing::info!(date = %date, wallets = total, "Snapshot sweep complete");
        Ok(total)
    }

    /// Snapshot for a specific (wallet, day)
    pub fn get(&self, wallet_id: Uuid, date: NaiveDate) -> Result<AuditSnapshot> {
        self.storage
            .get_snapshot(wallet_id, date)?
            .ok_or(Error::SnapshotNotFound(wallet_id))
    }

    /// Most recent snapshot for a wallet, if any
    pub fn latest(&self, wallet_id: Uuid) -> Result<Option<AuditSnapshot>> {
        self.storage.latest_snapshot(wallet_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_wallet() -> Wallet {
        let mut wallet = Wallet::new(Uuid::new_v4());
        wallet.balances.insert(Currency::USD, Decimal::new(10050, 2));
        wallet.balances.insert(Currency::EUR, Decimal::from(20));
        wallet
    }

    #[test]
    fn test_checksum_roundtrip() {
        let wallet = test_wallet();
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        let snapshot = AuditSnapshot::capture(&wallet, date, 12, Some(Uuid::new_v4()));
        assert!(snapshot.is_valid());
    }

    #[test]
    fn test_tampered_snapshot_fails_validation() {
        let wallet = test_wallet();
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        let mut snapshot = AuditSnapshot::capture(&wallet, date, 12, None);

        snapshot.balances.insert(Currency::USD, Decimal::from(999));
        assert!(!snapshot.is_valid());
    }

    #[test]
    fn test_checksum_independent_of_map_order() {
        let wallet = test_wallet();
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        let snapshot = AuditSnapshot::capture(&wallet, date, 3, None);

        // Rebuilding the map must not change the digest
        let mut clone = snapshot.clone();
        clone.balances = snapshot.balances.clone().into_iter().collect();
        assert_eq!(clone.compute_checksum(), snapshot.checksum);
    }

    #[test]
    fn test_empty_chain_snapshot() {
        let wallet = Wallet::new(Uuid::new_v4());
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let snapshot = AuditSnapshot::capture(&wallet, date, 0, None);
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.transaction_count, 0);
        assert!(snapshot.last_transaction_id.is_none());
    }
}
