//! The three auditors
//!
//! - **Realtime**: narrow check of a wallet's chain tail, cheap enough to
//!   run right after a mutation
//! - **Periodic**: per-wallet drift check anchored on the latest valid
//!   snapshot, replaying only the transactions appended since; falls back
//!   to a full chain replay when no usable snapshot exists
//! - **Global**: system-wallet equation, engagement coverage, a replay of
//!   each system wallet's transaction chain, and a periodic pass over
//!   every wallet
//!
//! Auditors only read the ledger. Every violation goes through the
//! finding store, which handles dedup; auditors never write findings
//! directly.

use crate::{
    config::{AuditConfig, SeverityThresholds},
    error::Result,
    findings::{Detection, FindingStore},
    snapshot::{AuditSnapshot, SnapshotStore},
    types::{AuditEntity, AuditResult, AuditType, Invariant, Severity},
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use wallet_core::types::{
    Currency, SystemTransaction, SystemWallet, TransactionNature, Wallet, WalletTransaction,
};

/// Classify a violation by the size of the difference relative to the
/// expected value. A zero or tiny expected value falls back to the
/// tolerance as denominator so the ratio stays meaningful.
pub fn classify_severity(
    expected: Decimal,
    difference: Decimal,
    tolerance: Decimal,
    thresholds: &SeverityThresholds,
) -> Severity {
    let denominator = expected.abs().max(tolerance);
    let relative = difference.abs() / denominator;

    if relative < thresholds.low {
        Severity::Low
    } else if relative < thresholds.medium {
        Severity::Medium
    } else if relative < thresholds.high {
        Severity::High
    } else {
        Severity::Critical
    }
}

/// Runs invariant checks against the ledger and records violations
pub struct Auditor {
    ledger: Arc<wallet_core::Storage>,
    findings: Arc<FindingStore>,
    snapshots: Arc<SnapshotStore>,
    config: AuditConfig,
}

impl Auditor {
    /// Create an auditor over the ledger and the audit stores
    pub fn new(
        ledger: Arc<wallet_core::Storage>,
        findings: Arc<FindingStore>,
        snapshots: Arc<SnapshotStore>,
        config: AuditConfig,
    ) -> Self {
        Self {
            ledger,
            findings,
            snapshots,
            config,
        }
    }

    /// Realtime audit: chain tail and stored balance for one wallet
    pub fn audit_wallet_realtime(&self, wallet_id: Uuid) -> Result<AuditResult> {
        let wallet = self.ledger.get_wallet(wallet_id)?;
        let mut result = AuditResult::default();

        if let Some(last) = self.ledger.last_wallet_transaction(wallet_id)? {
            self.check_transaction_arithmetic(AuditType::Realtime, &last, &mut result)?;

            // Stored balance must equal the chain tail's balance_after
            result.checks_performed += 1;
            let stored = wallet.balance(last.currency);
            if (stored - last.balance_after).abs() > self.config.tolerance {
                self.report(
                    AuditType::Realtime,
                    AuditEntity::Wallet(wallet_id),
                    Invariant::BalanceMismatch,
                    last.balance_after,
                    stored,
                    [("currency", last.currency.code().to_string())],
                    &mut result,
                )?;
            }
        }

        self.check_earned_withdrawn(AuditType::Realtime, &wallet, &mut result)?;

        Ok(result)
    }

    /// Periodic audit: drift since the latest valid snapshot, or a full
    /// chain replay when no usable snapshot exists
    pub fn audit_wallet_periodic(&self, wallet_id: Uuid) -> Result<AuditResult> {
        let wallet = self.ledger.get_wallet(wallet_id)?;
        let mut result = AuditResult::default();

        match self.snapshots.latest(wallet_id)? {
            Some(snapshot) => {
                result.checks_performed += 1;
                if snapshot.is_valid() {
                    self.replay_since_snapshot(&wallet, &snapshot, &mut result)?;
                } else {
                    // Checksum failure is tampering or corruption, always
                    // critical. The baseline cannot be trusted, so replay
                    // the whole chain instead.
                    let detection = Detection {
                        audit_type: AuditType::Periodic,
                        entity: AuditEntity::Wallet(wallet_id),
                        invariant: Invariant::SnapshotIntegrity,
                        expected: Decimal::ZERO,
                        actual: Decimal::ZERO,
                        severity: Severity::Critical,
                        metadata: HashMap::from([
                            ("snapshot_id".to_string(), snapshot.id.to_string()),
                            (
                                "snapshot_date".to_string(),
                                snapshot.snapshot_date.to_string(),
                            ),
                        ]),
                    };
                    result.anomalies.push(self.findings.record(detection)?);
                    self.replay_full_chain(&wallet, &mut result)?;
                }
            }
            None => self.replay_full_chain(&wallet, &mut result)?,
        }

        self.check_earned_withdrawn(AuditType::Periodic, &wallet, &mut result)?;

        Ok(result)
    }

    /// Replay only the transactions appended since `snapshot`, using the
    /// snapshot balances as the trusted baseline
    fn replay_since_snapshot(
        &self,
        wallet: &Wallet,
        snapshot: &AuditSnapshot,
        result: &mut AuditResult,
    ) -> Result<()> {
        // Transactions appended after capture carry seq >= the chain
        // length recorded in the snapshot
        let since = self
            .ledger
            .wallet_transactions_from(wallet.id, snapshot.transaction_count)?;

        // The chain is append-only, so it can never be shorter than it was
        // at snapshot time
        result.checks_performed += 1;
        let current_count = self.ledger.wallet_transaction_count(wallet.id)?;
        if current_count < snapshot.transaction_count {
            self.report(
                AuditType::Periodic,
                AuditEntity::Wallet(wallet.id),
                Invariant::ChainBroken,
                Decimal::from(snapshot.transaction_count),
                Decimal::from(current_count),
                [("snapshot_date", snapshot.snapshot_date.to_string())],
                result,
            )?;
        }

        let mut derived = snapshot.balances.clone();
        let mut tail = snapshot.balances.clone();

        for txn in &since {
            self.check_transaction_arithmetic(AuditType::Periodic, txn, result)?;

            // The first post-snapshot link in each currency must continue
            // from the snapshot balance; later ones from their predecessor
            result.checks_performed += 1;
            let prev_after = tail.get(&txn.currency).copied().unwrap_or(Decimal::ZERO);
            if txn.balance_before != prev_after {
                self.report(
                    AuditType::Periodic,
                    AuditEntity::Transaction(txn.id),
                    Invariant::ChainBroken,
                    prev_after,
                    txn.balance_before,
                    [
                        ("wallet_id", wallet.id.to_string()),
                        ("seq", txn.seq.to_string()),
                        ("currency", txn.currency.code().to_string()),
                    ],
                    result,
                )?;
            }
            tail.insert(txn.currency, txn.balance_after);

            let entry = derived.entry(txn.currency).or_insert(Decimal::ZERO);
            *entry = txn.flow.apply(*entry, txn.amount);
        }

        self.check_derived_balances(&derived, wallet, result)
    }

    /// Replay a wallet's whole transaction chain from zero
    fn replay_full_chain(&self, wallet: &Wallet, result: &mut AuditResult) -> Result<()> {
        let transactions = self.ledger.wallet_transactions(wallet.id)?;

        // Per-currency replay of the whole chain
        let mut derived: HashMap<Currency, Decimal> = HashMap::new();
        let mut tail: HashMap<Currency, &WalletTransaction> = HashMap::new();

        for txn in &transactions {
            self.check_transaction_arithmetic(AuditType::Periodic, txn, result)?;

            // Chain link: before must equal the previous after in the
            // same currency
            result.checks_performed += 1;
            if let Some(prev) = tail.get(&txn.currency) {
                if txn.balance_before != prev.balance_after {
                    self.report(
                        AuditType::Periodic,
                        AuditEntity::Transaction(txn.id),
                        Invariant::ChainBroken,
                        prev.balance_after,
                        txn.balance_before,
                        [
                            ("wallet_id", wallet.id.to_string()),
                            ("seq", txn.seq.to_string()),
                            ("currency", txn.currency.code().to_string()),
                        ],
                        result,
                    )?;
                }
            }
            tail.insert(txn.currency, txn);

            let entry = derived.entry(txn.currency).or_insert(Decimal::ZERO);
            *entry = txn.flow.apply(*entry, txn.amount);
        }

        self.check_derived_balances(&derived, wallet, result)
    }

    /// Derived balance vs stored balance, per currency
    fn check_derived_balances(
        &self,
        derived: &HashMap<Currency, Decimal>,
        wallet: &Wallet,
        result: &mut AuditResult,
    ) -> Result<()> {
        for (currency, derived_balance) in derived {
            result.checks_performed += 1;
            let stored = wallet.balance(*currency);
            if (stored - derived_balance).abs() > self.config.tolerance {
                self.report(
                    AuditType::Periodic,
                    AuditEntity::Wallet(wallet.id),
                    Invariant::BalanceMismatch,
                    *derived_balance,
                    stored,
                    [("currency", currency.code().to_string())],
                    result,
                )?;
            }
        }
        Ok(())
    }

    /// Global audit: system equation, engagement coverage, and a periodic
    /// pass over every wallet
    pub fn audit_global(&self) -> Result<AuditResult> {
        let mut result = AuditResult::default();

        let wallets = self.ledger.iter_wallets()?;
        let mut user_total = Decimal::ZERO;
        for wallet in &wallets {
            for balance in wallet.balances.values() {
                user_total += *balance;
            }
            result.merge(self.audit_wallet_periodic(wallet.id)?);
        }

        for system in self.ledger.iter_system_wallets()? {
            // merchant = engagement + profit
            result.checks_performed += 1;
            let expected = system.user_engagement + system.platform_profit;
            if (system.merchant_balance - expected).abs() > self.config.tolerance {
                self.report(
                    AuditType::Global,
                    AuditEntity::SystemWallet(system.id),
                    Invariant::SystemEquation,
                    expected,
                    system.merchant_balance,
                    [
                        ("user_engagement", system.user_engagement.to_string()),
                        ("platform_profit", system.platform_profit.to_string()),
                    ],
                    &mut result,
                )?;
            }

            // The engagement bucket must track what the user wallets
            // collectively hold
            result.checks_performed += 1;
            if (user_total - system.user_engagement).abs() > self.config.tolerance {
                self.report(
                    AuditType::Global,
                    AuditEntity::SystemWallet(system.id),
                    Invariant::EngagementCoverage,
                    user_total,
                    system.user_engagement,
                    [("user_wallets", wallets.len().to_string())],
                    &mut result,
                )?;
            }

            self.audit_system_chain(&system, &mut result)?;
        }

        tracing::info!(
            checks = result.checks_performed,
            anomalies = result.anomalies.len(),
            wallets = wallets.len(),
            "Global audit complete"
        );

        Ok(result)
    }

    /// Replay one system wallet's transaction chain: per-movement delta
    /// rules, chain links across all three buckets, and the folded deltas
    /// against the stored row
    fn audit_system_chain(
        &self,
        system: &SystemWallet,
        result: &mut AuditResult,
    ) -> Result<()> {
        let transactions = self.ledger.system_transactions(system.id)?;

        let mut derived_merchant = Decimal::ZERO;
        let mut derived_engagement = Decimal::ZERO;
        let mut derived_profit = Decimal::ZERO;
        let mut prev: Option<&SystemTransaction> = None;

        for txn in &transactions {
            let merchant_delta = txn.merchant_after - txn.merchant_before;
            let engagement_delta = txn.engagement_after - txn.engagement_before;
            let profit_delta = txn.profit_after - txn.profit_before;

            // External movements change the merchant balance by exactly
            // the signed amount; internal ones leave it untouched
            result.checks_performed += 1;
            let expected_merchant_delta = match txn.nature {
                TransactionNature::External => txn.flow.signed(txn.amount),
                TransactionNature::Internal => Decimal::ZERO,
            };
            if merchant_delta != expected_merchant_delta {
                self.report(
                    AuditType::Global,
                    AuditEntity::Transaction(txn.id),
                    Invariant::ChainBroken,
                    expected_merchant_delta,
                    merchant_delta,
                    [
                        ("system_id", system.id.to_string()),
                        ("seq", txn.seq.to_string()),
                    ],
                    result,
                )?;
            }

            // Every movement preserves merchant = engagement + profit
            result.checks_performed += 1;
            if merchant_delta != engagement_delta + profit_delta {
                self.report(
                    AuditType::Global,
                    AuditEntity::Transaction(txn.id),
                    Invariant::SystemEquation,
                    merchant_delta,
                    engagement_delta + profit_delta,
                    [
                        ("system_id", system.id.to_string()),
                        ("seq", txn.seq.to_string()),
                    ],
                    result,
                )?;
            }

            // Chain link across all three buckets
            result.checks_performed += 1;
            if let Some(p) = prev {
                if txn.merchant_before != p.merchant_after
                    || txn.engagement_before != p.engagement_after
                    || txn.profit_before != p.profit_after
                {
                    self.report(
                        AuditType::Global,
                        AuditEntity::Transaction(txn.id),
                        Invariant::ChainBroken,
                        p.merchant_after,
                        txn.merchant_before,
                        [
                            ("system_id", system.id.to_string()),
                            ("seq", txn.seq.to_string()),
                        ],
                        result,
                    )?;
                }
            }

            derived_merchant += merchant_delta;
            derived_engagement += engagement_delta;
            derived_profit += profit_delta;
            prev = Some(txn);
        }

        // Folded deltas vs the stored row, per bucket
        let buckets = [
            ("merchant_balance", derived_merchant, system.merchant_balance),
            ("user_engagement", derived_engagement, system.user_engagement),
            ("platform_profit", derived_profit, system.platform_profit),
        ];
        for (bucket, derived, stored) in buckets {
            result.checks_performed += 1;
            if (stored - derived).abs() > self.config.tolerance {
                self.report(
                    AuditType::Global,
                    AuditEntity::SystemWallet(system.id),
                    Invariant::BalanceMismatch,
                    derived,
                    stored,
                    [("bucket", bucket.to_string())],
                    result,
                )?;
            }
        }

        Ok(())
    }

    fn check_transaction_arithmetic(
        &self,
        audit_type: AuditType,
        txn: &WalletTransaction,
        result: &mut AuditResult,
    ) -> Result<()> {
        result.checks_performed += 1;
        if !txn.is_arithmetically_sound() {
            let expected = txn.flow.apply(txn.balance_before, txn.amount);
            self.report(
                audit_type,
                AuditEntity::Transaction(txn.id),
                Invariant::ChainBroken,
                expected,
                txn.balance_after,
                [
                    ("wallet_id", txn.wallet_id.to_string()),
                    ("seq", txn.seq.to_string()),
                ],
                result,
            )?;
        }
        Ok(())
    }

    fn check_earned_withdrawn(
        &self,
        audit_type: AuditType,
        wallet: &Wallet,
        result: &mut AuditResult,
    ) -> Result<()> {
        // balance == total_earned - total_withdrawn, per currency
        let mut currencies: Vec<Currency> = wallet
            .balances
            .keys()
            .chain(wallet.total_earned.keys())
            .chain(wallet.total_withdrawn.keys())
            .copied()
            .collect();
        currencies.sort_by_key(|c| c.code());
        currencies.dedup();

        for currency in currencies {
            result.checks_performed += 1;
            let expected = wallet.earned(currency) - wallet.withdrawn(currency);
            let stored = wallet.balance(currency);
            if (stored - expected).abs() > self.config.tolerance {
                self.report(
                    audit_type,
                    AuditEntity::Wallet(wallet.id),
                    Invariant::EarnedWithdrawnMismatch,
                    expected,
                    stored,
                    [("currency", currency.code().to_string())],
                    result,
                )?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn report<const N: usize>(
        &self,
        audit_type: AuditType,
        entity: AuditEntity,
        invariant: Invariant,
        expected: Decimal,
        actual: Decimal,
        metadata: [(&str, String); N],
        result: &mut AuditResult,
    ) -> Result<()> {
        let difference = actual - expected;
        let severity = classify_severity(
            expected,
            difference,
            self.config.tolerance,
            &self.config.severity,
        );
        let detection = Detection {
            audit_type,
            entity,
            invariant,
            expected,
            actual,
            severity,
            metadata: metadata
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        };
        result.anomalies.push(self.findings.record(detection)?);
        Ok(())
    }
}
