//! Accounting engine
//!
//! Every balance mutation is a read-modify-write-append executed while the
//! wallet row's lock is held: the balance update and the matching
//! transaction row commit as one atomic storage batch. Mutations on
//! different wallets proceed fully in parallel; there is no global lock.
//!
//! Nothing inside the critical section performs network I/O. Notification
//! dispatch and audit triggering happen after commit, outside the lock.
//!
//! Failure semantics:
//! - `InsufficientFunds` is recoverable and caller-visible; no mutation and
//!   no transaction row are produced.
//! - `InsufficientSystemFunds` is fatal: a system deduction below zero
//!   signals an upstream bug or a real breach and aborts with no partial
//!   state.
//! - Reference collisions are retried internally and never surfaced.

use crate::{
    config::Config,
    error::{Error, Result},
    metrics::Metrics,
    storage::Storage,
    types::{
        BalanceSummary, Currency, Reference, SystemTransaction, SystemWallet, TransactionFlow,
        TransactionKind, TransactionNature, TransactionStatus, Wallet, WalletTransaction,
    },
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Accounting engine over the ledger store
pub struct AccountingEngine {
    /// Ledger storage
    storage: Arc<Storage>,

    /// Per-wallet mutation locks (user and system wallets share the map;
    /// ids are unique across both)
    locks: DashMap<Uuid, Arc<Mutex<()>>>,

    /// Configuration
    config: Config,

    /// Metrics
    metrics: Metrics,
}

impl AccountingEngine {
    /// Open the engine with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        Ok(Self::with_storage(storage, config))
    }

    /// Build the engine over existing storage
    pub fn with_storage(storage: Arc<Storage>, config: Config) -> Self {
        Self {
            storage,
            locks: DashMap::new(),
            config,
            metrics: Metrics::default(),
        }
    }

    /// Shared read access to the ledger store (auditors read through this)
    pub fn storage(&self) -> Arc<Storage> {
        self.storage.clone()
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Engine metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn wallet_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn check_amount(&self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }
        Ok(())
    }

    fn check_currency(&self, currency: Currency) -> Result<()> {
        if !self.config.currencies.contains(&currency) {
            return Err(Error::UnsupportedCurrency(currency));
        }
        Ok(())
    }

    /// Generate a reference that is not yet present in the store.
    /// Collisions are regenerated internally; exhausting the attempt budget
    /// is a bug signal, not a caller error.
    fn generate_unique_reference(&self) -> Result<Reference> {
        for _ in 0..self.config.reference_max_attempts {
            let reference = Reference::generate();
            if !self.storage.reference_exists(&reference)? {
                return Ok(reference);
            }
            tracing::warn!(reference = %reference, "Transaction reference collision, regenerating");
        }
        Err(Error::DuplicateReference(self.config.reference_max_attempts))
    }

    // Wallet provisioning

    /// Create and persist an empty wallet for an owner
    pub fn create_wallet(&self, owner_id: Uuid) -> Result<Wallet> {
        let wallet = Wallet::new(owner_id);
        self.storage.put_wallet(&wallet)?;
        tracing::info!(wallet_id = %wallet.id, owner_id = %owner_id, "Wallet created");
        Ok(wallet)
    }

    /// Create and persist a zeroed system wallet
    pub fn create_system_wallet(&self) -> Result<SystemWallet> {
        let system = SystemWallet::new();
        self.storage.put_system(&system)?;
        tracing::info!(system_id = %system.id, "System wallet created");
        Ok(system)
    }

    // Wallet operations

    /// Credit a wallet: balance and lifetime earnings both increase
    #[allow(clippy::too_many_arguments)]
    pub fn credit(
        &self,
        wallet_id: Uuid,
        amount: Decimal,
        currency: Currency,
        kind: TransactionKind,
        status: TransactionStatus,
        processed_by: Option<Uuid>,
        metadata: HashMap<String, String>,
    ) -> Result<WalletTransaction> {
        let txn = self.mutate_wallet(
            wallet_id,
            TransactionFlow::In,
            amount,
            currency,
            kind,
            status,
            processed_by,
            metadata,
        )?;
        self.metrics.record_credit();
        Ok(txn)
    }

    /// Debit a wallet, or fail with `InsufficientFunds` leaving no trace
    #[allow(clippy::too_many_arguments)]
    pub fn debit(
        &self,
        wallet_id: Uuid,
        amount: Decimal,
        currency: Currency,
        kind: TransactionKind,
        status: TransactionStatus,
        processed_by: Option<Uuid>,
        metadata: HashMap<String, String>,
    ) -> Result<WalletTransaction> {
        let txn = self.mutate_wallet(
            wallet_id,
            TransactionFlow::Out,
            amount,
            currency,
            kind,
            status,
            processed_by,
            metadata,
        )?;
        self.metrics.record_debit();
        Ok(txn)
    }

    #[allow(clippy::too_many_arguments)]
    fn mutate_wallet(
        &self,
        wallet_id: Uuid,
        flow: TransactionFlow,
        amount: Decimal,
        currency: Currency,
        kind: TransactionKind,
        status: TransactionStatus,
        processed_by: Option<Uuid>,
        metadata: HashMap<String, String>,
    ) -> Result<WalletTransaction> {
        self.check_amount(amount)?;
        self.check_currency(currency)?;

        let started = std::time::Instant::now();
        let lock = self.wallet_lock(wallet_id);
        let _guard = lock.lock();

        let mut wallet = self.storage.get_wallet(wallet_id)?;
        let balance_before = wallet.balance(currency);

        if flow == TransactionFlow::Out && balance_before < amount {
            self.metrics.record_insufficient_funds();
            return Err(Error::InsufficientFunds {
                wallet_id,
                requested: amount,
                available: balance_before,
                currency,
            });
        }

        let balance_after = flow.apply(balance_before, amount);
        wallet.balances.insert(currency, balance_after);
        match flow {
            TransactionFlow::In => {
                let earned = wallet.earned(currency) + amount;
                wallet.total_earned.insert(currency, earned);
            }
            TransactionFlow::Out => {
                let withdrawn = wallet.withdrawn(currency) + amount;
                wallet.total_withdrawn.insert(currency, withdrawn);
            }
        }

        let seq = wallet.txn_seq;
        wallet.txn_seq += 1;
        wallet.updated_at = Utc::now();

        let txn = WalletTransaction {
            id: Uuid::now_v7(),
            reference: self.generate_unique_reference()?,
            wallet_id,
            seq,
            flow,
            kind,
            amount,
            currency,
            balance_before,
            balance_after,
            status,
            metadata,
            processed_by,
            created_at: Utc::now(),
        };

        self.storage.commit_wallet_mutation(&wallet, &txn)?;
        self.metrics
            .record_mutation_duration(started.elapsed().as_secs_f64());

        tracing::info!(
            wallet_id = %wallet_id,
            reference = %txn.reference,
            flow = ?flow,
            amount = %amount,
            currency = %currency,
            "Wallet mutation applied"
        );

        Ok(txn)
    }

    // System wallet operations
    //
    // External operations move cash across the platform boundary and touch
    // the merchant balance; internal operations only shift value between
    // the engagement and profit buckets and preserve the three-way
    // equation by construction.

    /// External add: cash enters the platform as user liability
    #[allow(clippy::too_many_arguments)]
    pub fn add_funds(
        &self,
        system_id: Uuid,
        amount: Decimal,
        kind: TransactionKind,
        status: TransactionStatus,
        description: impl Into<String>,
        processed_by: Option<Uuid>,
        metadata: HashMap<String, String>,
    ) -> Result<SystemTransaction> {
        self.apply_system_mutation(
            system_id,
            amount,
            TransactionFlow::In,
            TransactionNature::External,
            kind,
            status,
            description.into(),
            processed_by,
            metadata,
            None,
            None,
            |system, amount| {
                system.merchant_balance += amount;
                system.user_engagement += amount;
                Ok(())
            },
        )
    }

    /// External deduct: cash leaves the platform. Fatal if the merchant
    /// balance cannot cover it; nothing is written in that case.
    #[allow(clippy::too_many_arguments)]
    pub fn deduct_funds(
        &self,
        system_id: Uuid,
        amount: Decimal,
        kind: TransactionKind,
        status: TransactionStatus,
        description: impl Into<String>,
        processed_by: Option<Uuid>,
        metadata: HashMap<String, String>,
    ) -> Result<SystemTransaction> {
        self.apply_system_mutation(
            system_id,
            amount,
            TransactionFlow::Out,
            TransactionNature::External,
            kind,
            status,
            description.into(),
            processed_by,
            metadata,
            None,
            None,
            |system, amount| {
                if system.merchant_balance < amount {
                    return Err(Error::InsufficientSystemFunds {
                        system_id: system.id,
                        requested: amount,
                        available: system.merchant_balance,
                    });
                }
                system.merchant_balance -= amount;
                system.user_engagement -= amount;
                Ok(())
            },
        )
    }

    /// Internal: realize user engagement as platform profit.
    /// The merchant balance is untouched, so the equation is preserved.
    #[allow(clippy::too_many_arguments)]
    pub fn add_profits(
        &self,
        system_id: Uuid,
        amount: Decimal,
        status: TransactionStatus,
        description: impl Into<String>,
        processed_by: Option<Uuid>,
        metadata: HashMap<String, String>,
    ) -> Result<SystemTransaction> {
        self.apply_system_mutation(
            system_id,
            amount,
            TransactionFlow::In,
            TransactionNature::Internal,
            TransactionKind::ProfitRealization,
            status,
            description.into(),
            processed_by,
            metadata,
            None,
            None,
            |system, amount| {
                system.user_engagement -= amount;
                system.platform_profit += amount;
                Ok(())
            },
        )
    }

    /// Internal: accrue platform profit back into user engagement
    #[allow(clippy::too_many_arguments)]
    pub fn add_engagements(
        &self,
        system_id: Uuid,
        amount: Decimal,
        status: TransactionStatus,
        description: impl Into<String>,
        processed_by: Option<Uuid>,
        metadata: HashMap<String, String>,
    ) -> Result<SystemTransaction> {
        self.apply_system_mutation(
            system_id,
            amount,
            TransactionFlow::Out,
            TransactionNature::Internal,
            TransactionKind::EngagementAccrual,
            status,
            description.into(),
            processed_by,
            metadata,
            None,
            None,
            |system, amount| {
                system.platform_profit -= amount;
                system.user_engagement += amount;
                Ok(())
            },
        )
    }

    /// Reversal: a previously deducted withdrawal comes back
    #[allow(clippy::too_many_arguments)]
    pub fn cancel_withdrawal(
        &self,
        system_id: Uuid,
        amount: Decimal,
        status: TransactionStatus,
        description: impl Into<String>,
        processed_by: Option<Uuid>,
        metadata: HashMap<String, String>,
        rejection_reason: impl Into<String>,
        source_reference: Option<Reference>,
    ) -> Result<SystemTransaction> {
        self.apply_system_mutation(
            system_id,
            amount,
            TransactionFlow::In,
            TransactionNature::External,
            TransactionKind::WithdrawalCancellation,
            status,
            description.into(),
            processed_by,
            metadata,
            Some(rejection_reason.into()),
            source_reference,
            |system, amount| {
                system.merchant_balance += amount;
                system.user_engagement += amount;
                Ok(())
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_system_mutation(
        &self,
        system_id: Uuid,
        amount: Decimal,
        flow: TransactionFlow,
        nature: TransactionNature,
        kind: TransactionKind,
        status: TransactionStatus,
        description: String,
        processed_by: Option<Uuid>,
        metadata: HashMap<String, String>,
        rejection_reason: Option<String>,
        source_reference: Option<Reference>,
        apply: impl FnOnce(&mut SystemWallet, Decimal) -> Result<()>,
    ) -> Result<SystemTransaction> {
        self.check_amount(amount)?;

        let started = std::time::Instant::now();
        let lock = self.wallet_lock(system_id);
        let _guard = lock.lock();

        let mut system = self.storage.get_system(system_id)?;

        let merchant_before = system.merchant_balance;
        let engagement_before = system.user_engagement;
        let profit_before = system.platform_profit;

        apply(&mut system, amount)?;

        let seq = system.txn_seq;
        system.txn_seq += 1;
        system.updated_at = Utc::now();

        let now = Utc::now();
        let txn = SystemTransaction {
            id: Uuid::now_v7(),
            reference: self.generate_unique_reference()?,
            system_id,
            seq,
            flow,
            nature,
            kind,
            amount,
            merchant_before,
            merchant_after: system.merchant_balance,
            engagement_before,
            engagement_after: system.user_engagement,
            profit_before,
            profit_after: system.platform_profit,
            status,
            description,
            processed_by,
            processed_at: now,
            rejection_reason,
            source_reference,
            metadata,
            created_at: now,
        };

        self.storage.commit_system_mutation(&system, &txn)?;
        self.metrics.record_system_operation();
        self.metrics
            .record_mutation_duration(started.elapsed().as_secs_f64());

        tracing::info!(
            system_id = %system_id,
            reference = %txn.reference,
            nature = ?nature,
            kind = ?kind,
            amount = %amount,
            "System wallet mutation applied"
        );

        Ok(txn)
    }

    // Read-only queries

    /// Current wallet state
    pub fn wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.storage.get_wallet(wallet_id)
    }

    /// Full transaction history of a wallet, chain-ordered
    pub fn wallet_history(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        self.storage.wallet_transactions(wallet_id)
    }

    /// Current system wallet state
    pub fn system_wallet(&self, system_id: Uuid) -> Result<SystemWallet> {
        self.storage.get_system(system_id)
    }

    /// Full transaction history of a system wallet, chain-ordered
    pub fn system_history(&self, system_id: Uuid) -> Result<Vec<SystemTransaction>> {
        self.storage.system_transactions(system_id)
    }

    /// Operator-facing system balance summary
    pub fn get_balance_summary(&self, system_id: Uuid) -> Result<BalanceSummary> {
        let system = self.storage.get_system(system_id)?;
        Ok(system.summary(self.config.tolerance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn test_engine() -> (Arc<AccountingEngine>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Arc::new(AccountingEngine::open(config).unwrap()), temp_dir)
    }

    fn credit(
        engine: &AccountingEngine,
        wallet_id: Uuid,
        amount: i64,
    ) -> Result<WalletTransaction> {
        engine.credit(
            wallet_id,
            Decimal::from(amount),
            Currency::USD,
            TransactionKind::Commission,
            TransactionStatus::Completed,
            None,
            HashMap::new(),
        )
    }

    fn debit(
        engine: &AccountingEngine,
        wallet_id: Uuid,
        amount: i64,
    ) -> Result<WalletTransaction> {
        engine.debit(
            wallet_id,
            Decimal::from(amount),
            Currency::USD,
            TransactionKind::Withdrawal,
            TransactionStatus::Completed,
            None,
            HashMap::new(),
        )
    }

    /// Seed a system wallet at (1000, 400, 600)
    fn seeded_system(engine: &AccountingEngine) -> SystemWallet {
        let system = engine.create_system_wallet().unwrap();
        engine
            .add_funds(
                system.id,
                Decimal::from(1000),
                TransactionKind::Deposit,
                TransactionStatus::Completed,
                "seed",
                None,
                HashMap::new(),
            )
            .unwrap();
        engine
            .add_profits(
                system.id,
                Decimal::from(600),
                TransactionStatus::Completed,
                "seed profit",
                None,
                HashMap::new(),
            )
            .unwrap();
        engine.system_wallet(system.id).unwrap()
    }

    #[test]
    fn test_credit_updates_balance_and_earned() {
        let (engine, _temp) = test_engine();
        let wallet = engine.create_wallet(Uuid::new_v4()).unwrap();

        let txn = credit(&engine, wallet.id, 100).unwrap();
        assert_eq!(txn.flow, TransactionFlow::In);
        assert_eq!(txn.balance_before, Decimal::ZERO);
        assert_eq!(txn.balance_after, Decimal::from(100));

        let wallet = engine.wallet(wallet.id).unwrap();
        assert_eq!(wallet.balance(Currency::USD), Decimal::from(100));
        assert_eq!(wallet.earned(Currency::USD), Decimal::from(100));
        assert_eq!(wallet.withdrawn(Currency::USD), Decimal::ZERO);
    }

    #[test]
    fn test_debit_mirrors_credit() {
        let (engine, _temp) = test_engine();
        let wallet = engine.create_wallet(Uuid::new_v4()).unwrap();
        credit(&engine, wallet.id, 100).unwrap();

        let txn = debit(&engine, wallet.id, 40).unwrap();
        assert_eq!(txn.flow, TransactionFlow::Out);
        assert_eq!(txn.balance_before, Decimal::from(100));
        assert_eq!(txn.balance_after, Decimal::from(60));

        let wallet = engine.wallet(wallet.id).unwrap();
        assert_eq!(wallet.balance(Currency::USD), Decimal::from(60));
        assert_eq!(wallet.withdrawn(Currency::USD), Decimal::from(40));
        // balance == earned - withdrawn
        assert_eq!(
            wallet.balance(Currency::USD),
            wallet.earned(Currency::USD) - wallet.withdrawn(Currency::USD)
        );
    }

    #[test]
    fn test_insufficient_funds_leaves_no_trace() {
        let (engine, _temp) = test_engine();
        let wallet = engine.create_wallet(Uuid::new_v4()).unwrap();
        credit(&engine, wallet.id, 30).unwrap();

        let err = debit(&engine, wallet.id, 50).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));

        // Wallet unchanged, no transaction row created
        let wallet = engine.wallet(wallet.id).unwrap();
        assert_eq!(wallet.balance(Currency::USD), Decimal::from(30));
        assert_eq!(engine.wallet_history(wallet.id).unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let (engine, _temp) = test_engine();
        let wallet = engine.create_wallet(Uuid::new_v4()).unwrap();

        assert!(matches!(
            credit(&engine, wallet.id, 0).unwrap_err(),
            Error::InvalidAmount(_)
        ));
        assert!(matches!(
            credit(&engine, wallet.id, -5).unwrap_err(),
            Error::InvalidAmount(_)
        ));
    }

    #[test]
    fn test_chain_integrity() {
        let (engine, _temp) = test_engine();
        let wallet = engine.create_wallet(Uuid::new_v4()).unwrap();

        credit(&engine, wallet.id, 100).unwrap();
        debit(&engine, wallet.id, 30).unwrap();
        credit(&engine, wallet.id, 15).unwrap();
        debit(&engine, wallet.id, 5).unwrap();

        let txns = engine.wallet_history(wallet.id).unwrap();
        assert_eq!(txns.len(), 4);
        for pair in txns.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
        for txn in &txns {
            assert!(txn.is_arithmetically_sound());
        }
    }

    #[test]
    fn test_references_are_unique() {
        let (engine, _temp) = test_engine();
        let wallet = engine.create_wallet(Uuid::new_v4()).unwrap();

        for _ in 0..20 {
            credit(&engine, wallet.id, 1).unwrap();
        }

        let txns = engine.wallet_history(wallet.id).unwrap();
        let mut refs: Vec<&str> = txns.iter().map(|t| t.reference.as_str()).collect();
        refs.sort_unstable();
        refs.dedup();
        assert_eq!(refs.len(), 20);
    }

    #[test]
    fn test_concurrent_credits_serialize_per_wallet() {
        let (engine, _temp) = test_engine();
        let wallet = engine.create_wallet(Uuid::new_v4()).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let wallet_id = wallet.id;
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    credit(&engine, wallet_id, 1).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let wallet = engine.wallet(wallet.id).unwrap();
        assert_eq!(wallet.balance(Currency::USD), Decimal::from(200));

        // Chain must still be a valid linked sequence
        let txns = engine.wallet_history(wallet.id).unwrap();
        assert_eq!(txns.len(), 200);
        for pair in txns.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
    }

    #[test]
    fn test_add_funds_preserves_equation() {
        let (engine, _temp) = test_engine();
        let system = engine.create_system_wallet().unwrap();

        let txn = engine
            .add_funds(
                system.id,
                Decimal::from(500),
                TransactionKind::Deposit,
                TransactionStatus::Completed,
                "deposit",
                None,
                HashMap::new(),
            )
            .unwrap();
        assert_eq!(txn.nature, TransactionNature::External);
        assert_eq!(txn.merchant_before, Decimal::ZERO);
        assert_eq!(txn.merchant_after, Decimal::from(500));
        assert_eq!(txn.engagement_after, Decimal::from(500));

        let system = engine.system_wallet(system.id).unwrap();
        assert!(system.equation_holds(Decimal::new(1, 2)));
    }

    #[test]
    fn test_deduct_funds_below_zero_is_fatal_and_writes_nothing() {
        let (engine, _temp) = test_engine();
        let system = seeded_system(&engine);
        let before_len = engine.system_history(system.id).unwrap().len();

        let err = engine
            .deduct_funds(
                system.id,
                Decimal::from(5000),
                TransactionKind::Withdrawal,
                TransactionStatus::Completed,
                "too big",
                None,
                HashMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientSystemFunds { .. }));

        let after = engine.system_wallet(system.id).unwrap();
        assert_eq!(after.merchant_balance, Decimal::from(1000));
        assert_eq!(engine.system_history(system.id).unwrap().len(), before_len);
    }

    #[test]
    fn test_internal_transfers_round_trip() {
        let (engine, _temp) = test_engine();
        let system = seeded_system(&engine);
        assert_eq!(system.merchant_balance, Decimal::from(1000));
        assert_eq!(system.user_engagement, Decimal::from(400));
        assert_eq!(system.platform_profit, Decimal::from(600));

        engine
            .add_profits(
                system.id,
                Decimal::from(100),
                TransactionStatus::Completed,
                "realize",
                None,
                HashMap::new(),
            )
            .unwrap();
        engine
            .add_engagements(
                system.id,
                Decimal::from(100),
                TransactionStatus::Completed,
                "accrue",
                None,
                HashMap::new(),
            )
            .unwrap();

        // Round-trip neutrality of internal transfers
        let system = engine.system_wallet(system.id).unwrap();
        assert_eq!(system.merchant_balance, Decimal::from(1000));
        assert_eq!(system.user_engagement, Decimal::from(400));
        assert_eq!(system.platform_profit, Decimal::from(600));
    }

    #[test]
    fn test_cancel_withdrawal_reverses_deduction() {
        let (engine, _temp) = test_engine();
        let system = seeded_system(&engine);

        let withdrawal = engine
            .deduct_funds(
                system.id,
                Decimal::from(200),
                TransactionKind::Withdrawal,
                TransactionStatus::Completed,
                "user payout",
                None,
                HashMap::new(),
            )
            .unwrap();

        let reversal = engine
            .cancel_withdrawal(
                system.id,
                Decimal::from(200),
                TransactionStatus::Completed,
                "payout bounced",
                None,
                HashMap::new(),
                "bank rejected the transfer",
                Some(withdrawal.reference.clone()),
            )
            .unwrap();
        assert_eq!(reversal.source_reference, Some(withdrawal.reference));
        assert!(reversal.rejection_reason.is_some());

        let system = engine.system_wallet(system.id).unwrap();
        assert_eq!(system.merchant_balance, Decimal::from(1000));
        assert_eq!(system.user_engagement, Decimal::from(400));
    }

    #[test]
    fn test_balance_summary() {
        let (engine, _temp) = test_engine();
        let system = seeded_system(&engine);

        let summary = engine.get_balance_summary(system.id).unwrap();
        assert_eq!(summary.merchant_balance, Decimal::from(1000));
        assert_eq!(summary.user_engagement, Decimal::from(400));
        assert_eq!(summary.platform_profit, Decimal::from(600));
        assert_eq!(summary.total, Decimal::from(1000));
        assert!(summary.equation_valid);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            ..ProptestConfig::default()
        })]

        /// For any sequence of credits/debits, the stored balance equals
        /// the sum of in-amounts minus out-amounts, exactly.
        #[test]
        fn prop_balance_equals_ledger_sum(
            ops in prop::collection::vec((any::<bool>(), 1i64..10_000i64), 1..40)
        ) {
            let (engine, _temp) = test_engine();
            let wallet = engine.create_wallet(Uuid::new_v4()).unwrap();

            let mut expected = Decimal::ZERO;
            for (is_credit, amount) in ops {
                let amount_dec = Decimal::from(amount);
                if is_credit {
                    credit(&engine, wallet.id, amount).unwrap();
                    expected += amount_dec;
                } else {
                    match debit(&engine, wallet.id, amount) {
                        Ok(_) => expected -= amount_dec,
                        Err(Error::InsufficientFunds { .. }) => {}
                        Err(e) => return Err(TestCaseError::fail(e.to_string())),
                    }
                }
            }

            let wallet = engine.wallet(wallet.id).unwrap();
            prop_assert_eq!(wallet.balance(Currency::USD), expected);

            let ledger_sum: Decimal = engine
                .wallet_history(wallet.id)
                .unwrap()
                .iter()
                .map(|t| t.flow.signed(t.amount))
                .sum();
            prop_assert_eq!(ledger_sum, expected);
        }

        /// The three-way equation holds after any sequence of valid
        /// system operations starting from a valid state.
        #[test]
        fn prop_system_equation_holds(
            ops in prop::collection::vec((0u8..4, 1i64..500i64), 1..25)
        ) {
            let (engine, _temp) = test_engine();
            let system = seeded_system(&engine);
            let tolerance = Decimal::new(1, 2);

            for (op, amount) in ops {
                let amount = Decimal::from(amount);
                let result = match op {
                    0 => engine.add_funds(
                        system.id, amount, TransactionKind::Deposit,
                        TransactionStatus::Completed, "p", None, HashMap::new(),
                    ),
                    1 => engine.deduct_funds(
                        system.id, amount, TransactionKind::Withdrawal,
                        TransactionStatus::Completed, "p", None, HashMap::new(),
                    ),
                    2 => engine.add_profits(
                        system.id, amount,
                        TransactionStatus::Completed, "p", None, HashMap::new(),
                    ),
                    _ => engine.add_engagements(
                        system.id, amount,
                        TransactionStatus::Completed, "p", None, HashMap::new(),
                    ),
                };
                match result {
                    Ok(_) | Err(Error::InsufficientSystemFunds { .. }) => {}
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                }

                let state = engine.system_wallet(system.id).unwrap();
                prop_assert!(state.equation_holds(tolerance));
            }
        }
    }
}
