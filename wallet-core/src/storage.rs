//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Mutable wallet rows (key: wallet_id)
//! - `wallet_txns` - Append-only wallet transactions (key: txn_id)
//! - `wallet_txn_index` - Per-wallet chain order (key: wallet_id || seq_be)
//! - `system` - System wallet rows (key: system_id)
//! - `system_txns` - Append-only system transactions (key: txn_id)
//! - `system_txn_index` - Per-system chain order (key: system_id || seq_be)
//! - `refs` - Transaction reference uniqueness index (key: reference)
//!
//! A balance mutation commits the updated wallet row, the transaction row,
//! the chain index entry and the reference index entry in one `WriteBatch`,
//! so there is never a balance update without its matching transaction row.

use crate::{
    error::{Error, Result},
    types::{Reference, SystemTransaction, SystemWallet, Wallet, WalletTransaction},
    Config,
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB};
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_WALLET_TXNS: &str = "wallet_txns";
const CF_WALLET_TXN_INDEX: &str = "wallet_txn_index";
const CF_SYSTEM: &str = "system";
const CF_SYSTEM_TXNS: &str = "system_txns";
const CF_SYSTEM_TXN_INDEX: &str = "system_txn_index";
const CF_REFS: &str = "refs";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_WALLET_TXNS, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_WALLET_TXN_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_SYSTEM, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_SYSTEM_TXNS, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_SYSTEM_TXN_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_REFS, Self::cf_options_index()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened wallet ledger storage");

        Ok(Self { db })
    }

    // Column family options

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        // Wallet rows are frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_append_only() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Index key helpers

    fn chain_index_key(owner: &Uuid, seq: u64) -> [u8; 24] {
        let mut key = [0u8; 24];
        key[..16].copy_from_slice(owner.as_bytes());
        key[16..].copy_from_slice(&seq.to_be_bytes());
        key
    }

    // Wallet operations

    /// Insert or replace a wallet row (provisioning only; balance changes
    /// go through [`Storage::commit_wallet_mutation`])
    pub fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let value = bincode::serialize(wallet)?;
        self.db.put_cf(cf, wallet.id.as_bytes(), &value)?;
        Ok(())
    }

    /// Get wallet by ID
    pub fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let value = self
            .db
            .get_cf(cf, wallet_id.as_bytes())?
            .ok_or(Error::WalletNotFound(wallet_id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Iterate all wallets (global audit sweep)
    pub fn iter_wallets(&self) -> Result<Vec<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            wallets.push(bincode::deserialize(&value)?);
        }
        Ok(wallets)
    }

    /// Commit one wallet balance mutation atomically: updated wallet row,
    /// transaction row, chain index entry and reference index entry
    pub fn commit_wallet_mutation(&self, wallet: &Wallet, txn: &WalletTransaction) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        batch.put_cf(cf_wallets, wallet.id.as_bytes(), bincode::serialize(wallet)?);

        let cf_txns = self.cf_handle(CF_WALLET_TXNS)?;
        batch.put_cf(cf_txns, txn.id.as_bytes(), bincode::serialize(txn)?);

        let cf_index = self.cf_handle(CF_WALLET_TXN_INDEX)?;
        batch.put_cf(
            cf_index,
            Self::chain_index_key(&txn.wallet_id, txn.seq),
            txn.id.as_bytes(),
        );

        let cf_refs = self.cf_handle(CF_REFS)?;
        batch.put_cf(cf_refs, txn.reference.as_str().as_bytes(), txn.id.as_bytes());

        self.db.write(batch)?;

        tracing::debug!(
            wallet_id = %wallet.id,
            txn_id = %txn.id,
            seq = txn.seq,
            "Wallet mutation committed"
        );

        Ok(())
    }

    /// Get wallet transaction by ID
    pub fn get_wallet_transaction(&self, txn_id: Uuid) -> Result<WalletTransaction> {
        let cf = self.cf_handle(CF_WALLET_TXNS)?;
        let value = self
            .db
            .get_cf(cf, txn_id.as_bytes())?
            .ok_or(Error::TransactionNotFound(txn_id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Update a wallet transaction's status (the only mutable field).
    /// Rejects transitions out of a terminal status.
    pub fn set_wallet_transaction_status(
        &self,
        txn_id: Uuid,
        status: crate::types::TransactionStatus,
    ) -> Result<WalletTransaction> {
        let mut txn = self.get_wallet_transaction(txn_id)?;
        if !txn.status.can_transition_to(status) {
            return Err(Error::InvalidStatusTransition(format!(
                "{:?} -> {:?} on transaction {}",
                txn.status, status, txn_id
            )));
        }
        txn.status = status;

        let cf = self.cf_handle(CF_WALLET_TXNS)?;
        self.db.put_cf(cf, txn.id.as_bytes(), bincode::serialize(&txn)?)?;
        Ok(txn)
    }

    /// All transactions for a wallet, ordered by chain sequence
    pub fn wallet_transactions(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
        self.wallet_transactions_from(wallet_id, 0)
    }

    /// Transactions for a wallet with `seq >= from_seq`, ordered
    pub fn wallet_transactions_from(
        &self,
        wallet_id: Uuid,
        from_seq: u64,
    ) -> Result<Vec<WalletTransaction>> {
        let cf_index = self.cf_handle(CF_WALLET_TXN_INDEX)?;
        let start = Self::chain_index_key(&wallet_id, from_seq);

        let iter = self.db.iterator_cf(
            cf_index,
            IteratorMode::From(&start, rocksdb::Direction::Forward),
        );

        let mut txns = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(wallet_id.as_bytes()) {
                break; // Past this wallet's range
            }
            let txn_id_bytes: [u8; 16] = value
                .as_ref()
                .try_into()
                .map_err(|_| Error::Storage("Malformed chain index value".to_string()))?;
            txns.push(self.get_wallet_transaction(Uuid::from_bytes(txn_id_bytes))?);
        }

        Ok(txns)
    }

    /// Number of transactions recorded for a wallet
    pub fn wallet_transaction_count(&self, wallet_id: Uuid) -> Result<u64> {
        let cf_index = self.cf_handle(CF_WALLET_TXN_INDEX)?;
        let start = Self::chain_index_key(&wallet_id, 0);

        let iter = self.db.iterator_cf(
            cf_index,
            IteratorMode::From(&start, rocksdb::Direction::Forward),
        );

        let mut count = 0u64;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(wallet_id.as_bytes()) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Last transaction in a wallet's chain, if any
    pub fn last_wallet_transaction(&self, wallet_id: Uuid) -> Result<Option<WalletTransaction>> {
        let txns = self.wallet_transactions(wallet_id)?;
        Ok(txns.into_iter().last())
    }

    /// Check whether a transaction reference is already taken
    pub fn reference_exists(&self, reference: &Reference) -> Result<bool> {
        let cf = self.cf_handle(CF_REFS)?;
        Ok(self.db.get_cf(cf, reference.as_str().as_bytes())?.is_some())
    }

    // System wallet operations

    /// Insert or replace a system wallet row (provisioning only)
    pub fn put_system(&self, system: &SystemWallet) -> Result<()> {
        let cf = self.cf_handle(CF_SYSTEM)?;
        let value = bincode::serialize(system)?;
        self.db.put_cf(cf, system.id.as_bytes(), &value)?;
        Ok(())
    }

    /// Get system wallet by ID
    pub fn get_system(&self, system_id: Uuid) -> Result<SystemWallet> {
        let cf = self.cf_handle(CF_SYSTEM)?;
        let value = self
            .db
            .get_cf(cf, system_id.as_bytes())?
            .ok_or(Error::SystemWalletNotFound(system_id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Iterate all system wallets
    pub fn iter_system_wallets(&self) -> Result<Vec<SystemWallet>> {
        let cf = self.cf_handle(CF_SYSTEM)?;
        let mut systems = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            systems.push(bincode::deserialize(&value)?);
        }
        Ok(systems)
    }

    /// Commit one system-wallet mutation atomically
    pub fn commit_system_mutation(
        &self,
        system: &SystemWallet,
        txn: &SystemTransaction,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_system = self.cf_handle(CF_SYSTEM)?;
        batch.put_cf(cf_system, system.id.as_bytes(), bincode::serialize(system)?);

        let cf_txns = self.cf_handle(CF_SYSTEM_TXNS)?;
        batch.put_cf(cf_txns, txn.id.as_bytes(), bincode::serialize(txn)?);

        let cf_index = self.cf_handle(CF_SYSTEM_TXN_INDEX)?;
        batch.put_cf(
            cf_index,
            Self::chain_index_key(&txn.system_id, txn.seq),
            txn.id.as_bytes(),
        );

        let cf_refs = self.cf_handle(CF_REFS)?;
        batch.put_cf(cf_refs, txn.reference.as_str().as_bytes(), txn.id.as_bytes());

        self.db.write(batch)?;

        tracing::debug!(
            system_id = %system.id,
            txn_id = %txn.id,
            seq = txn.seq,
            "System wallet mutation committed"
        );

        Ok(())
    }

    /// Get system transaction by ID
    pub fn get_system_transaction(&self, txn_id: Uuid) -> Result<SystemTransaction> {
        let cf = self.cf_handle(CF_SYSTEM_TXNS)?;
        let value = self
            .db
            .get_cf(cf, txn_id.as_bytes())?
            .ok_or(Error::TransactionNotFound(txn_id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// All transactions for a system wallet, ordered by chain sequence
    pub fn system_transactions(&self, system_id: Uuid) -> Result<Vec<SystemTransaction>> {
        let cf_index = self.cf_handle(CF_SYSTEM_TXN_INDEX)?;
        let start = Self::chain_index_key(&system_id, 0);

        let iter = self.db.iterator_cf(
            cf_index,
            IteratorMode::From(&start, rocksdb::Direction::Forward),
        );

        let mut txns = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(system_id.as_bytes()) {
                break;
            }
            let txn_id_bytes: [u8; 16] = value
                .as_ref()
                .try_into()
                .map_err(|_| Error::Storage("Malformed chain index value".to_string()))?;
            txns.push(self.get_system_transaction(Uuid::from_bytes(txn_id_bytes))?);
        }

        Ok(txns)
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_wallets: self.approximate_count(CF_WALLETS)?,
            total_wallet_transactions: self.approximate_count(CF_WALLET_TXNS)?,
            total_system_transactions: self.approximate_count(CF_SYSTEM_TXNS)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate wallet count
    pub total_wallets: u64,
    /// Approximate wallet transaction count
    pub total_wallet_transactions: u64,
    /// Approximate system transaction count
    pub total_system_transactions: u64,
}
