//! Wallet ledger core
//!
//! Append-only money ledger for per-user wallets and the platform system
//! wallet, with atomic balance mutation under per-wallet locks.
//!
//! # Architecture
//!
//! - **Ledger store**: durable append-only transaction records plus mutable
//!   current-balance rows (RocksDB)
//! - **Accounting engine**: `credit`/`debit` and the system-wallet
//!   operation families, each committing balance update + transaction row
//!   as one atomic batch
//! - **Per-wallet serialization**: mutations on one wallet are serialized
//!   by a per-wallet lock; different wallets proceed in parallel
//!
//! # Invariants
//!
//! - Per wallet and currency: `balance == total_earned - total_withdrawn`
//! - Per transaction: `balance_after == balance_before ± amount` by flow
//! - Per wallet: transaction rows form a linked before/after chain in
//!   sequence order
//! - System wallet: `merchant_balance == user_engagement + platform_profit`
//!   within tolerance (verified out-of-band by the audit subsystem)

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::AccountingEngine;
pub use error::{Error, Result};
pub use storage::Storage;
pub use types::{
    BalanceSummary, Currency, Reference, SystemTransaction, SystemWallet, TransactionFlow,
    TransactionKind, TransactionNature, TransactionStatus, Wallet, WalletTransaction,
};
