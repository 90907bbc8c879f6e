//! Error types for the wallet ledger

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::types::Currency;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Wallet not found
    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    /// System wallet not found
    #[error("System wallet not found: {0}")]
    SystemWalletNotFound(Uuid),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// Amount must be strictly positive
    #[error("Invalid amount: {0} (must be > 0)")]
    InvalidAmount(Decimal),

    /// Currency not in the configured currency list
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(Currency),

    /// Recoverable: the wallet does not cover the requested debit.
    /// The caller decides what to do; the engine never retries this.
    #[error("Insufficient funds in wallet {wallet_id}: requested {requested} {currency}, available {available}")]
    InsufficientFunds {
        /// Wallet being debited
        wallet_id: Uuid,
        /// Requested debit amount
        requested: Decimal,
        /// Available balance
        available: Decimal,
        /// Currency of the attempted debit
        currency: Currency,
    },

    /// Fatal: a system-wallet deduction would drive the merchant balance
    /// negative. The enclosing operation must abort with no partial state.
    #[error("System wallet {system_id} cannot cover deduction: requested {requested}, merchant balance {available}")]
    InsufficientSystemFunds {
        /// System wallet
        system_id: Uuid,
        /// Requested deduction
        requested: Decimal,
        /// Current merchant balance
        available: Decimal,
    },

    /// Internal: reference generation kept colliding. Signals a bug or an
    /// exhausted keyspace, never surfaced as a normal caller error.
    #[error("Could not generate a unique transaction reference after {0} attempts")]
    DuplicateReference(u32),

    /// Invalid transaction reference
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Illegal transaction status transition
    #[error("Invalid status transition: {0}")]
    InvalidStatusTransition(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
