//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Append-only transaction records (corrections are new reversing
//!   transactions, never edits)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// West African CFA Franc
    XOF,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::XOF => "XOF",
        }
    }

    /// Parse from ISO 4217 code
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "XOF" => Some(Currency::XOF),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Direction of a balance movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionFlow {
    /// Money entering the wallet
    In,
    /// Money leaving the wallet
    Out,
}

impl TransactionFlow {
    /// Apply this flow to a balance
    pub fn apply(&self, balance: Decimal, amount: Decimal) -> Decimal {
        match self {
            TransactionFlow::In => balance + amount,
            TransactionFlow::Out => balance - amount,
        }
    }

    /// Signed amount (In positive, Out negative)
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            TransactionFlow::In => amount,
            TransactionFlow::Out => -amount,
        }
    }
}

/// Whether a system-wallet movement crosses the platform boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionNature {
    /// Money entering or leaving the platform
    External,
    /// Money moving between the engagement and profit buckets,
    /// with no external cash movement
    Internal,
}

/// Operation kind behind a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TransactionKind {
    /// External deposit into the platform
    Deposit,
    /// External withdrawal out of the platform
    Withdrawal,
    /// Commission credited to a user wallet
    Commission,
    /// Internal transfer between wallets
    Transfer,
    /// Refund of a previous operation
    Refund,
    /// Manual balance adjustment by an operator
    Adjustment,
    /// Engagement converted into realized platform profit
    ProfitRealization,
    /// Profit converted back into user engagement
    EngagementAccrual,
    /// Reversal of a previously recorded withdrawal
    WithdrawalCancellation,
}

/// Transaction lifecycle status
///
/// The only legal transitions are `Pending -> Completed` and
/// `Pending -> Failed`. Everything else about a transaction is immutable
/// once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Created, outcome not yet known
    Pending,
    /// Settled successfully (terminal)
    Completed,
    /// Did not settle (terminal)
    Failed,
}

impl TransactionStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    /// Check whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Completed)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
        )
    }
}

/// Reference alphabet: uppercase alphanumeric only
const REFERENCE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a transaction reference
pub const REFERENCE_LEN: usize = 10;

/// Human-opaque transaction reference (10 uppercase alphanumeric chars)
///
/// Always generated through [`Reference::generate`] or validated through
/// [`Reference::parse`] before a transaction is considered constructed —
/// there is no save-time hook that injects one later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    /// Generate a fresh random reference
    ///
    /// Uniqueness against the store is checked at write time by the
    /// accounting engine, which regenerates on collision.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let s: String = (0..REFERENCE_LEN)
            .map(|_| REFERENCE_CHARSET[rng.gen_range(0..REFERENCE_CHARSET.len())] as char)
            .collect();
        Self(s)
    }

    /// Validate an externally supplied reference
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.len() != REFERENCE_LEN
            || !s.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(crate::Error::InvalidReference(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-user wallet: mutable current balances plus lifetime totals
///
/// Mutated only through the accounting engine; the invariant
/// `balance == total_earned - total_withdrawn` holds per currency and is
/// verified out-of-band by the auditors against the transaction log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub id: Uuid,

    /// Owning account
    pub owner_id: Uuid,

    /// Current balance per currency
    pub balances: HashMap<Currency, Decimal>,

    /// Lifetime credited amount per currency
    pub total_earned: HashMap<Currency, Decimal>,

    /// Lifetime debited amount per currency
    pub total_withdrawn: HashMap<Currency, Decimal>,

    /// Monotonic per-wallet transaction sequence (next seq to assign)
    pub txn_seq: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet for an owner
    pub fn new(owner_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner_id,
            balances: HashMap::new(),
            total_earned: HashMap::new(),
            total_withdrawn: HashMap::new(),
            txn_seq: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current balance in a currency (zero if never touched)
    pub fn balance(&self, currency: Currency) -> Decimal {
        self.balances.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }

    /// Lifetime earned in a currency
    pub fn earned(&self, currency: Currency) -> Decimal {
        self.total_earned.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }

    /// Lifetime withdrawn in a currency
    pub fn withdrawn(&self, currency: Currency) -> Decimal {
        self.total_withdrawn.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Immutable record of one wallet balance movement
///
/// `balance_before`/`balance_after` are captured from the wallet row while
/// it is locked, so the records for one wallet form a linked chain when
/// ordered by `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Transaction ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Unique human-opaque reference
    pub reference: Reference,

    /// Wallet this movement belongs to
    pub wallet_id: Uuid,

    /// Position in the wallet's transaction chain
    pub seq: u64,

    /// Direction of the movement
    pub flow: TransactionFlow,

    /// Operation kind
    pub kind: TransactionKind,

    /// Amount moved (always positive; direction is in `flow`)
    pub amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Balance before the movement
    pub balance_before: Decimal,

    /// Balance after the movement
    pub balance_after: Decimal,

    /// Lifecycle status
    pub status: TransactionStatus,

    /// Free-form structured context
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Actor that triggered the movement, if any
    pub processed_by: Option<Uuid>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// Verify the row's own arithmetic: `after = before ± amount` by flow
    pub fn is_arithmetically_sound(&self) -> bool {
        self.flow.apply(self.balance_before, self.amount) == self.balance_after
    }
}

/// System wallet: the platform's single accounting position
///
/// Core invariant, checked by audit rather than by every write:
/// `merchant_balance == user_engagement + platform_profit` within the
/// configured tolerance. The handle is always passed explicitly; there is
/// no hidden global instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemWallet {
    /// System wallet ID (the model allows more than one row; operations
    /// are keyed by id)
    pub id: Uuid,

    /// Merchant balance: all cash currently held by the platform
    pub merchant_balance: Decimal,

    /// Aggregate liability owed to users
    pub user_engagement: Decimal,

    /// Realized platform profit
    pub platform_profit: Decimal,

    /// Monotonic transaction sequence (next seq to assign)
    pub txn_seq: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl SystemWallet {
    /// Create a zeroed system wallet
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            merchant_balance: Decimal::ZERO,
            user_engagement: Decimal::ZERO,
            platform_profit: Decimal::ZERO,
            txn_seq: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the three-way accounting equation within `tolerance`
    pub fn equation_holds(&self, tolerance: Decimal) -> bool {
        let diff = self.merchant_balance - (self.user_engagement + self.platform_profit);
        diff.abs() <= tolerance
    }

    /// Build the operator-facing balance summary
    pub fn summary(&self, tolerance: Decimal) -> BalanceSummary {
        BalanceSummary {
            merchant_balance: self.merchant_balance,
            user_engagement: self.user_engagement,
            platform_profit: self.platform_profit,
            equation_valid: self.equation_holds(tolerance),
            total: self.user_engagement + self.platform_profit,
        }
    }
}

impl Default for SystemWallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable record of one system-wallet movement
///
/// Snapshots all three system fields before and after, so audits can
/// replay the exact state the operation saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemTransaction {
    /// Transaction ID (UUIDv7)
    pub id: Uuid,

    /// Unique human-opaque reference
    pub reference: Reference,

    /// System wallet this movement belongs to
    pub system_id: Uuid,

    /// Position in the system wallet's transaction chain
    pub seq: u64,

    /// Direction of the movement
    pub flow: TransactionFlow,

    /// External (cash crosses the platform boundary) or internal
    /// (bucket-to-bucket) movement
    pub nature: TransactionNature,

    /// Operation kind
    pub kind: TransactionKind,

    /// Amount moved (always positive)
    pub amount: Decimal,

    /// Merchant balance before
    pub merchant_before: Decimal,
    /// Merchant balance after
    pub merchant_after: Decimal,
    /// User engagement before
    pub engagement_before: Decimal,
    /// User engagement after
    pub engagement_after: Decimal,
    /// Platform profit before
    pub profit_before: Decimal,
    /// Platform profit after
    pub profit_after: Decimal,

    /// Lifecycle status
    pub status: TransactionStatus,

    /// Operator-facing description
    pub description: String,

    /// Actor that triggered the movement, if any
    pub processed_by: Option<Uuid>,

    /// When the movement was processed
    pub processed_at: DateTime<Utc>,

    /// Why a withdrawal was cancelled (reversals only)
    pub rejection_reason: Option<String>,

    /// Reference of the transaction being reversed (reversals only)
    pub source_reference: Option<Reference>,

    /// Free-form structured context
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Operator-facing summary of the system wallet position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSummary {
    /// Merchant balance
    pub merchant_balance: Decimal,
    /// Aggregate liability owed to users
    pub user_engagement: Decimal,
    /// Realized platform profit
    pub platform_profit: Decimal,
    /// Whether the three-way equation holds within tolerance
    pub equation_valid: bool,
    /// `user_engagement + platform_profit`
    pub total: Decimal,
}
