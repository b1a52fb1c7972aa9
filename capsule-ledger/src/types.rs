//! Core types for the ledger
//!
//! All persisted types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Validation at construction, so stores only ever see well-formed keys

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Longest identifier accepted for users, capsules and client tokens
pub const MAX_ID_LEN: usize = 128;

fn validate_identifier(what: &str, raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(Error::InvalidArgument(format!("{} must not be empty", what)));
    }
    if raw.len() > MAX_ID_LEN {
        return Err(Error::InvalidArgument(format!(
            "{} longer than {} bytes",
            what, MAX_ID_LEN
        )));
    }
    // NUL separates index key components
    if raw.chars().any(|c| c.is_control()) {
        return Err(Error::InvalidArgument(format!(
            "{} contains control characters",
            what
        )));
    }
    Ok(())
}

/// Authenticated user identifier, supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_identifier("user_id", &id)?;
        Ok(Self(id))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capsule identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapsuleId(String);

impl CapsuleId {
    /// Validate and wrap
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_identifier("capsule_id", &id)?;
        Ok(Self(id))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapsuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque client-supplied token, reserved for exactly-once semantics.
///
/// Stored on the record it arrived with. The ledger does not deduplicate on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientToken(String);

impl ClientToken {
    /// Validate and wrap
    pub fn parse(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        validate_identifier("client_token", &token)?;
        Ok(Self(token))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-user balance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owner
    pub user_id: UserId,
    /// Never negative
    pub balance: Decimal,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last balance change
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Empty wallet
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionKind {
    /// Wallet to wallet
    Transfer = 1,
    /// Capsule purchase, buyer to issuer
    Buy = 2,
    /// Funds entering the ledger from outside
    Deposit = 3,
}

impl TransactionKind {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::Buy => "buy",
            TransactionKind::Deposit => "deposit",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable log entry of a committed monetary movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique ID (UUIDv7)
    pub id: Uuid,
    /// Insertion order, breaks timestamp ties
    pub sequence: u64,
    /// Debited wallet, absent for deposits
    pub from_user: Option<UserId>,
    /// Credited wallet
    pub to_user: Option<UserId>,
    /// Always positive
    pub amount: Decimal,
    /// Event kind
    pub kind: TransactionKind,
    /// Capsule bought (buy only)
    pub capsule_id: Option<CapsuleId>,
    /// Units bought (buy only)
    pub unit_count: Option<u64>,
    /// Free-form caller note
    pub memo: Option<String>,
    /// Client token the request carried
    pub client_token: Option<ClientToken>,
    /// Commit time
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Effect of this record on the user's balance
    pub fn signed_amount_for(&self, user_id: &UserId) -> Decimal {
        let mut delta = Decimal::ZERO;
        if self.to_user.as_ref() == Some(user_id) {
            delta += self.amount;
        }
        if self.from_user.as_ref() == Some(user_id) {
            delta -= self.amount;
        }
        delta
    }
}

/// Record awaiting append. `id` and `created_at` are assigned when absent.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Caller-chosen ID
    pub id: Option<Uuid>,
    /// Caller-chosen timestamp
    pub created_at: Option<DateTime<Utc>>,
    /// Debited wallet
    pub from_user: Option<UserId>,
    /// Credited wallet
    pub to_user: Option<UserId>,
    /// Amount moved
    pub amount: Decimal,
    /// Event kind
    pub kind: TransactionKind,
    /// Capsule bought
    pub capsule_id: Option<CapsuleId>,
    /// Units bought
    pub unit_count: Option<u64>,
    /// Caller note
    pub memo: Option<String>,
    /// Client token
    pub client_token: Option<ClientToken>,
}

impl NewTransaction {
    /// Wallet to wallet transfer
    pub fn transfer(from: UserId, to: UserId, amount: Decimal) -> Self {
        Self {
            id: None,
            created_at: None,
            from_user: Some(from),
            to_user: Some(to),
            amount,
            kind: TransactionKind::Transfer,
            capsule_id: None,
            unit_count: None,
            memo: None,
            client_token: None,
        }
    }

    /// Capsule purchase
    pub fn buy(
        capsule_id: CapsuleId,
        buyer: UserId,
        issuer: UserId,
        unit_count: u64,
        total_price: Decimal,
    ) -> Self {
        Self {
            id: None,
            created_at: None,
            from_user: Some(buyer),
            to_user: Some(issuer),
            amount: total_price,
            kind: TransactionKind::Buy,
            capsule_id: Some(capsule_id),
            unit_count: Some(unit_count),
            memo: None,
            client_token: None,
        }
    }

    /// External funding
    pub fn deposit(to: UserId, amount: Decimal) -> Self {
        Self {
            id: None,
            created_at: None,
            from_user: None,
            to_user: Some(to),
            amount,
            kind: TransactionKind::Deposit,
            capsule_id: None,
            unit_count: None,
            memo: None,
            client_token: None,
        }
    }

    /// Attach a memo
    pub fn with_memo(mut self, memo: Option<String>) -> Self {
        self.memo = memo;
        self
    }

    /// Attach a client token
    pub fn with_client_token(mut self, token: Option<ClientToken>) -> Self {
        self.client_token = token;
        self
    }
}

/// Issuance lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IssuanceStatus {
    /// Units can be bought
    Active = 1,
    /// sold_count reached total_supply
    SoldOut = 2,
    /// Pulled by an administrator
    Withdrawn = 3,
}

impl IssuanceStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuanceStatus::Active => "active",
            IssuanceStatus::SoldOut => "sold_out",
            IssuanceStatus::Withdrawn => "withdrawn",
        }
    }
}

/// Scarce-supply sale listing for a capsule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issuance {
    /// Unique ID (UUIDv7)
    pub id: Uuid,
    /// Capsule on sale
    pub capsule_id: CapsuleId,
    /// Seller, receives purchase proceeds
    pub issuer: UserId,
    /// Price per unit
    pub unit_price: Decimal,
    /// Units ever sellable
    pub total_supply: u64,
    /// Units sold so far
    pub sold_count: u64,
    /// Lifecycle status
    pub status: IssuanceStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last sale or status change
    pub updated_at: DateTime<Utc>,
}

impl Issuance {
    /// Units still available
    pub fn remaining(&self) -> u64 {
        self.total_supply.saturating_sub(self.sold_count)
    }

    /// Whether units can be bought
    pub fn is_active(&self) -> bool {
        self.status == IssuanceStatus::Active
    }
}

/// Read-only market aggregate, taken from one storage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSummary {
    /// Issuances currently active
    pub active_listings: u64,
    /// Units sold across all issuances
    pub total_sold: u64,
    /// Wallets in existence
    pub total_wallets: u64,
}

/// Stored balance compared with the balance derived from the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Wallet owner
    pub user_id: UserId,
    /// Balance held in the wallet store
    pub stored_balance: Decimal,
    /// Σ credits − Σ debits over the full log
    pub derived_balance: Decimal,
    /// Records scanned
    pub record_count: usize,
}

impl Reconciliation {
    /// Whether the log explains the balance
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.derived_balance
    }
}

/// Move funds between two wallets
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Sender
    pub from_user: String,
    /// Recipient
    pub to_user: String,
    /// Amount, must be positive
    pub amount: Decimal,
    /// Caller note
    pub memo: Option<String>,
    /// Reserved for exactly-once support
    pub client_token: Option<ClientToken>,
}

impl TransferRequest {
    /// Request without memo or token
    pub fn new(from_user: impl Into<String>, to_user: impl Into<String>, amount: Decimal) -> Self {
        Self {
            from_user: from_user.into(),
            to_user: to_user.into(),
            amount,
            memo: None,
            client_token: None,
        }
    }

    /// Attach a memo
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Attach a client token
    pub fn with_client_token(mut self, token: ClientToken) -> Self {
        self.client_token = Some(token);
        self
    }
}

/// List a capsule for sale
#[derive(Debug, Clone)]
pub struct IssueRequest {
    /// Capsule to list
    pub capsule_id: String,
    /// Seller
    pub issuer: String,
    /// Price per unit, must be positive
    pub unit_price: Decimal,
    /// Units for sale, must be positive
    pub total_supply: u64,
    /// Reserved for exactly-once support
    pub client_token: Option<ClientToken>,
}

impl IssueRequest {
    /// Request without token
    pub fn new(
        capsule_id: impl Into<String>,
        issuer: impl Into<String>,
        unit_price: Decimal,
        total_supply: u64,
    ) -> Self {
        Self {
            capsule_id: capsule_id.into(),
            issuer: issuer.into(),
            unit_price,
            total_supply,
            client_token: None,
        }
    }
}

/// Buy units of an active issuance
#[derive(Debug, Clone)]
pub struct BuyRequest {
    /// Capsule to buy
    pub capsule_id: String,
    /// Buyer
    pub buyer: String,
    /// Units, at least one
    pub unit_count: u64,
    /// Reserved for exactly-once support
    pub client_token: Option<ClientToken>,
}

impl BuyRequest {
    /// Request without token
    pub fn new(capsule_id: impl Into<String>, buyer: impl Into<String>, unit_count: u64) -> Self {
        Self {
            capsule_id: capsule_id.into(),
            buyer: buyer.into(),
            unit_count,
            client_token: None,
        }
    }

    /// Attach a client token
    pub fn with_client_token(mut self, token: ClientToken) -> Self {
        self.client_token = Some(token);
        self
    }
}

/// Credit a wallet with funds from outside the ledger
#[derive(Debug, Clone)]
pub struct DepositRequest {
    /// Wallet to credit
    pub user_id: String,
    /// Amount, must be positive
    pub amount: Decimal,
    /// Caller note
    pub memo: Option<String>,
    /// Reserved for exactly-once support
    pub client_token: Option<ClientToken>,
}

impl DepositRequest {
    /// Request without memo or token
    pub fn new(user_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
            memo: None,
            client_token: None,
        }
    }
}

// Caller-facing views

/// Wallet as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletView {
    /// Owner
    pub user_id: String,
    /// Current balance
    pub balance: Decimal,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl From<&Wallet> for WalletView {
    fn from(wallet: &Wallet) -> Self {
        Self {
            user_id: wallet.user_id.to_string(),
            balance: wallet.balance,
            created_at: wallet.created_at,
        }
    }
}

/// Committed transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Record ID
    pub tx_id: Uuid,
    /// Sender
    pub from: String,
    /// Recipient
    pub to: String,
    /// Amount moved
    pub amount: Decimal,
    /// Commit time
    pub created_at: DateTime<Utc>,
}

impl From<&TransactionRecord> for TransferReceipt {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            tx_id: record.id,
            from: record.from_user.as_ref().map(|u| u.to_string()).unwrap_or_default(),
            to: record.to_user.as_ref().map(|u| u.to_string()).unwrap_or_default(),
            amount: record.amount,
            created_at: record.created_at,
        }
    }
}

/// Created issuance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuanceReceipt {
    /// Issuance ID
    pub issuance_id: Uuid,
    /// Capsule listed
    pub capsule_id: String,
    /// Price per unit
    pub price: Decimal,
    /// Units for sale
    pub total_supply: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl From<&Issuance> for IssuanceReceipt {
    fn from(issuance: &Issuance) -> Self {
        Self {
            issuance_id: issuance.id,
            capsule_id: issuance.capsule_id.to_string(),
            price: issuance.unit_price,
            total_supply: issuance.total_supply,
            created_at: issuance.created_at,
        }
    }
}

/// Committed purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    /// Record ID
    pub tx_id: Uuid,
    /// Capsule bought
    pub capsule_id: String,
    /// Buyer
    pub buyer: String,
    /// Units bought
    pub amount: u64,
    /// Price paid
    pub total_price: Decimal,
    /// Commit time
    pub created_at: DateTime<Utc>,
}

impl From<&TransactionRecord> for PurchaseReceipt {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            tx_id: record.id,
            capsule_id: record.capsule_id.as_ref().map(|c| c.to_string()).unwrap_or_default(),
            buyer: record.from_user.as_ref().map(|u| u.to_string()).unwrap_or_default(),
            amount: record.unit_count.unwrap_or_default(),
            total_price: record.amount,
            created_at: record.created_at,
        }
    }
}

/// Service identity, for health probes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Always "running" while the handle is alive
    pub status: String,
}
