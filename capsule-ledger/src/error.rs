//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or non-positive amount, self-transfer, zero quantity, bad identifier
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Balance too low for the requested debit
    #[error("Insufficient funds for {user_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Wallet owner
        user_id: String,
        /// Balance at the time of the check
        balance: Decimal,
        /// Amount that was to be debited
        requested: Decimal,
    },

    /// No issuance (or only a withdrawn one) exists for the capsule
    #[error("Issuance not found: {0}")]
    IssuanceNotFound(String),

    /// An active issuance already exists for the capsule
    #[error("Duplicate issuance: capsule {0} already has an active issuance")]
    DuplicateIssuance(String),

    /// Not enough units left to satisfy the request
    #[error("Issuance sold out: capsule {capsule_id}, requested {requested}, remaining {remaining}")]
    IssuanceSoldOut {
        /// Capsule being bought
        capsule_id: String,
        /// Units requested
        requested: u64,
        /// Units still available
        remaining: u64,
    },

    /// Strict wallet creation found an existing wallet
    #[error("Wallet already exists: {0}")]
    DuplicateWallet(String),

    /// Lock contention, retryable
    #[error("Busy: {0}")]
    Busy(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invariant violation (unit touched an unlocked entity, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (blocking task lost, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification shared with callers and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::InvalidArgument`]
    InvalidArgument,
    /// See [`Error::InsufficientFunds`]
    InsufficientFunds,
    /// See [`Error::IssuanceNotFound`]
    IssuanceNotFound,
    /// See [`Error::DuplicateIssuance`]
    DuplicateIssuance,
    /// See [`Error::IssuanceSoldOut`]
    IssuanceSoldOut,
    /// See [`Error::DuplicateWallet`]
    DuplicateWallet,
    /// See [`Error::Busy`]
    Busy,
    /// Durability layer unavailable or corrupt
    StorageFailure,
    /// Bug or environment problem, never a business outcome
    Internal,
}

impl ErrorKind {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::IssuanceNotFound => "issuance_not_found",
            ErrorKind::DuplicateIssuance => "duplicate_issuance",
            ErrorKind::IssuanceSoldOut => "issuance_sold_out",
            ErrorKind::DuplicateWallet => "duplicate_wallet",
            ErrorKind::Busy => "busy",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Error::IssuanceNotFound(_) => ErrorKind::IssuanceNotFound,
            Error::DuplicateIssuance(_) => ErrorKind::DuplicateIssuance,
            Error::IssuanceSoldOut { .. } => ErrorKind::IssuanceSoldOut,
            Error::DuplicateWallet(_) => ErrorKind::DuplicateWallet,
            Error::Busy(_) => ErrorKind::Busy,
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => {
                ErrorKind::StorageFailure
            }
            Error::InvariantViolation(_) | Error::Concurrency(_) | Error::Config(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only lock contention is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
