//! Capsule Ledger
//!
//! Durable wallet ledger for a capsule-trading service: balances, peer
//! transfers, capsule issuances with a supply cap, and purchases, all
//! recorded in an append-only transaction log.
//!
//! # Architecture
//!
//! - **Per-entity locks**: operations lock the wallets and capsules they
//!   touch, always in key order, so unrelated operations run in parallel
//! - **Unit of work**: every compound operation stages its writes and
//!   commits them as one RocksDB write batch
//! - **Bounded retry**: lock timeouts surface as `Busy` and are retried
//!   with backoff before reaching the caller
//!
//! # Invariants
//!
//! - No wallet balance is ever negative
//! - A transfer or purchase never creates or destroys money
//! - `sold_count` never exceeds `total_supply`
//! - A wallet's balance equals the signed sum of its log records

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod locks;
pub mod unit;
pub mod wallet;
pub mod issuance;
pub mod log;
pub mod ledger;
pub mod handle;
pub mod retry;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use handle::LedgerHandle;
pub use ledger::Ledger;
pub use storage::Storage;
pub use types::{
    BuyRequest, CapsuleId, ClientToken, DepositRequest, IssuanceReceipt, IssueRequest, Issuance,
    IssuanceStatus, MarketSummary, PurchaseReceipt, Reconciliation, ServiceInfo,
    TransactionKind, TransactionRecord, TransferReceipt, TransferRequest, UserId, Wallet,
    WalletView,
};
