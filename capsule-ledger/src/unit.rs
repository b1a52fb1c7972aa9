//! Unit of work: the transactional context for one ledger operation
//!
//! A unit holds the locks for every entity it touches and stages all writes
//! in memory. Reads see the unit's own staged writes first, then committed
//! storage. [`UnitOfWork::commit`] turns the staged state into a single
//! RocksDB `WriteBatch`; dropping a unit without committing discards
//! everything it staged, which is how failed steps unwind.

use crate::{
    locks::{LockKey, LockSet},
    types::{CapsuleId, Issuance, TransactionRecord, UserId, Wallet},
    Error, Result, Storage,
};
use rocksdb::WriteBatch;
use std::collections::BTreeMap;

/// Scoped transactional context
pub struct UnitOfWork<'a> {
    storage: &'a Storage,
    locks: LockSet,
    wallets: BTreeMap<UserId, Wallet>,
    issuances: BTreeMap<CapsuleId, Issuance>,
    records: Vec<TransactionRecord>,
    committed: bool,
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("locks", &self.locks)
            .field("wallets", &self.wallets.len())
            .field("issuances", &self.issuances.len())
            .field("records", &self.records.len())
            .finish()
    }
}

impl<'a> UnitOfWork<'a> {
    /// Start a unit over already-acquired locks
    pub fn new(storage: &'a Storage, locks: LockSet) -> Self {
        Self {
            storage,
            locks,
            wallets: BTreeMap::new(),
            issuances: BTreeMap::new(),
            records: Vec::new(),
            committed: false,
        }
    }

    /// Backing storage
    pub fn storage(&self) -> &'a Storage {
        self.storage
    }

    fn ensure_locked(&self, key: LockKey) -> Result<()> {
        if self.locks.holds(&key) {
            Ok(())
        } else {
            Err(Error::InvariantViolation(format!(
                "unit of work accessed {} without holding its lock",
                key
            )))
        }
    }

    /// Read a wallet as this unit sees it
    pub fn wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        self.ensure_locked(LockKey::Wallet(user_id.clone()))?;
        if let Some(staged) = self.wallets.get(user_id) {
            return Ok(Some(staged.clone()));
        }
        self.storage.get_wallet(user_id)
    }

    /// Stage a wallet write
    pub fn put_wallet(&mut self, wallet: Wallet) -> Result<()> {
        self.ensure_locked(LockKey::Wallet(wallet.user_id.clone()))?;
        if wallet.balance < rust_decimal::Decimal::ZERO {
            return Err(Error::InvariantViolation(format!(
                "wallet {} staged with negative balance {}",
                wallet.user_id, wallet.balance
            )));
        }
        self.wallets.insert(wallet.user_id.clone(), wallet);
        Ok(())
    }

    /// Read the latest issuance for a capsule as this unit sees it
    pub fn issuance(&self, capsule_id: &CapsuleId) -> Result<Option<Issuance>> {
        self.ensure_locked(LockKey::Capsule(capsule_id.clone()))?;
        if let Some(staged) = self.issuances.get(capsule_id) {
            return Ok(Some(staged.clone()));
        }
        self.storage.get_capsule_issuance(capsule_id)
    }

    /// Stage an issuance write
    pub fn put_issuance(&mut self, issuance: Issuance) -> Result<()> {
        self.ensure_locked(LockKey::Capsule(issuance.capsule_id.clone()))?;
        if issuance.sold_count > issuance.total_supply {
            return Err(Error::InvariantViolation(format!(
                "issuance {} staged with sold_count {} above supply {}",
                issuance.capsule_id, issuance.sold_count, issuance.total_supply
            )));
        }
        self.issuances.insert(issuance.capsule_id.clone(), issuance);
        Ok(())
    }

    /// Stage a log record
    pub fn push_record(&mut self, record: TransactionRecord) {
        self.records.push(record);
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty() && self.issuances.is_empty() && self.records.is_empty()
    }

    /// Write everything staged as one atomic batch, then release the locks
    pub fn commit(mut self) -> Result<()> {
        if !self.is_empty() {
            let mut batch = WriteBatch::default();
            for wallet in self.wallets.values() {
                self.storage.batch_put_wallet(&mut batch, wallet)?;
            }
            for issuance in self.issuances.values() {
                self.storage.batch_put_issuance(&mut batch, issuance)?;
            }
            for record in &self.records {
                self.storage.batch_put_transaction(&mut batch, record)?;
            }
            self.storage.write_batch(batch)?;
        }

        self.committed = true;
        tracing::debug!(
            wallets = self.wallets.len(),
            issuances = self.issuances.len(),
            records = self.records.len(),
            "unit of work committed"
        );
        Ok(())
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.is_empty() {
            tracing::debug!(
                wallets = self.wallets.len(),
                issuances = self.issuances.len(),
                records = self.records.len(),
                "unit of work discarded"
            );
        }
    }
}
