//! Transaction log
//!
//! Append-only record of every balance-affecting event. Records are staged
//! in the caller's unit of work and become visible when it commits; nothing
//! here updates or deletes a record.

use crate::{
    storage::decode_sequence,
    types::{NewTransaction, TransactionKind, TransactionRecord, UserId},
    unit::UnitOfWork,
    Error, Result, Storage,
};
use rocksdb::DBIterator;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Longest memo accepted on a record
pub const MAX_MEMO_LEN: usize = 512;

/// Transaction log
#[derive(Debug, Clone)]
pub struct TransactionLog {
    storage: Arc<Storage>,
}

impl TransactionLog {
    /// Create log over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Stage a record, assigning ID, timestamp and sequence
    pub fn append(
        &self,
        unit: &mut UnitOfWork<'_>,
        draft: NewTransaction,
    ) -> Result<TransactionRecord> {
        validate_draft(&draft)?;

        let (sequence, stamped_at) = unit.storage().next_stamp();
        let record = TransactionRecord {
            id: draft.id.unwrap_or_else(Uuid::now_v7),
            sequence,
            from_user: draft.from_user,
            to_user: draft.to_user,
            amount: draft.amount,
            kind: draft.kind,
            capsule_id: draft.capsule_id,
            unit_count: draft.unit_count,
            memo: draft.memo,
            client_token: draft.client_token,
            created_at: draft.created_at.unwrap_or(stamped_at),
        };

        unit.push_record(record.clone());
        Ok(record)
    }

    /// Record by ID
    pub fn get(&self, tx_id: Uuid) -> Result<Option<TransactionRecord>> {
        self.storage.get_transaction_by_id(tx_id)
    }

    /// Lazy newest-first iterator over the user's records.
    ///
    /// Finite: it ends at the user's oldest record. Call again to restart.
    pub fn history(&self, user_id: &UserId) -> Result<History<'_>> {
        Ok(History {
            storage: &self.storage,
            inner: self.storage.user_tx_iterator(user_id)?,
            prefix: Storage::user_tx_prefix(user_id),
            done: false,
        })
    }

    /// Up to `limit` of the user's records, newest first
    pub fn list_for_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<TransactionRecord>> {
        self.history(user_id)?.take(limit).collect()
    }
}

/// Reject memos longer than [`MAX_MEMO_LEN`] bytes
pub fn validate_memo(memo: Option<&str>) -> Result<()> {
    match memo {
        Some(memo) if memo.len() > MAX_MEMO_LEN => Err(Error::InvalidArgument(format!(
            "memo longer than {} bytes",
            MAX_MEMO_LEN
        ))),
        _ => Ok(()),
    }
}

fn validate_draft(draft: &NewTransaction) -> Result<()> {
    if draft.amount <= Decimal::ZERO {
        return Err(Error::InvalidArgument(format!(
            "record amount must be positive, got {}",
            draft.amount
        )));
    }
    validate_memo(draft.memo.as_deref())?;

    let shape_ok = match draft.kind {
        TransactionKind::Transfer => {
            draft.from_user.is_some()
                && draft.to_user.is_some()
                && draft.from_user != draft.to_user
                && draft.capsule_id.is_none()
        }
        TransactionKind::Buy => {
            draft.from_user.is_some()
                && draft.to_user.is_some()
                && draft.capsule_id.is_some()
                && matches!(draft.unit_count, Some(n) if n > 0)
        }
        TransactionKind::Deposit => {
            draft.from_user.is_none() && draft.to_user.is_some() && draft.capsule_id.is_none()
        }
    };

    if shape_ok {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "participants do not match a {} record",
            draft.kind
        )))
    }
}

/// Newest-first walk over one user's records
pub struct History<'a> {
    storage: &'a Storage,
    inner: DBIterator<'a>,
    prefix: Vec<u8>,
    done: bool,
}

impl std::fmt::Debug for History<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("prefix", &self.prefix)
            .field("done", &self.done)
            .finish()
    }
}

impl Iterator for History<'_> {
    type Item = Result<TransactionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let (key, value) = match self.inner.next()? {
            Ok(entry) => entry,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };

        if !key.starts_with(&self.prefix) {
            self.done = true;
            return None;
        }

        let record = decode_sequence(&value).and_then(|sequence| {
            self.storage.get_transaction(sequence)?.ok_or_else(|| {
                Error::Storage(format!("index points at missing record {}", sequence))
            })
        });
        if record.is_err() {
            self.done = true;
        }
        Some(record)
    }
}
