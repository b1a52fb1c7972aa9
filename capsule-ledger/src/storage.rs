//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallets (key: user_id)
//! - `issuances` - Issuances, current and historical (key: issuance_id)
//! - `capsules` - Latest issuance per capsule (key: capsule_id, value: issuance_id)
//! - `transactions` - Append-only transaction log (key: sequence, big-endian)
//! - `tx_ids` - Record lookup by ID (key: tx_id, value: sequence)
//! - `user_tx` - Participant index (key: user_id || 0x00 || sequence)
//!
//! Every mutation goes through [`Storage::write_batch`], so a unit of work
//! lands completely or not at all.

use crate::{
    error::{Error, Result},
    types::{CapsuleId, Issuance, TransactionRecord, UserId, Wallet},
    Config,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBIterator, Direction, IteratorMode, Options, Snapshot,
    WriteBatch, WriteOptions, DB,
};
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_ISSUANCES: &str = "issuances";
const CF_CAPSULES: &str = "capsules";
const CF_TRANSACTIONS: &str = "transactions";
const CF_TX_IDS: &str = "tx_ids";
const CF_USER_TX: &str = "user_tx";

/// Separates the user ID from the sequence in `user_tx` keys
const KEY_SEPARATOR: u8 = 0x00;

/// Next sequence number and the timestamp handed out with the previous one
struct Stamp {
    next_sequence: u64,
    last_timestamp: DateTime<Utc>,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    stamp: Mutex<Stamp>,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_ISSUANCES, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_CAPSULES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_TX_IDS, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_USER_TX, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let next_sequence = Self::recover_next_sequence(&db)?;

        tracing::info!(
            path = ?path,
            next_sequence,
            "Opened RocksDB for capsule ledger"
        );

        Ok(Self {
            db,
            stamp: Mutex::new(Stamp {
                next_sequence,
                last_timestamp: DateTime::<Utc>::MIN_UTC,
            }),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // State is frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn recover_next_sequence(db: &DB) -> Result<u64> {
        let cf = db
            .cf_handle(CF_TRANSACTIONS)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_TRANSACTIONS)))?;

        match db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(decode_sequence(&key)? + 1)
            }
            None => Ok(1),
        }
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Allocate the next log sequence together with a non-decreasing timestamp,
    /// so sequence order and creation-time order agree.
    pub fn next_stamp(&self) -> (u64, DateTime<Utc>) {
        let mut stamp = self.stamp.lock();
        let sequence = stamp.next_sequence;
        stamp.next_sequence += 1;
        let now = Utc::now().max(stamp.last_timestamp);
        stamp.last_timestamp = now;
        (sequence, now)
    }

    /// Point-in-time view for consistent multi-collection reads
    pub fn snapshot(&self) -> Snapshot<'_> {
        self.db.snapshot()
    }

    // Wallet operations

    /// Get wallet by user
    pub fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        match self.db.get_cf(cf, user_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Stage wallet write
    pub fn batch_put_wallet(&self, batch: &mut WriteBatch, wallet: &Wallet) -> Result<()> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let value = bincode::serialize(wallet)?;
        batch.put_cf(cf, wallet.user_id.as_str().as_bytes(), &value);
        Ok(())
    }

    /// Count wallets as of the snapshot
    pub fn count_wallets(&self, snapshot: &Snapshot<'_>) -> Result<u64> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let mut count = 0u64;
        for item in snapshot.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    // Issuance operations

    /// Get issuance by ID
    pub fn get_issuance(&self, issuance_id: Uuid) -> Result<Option<Issuance>> {
        let cf = self.cf_handle(CF_ISSUANCES)?;
        match self.db.get_cf(cf, issuance_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get the latest issuance for a capsule (via index)
    pub fn get_capsule_issuance(&self, capsule_id: &CapsuleId) -> Result<Option<Issuance>> {
        let cf = self.cf_handle(CF_CAPSULES)?;
        let Some(value) = self.db.get_cf(cf, capsule_id.as_str().as_bytes())? else {
            return Ok(None);
        };

        let id_bytes: [u8; 16] = value.as_slice().try_into().map_err(|_| {
            Error::Storage(format!("Corrupt capsule index entry for {}", capsule_id))
        })?;
        let issuance = self.get_issuance(Uuid::from_bytes(id_bytes))?.ok_or_else(|| {
            Error::Storage(format!("Capsule index for {} points at a missing issuance", capsule_id))
        })?;
        Ok(Some(issuance))
    }

    /// Stage issuance write and repoint the capsule index at it
    pub fn batch_put_issuance(&self, batch: &mut WriteBatch, issuance: &Issuance) -> Result<()> {
        let cf_issuances = self.cf_handle(CF_ISSUANCES)?;
        let value = bincode::serialize(issuance)?;
        batch.put_cf(cf_issuances, issuance.id.as_bytes(), &value);

        let cf_capsules = self.cf_handle(CF_CAPSULES)?;
        batch.put_cf(
            cf_capsules,
            issuance.capsule_id.as_str().as_bytes(),
            issuance.id.as_bytes(),
        );
        Ok(())
    }

    /// Scan all issuances as of the snapshot
    pub fn scan_issuances(&self, snapshot: &Snapshot<'_>) -> Result<Vec<Issuance>> {
        let cf = self.cf_handle(CF_ISSUANCES)?;
        let mut issuances = Vec::new();
        for item in snapshot.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            issuances.push(bincode::deserialize(&value)?);
        }
        Ok(issuances)
    }

    // Transaction log operations

    /// Stage record write with ID and participant indices
    pub fn batch_put_transaction(
        &self,
        batch: &mut WriteBatch,
        record: &TransactionRecord,
    ) -> Result<()> {
        let seq_key = record.sequence.to_be_bytes();

        // 1. Record
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let value = bincode::serialize(record)?;
        batch.put_cf(cf_transactions, &seq_key, &value);

        // 2. ID index
        let cf_tx_ids = self.cf_handle(CF_TX_IDS)?;
        batch.put_cf(cf_tx_ids, record.id.as_bytes(), &seq_key);

        // 3. Participant indices
        let cf_user_tx = self.cf_handle(CF_USER_TX)?;
        if let Some(from) = &record.from_user {
            batch.put_cf(cf_user_tx, Self::index_key_user_tx(from, record.sequence), &seq_key);
        }
        if let Some(to) = &record.to_user {
            if record.from_user.as_ref() != Some(to) {
                batch.put_cf(cf_user_tx, Self::index_key_user_tx(to, record.sequence), &seq_key);
            }
        }

        Ok(())
    }

    /// Get record by sequence
    pub fn get_transaction(&self, sequence: u64) -> Result<Option<TransactionRecord>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, sequence.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get record by ID (via index)
    pub fn get_transaction_by_id(&self, tx_id: Uuid) -> Result<Option<TransactionRecord>> {
        let cf = self.cf_handle(CF_TX_IDS)?;
        match self.db.get_cf(cf, tx_id.as_bytes())? {
            Some(value) => self.get_transaction(decode_sequence(&value)?),
            None => Ok(None),
        }
    }

    /// Iterate a user's index entries, newest first
    pub fn user_tx_iterator(&self, user_id: &UserId) -> Result<DBIterator<'_>> {
        let cf = self.cf_handle(CF_USER_TX)?;
        let start = Self::index_key_user_tx(user_id, u64::MAX);
        Ok(self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Reverse)))
    }

    /// Prefix shared by all of a user's index keys
    pub fn user_tx_prefix(user_id: &UserId) -> Vec<u8> {
        let mut key = user_id.as_str().as_bytes().to_vec();
        key.push(KEY_SEPARATOR);
        key
    }

    fn index_key_user_tx(user_id: &UserId, sequence: u64) -> Vec<u8> {
        let mut key = Self::user_tx_prefix(user_id);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    // Batch operations (atomic)

    /// Commit a staged batch atomically
    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }
}

/// Decode a big-endian sequence key or value
pub(crate) fn decode_sequence(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("Corrupt sequence of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssuanceStatus, TransactionKind};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (config, temp_dir)
    }

    fn test_record(storage: &Storage, from: &str, to: &str) -> TransactionRecord {
        let (sequence, created_at) = storage.next_stamp();
        TransactionRecord {
            id: Uuid::now_v7(),
            sequence,
            from_user: Some(UserId::parse(from).unwrap()),
            to_user: Some(UserId::parse(to).unwrap()),
            amount: Decimal::new(1500, 2),
            kind: TransactionKind::Transfer,
            capsule_id: None,
            unit_count: None,
            memo: None,
            client_token: None,
            created_at,
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_WALLETS).is_some());
        assert!(storage.db.cf_handle(CF_USER_TX).is_some());
    }

    #[test]
    fn test_wallet_put_and_get() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let user = UserId::parse("alice").unwrap();
        let mut wallet = Wallet::new(user.clone(), Utc::now());
        wallet.balance = Decimal::from(42);

        let mut batch = WriteBatch::default();
        storage.batch_put_wallet(&mut batch, &wallet).unwrap();
        storage.write_batch(batch).unwrap();

        assert_eq!(storage.get_wallet(&user).unwrap(), Some(wallet));
        assert!(storage
            .get_wallet(&UserId::parse("bob").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_capsule_index_tracks_latest_issuance() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let now = Utc::now();

        let capsule = CapsuleId::parse("cap-1").unwrap();
        let first = Issuance {
            id: Uuid::now_v7(),
            capsule_id: capsule.clone(),
            issuer: UserId::parse("issuerX").unwrap(),
            unit_price: Decimal::from(10),
            total_supply: 1,
            sold_count: 1,
            status: IssuanceStatus::SoldOut,
            created_at: now,
            updated_at: now,
        };
        let second = Issuance {
            id: Uuid::now_v7(),
            sold_count: 0,
            status: IssuanceStatus::Active,
            ..first.clone()
        };

        for issuance in [&first, &second] {
            let mut batch = WriteBatch::default();
            storage.batch_put_issuance(&mut batch, issuance).unwrap();
            storage.write_batch(batch).unwrap();
        }

        let latest = storage.get_capsule_issuance(&capsule).unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(storage.scan_issuances(&storage.snapshot()).unwrap().len(), 2);
    }

    #[test]
    fn test_transaction_indices() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let record = test_record(&storage, "alice", "bob");
        let mut batch = WriteBatch::default();
        storage.batch_put_transaction(&mut batch, &record).unwrap();
        storage.write_batch(batch).unwrap();

        assert_eq!(storage.get_transaction_by_id(record.id).unwrap(), Some(record.clone()));

        let bob = UserId::parse("bob").unwrap();
        let prefix = Storage::user_tx_prefix(&bob);
        let keys: Vec<_> = storage
            .user_tx_iterator(&bob)
            .unwrap()
            .map(|item| item.unwrap().0)
            .take_while(|key| key.starts_with(&prefix))
            .collect();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_sequence_recovered_after_reopen() {
        let (config, _temp) = test_config();

        let last = {
            let storage = Storage::open(&config).unwrap();
            let record = test_record(&storage, "alice", "bob");
            let mut batch = WriteBatch::default();
            storage.batch_put_transaction(&mut batch, &record).unwrap();
            storage.write_batch(batch).unwrap();
            record.sequence
        };

        let storage = Storage::open(&config).unwrap();
        let (next, _) = storage.next_stamp();
        assert_eq!(next, last + 1);
    }

    #[test]
    fn test_stamps_are_monotonic() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let (s1, t1) = storage.next_stamp();
        let (s2, t2) = storage.next_stamp();
        assert!(s2 > s1);
        assert!(t2 >= t1);
    }
}
