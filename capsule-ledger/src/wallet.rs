//! Wallet store
//!
//! Durable user → balance mapping. Mutations happen only inside a
//! [`UnitOfWork`] holding the wallet's lock; the store never writes log
//! records itself.

use crate::{
    types::{UserId, Wallet},
    unit::UnitOfWork,
    Error, Result, Storage,
};
use chrono::Utc;
use rocksdb::Snapshot;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Wallet store
#[derive(Debug, Clone)]
pub struct WalletStore {
    storage: Arc<Storage>,
}

impl WalletStore {
    /// Create store over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Committed wallet, without creating it
    pub fn get(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        self.storage.get_wallet(user_id)
    }

    /// Existing wallet, or a new empty one staged in the unit.
    ///
    /// The unit holds the wallet lock, so two callers cannot both see
    /// "absent" and insert.
    pub fn get_or_create(&self, unit: &mut UnitOfWork<'_>, user_id: &UserId) -> Result<Wallet> {
        if let Some(wallet) = unit.wallet(user_id)? {
            return Ok(wallet);
        }

        let wallet = Wallet::new(user_id.clone(), Utc::now());
        unit.put_wallet(wallet.clone())?;
        tracing::debug!(user_id = %user_id, "wallet created");
        Ok(wallet)
    }

    /// Create a wallet, failing if it already exists
    pub fn open(&self, unit: &mut UnitOfWork<'_>, user_id: &UserId) -> Result<Wallet> {
        if unit.wallet(user_id)?.is_some() {
            return Err(Error::DuplicateWallet(user_id.to_string()));
        }
        self.get_or_create(unit, user_id)
    }

    /// Apply `delta` to the balance; a debit that would go negative fails
    /// with `InsufficientFunds` and stages nothing.
    pub fn adjust(
        &self,
        unit: &mut UnitOfWork<'_>,
        user_id: &UserId,
        delta: Decimal,
    ) -> Result<Wallet> {
        let mut wallet = self.get_or_create(unit, user_id)?;

        let balance = wallet.balance.checked_add(delta).ok_or_else(|| {
            Error::InvalidArgument(format!("balance overflow for {}", user_id))
        })?;
        if balance < Decimal::ZERO {
            return Err(Error::InsufficientFunds {
                user_id: user_id.to_string(),
                balance: wallet.balance,
                requested: -delta,
            });
        }

        wallet.balance = balance;
        wallet.updated_at = Utc::now();
        unit.put_wallet(wallet.clone())?;
        Ok(wallet)
    }

    /// Number of wallets as of `snapshot`
    pub fn count(&self, snapshot: &Snapshot<'_>) -> Result<u64> {
        self.storage.count_wallets(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::{LockKey, LockManager};
    use crate::Config;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        storage: Arc<Storage>,
        locks: LockManager,
        store: WalletStore,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        let storage = Arc::new(Storage::open(&config).unwrap());
        Fixture {
            store: WalletStore::new(Arc::clone(&storage)),
            storage,
            locks: LockManager::new(Duration::from_millis(50)),
            _temp: temp,
        }
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    impl Fixture {
        fn unit(&self, users: &[&str]) -> UnitOfWork<'_> {
            let keys = users.iter().map(|u| LockKey::Wallet(user(u)));
            UnitOfWork::new(&self.storage, self.locks.acquire(keys).unwrap())
        }

        fn fund(&self, id: &str, amount: i64) {
            let mut unit = self.unit(&[id]);
            self.store.adjust(&mut unit, &user(id), Decimal::from(amount)).unwrap();
            unit.commit().unwrap();
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let f = fixture();

        let mut unit = f.unit(&["alice"]);
        let first = f.store.get_or_create(&mut unit, &user("alice")).unwrap();
        unit.commit().unwrap();

        let mut unit = f.unit(&["alice"]);
        let second = f.store.get_or_create(&mut unit, &user("alice")).unwrap();
        assert!(unit.is_empty());
        drop(unit);

        assert_eq!(first, second);
        assert_eq!(second.balance, Decimal::ZERO);
        assert_eq!(f.store.count(&f.storage.snapshot()).unwrap(), 1);
    }

    #[test]
    fn test_open_rejects_existing_wallet() {
        let f = fixture();
        f.fund("alice", 1);

        let mut unit = f.unit(&["alice"]);
        let err = f.store.open(&mut unit, &user("alice")).unwrap_err();
        assert!(matches!(err, Error::DuplicateWallet(_)));
    }

    #[test]
    fn test_adjust_credit_and_debit() {
        let f = fixture();
        f.fund("alice", 100);

        let mut unit = f.unit(&["alice"]);
        let wallet = f.store.adjust(&mut unit, &user("alice"), Decimal::from(-30)).unwrap();
        unit.commit().unwrap();

        assert_eq!(wallet.balance, Decimal::from(70));
        assert_eq!(
            f.store.get(&user("alice")).unwrap().unwrap().balance,
            Decimal::from(70)
        );
    }

    #[test]
    fn test_adjust_rejects_overdraft() {
        let f = fixture();
        f.fund("alice", 10);

        let mut unit = f.unit(&["alice"]);
        let err = f
            .store
            .adjust(&mut unit, &user("alice"), Decimal::from(-11))
            .unwrap_err();
        drop(unit);

        match err {
            Error::InsufficientFunds { balance, requested, .. } => {
                assert_eq!(balance, Decimal::from(10));
                assert_eq!(requested, Decimal::from(11));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            f.store.get(&user("alice")).unwrap().unwrap().balance,
            Decimal::from(10)
        );
    }

    #[test]
    fn test_debit_to_exactly_zero() {
        let f = fixture();
        f.fund("alice", 10);

        let mut unit = f.unit(&["alice"]);
        let wallet = f.store.adjust(&mut unit, &user("alice"), Decimal::from(-10)).unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
    }
}
