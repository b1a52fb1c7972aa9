//! Ledger engine
//!
//! Ties storage, locks, the three stores and the retry policy together into
//! the compound operations callers use. Each operation:
//!
//! 1. validates its arguments before touching anything,
//! 2. locks every entity it will read-check-write, in key order,
//! 3. stages its mutations in a [`UnitOfWork`],
//! 4. commits them as one batch, or drops the unit on the first failure.
//!
//! # Example
//!
//! ```no_run
//! use capsule_ledger::{Config, Ledger, TransferRequest};
//! use rust_decimal::Decimal;
//!
//! fn main() -> capsule_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!     let record = ledger.transfer(TransferRequest::new("alice", "bob", Decimal::from(30)))?;
//!     println!("{}", record.id);
//!     Ok(())
//! }
//! ```

use crate::{
    issuance::IssuanceRegistry,
    locks::{LockKey, LockManager},
    log::{validate_memo, History, TransactionLog},
    metrics::Metrics,
    retry::RetryPolicy,
    types::{
        BuyRequest, CapsuleId, DepositRequest, IssueRequest, Issuance, MarketSummary,
        NewTransaction, Reconciliation, TransactionRecord, TransferRequest, UserId, Wallet,
    },
    unit::UnitOfWork,
    wallet::WalletStore,
    Config, Error, Result, Storage,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger {
    storage: Arc<Storage>,
    locks: LockManager,
    wallets: WalletStore,
    issuances: IssuanceRegistry,
    log: TransactionLog,
    retry: RetryPolicy,
    metrics: Metrics,
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("storage", &self.storage)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            lock_timeout_ms = config.locking.acquire_timeout_ms,
            max_retries = config.retry.max_retries,
            "ledger opened"
        );

        Ok(Self {
            locks: LockManager::new(config.locking.acquire_timeout()),
            wallets: WalletStore::new(Arc::clone(&storage)),
            issuances: IssuanceRegistry::new(Arc::clone(&storage)),
            log: TransactionLog::new(Arc::clone(&storage)),
            retry: RetryPolicy::new(config.retry.clone()),
            storage,
            metrics,
            config,
        })
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn begin(&self, keys: impl IntoIterator<Item = LockKey>) -> Result<UnitOfWork<'_>> {
        let locks = self.locks.acquire(keys)?;
        self.metrics.record_lock_wait(locks.waited().as_secs_f64());
        Ok(UnitOfWork::new(&self.storage, locks))
    }

    /// Run a unit-of-work body under the retry policy, recording the outcome
    fn execute<T>(&self, operation: &'static str, mut body: impl FnMut() -> Result<T>) -> Result<T> {
        let result = self.retry.run(operation, || {
            let attempt = body();
            if matches!(&attempt, Err(e) if e.is_retryable()) {
                self.metrics.record_busy();
            }
            attempt
        });

        match &result {
            Ok(_) => self.metrics.record_success(operation),
            Err(e) => {
                self.metrics.record_failure(operation, e.kind());
                tracing::debug!(operation, error = %e, "operation failed");
            }
        }
        result
    }

    // Wallets

    /// Existing wallet or a new empty one
    pub fn get_or_create_wallet(&self, user_id: &str) -> Result<Wallet> {
        let user = UserId::parse(user_id)?;
        self.execute("get_or_create_wallet", || {
            let mut unit = self.begin([LockKey::Wallet(user.clone())])?;
            let wallet = self.wallets.get_or_create(&mut unit, &user)?;
            unit.commit()?;
            Ok(wallet)
        })
    }

    /// Create a wallet, failing with `DuplicateWallet` if it exists
    pub fn open_wallet(&self, user_id: &str) -> Result<Wallet> {
        let user = UserId::parse(user_id)?;
        self.execute("open_wallet", || {
            let mut unit = self.begin([LockKey::Wallet(user.clone())])?;
            let wallet = self.wallets.open(&mut unit, &user)?;
            unit.commit()?;
            tracing::info!(user_id = %user, "wallet opened");
            Ok(wallet)
        })
    }

    /// Committed wallet, without creating it
    pub fn wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        self.wallets.get(&UserId::parse(user_id)?)
    }

    /// Credit a wallet with funds entering from outside the ledger
    pub fn deposit(&self, request: DepositRequest) -> Result<TransactionRecord> {
        let user = UserId::parse(request.user_id)?;
        ensure_positive("amount", request.amount)?;
        validate_memo(request.memo.as_deref())?;

        self.execute("deposit", || {
            let mut unit = self.begin([LockKey::Wallet(user.clone())])?;
            self.wallets.adjust(&mut unit, &user, request.amount)?;
            let record = self.log.append(
                &mut unit,
                NewTransaction::deposit(user.clone(), request.amount)
                    .with_memo(request.memo.clone())
                    .with_client_token(request.client_token.clone()),
            )?;
            unit.commit()?;

            tracing::info!(
                tx_id = %record.id,
                user_id = %user,
                amount = %record.amount,
                "deposit committed"
            );
            Ok(record)
        })
    }

    // Compound operations

    /// Move `amount` from one wallet to another
    pub fn transfer(&self, request: TransferRequest) -> Result<TransactionRecord> {
        let from = UserId::parse(request.from_user)?;
        let to = UserId::parse(request.to_user)?;
        ensure_positive("amount", request.amount)?;
        validate_memo(request.memo.as_deref())?;
        if from == to {
            return Err(Error::InvalidArgument(format!(
                "cannot transfer from {} to itself",
                from
            )));
        }

        self.execute("transfer", || {
            let mut unit = self.begin([LockKey::Wallet(from.clone()), LockKey::Wallet(to.clone())])?;

            // Debit first: on InsufficientFunds nothing else is staged
            self.wallets.adjust(&mut unit, &from, -request.amount)?;
            self.wallets.adjust(&mut unit, &to, request.amount)?;
            let record = self.log.append(
                &mut unit,
                NewTransaction::transfer(from.clone(), to.clone(), request.amount)
                    .with_memo(request.memo.clone())
                    .with_client_token(request.client_token.clone()),
            )?;
            unit.commit()?;

            tracing::info!(
                tx_id = %record.id,
                from = %from,
                to = %to,
                amount = %record.amount,
                "transfer committed"
            );
            Ok(record)
        })
    }

    /// List a capsule for sale. Not a monetary event: no wallet or log writes.
    pub fn issue(&self, request: IssueRequest) -> Result<Issuance> {
        let capsule = CapsuleId::parse(request.capsule_id)?;
        let issuer = UserId::parse(request.issuer)?;

        self.execute("issue", || {
            let mut unit = self.begin([LockKey::Capsule(capsule.clone())])?;
            let issuance = self.issuances.create(
                &mut unit,
                &capsule,
                &issuer,
                request.unit_price,
                request.total_supply,
            )?;
            unit.commit()?;

            tracing::info!(
                issuance_id = %issuance.id,
                capsule_id = %capsule,
                issuer = %issuer,
                unit_price = %issuance.unit_price,
                total_supply = issuance.total_supply,
                "capsule issued"
            );
            Ok(issuance)
        })
    }

    /// Latest committed issuance for a capsule
    pub fn issuance(&self, capsule_id: &str) -> Result<Option<Issuance>> {
        self.issuances.get(&CapsuleId::parse(capsule_id)?)
    }

    /// Buy `unit_count` units of the capsule's active issuance.
    ///
    /// If the buyer cannot pay, the unit is dropped with the reservation in
    /// it, so supply is never consumed without payment.
    pub fn buy(&self, request: BuyRequest) -> Result<TransactionRecord> {
        let capsule = CapsuleId::parse(request.capsule_id)?;
        let buyer = UserId::parse(request.buyer)?;
        if request.unit_count == 0 {
            return Err(Error::InvalidArgument(
                "unit count must be at least 1".to_string(),
            ));
        }

        self.execute("buy", || {
            // The issuer wallet must be locked too, so learn who it is first
            let issuer = self
                .issuances
                .get(&capsule)?
                .ok_or_else(|| Error::IssuanceNotFound(capsule.to_string()))?
                .issuer;

            let mut unit = self.begin([
                LockKey::Capsule(capsule.clone()),
                LockKey::Wallet(buyer.clone()),
                LockKey::Wallet(issuer.clone()),
            ])?;

            let reserved = self
                .issuances
                .reserve_units(&mut unit, &capsule, request.unit_count)?;
            if reserved.issuer != issuer {
                // Re-issued between lookup and lock; retry with the new issuer
                return Err(Error::Busy(format!(
                    "capsule {} changed issuer during purchase",
                    capsule
                )));
            }

            let total_price = reserved
                .unit_price
                .checked_mul(Decimal::from(request.unit_count))
                .ok_or_else(|| Error::InvalidArgument("total price overflow".to_string()))?;

            self.wallets.adjust(&mut unit, &buyer, -total_price)?;
            self.wallets.adjust(&mut unit, &issuer, total_price)?;
            let record = self.log.append(
                &mut unit,
                NewTransaction::buy(
                    capsule.clone(),
                    buyer.clone(),
                    issuer.clone(),
                    request.unit_count,
                    total_price,
                )
                .with_client_token(request.client_token.clone()),
            )?;
            unit.commit()?;

            self.metrics.record_units_sold(request.unit_count);
            tracing::info!(
                tx_id = %record.id,
                capsule_id = %capsule,
                buyer = %buyer,
                issuer = %issuer,
                units = request.unit_count,
                total_price = %total_price,
                sold_count = reserved.sold_count,
                status = reserved.status.as_str(),
                "purchase committed"
            );
            Ok(record)
        })
    }

    // Reads

    /// Up to `limit` of the user's records, newest first.
    ///
    /// `None` uses the configured default; limits above the configured
    /// maximum are clamped.
    pub fn list_transactions(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionRecord>> {
        let user = UserId::parse(user_id)?;
        let limit = match limit {
            Some(0) => {
                return Err(Error::InvalidArgument(
                    "limit must be at least 1".to_string(),
                ))
            }
            Some(n) => n.min(self.config.history.max_limit),
            None => self.config.history.default_limit,
        };

        let records = self.log.list_for_user(&user, limit)?;
        tracing::debug!(user_id = %user, limit, returned = records.len(), "listed transactions");
        Ok(records)
    }

    /// Lazy newest-first walk over a user's full history
    pub fn history(&self, user_id: &str) -> Result<History<'_>> {
        self.log.history(&UserId::parse(user_id)?)
    }

    /// Record by ID
    pub fn transaction(&self, tx_id: Uuid) -> Result<Option<TransactionRecord>> {
        self.log.get(tx_id)
    }

    /// Market aggregate from one storage snapshot
    pub fn market_summary(&self) -> Result<MarketSummary> {
        let snapshot = self.storage.snapshot();
        let registry = self.issuances.summary(&snapshot)?;
        Ok(MarketSummary {
            active_listings: registry.active_listings,
            total_sold: registry.total_sold,
            total_wallets: self.wallets.count(&snapshot)?,
        })
    }

    /// Compare the stored balance with the balance the log explains.
    ///
    /// Holds the wallet lock so no commit lands between the two reads.
    pub fn reconcile(&self, user_id: &str) -> Result<Reconciliation> {
        let user = UserId::parse(user_id)?;
        self.execute("reconcile", || {
            let unit = self.begin([LockKey::Wallet(user.clone())])?;
            let stored_balance = unit
                .wallet(&user)?
                .map(|w| w.balance)
                .unwrap_or(Decimal::ZERO);

            let mut derived_balance = Decimal::ZERO;
            let mut record_count = 0;
            for record in self.log.history(&user)? {
                derived_balance += record?.signed_amount_for(&user);
                record_count += 1;
            }

            let reconciliation = Reconciliation {
                user_id: user.clone(),
                stored_balance,
                derived_balance,
                record_count,
            };
            if !reconciliation.is_consistent() {
                tracing::error!(
                    user_id = %user,
                    stored = %stored_balance,
                    derived = %derived_balance,
                    "wallet does not reconcile with transaction log"
                );
            }
            Ok(reconciliation)
        })
    }
}

fn ensure_positive(field: &str, amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidArgument(format!(
            "{} must be positive, got {}",
            field, amount
        )));
    }
    Ok(())
}
