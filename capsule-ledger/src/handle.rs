//! Async handle for the ledger
//!
//! Ledger operations block on RocksDB writes and entity locks, so every call
//! runs on Tokio's blocking pool. A unit of work commits or discards as a
//! whole inside that task, even if the awaiting caller is dropped.

use crate::{
    types::{
        BuyRequest, DepositRequest, IssuanceReceipt, IssueRequest, MarketSummary,
        PurchaseReceipt, Reconciliation, ServiceInfo, TransactionRecord, TransferReceipt,
        TransferRequest, WalletView,
    },
    Config, Error, Ledger, Result,
};
use std::sync::Arc;

/// Cloneable async front for a shared [`Ledger`]
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    ledger: Arc<Ledger>,
}

impl LedgerHandle {
    /// Wrap an opened ledger
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Open the ledger off the async runtime
    pub async fn open(config: Config) -> Result<Self> {
        let ledger = tokio::task::spawn_blocking(move || Ledger::open(config))
            .await
            .map_err(|e| Error::Concurrency(format!("Ledger open task failed: {}", e)))??;
        Ok(Self::new(Arc::new(ledger)))
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> Result<T> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| Error::Concurrency(format!("Ledger task failed: {}", e)))?
    }

    /// Existing wallet or a new empty one
    pub async fn get_or_create_wallet(&self, user_id: impl Into<String>) -> Result<WalletView> {
        let user_id = user_id.into();
        self.call(move |ledger| ledger.get_or_create_wallet(&user_id))
            .await
            .map(|w| WalletView::from(&w))
    }

    /// Create a wallet, failing if it already exists
    pub async fn open_wallet(&self, user_id: impl Into<String>) -> Result<WalletView> {
        let user_id = user_id.into();
        self.call(move |ledger| ledger.open_wallet(&user_id))
            .await
            .map(|w| WalletView::from(&w))
    }

    /// Credit funds from outside the ledger
    pub async fn deposit(&self, request: DepositRequest) -> Result<TransactionRecord> {
        self.call(move |ledger| ledger.deposit(request)).await
    }

    /// Move funds between two wallets
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt> {
        self.call(move |ledger| ledger.transfer(request))
            .await
            .map(|r| TransferReceipt::from(&r))
    }

    /// List a capsule for sale
    pub async fn issue(&self, request: IssueRequest) -> Result<IssuanceReceipt> {
        self.call(move |ledger| ledger.issue(request))
            .await
            .map(|i| IssuanceReceipt::from(&i))
    }

    /// Buy capsule units
    pub async fn buy(&self, request: BuyRequest) -> Result<PurchaseReceipt> {
        self.call(move |ledger| ledger.buy(request))
            .await
            .map(|r| PurchaseReceipt::from(&r))
    }

    /// Recent records for a user, newest first
    pub async fn list_transactions(
        &self,
        user_id: impl Into<String>,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionRecord>> {
        let user_id = user_id.into();
        self.call(move |ledger| ledger.list_transactions(&user_id, limit))
            .await
    }

    /// Market aggregate
    pub async fn market_summary(&self) -> Result<MarketSummary> {
        self.call(|ledger| ledger.market_summary()).await
    }

    /// Stored vs. derived balance for a user
    pub async fn reconcile(&self, user_id: impl Into<String>) -> Result<Reconciliation> {
        let user_id = user_id.into();
        self.call(move |ledger| ledger.reconcile(&user_id)).await
    }

    /// Service identity
    pub fn service_info(&self) -> ServiceInfo {
        let config = self.ledger.config();
        ServiceInfo {
            service: config.service_name.clone(),
            version: config.service_version.clone(),
            status: "running".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    async fn open_test_handle() -> (LedgerHandle, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        (LedgerHandle::open(config).await.unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_handle_wallet_views() {
        let (handle, _temp) = open_test_handle().await;

        let view = handle.get_or_create_wallet("alice").await.unwrap();
        assert_eq!(view.user_id, "alice");
        assert_eq!(view.balance, Decimal::ZERO);

        assert!(matches!(
            handle.open_wallet("alice").await,
            Err(Error::DuplicateWallet(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_trade_flow() {
        let (handle, _temp) = open_test_handle().await;
        handle
            .deposit(DepositRequest::new("buyerY", Decimal::from(100)))
            .await
            .unwrap();

        let issued = handle
            .issue(IssueRequest::new("cap-1", "issuerX", Decimal::from(10), 2))
            .await
            .unwrap();
        assert_eq!(issued.capsule_id, "cap-1");
        assert_eq!(issued.total_supply, 2);

        let purchase = handle.buy(BuyRequest::new("cap-1", "buyerY", 2)).await.unwrap();
        assert_eq!(purchase.amount, 2);
        assert_eq!(purchase.total_price, Decimal::from(20));

        let receipt = handle
            .transfer(TransferRequest::new("issuerX", "buyerY", Decimal::from(5)))
            .await
            .unwrap();
        assert_eq!(receipt.from, "issuerX");
        assert_eq!(receipt.to, "buyerY");

        let summary = handle.market_summary().await.unwrap();
        assert_eq!(summary.active_listings, 0);
        assert_eq!(summary.total_sold, 2);
        assert_eq!(summary.total_wallets, 2);

        let history = handle.list_transactions("buyerY", None).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, receipt.tx_id);

        assert!(handle.reconcile("issuerX").await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_handle_concurrent_clones() {
        let (handle, _temp) = open_test_handle().await;
        handle
            .deposit(DepositRequest::new("alice", Decimal::from(10)))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .transfer(TransferRequest::new("alice", "bob", Decimal::ONE))
                    .await
            }));
        }

        let mut succeeded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(Error::InsufficientFunds { .. }) | Err(Error::Busy(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        let alice = handle.get_or_create_wallet("alice").await.unwrap();
        assert_eq!(alice.balance, Decimal::from(10 - succeeded));
        assert!(alice.balance >= Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_service_info() {
        let (handle, _temp) = open_test_handle().await;
        let info = handle.service_info();
        assert_eq!(info.service, "capsule-ledger");
        assert_eq!(info.status, "running");
    }
}
