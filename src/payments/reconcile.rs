//! Payment Reconciliation
//!
//! Polls the provider for incoming transfers and credits each one to the
//! user named in its memo, exactly once per transaction id. Passes may run
//! on a timer and on demand at the same time; the dedup check and the
//! credit happen under the table lock, so overlapping passes never credit
//! a transaction twice.

use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::env;
use crate::game::table::{PaymentOutcome, Table};
use crate::payments::memo::{extract_intent, PaymentIntent, DEFAULT_MEMO_PREFIX};
use crate::payments::provider::PaymentProvider;

/// Default provider endpoint.
pub const DEFAULT_TONAPI_URL: &str = "https://tonapi.io/v2";

/// Reconciliation errors. Per-transaction problems are counted in the
/// report instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No deposit account configured.
    #[error("payment reconciliation is not configured")]
    NotConfigured,

    /// Provider unreachable or returned an error status.
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider did not answer in time.
    #[error("payment provider timed out")]
    Timeout,

    /// Provider response could not be parsed.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Reconciliation configuration.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Provider base URL.
    pub base_url: String,
    /// Bearer key, if the provider requires one.
    pub api_key: Option<String>,
    /// Deposit account address. Reconciliation is off without it.
    pub account: Option<String>,
    /// Period of the background pass.
    pub interval: Duration,
    /// Provider request timeout.
    pub timeout: Duration,
    /// Memo prefix naming the recipient.
    pub memo_prefix: String,
    /// Transactions requested per pass.
    pub page_limit: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TONAPI_URL.to_string(),
            api_key: None,
            account: None,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            memo_prefix: DEFAULT_MEMO_PREFIX.to_string(),
            page_limit: 100,
        }
    }
}

impl ReconcileConfig {
    /// Load from environment variables.
    ///
    /// - `TONAPI_BASE_URL`, `TONAPI_KEY`, `TON_DEPOSIT_ADDRESS`
    /// - `AVIATOR_RECONCILE_INTERVAL_SECS`, `AVIATOR_RECONCILE_TIMEOUT_SECS`
    /// - `AVIATOR_MEMO_PREFIX`, `AVIATOR_RECONCILE_PAGE_LIMIT`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var_opt("TONAPI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: env::var_opt("TONAPI_KEY"),
            account: env::var_opt("TON_DEPOSIT_ADDRESS"),
            interval: env::secs_or("AVIATOR_RECONCILE_INTERVAL_SECS", defaults.interval),
            timeout: env::secs_or("AVIATOR_RECONCILE_TIMEOUT_SECS", defaults.timeout),
            memo_prefix: env::var_opt("AVIATOR_MEMO_PREFIX").unwrap_or(defaults.memo_prefix),
            page_limit: env::var_or("AVIATOR_RECONCILE_PAGE_LIMIT", defaults.page_limit),
        }
    }

    /// Whether a deposit account is configured.
    pub fn is_enabled(&self) -> bool {
        self.account.is_some()
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Transactions returned by the provider.
    pub fetched: usize,
    /// Newly credited.
    pub applied: usize,
    /// Already processed earlier.
    pub duplicates: usize,
    /// Memo or amount unusable.
    pub skipped: usize,
}

/// Applies provider transactions to the table.
pub struct Reconciler<P> {
    provider: P,
    memo_prefix: String,
}

impl<P: PaymentProvider> Reconciler<P> {
    /// Create a reconciler.
    pub fn new(provider: P, memo_prefix: impl Into<String>) -> Self {
        Self {
            provider,
            memo_prefix: memo_prefix.into(),
        }
    }

    /// The provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run one pass. The table lock is not held while the provider is
    /// queried.
    pub async fn run_once(&self, table: &RwLock<Table>) -> Result<ReconcileReport, ReconcileError> {
        let transactions = self.provider.fetch_transactions().await?;

        let mut report = ReconcileReport {
            fetched: transactions.len(),
            ..Default::default()
        };

        let mut intents: Vec<PaymentIntent> = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            match extract_intent(tx, &self.memo_prefix) {
                Ok(intent) => intents.push(intent),
                Err(e) => {
                    debug!("Skipping transaction {}: {}", tx.id, e);
                    report.skipped += 1;
                }
            }
        }

        if !intents.is_empty() {
            let mut table = table.write().await;
            for intent in intents {
                match table.apply_payment(&intent.tx_id, intent.user_id, intent.amount) {
                    Ok(PaymentOutcome::Applied { balance }) => {
                        info!(
                            "Credited {} to user {} from {} (balance {})",
                            intent.amount, intent.user_id, intent.tx_id, balance
                        );
                        report.applied += 1;
                    }
                    Ok(PaymentOutcome::Duplicate) => report.duplicates += 1,
                    Err(e) => {
                        warn!("Could not apply {}: {}", intent.tx_id, e);
                        report.skipped += 1;
                    }
                }
            }
        }

        debug!(
            "Reconciliation via {}: {} fetched, {} applied, {} duplicates, {} skipped",
            self.provider.name(),
            report.fetched,
            report.applied,
            report.duplicates,
            report.skipped
        );
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game::state::UserId;
    use crate::payments::provider::ProviderTransaction;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Provider returning a fixed list, or failing.
    pub(crate) struct FakeProvider {
        pub transactions: Vec<ProviderTransaction>,
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl FakeProvider {
        pub(crate) fn new(transactions: Vec<ProviderTransaction>) -> Self {
            Self { transactions, fail: false, calls: AtomicUsize::new(0) }
        }

        pub(crate) fn failing() -> Self {
            Self { transactions: Vec::new(), fail: true, calls: AtomicUsize::new(0) }
        }
    }

    impl PaymentProvider for FakeProvider {
        async fn fetch_transactions(&self) -> Result<Vec<ProviderTransaction>, ReconcileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ReconcileError::ProviderUnavailable("connection refused".into()));
            }
            Ok(self.transactions.clone())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    pub(crate) fn deposit(id: &str, memo: &str, raw: u64) -> ProviderTransaction {
        ProviderTransaction {
            id: id.to_string(),
            memo: Some(memo.to_string()),
            amount: Some(raw),
        }
    }

    #[tokio::test]
    async fn test_deposit_credited_once() {
        let table = RwLock::new(Table::new(5));
        let reconciler = Reconciler::new(FakeProvider::new(vec![deposit("tx123", "user_42", 5_000_000_000)]), "user_");

        let first = reconciler.run_once(&table).await.unwrap();
        assert_eq!(first.applied, 1);
        assert_eq!(table.read().await.balance(UserId(42)), dec!(5.00));

        let second = reconciler.run_once(&table).await.unwrap();
        assert_eq!(second.applied, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(table.read().await.balance(UserId(42)), dec!(5.00));
    }

    #[tokio::test]
    async fn test_skips_unusable_transactions() {
        let table = RwLock::new(Table::new(5));
        let mut no_amount = deposit("tx3", "user_1", 0);
        no_amount.amount = None;
        let reconciler = Reconciler::new(
            FakeProvider::new(vec![
                deposit("tx1", "hello", 1_000_000_000),
                deposit("tx2", "user_abc", 1_000_000_000),
                no_amount,
                deposit("tx4", "user_7", 1_500_000_000),
            ]),
            "user_",
        );

        let report = reconciler.run_once(&table).await.unwrap();
        assert_eq!(report, ReconcileReport { fetched: 4, applied: 1, duplicates: 0, skipped: 3 });

        let table = table.read().await;
        assert_eq!(table.balance(UserId(7)), dec!(1.5));
        assert_eq!(table.processed().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_within_one_batch() {
        let table = RwLock::new(Table::new(5));
        let reconciler = Reconciler::new(
            FakeProvider::new(vec![
                deposit("tx9", "user_3", 2_000_000_000),
                deposit("tx9", "user_3", 2_000_000_000),
            ]),
            "user_",
        );

        let report = reconciler.run_once(&table).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(table.read().await.balance(UserId(3)), dec!(2));
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_ledger_untouched() {
        let table = RwLock::new(Table::new(5));
        table.write().await.top_up(UserId(1), dec!(10)).unwrap();
        let reconciler = Reconciler::new(FakeProvider::failing(), "user_");

        let result = reconciler.run_once(&table).await;
        assert!(matches!(result, Err(ReconcileError::ProviderUnavailable(_))));
        assert_eq!(table.read().await.balance(UserId(1)), dec!(10));
        assert!(table.read().await.processed().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_passes_credit_once() {
        let table = Arc::new(RwLock::new(Table::new(5)));
        let reconciler = Arc::new(Reconciler::new(
            FakeProvider::new(vec![deposit("tx123", "user_42", 5_000_000_000)]),
            "user_",
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let reconciler = reconciler.clone();
            handles.push(tokio::spawn(async move { reconciler.run_once(&table).await.unwrap() }));
        }

        let mut applied = 0;
        for handle in handles {
            applied += handle.await.unwrap().applied;
        }

        assert_eq!(applied, 1);
        assert_eq!(table.read().await.balance(UserId(42)), dec!(5));
        assert_eq!(reconciler.provider().calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_config_defaults() {
        let config = ReconcileConfig::default();
        assert!(!config.is_enabled());
        assert_eq!(config.base_url, DEFAULT_TONAPI_URL);
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.memo_prefix, "user_");
    }
}
