//! Payment Provider Client
//!
//! Fetches incoming transfers to the deposit account. Only the event shape
//! matters to reconciliation: an opaque id, an optional memo and a raw
//! integer amount in the provider's smallest unit.
//!
//! [`TonApiProvider`] talks to the tonapi.io REST API over `reqwest`.

use std::future::Future;

use serde::Deserialize;
use tracing::debug;

use crate::payments::reconcile::{ReconcileConfig, ReconcileError};

/// One provider transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTransaction {
    /// Globally unique transaction id.
    pub id: String,
    /// Transfer comment.
    pub memo: Option<String>,
    /// Amount in nano-units.
    pub amount: Option<u64>,
}

/// Source of external payment events.
pub trait PaymentProvider: Send + Sync + 'static {
    /// Fetch recent incoming transactions. The window may overlap with
    /// earlier calls.
    fn fetch_transactions(
        &self,
    ) -> impl Future<Output = Result<Vec<ProviderTransaction>, ReconcileError>> + Send;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

// =============================================================================
// TONAPI
// =============================================================================

#[derive(Debug, Deserialize)]
struct TonTransactionsResponse {
    #[serde(default)]
    transactions: Vec<TonTransaction>,
}

#[derive(Debug, Deserialize)]
struct TonTransaction {
    hash: String,
    #[serde(default)]
    in_msg: Option<TonMessage>,
}

#[derive(Debug, Deserialize)]
struct TonMessage {
    #[serde(default)]
    comment: Option<String>,
    /// Integer or decimal string, depending on API version.
    #[serde(default)]
    value: Option<serde_json::Value>,
}

impl TonTransaction {
    fn into_provider_transaction(self) -> ProviderTransaction {
        let (memo, amount) = match self.in_msg {
            Some(msg) => (msg.comment, msg.value.as_ref().and_then(parse_raw_amount)),
            None => (None, None),
        };
        ProviderTransaction { id: self.hash, memo, amount }
    }
}

fn parse_raw_amount(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a tonapi `/blockchain/accounts/{id}/transactions` body.
pub fn parse_tonapi_transactions(body: &str) -> Result<Vec<ProviderTransaction>, ReconcileError> {
    let response: TonTransactionsResponse = serde_json::from_str(body)
        .map_err(|e| ReconcileError::MalformedResponse(e.to_string()))?;
    Ok(response
        .transactions
        .into_iter()
        .map(TonTransaction::into_provider_transaction)
        .collect())
}

/// tonapi.io client for one deposit account.
pub struct TonApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    account: String,
    page_limit: u32,
}

impl TonApiProvider {
    /// Create a client. Fails if no deposit account is configured.
    pub fn new(config: &ReconcileConfig) -> Result<Self, ReconcileError> {
        let account = config.account.clone().ok_or(ReconcileError::NotConfigured)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ReconcileError::ProviderUnavailable(format!("client setup failed: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            account,
            page_limit: config.page_limit,
        })
    }

    fn transactions_url(&self) -> String {
        format!("{}/blockchain/accounts/{}/transactions", self.base_url, self.account)
    }
}

impl PaymentProvider for TonApiProvider {
    async fn fetch_transactions(&self) -> Result<Vec<ProviderTransaction>, ReconcileError> {
        let mut request = self
            .client
            .get(self.transactions_url())
            .query(&[("limit", self.page_limit)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(ReconcileError::ProviderUnavailable(format!("tonapi returned {status}: {body}")));
        }

        let body = response.text().await.map_err(map_request_error)?;
        let transactions = parse_tonapi_transactions(&body)?;
        debug!("Fetched {} transactions for {}", transactions.len(), self.account);
        Ok(transactions)
    }

    fn name(&self) -> &str {
        "tonapi"
    }
}

fn map_request_error(err: reqwest::Error) -> ReconcileError {
    if err.is_timeout() {
        ReconcileError::Timeout
    } else {
        ReconcileError::ProviderUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tonapi_body() {
        let body = r#"{
            "transactions": [
                {"hash": "tx123", "in_msg": {"comment": "user_42", "value": 5000000000}},
                {"hash": "tx124", "in_msg": {"value": "2500000000"}},
                {"hash": "tx125"},
                {"hash": "tx126", "in_msg": {"comment": "user_1", "value": -3}}
            ]
        }"#;

        let txs = parse_tonapi_transactions(body).unwrap();
        assert_eq!(txs.len(), 4);
        assert_eq!(
            txs[0],
            ProviderTransaction { id: "tx123".into(), memo: Some("user_42".into()), amount: Some(5_000_000_000) }
        );
        assert_eq!(txs[1].amount, Some(2_500_000_000));
        assert_eq!(txs[1].memo, None);
        assert_eq!(txs[2].amount, None);
        assert_eq!(txs[3].amount, None);
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert!(parse_tonapi_transactions("{}").unwrap().is_empty());
        assert!(matches!(
            parse_tonapi_transactions("not json"),
            Err(ReconcileError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_provider_requires_account() {
        let config = ReconcileConfig::default();
        assert!(matches!(TonApiProvider::new(&config), Err(ReconcileError::NotConfigured)));
    }

    #[test]
    fn test_transactions_url() {
        let config = ReconcileConfig {
            base_url: "https://tonapi.io/v2/".into(),
            account: Some("UQabc".into()),
            ..Default::default()
        };
        let provider = TonApiProvider::new(&config).unwrap();
        assert_eq!(provider.transactions_url(), "https://tonapi.io/v2/blockchain/accounts/UQabc/transactions");
    }
}
