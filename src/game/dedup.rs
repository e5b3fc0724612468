//! Processed External Transactions
//!
//! Permanent record of payment-provider transaction ids already credited.
//! Entries are never removed, so re-polling an overlapping window, or
//! processing transactions in any order, cannot credit the same id twice.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Deserialize};

use crate::game::state::UserId;

/// A credited external transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTransaction {
    /// Provider's transaction id.
    pub tx_id: String,
    /// User credited.
    pub user_id: UserId,
    /// Amount credited.
    pub amount: Decimal,
    /// When the credit was applied.
    pub applied_at: DateTime<Utc>,
}

/// Append-only set of processed transaction ids.
#[derive(Debug, Clone, Default)]
pub struct ProcessedTransactions {
    entries: BTreeMap<String, ProcessedTransaction>,
}

impl ProcessedTransactions {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a transaction id was already applied.
    pub fn contains(&self, tx_id: &str) -> bool {
        self.entries.contains_key(tx_id)
    }

    /// Record an applied transaction. Returns `false` (and keeps the
    /// original record) if the id is already present.
    pub fn record(&mut self, entry: ProcessedTransaction) -> bool {
        if self.entries.contains_key(&entry.tx_id) {
            return false;
        }
        self.entries.insert(entry.tx_id.clone(), entry);
        true
    }

    /// Look up a processed transaction.
    pub fn get(&self, tx_id: &str) -> Option<&ProcessedTransaction> {
        self.entries.get(tx_id)
    }

    /// Number of processed transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been processed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ProcessedTransaction> {
        self.entries.values()
    }
}

impl FromIterator<ProcessedTransaction> for ProcessedTransactions {
    fn from_iter<I: IntoIterator<Item = ProcessedTransaction>>(iter: I) -> Self {
        let mut store = Self::new();
        for entry in iter {
            store.record(entry);
        }
        store
    }
}
