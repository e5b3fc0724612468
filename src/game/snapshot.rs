//! Ledger Snapshots
//!
//! Balances and processed payment ids written to disk with bincode, so a
//! restart neither loses balances nor re-credits old deposits. Round state
//! and bets are not persisted: a restart opens a fresh betting window.

use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::dedup::{ProcessedTransaction, ProcessedTransactions};
use crate::game::ledger::Ledger;
use crate::game::state::UserId;
use crate::game::table::Table;

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem error.
    #[error("snapshot I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding error.
    #[error("snapshot encoding: {0}")]
    Encode(#[from] bincode::Error),

    /// Written by an incompatible version.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

/// Stored account. Decimals use their fixed 16-byte form so the encoding
/// does not depend on self-describing formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAccount {
    user_id: i64,
    balance: [u8; 16],
}

/// Stored processed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTransaction {
    tx_id: String,
    user_id: i64,
    amount: [u8; 16],
    applied_at_ms: i64,
}

/// Persisted ledger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    version: u32,
    taken_at_ms: i64,
    accounts: Vec<StoredAccount>,
    processed: Vec<StoredTransaction>,
}

impl LedgerSnapshot {
    /// Capture the ledger and processed payments of a table.
    pub fn capture(table: &Table) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at_ms: Utc::now().timestamp_millis(),
            accounts: table
                .ledger()
                .accounts()
                .map(|(user, balance)| StoredAccount { user_id: user.get(), balance: balance.serialize() })
                .collect(),
            processed: table
                .processed()
                .iter()
                .map(|tx| StoredTransaction {
                    tx_id: tx.tx_id.clone(),
                    user_id: tx.user_id.get(),
                    amount: tx.amount.serialize(),
                    applied_at_ms: tx.applied_at.timestamp_millis(),
                })
                .collect(),
        }
    }

    /// Rebuild a table (fresh round, no bets) from this snapshot.
    pub fn into_table(self, history_len: usize) -> Table {
        let ledger = Ledger::from_accounts(
            self.accounts
                .into_iter()
                .map(|a| (UserId(a.user_id), Decimal::deserialize(a.balance))),
        );
        let processed: ProcessedTransactions = self
            .processed
            .into_iter()
            .map(|tx| ProcessedTransaction {
                tx_id: tx.tx_id,
                user_id: UserId(tx.user_id),
                amount: Decimal::deserialize(tx.amount),
                applied_at: DateTime::from_timestamp_millis(tx.applied_at_ms).unwrap_or_default(),
            })
            .collect();
        Table::with_ledger(ledger, processed, history_len)
    }

    /// Number of accounts.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Number of processed transactions.
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Encode to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self = bincode::deserialize(data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }

    /// Write atomically (temp file + rename).
    pub async fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let bytes = self.to_bytes()?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Load from disk. `Ok(None)` when the file does not exist yet.
    pub async fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn populated_table() -> Table {
        let mut table = Table::new(5);
        table.top_up(UserId(1), dec!(110.60)).unwrap();
        table.apply_payment("tx123", UserId(42), dec!(5)).unwrap();
        table
    }

    #[test]
    fn test_snapshot_bytes_roundtrip() {
        let snapshot = LedgerSnapshot::capture(&populated_table());
        let bytes = snapshot.to_bytes().unwrap();
        let restored = LedgerSnapshot::from_bytes(&bytes).unwrap().into_table(5);

        assert_eq!(restored.balance(UserId(1)), dec!(110.60));
        assert_eq!(restored.balance(UserId(42)), dec!(5));
        assert!(restored.processed().contains("tx123"));
        assert!(restored.bets().is_empty());
    }

    #[test]
    fn test_restored_dedup_still_blocks() {
        let snapshot = LedgerSnapshot::capture(&populated_table());
        let mut restored = snapshot.into_table(5);

        let outcome = restored.apply_payment("tx123", UserId(42), dec!(5)).unwrap();
        assert_eq!(outcome, crate::game::table::PaymentOutcome::Duplicate);
        assert_eq!(restored.balance(UserId(42)), dec!(5));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(LedgerSnapshot::from_bytes(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("aviator-snapshot-{}.bin", uuid::Uuid::new_v4()));

        assert!(LedgerSnapshot::load(&path).await.unwrap().is_none());

        let snapshot = LedgerSnapshot::capture(&populated_table());
        snapshot.save(&path).await.unwrap();

        let loaded = LedgerSnapshot::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded.account_count(), 2);
        assert_eq!(loaded.processed_count(), 1);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
