//! Deposit Memo Parsing
//!
//! Deposits identify their recipient in the transfer comment, e.g.
//! `user_42`. Anything that does not parse is skipped by reconciliation,
//! never treated as an error of the pass.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::money::nano_to_amount;
use crate::game::state::UserId;
use crate::payments::provider::ProviderTransaction;

/// Default recipient prefix.
pub const DEFAULT_MEMO_PREFIX: &str = "user_";

/// Why a provider transaction is not a deposit we can apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoError {
    /// No comment on the transfer.
    #[error("missing memo")]
    MissingMemo,

    /// Comment does not start with the recipient prefix.
    #[error("memo {0:?} does not match the recipient pattern")]
    WrongPrefix(String),

    /// Suffix is not an integer user id.
    #[error("memo {0:?} has a non-integer user id")]
    InvalidUserId(String),

    /// No amount, or a zero amount.
    #[error("missing amount")]
    MissingAmount,
}

/// A deposit ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    /// Provider transaction id (dedup key).
    pub tx_id: String,
    /// Recipient.
    pub user_id: UserId,
    /// Amount in ledger units.
    pub amount: Decimal,
}

/// Extract the recipient from a memo like `user_42`.
pub fn parse_memo(memo: &str, prefix: &str) -> Result<UserId, MemoError> {
    let memo = memo.trim();
    let suffix = memo
        .strip_prefix(prefix)
        .ok_or_else(|| MemoError::WrongPrefix(memo.to_string()))?;
    suffix
        .trim()
        .parse::<i64>()
        .map(UserId)
        .map_err(|_| MemoError::InvalidUserId(memo.to_string()))
}

/// Turn a provider transaction into a deposit, or say why it is skipped.
pub fn extract_intent(tx: &ProviderTransaction, prefix: &str) -> Result<PaymentIntent, MemoError> {
    let memo = tx.memo.as_deref().filter(|m| !m.trim().is_empty()).ok_or(MemoError::MissingMemo)?;
    let user_id = parse_memo(memo, prefix)?;
    let raw = tx.amount.filter(|raw| *raw > 0).ok_or(MemoError::MissingAmount)?;

    Ok(PaymentIntent {
        tx_id: tx.id.clone(),
        user_id,
        amount: nano_to_amount(raw),
    })
}
