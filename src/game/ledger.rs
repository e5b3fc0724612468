//! Balance Ledger
//!
//! Per-user balances. Accounts are created on first credit and never
//! deleted; an unknown user reads as a zero balance. Balances never go
//! negative: a debit larger than the balance is refused whole.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::money::is_valid_amount;
use crate::game::state::UserId;

/// Ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Amount is zero or negative.
    #[error("amount must be positive")]
    InvalidAmount,

    /// Debit exceeds balance.
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Balance at the time of the debit.
        balance: Decimal,
        /// Amount requested.
        requested: Decimal,
    },

    /// Amount over the allowed maximum, or the result would overflow.
    #[error("amount too large")]
    AmountTooLarge,

    /// No account for this user.
    #[error("user {0} not found")]
    UserNotFound(UserId),
}

/// Per-user balances.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    balances: BTreeMap<UserId, Decimal>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance for a user; zero if unknown.
    pub fn balance(&self, user: UserId) -> Decimal {
        self.balances.get(&user).copied().unwrap_or(Decimal::ZERO)
    }

    /// Whether the user has an account.
    pub fn contains(&self, user: UserId) -> bool {
        self.balances.contains_key(&user)
    }

    /// Credit a user, creating the account if needed. Returns the new balance.
    ///
    /// Not idempotent on its own; the payment path pairs it with the
    /// processed-transaction store.
    pub fn credit(&mut self, user: UserId, amount: Decimal) -> Result<Decimal, LedgerError> {
        if !is_valid_amount(amount) {
            return Err(LedgerError::InvalidAmount);
        }
        let balance = self.balances.entry(user).or_insert(Decimal::ZERO);
        *balance = balance.checked_add(amount).ok_or(LedgerError::AmountTooLarge)?;
        Ok(*balance)
    }

    /// Debit a user. Returns the new balance.
    pub fn debit(&mut self, user: UserId, amount: Decimal) -> Result<Decimal, LedgerError> {
        if !is_valid_amount(amount) {
            return Err(LedgerError::InvalidAmount);
        }
        let balance = self.balance(user);
        if amount > balance {
            return Err(LedgerError::InsufficientFunds { balance, requested: amount });
        }
        let entry = self.balances.entry(user).or_insert(Decimal::ZERO);
        *entry -= amount;
        Ok(*entry)
    }

    /// Make sure an account exists (zero balance if new).
    pub fn open_account(&mut self, user: UserId) {
        self.balances.entry(user).or_insert(Decimal::ZERO);
    }

    /// Sum of all balances; `None` if it does not fit in a `Decimal`.
    pub fn total(&self) -> Option<Decimal> {
        self.balances.values().try_fold(Decimal::ZERO, |acc, b| acc.checked_add(*b))
    }

    /// Number of accounts.
    pub fn account_count(&self) -> usize {
        self.balances.len()
    }

    /// Iterate accounts in user order.
    pub fn accounts(&self) -> impl Iterator<Item = (UserId, Decimal)> + '_ {
        self.balances.iter().map(|(user, balance)| (*user, *balance))
    }

    /// Rebuild from stored balances.
    pub fn from_accounts(accounts: impl IntoIterator<Item = (UserId, Decimal)>) -> Self {
        Self { balances: accounts.into_iter().collect() }
    }
}
