//! The Table
//!
//! Everything that request handlers and the round engine mutate together:
//! round state, balances, processed payments and the bet registry. The
//! server keeps one `Arc<RwLock<Table>>`; holding the write guard makes a
//! phase check and the balance/registry change that depends on it a single
//! atomic step, which is what keeps cashout and crash forfeiture mutually
//! exclusive.
//!
//! Request handlers only read the round state. Phase and multiplier are
//! written by [`crate::game::tick::RoundEngine`].

use std::collections::VecDeque;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::core::money::{is_valid_amount, payout, DEFAULT_MAX_AMOUNT};
use crate::game::bets::{Bet, BetRegistry, Resolution};
use crate::game::dedup::{ProcessedTransaction, ProcessedTransactions};
use crate::game::events::Settlement;
use crate::game::ledger::{Ledger, LedgerError};
use crate::game::snapshot::LedgerSnapshot;
use crate::game::state::{RoundId, RoundState, RoundSummary, UserId};

/// Rejections from table operations. All are expected outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// Bets are only accepted while waiting.
    #[error("betting is closed")]
    BettingClosed,

    /// User already has a bet this round.
    #[error("bet already placed this round")]
    DuplicateBet,

    /// User has no bet to cash out.
    #[error("no active bet")]
    NoActiveBet,

    /// Bet is waiting for the next flight.
    #[error("round has not taken off")]
    NotInFlight,

    /// The round crashed before the cashout.
    #[error("round already crashed")]
    TooLate,

    /// Bet was already cashed out.
    #[error("already cashed out")]
    AlreadyCashedOut,

    /// Auto-cashout threshold must be above 1.00.
    #[error("auto-cashout must be greater than 1.00")]
    InvalidAutoCashout,

    /// Ledger rejection.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Receipt for an accepted bet.
#[derive(Clone, Debug, PartialEq)]
pub struct BetReceipt {
    /// Round the bet will fly in.
    pub round_id: RoundId,
    /// Stake debited.
    pub amount: Decimal,
    /// Balance after the debit.
    pub balance: Decimal,
}

/// Result of applying an external payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Credited.
    Applied {
        /// Balance after the credit.
        balance: Decimal,
    },
    /// Transaction id already processed; nothing credited.
    Duplicate,
}

/// Shared game state guarded by one lock.
#[derive(Debug)]
pub struct Table {
    pub(crate) round: RoundState,
    pub(crate) bets: BetRegistry,
    ledger: Ledger,
    processed: ProcessedTransactions,
    history: VecDeque<RoundSummary>,
    history_len: usize,
    max_amount: Decimal,
}

impl Table {
    /// Create a table with an open betting window.
    pub fn new(history_len: usize) -> Self {
        Self::with_ledger(Ledger::new(), ProcessedTransactions::new(), history_len)
    }

    /// Create a table over existing balances and processed payments.
    pub fn with_ledger(ledger: Ledger, processed: ProcessedTransactions, history_len: usize) -> Self {
        Self {
            round: RoundState::new(Uuid::new_v4()),
            bets: BetRegistry::new(),
            ledger,
            processed,
            history: VecDeque::with_capacity(history_len),
            history_len,
            max_amount: DEFAULT_MAX_AMOUNT,
        }
    }

    /// Set the largest stake or top-up a client may request.
    pub fn with_max_amount(mut self, max_amount: Decimal) -> Self {
        self.max_amount = max_amount;
        self
    }

    /// Largest stake or top-up a client may request.
    pub fn max_amount(&self) -> Decimal {
        self.max_amount
    }

    /// Current round (read-only).
    pub fn round(&self) -> &RoundState {
        &self.round
    }

    /// Bets of the current round (read-only).
    pub fn bets(&self) -> &BetRegistry {
        &self.bets
    }

    /// Balances (read-only).
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Processed payments (read-only).
    pub fn processed(&self) -> &ProcessedTransactions {
        &self.processed
    }

    /// Balance for a user; zero if unknown.
    pub fn balance(&self, user: UserId) -> Decimal {
        self.ledger.balance(user)
    }

    /// Credit a user directly. Amounts above the table maximum are refused.
    pub fn top_up(&mut self, user: UserId, amount: Decimal) -> Result<Decimal, TableError> {
        if amount > self.max_amount {
            return Err(LedgerError::AmountTooLarge.into());
        }
        Ok(self.ledger.credit(user, amount)?)
    }

    /// Place a bet on the upcoming flight.
    ///
    /// Fails without touching balance or registry unless betting is open,
    /// the amount is valid and within the table maximum, the user has no bet
    /// yet and can cover the stake.
    pub fn place_bet(
        &mut self,
        user: UserId,
        amount: Decimal,
        auto_cashout: Option<Decimal>,
    ) -> Result<BetReceipt, TableError> {
        if !self.round.accepting_bets() {
            return Err(TableError::BettingClosed);
        }
        if !is_valid_amount(amount) {
            return Err(LedgerError::InvalidAmount.into());
        }
        if amount > self.max_amount {
            return Err(LedgerError::AmountTooLarge.into());
        }
        if auto_cashout.is_some_and(|target| target <= Decimal::ONE) {
            return Err(TableError::InvalidAutoCashout);
        }
        if self.bets.contains(user) {
            return Err(TableError::DuplicateBet);
        }

        self.ledger.open_account(user);
        let balance = self.ledger.debit(user, amount)?;
        self.bets.insert(Bet { user_id: user, amount, auto_cashout });

        Ok(BetReceipt { round_id: self.round.id, amount, balance })
    }

    /// Cash out at the current multiplier.
    pub fn cashout(&mut self, user: UserId) -> Result<Settlement, TableError> {
        if !self.round.in_flight() {
            // A bet waiting for take-off outranks last round's resolution.
            if self.bets.contains(user) {
                return Err(TableError::NotInFlight);
            }
            return Err(match self.bets.resolution(user) {
                Some(Resolution::Forfeited) => TableError::TooLate,
                Some(Resolution::CashedOut { .. }) => TableError::AlreadyCashedOut,
                None => TableError::NoActiveBet,
            });
        }
        let multiplier = self.round.multiplier;
        self.settle(user, multiplier, false)
    }

    /// Pay out a bet at `multiplier` and remove it. Shared by manual
    /// cashout and the engine's auto-cashout.
    pub(crate) fn settle(
        &mut self,
        user: UserId,
        multiplier: Decimal,
        auto: bool,
    ) -> Result<Settlement, TableError> {
        let stake = match self.bets.get(user) {
            Some(bet) => bet.amount,
            None => {
                return Err(match self.bets.resolution(user) {
                    Some(Resolution::CashedOut { .. }) => TableError::AlreadyCashedOut,
                    Some(Resolution::Forfeited) => TableError::TooLate,
                    None => TableError::NoActiveBet,
                });
            }
        };
        if !self.ledger.contains(user) {
            return Err(LedgerError::UserNotFound(user).into());
        }

        // On overflow the bet stays active and is forfeited at crash.
        let amount = payout(stake, multiplier).ok_or(LedgerError::AmountTooLarge)?;
        let balance = if is_valid_amount(amount) {
            self.ledger.credit(user, amount)?
        } else {
            self.ledger.balance(user)
        };
        self.bets.take_for_cashout(user, multiplier, amount);

        Ok(Settlement {
            round_id: self.round.id,
            user_id: user,
            stake,
            multiplier,
            payout: amount,
            balance,
            auto,
        })
    }

    /// Apply an external payment at most once per transaction id.
    pub fn apply_payment(
        &mut self,
        tx_id: &str,
        user: UserId,
        amount: Decimal,
    ) -> Result<PaymentOutcome, TableError> {
        if self.processed.contains(tx_id) {
            return Ok(PaymentOutcome::Duplicate);
        }
        let balance = self.ledger.credit(user, amount)?;
        self.processed.record(ProcessedTransaction {
            tx_id: tx_id.to_string(),
            user_id: user,
            amount,
            applied_at: Utc::now(),
        });
        Ok(PaymentOutcome::Applied { balance })
    }

    /// Capture balances and processed payments for persistence.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot::capture(self)
    }

    /// Rebuild a table from a snapshot. The round starts fresh.
    pub fn restore(snapshot: LedgerSnapshot, history_len: usize) -> Self {
        snapshot.into_table(history_len)
    }

    /// Finished rounds, most recent first.
    pub fn history(&self) -> Vec<RoundSummary> {
        self.history.iter().rev().cloned().collect()
    }

    /// Append a finished round, evicting the oldest beyond the limit.
    pub(crate) fn record_history(&mut self, summary: RoundSummary) {
        if self.history_len == 0 {
            return;
        }
        while self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }
}
