//! Game Module
//!
//! The in-memory core: round state machine, balances, payments and bets.
//! No networking here; the server drives it.
//!
//! ## Module Structure
//!
//! - `state`: user ids, round phase and round state
//! - `ledger`: per-user balances
//! - `dedup`: processed external payment ids
//! - `bets`: bets of the current round
//! - `table`: the single lock unit the server shares
//! - `tick`: the round engine
//! - `events`: round events and settlements
//! - `snapshot`: ledger persistence

pub mod bets;
pub mod dedup;
pub mod events;
pub mod ledger;
pub mod snapshot;
pub mod state;
pub mod table;
pub mod tick;

// Re-export key types
pub use bets::{Bet, BetRegistry, Resolution};
pub use events::{RoundEvent, Settlement};
pub use ledger::{Ledger, LedgerError};
pub use state::{RoundId, RoundPhase, RoundState, UserId};
pub use table::{PaymentOutcome, Table, TableError};
pub use tick::{RoundConfig, RoundEngine, Transition};
