//! Round Events
//!
//! Emitted by the round engine in order: `waiting`, `start`,
//! `update`*, `crash`, repeating. The broadcast hub forwards them
//! to every observer unchanged.

use rust_decimal::Decimal;
use serde::{Serialize, Deserialize};

use crate::game::state::{RoundId, UserId};

/// Round lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoundEvent {
    /// Betting window open.
    Waiting {
        /// Round opening for bets.
        round_id: RoundId,
        /// How long bets are accepted.
        betting_window_ms: u64,
    },

    /// Flight begins.
    Start {
        /// Round taking off.
        round_id: RoundId,
        /// Crash target, when the engine is configured to reveal it.
        crash_at: Option<Decimal>,
        /// Hex commitment to the crash target, when withheld.
        commitment: Option<String>,
    },

    /// Multiplier tick.
    Update {
        /// Round in flight.
        round_id: RoundId,
        /// Current multiplier.
        multiplier: Decimal,
    },

    /// Round over; unresolved bets forfeited.
    Crash {
        /// Round that crashed.
        round_id: RoundId,
        /// Crash multiplier.
        at: Decimal,
        /// Hex salt opening the start commitment, when one was published.
        salt: Option<String>,
        /// Number of bets forfeited.
        forfeited: usize,
    },
}

impl RoundEvent {
    /// Event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::Waiting { .. } => "waiting",
            RoundEvent::Start { .. } => "start",
            RoundEvent::Update { .. } => "update",
            RoundEvent::Crash { .. } => "crash",
        }
    }

    /// Round the event belongs to.
    pub fn round_id(&self) -> RoundId {
        match self {
            RoundEvent::Waiting { round_id, .. }
            | RoundEvent::Start { round_id, .. }
            | RoundEvent::Update { round_id, .. }
            | RoundEvent::Crash { round_id, .. } => *round_id,
        }
    }
}

/// A bet paid out, by manual or automatic cashout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Round the bet flew in.
    pub round_id: RoundId,
    /// Bet owner.
    pub user_id: UserId,
    /// Stake.
    pub stake: Decimal,
    /// Multiplier applied.
    pub multiplier: Decimal,
    /// Amount credited.
    pub payout: Decimal,
    /// Owner's balance after the credit.
    pub balance: Decimal,
    /// Settled by the engine at the bet's auto-cashout threshold.
    pub auto: bool,
}
