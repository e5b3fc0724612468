//! Round State Definitions
//!
//! The phase and multiplier of the live round. Only the round engine
//! (`game::tick`) writes these; everything else reads a snapshot.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

// =============================================================================
// USER ID
// =============================================================================

/// Externally assigned user identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Create from a raw integer.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw integer.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Round identifier.
pub type RoundId = Uuid;

// =============================================================================
// ROUND PHASE
// =============================================================================

/// Round phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Betting window open.
    Waiting,
    /// Multiplier climbing; cashouts allowed, no new bets.
    Flight,
    /// Crashed; pause before the next betting window.
    Crashed,
}

impl RoundPhase {
    /// Phase name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Waiting => "waiting",
            RoundPhase::Flight => "flight",
            RoundPhase::Crashed => "crashed",
        }
    }
}

// =============================================================================
// ROUND STATE
// =============================================================================

/// The live round.
#[derive(Clone, Debug)]
pub struct RoundState {
    /// Round identifier (assigned when betting opens).
    pub id: RoundId,
    /// Current phase.
    pub phase: RoundPhase,
    /// Current multiplier (1.00 until flight, then non-decreasing).
    pub multiplier: Decimal,
    /// Crash multiplier. Drawn at flight start; secret until crash unless revealed.
    pub crash_point: Decimal,
    /// Commitment salt when the crash point is withheld.
    pub salt: Option<[u8; 16]>,
    /// When the flight began.
    pub started_at: Option<DateTime<Utc>>,
}

impl RoundState {
    /// A fresh round in the betting phase.
    pub fn new(id: RoundId) -> Self {
        Self {
            id,
            phase: RoundPhase::Waiting,
            multiplier: Decimal::ONE,
            crash_point: Decimal::ONE,
            salt: None,
            started_at: None,
        }
    }

    /// Whether bets are being accepted.
    #[inline]
    pub fn accepting_bets(&self) -> bool {
        self.phase == RoundPhase::Waiting
    }

    /// Whether cashouts are allowed.
    #[inline]
    pub fn in_flight(&self) -> bool {
        self.phase == RoundPhase::Flight
    }

    /// Client-visible view of the round. Never exposes an unrevealed crash point.
    pub fn view(&self) -> RoundView {
        RoundView {
            round_id: self.id,
            phase: self.phase,
            multiplier: self.multiplier,
            crash_point: (self.phase == RoundPhase::Crashed).then_some(self.crash_point),
        }
    }
}

/// Snapshot of the round sent to newly connected clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    /// Round identifier.
    pub round_id: RoundId,
    /// Current phase.
    pub phase: RoundPhase,
    /// Current multiplier.
    pub multiplier: Decimal,
    /// Crash point, once crashed.
    pub crash_point: Option<Decimal>,
}

/// A finished round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Round identifier.
    pub round_id: RoundId,
    /// Where it crashed.
    pub crash_point: Decimal,
    /// Flight start.
    pub started_at: Option<DateTime<Utc>>,
    /// Crash time.
    pub crashed_at: DateTime<Utc>,
}
