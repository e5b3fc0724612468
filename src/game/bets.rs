//! Bet Registry
//!
//! Bets for the current round only. A bet leaves the registry exactly
//! once: by cashout (manual or automatic) or by crash forfeiture. The
//! registry remembers how each bet of the round was resolved until the
//! next flight starts.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Serialize, Deserialize};

use crate::game::state::UserId;

/// An active bet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    /// Owner.
    pub user_id: UserId,
    /// Stake (already debited).
    pub amount: Decimal,
    /// Multiplier at which the engine cashes out automatically.
    pub auto_cashout: Option<Decimal>,
}

/// How a bet left the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Paid out.
    CashedOut {
        /// Multiplier applied.
        multiplier: Decimal,
        /// Amount credited.
        payout: Decimal,
    },
    /// Lost at crash.
    Forfeited,
}

/// Active bets plus resolutions for the current round.
#[derive(Debug, Clone, Default)]
pub struct BetRegistry {
    active: BTreeMap<UserId, Bet>,
    resolved: BTreeMap<UserId, Resolution>,
}

impl BetRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bet. Returns `false` if the user already has one.
    pub fn insert(&mut self, bet: Bet) -> bool {
        if self.active.contains_key(&bet.user_id) {
            return false;
        }
        self.active.insert(bet.user_id, bet);
        true
    }

    /// Active bet for a user.
    pub fn get(&self, user: UserId) -> Option<&Bet> {
        self.active.get(&user)
    }

    /// Whether the user has an active bet.
    pub fn contains(&self, user: UserId) -> bool {
        self.active.contains_key(&user)
    }

    /// Remove a bet for cashout and record the resolution.
    pub fn take_for_cashout(&mut self, user: UserId, multiplier: Decimal, payout: Decimal) -> Option<Bet> {
        let bet = self.active.remove(&user)?;
        self.resolved.insert(user, Resolution::CashedOut { multiplier, payout });
        Some(bet)
    }

    /// Users whose auto-cashout threshold has been reached at `multiplier`.
    pub fn auto_cashouts_due(&self, multiplier: Decimal) -> Vec<UserId> {
        self.active
            .values()
            .filter(|bet| bet.auto_cashout.is_some_and(|target| target <= multiplier))
            .map(|bet| bet.user_id)
            .collect()
    }

    /// Forfeit every remaining bet. Returns the forfeited bets.
    pub fn forfeit_all(&mut self) -> Vec<Bet> {
        let forfeited: Vec<Bet> = std::mem::take(&mut self.active).into_values().collect();
        for bet in &forfeited {
            self.resolved.insert(bet.user_id, Resolution::Forfeited);
        }
        forfeited
    }

    /// How the user's bet was resolved this round.
    pub fn resolution(&self, user: UserId) -> Option<Resolution> {
        self.resolved.get(&user).copied()
    }

    /// Drop resolutions from the previous round.
    pub fn clear_resolutions(&mut self) {
        self.resolved.clear();
    }

    /// Number of active bets.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether there are no active bets.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Sum of active stakes, saturating at `Decimal::MAX`.
    pub fn total_staked(&self) -> Decimal {
        self.active.values().fold(Decimal::ZERO, |acc, bet| acc.saturating_add(bet.amount))
    }
}
