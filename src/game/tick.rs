//! Authoritative Round Engine
//!
//! The round state machine. Each call to [`RoundEngine::advance`] performs
//! exactly one transition on the table and says how long to wait before the
//! next one:
//!
//! ```text
//! Waiting --(betting window)--> Flight --(tick)*--> Crashed --(pause)--> Waiting
//! ```
//!
//! No I/O happens here. The server's round loop sleeps, locks the table,
//! calls `advance`, unlocks and publishes the returned events.

use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::env;
use crate::core::hash::crash_commitment;
use crate::core::money::{round_multiplier, MONEY_DP};
use crate::core::rng::DeterministicRng;
use crate::game::events::{RoundEvent, Settlement};
use crate::game::state::{RoundPhase, RoundState, RoundSummary};
use crate::game::table::Table;

/// Round timing and payout curve.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// How long bets are accepted.
    pub betting_window: Duration,
    /// Delay between multiplier updates.
    pub tick_interval: Duration,
    /// Multiplier increase per tick.
    pub multiplier_step: Decimal,
    /// Lowest crash point (inclusive).
    pub crash_min: Decimal,
    /// Highest crash point (inclusive).
    pub crash_max: Decimal,
    /// Pause after a crash before betting reopens.
    pub crash_pause: Duration,
    /// Publish the crash point in `start` instead of a commitment.
    pub reveal_crash_point: bool,
    /// Finished rounds kept for `history`.
    pub history_len: usize,
    /// Fixed RNG seed (entropy when unset).
    pub rng_seed: Option<u64>,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            betting_window: Duration::from_secs(3),
            tick_interval: Duration::from_millis(100),
            multiplier_step: dec!(0.01),
            crash_min: dec!(1.50),
            crash_max: dec!(3.00),
            crash_pause: Duration::from_secs(2),
            reveal_crash_point: true,
            history_len: 20,
            rng_seed: None,
        }
    }
}

impl RoundConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            betting_window: env::millis_or("AVIATOR_BETTING_WINDOW_MS", defaults.betting_window),
            tick_interval: env::millis_or("AVIATOR_TICK_INTERVAL_MS", defaults.tick_interval),
            multiplier_step: env::var_or("AVIATOR_MULTIPLIER_STEP", defaults.multiplier_step),
            crash_min: env::var_or("AVIATOR_CRASH_MIN", defaults.crash_min),
            crash_max: env::var_or("AVIATOR_CRASH_MAX", defaults.crash_max),
            crash_pause: env::millis_or("AVIATOR_CRASH_PAUSE_MS", defaults.crash_pause),
            reveal_crash_point: env::flag_or("AVIATOR_REVEAL_CRASH_POINT", defaults.reveal_crash_point),
            history_len: env::var_or("AVIATOR_HISTORY_LEN", defaults.history_len),
            rng_seed: env::var_opt("AVIATOR_RNG_SEED").and_then(|s| s.parse().ok()),
        }
        .validated()
    }

    /// Replace values that would stall the flight or spin the round loop
    /// with their defaults.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        // A step that rounds to 0.00 never moves the multiplier.
        if round_multiplier(self.multiplier_step) <= Decimal::ZERO {
            warn!(
                "Multiplier step {} does not advance the flight, using {}",
                self.multiplier_step, defaults.multiplier_step
            );
            self.multiplier_step = defaults.multiplier_step;
        }
        if self.tick_interval.is_zero() {
            warn!("Zero tick interval, using {:?}", defaults.tick_interval);
            self.tick_interval = defaults.tick_interval;
        }
        self
    }

    /// Crash range in hundredths, clamped to at least 1.00 and ordered.
    fn crash_range_hundredths(&self) -> (i64, i64) {
        let to_hundredths = |d: Decimal| {
            d.round_dp(MONEY_DP)
                .checked_mul(Decimal::ONE_HUNDRED)
                .and_then(|h| h.to_i64())
                .unwrap_or(100)
                .max(100)
        };
        let min = to_hundredths(self.crash_min);
        let max = to_hundredths(self.crash_max);
        if min <= max { (min, max) } else { (max, min) }
    }
}

/// Outcome of one engine step.
#[derive(Debug, Default)]
pub struct Transition {
    /// Events to publish, in order.
    pub events: Vec<RoundEvent>,
    /// Bets the engine cashed out automatically.
    pub settlements: Vec<Settlement>,
    /// Delay before the next `advance`.
    pub next_delay: Duration,
}

/// The round state machine.
pub struct RoundEngine {
    config: RoundConfig,
    rng: DeterministicRng,
}

impl RoundEngine {
    /// Create an engine. Seeds from `config.rng_seed` or process entropy.
    pub fn new(config: RoundConfig) -> Self {
        let config = config.validated();
        let rng = match config.rng_seed {
            Some(seed) => DeterministicRng::new(seed),
            None => DeterministicRng::from_entropy(),
        };
        Self { config, rng }
    }

    /// Engine configuration.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Run one transition.
    pub fn advance(&mut self, table: &mut Table) -> Transition {
        match table.round.phase {
            RoundPhase::Waiting => self.take_off(table),
            RoundPhase::Flight => self.climb(table),
            RoundPhase::Crashed => self.open_betting(table),
        }
    }

    /// Open a new betting window. Also used once at startup.
    pub fn open_betting(&mut self, table: &mut Table) -> Transition {
        if !table.bets.is_empty() {
            // Only reachable at startup over a table that already has bets.
            warn!("Opening betting with {} leftover bets; forfeiting", table.bets.len());
            table.bets.forfeit_all();
        }

        table.round = RoundState::new(Uuid::new_v4());
        debug!("Round {} accepting bets", table.round.id);

        Transition {
            events: vec![RoundEvent::Waiting {
                round_id: table.round.id,
                betting_window_ms: self.config.betting_window.as_millis() as u64,
            }],
            settlements: Vec::new(),
            next_delay: self.config.betting_window,
        }
    }

    /// Waiting -> Flight.
    fn take_off(&mut self, table: &mut Table) -> Transition {
        let crash_point = self.draw_crash_point();
        let round = &mut table.round;
        round.phase = RoundPhase::Flight;
        round.multiplier = Decimal::ONE;
        round.crash_point = crash_point;
        round.started_at = Some(Utc::now());
        table.bets.clear_resolutions();

        let start = if self.config.reveal_crash_point {
            round.salt = None;
            RoundEvent::Start { round_id: round.id, crash_at: Some(crash_point), commitment: None }
        } else {
            // Salt from the OS RNG; the crash point stream must stay hidden.
            let salt = *Uuid::new_v4().as_bytes();
            round.salt = Some(salt);
            let commitment = hex::encode(crash_commitment(&round.id, crash_point, &salt));
            RoundEvent::Start { round_id: round.id, crash_at: None, commitment: Some(commitment) }
        };

        info!(
            "Round {} took off with {} bets ({} staked)",
            round.id,
            table.bets.len(),
            table.bets.total_staked()
        );

        Transition {
            events: vec![start],
            settlements: Vec::new(),
            next_delay: self.config.tick_interval,
        }
    }

    /// One multiplier tick; crashes when the crash point is reached.
    fn climb(&mut self, table: &mut Table) -> Transition {
        let round_id = table.round.id;
        let crash_point = table.round.crash_point;
        let next = table
            .round
            .multiplier
            .checked_add(self.config.multiplier_step)
            .map_or(crash_point, round_multiplier)
            .min(crash_point)
            .max(table.round.multiplier);
        table.round.multiplier = next;

        let mut transition = Transition {
            events: vec![RoundEvent::Update { round_id, multiplier: next }],
            settlements: Vec::new(),
            next_delay: self.config.tick_interval,
        };

        if next < crash_point {
            for user in table.bets.auto_cashouts_due(next) {
                let target = table.bets.get(user).and_then(|bet| bet.auto_cashout).unwrap_or(next);
                match table.settle(user, target, true) {
                    Ok(settlement) => transition.settlements.push(settlement),
                    Err(e) => warn!("Auto-cashout for user {} failed: {}", user, e),
                }
            }
            return transition;
        }

        self.crash(table, &mut transition);
        transition
    }

    /// Flight -> Crashed. Forfeits every unresolved bet.
    fn crash(&mut self, table: &mut Table, transition: &mut Transition) {
        let round = &mut table.round;
        round.phase = RoundPhase::Crashed;
        let forfeited = table.bets.forfeit_all();

        info!(
            "Round {} crashed at {}x, {} bets forfeited",
            round.id,
            round.crash_point,
            forfeited.len()
        );

        transition.events.push(RoundEvent::Crash {
            round_id: round.id,
            at: round.crash_point,
            salt: round.salt.map(hex::encode),
            forfeited: forfeited.len(),
        });
        transition.next_delay = self.config.crash_pause;

        let summary = RoundSummary {
            round_id: round.id,
            crash_point: round.crash_point,
            started_at: round.started_at,
            crashed_at: Utc::now(),
        };
        table.record_history(summary);
    }

    /// Uniform crash point in hundredths over the configured range.
    fn draw_crash_point(&mut self) -> Decimal {
        let (min, max) = self.config.crash_range_hundredths();
        Decimal::new(self.rng.next_range(min, max), MONEY_DP)
    }
}
