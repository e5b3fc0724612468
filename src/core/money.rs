//! Money helpers.
//!
//! Balances, stakes and multipliers are [`Decimal`]; nothing in the
//! balance path touches floating point.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept for multipliers and payouts.
pub const MONEY_DP: u32 = 2;

/// Provider amounts are integers in 10^-9 units (nanoTON).
pub const NANO_SCALE: u32 = 9;

/// Round a multiplier to two decimal places.
#[inline]
pub fn round_multiplier(multiplier: Decimal) -> Decimal {
    multiplier.round_dp(MONEY_DP)
}

/// Default upper bound for a single stake or top-up.
pub const DEFAULT_MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Payout for a stake at a multiplier, truncated toward zero to cents.
/// `None` when the product does not fit in a `Decimal`.
#[inline]
pub fn payout(stake: Decimal, multiplier: Decimal) -> Option<Decimal> {
    stake
        .checked_mul(multiplier)
        .map(|p| p.round_dp_with_strategy(MONEY_DP, RoundingStrategy::ToZero))
}

/// Convert a raw provider amount (nano-units) into ledger units.
pub fn nano_to_amount(raw: u64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(raw), NANO_SCALE).normalize()
}

/// Whether an amount can be moved through the ledger.
#[inline]
pub fn is_valid_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO
}
