//! Core primitives.
//!
//! Money arithmetic, the crash point RNG, commitment hashing and
//! environment parsing. Nothing here touches the network or the clock
//! except `DeterministicRng::from_entropy`.

pub mod env;
pub mod hash;
pub mod money;
pub mod rng;

// Re-export core types
pub use hash::{crash_commitment, verify_commitment, Commitment};
pub use money::{nano_to_amount, payout, round_multiplier};
pub use rng::DeterministicRng;
