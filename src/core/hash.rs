//! Crash Point Commitments
//!
//! When the crash point is withheld at round start, observers receive
//! `H(domain || round_id || crash_point || salt)` instead, and the salt is
//! revealed at crash so anyone can check the engine did not move the target.

use rust_decimal::Decimal;
use sha2::{Sha256, Digest};
use uuid::Uuid;

/// Hash output type (256 bits / 32 bytes)
pub type Commitment = [u8; 32];

/// Domain separator for crash commitments.
const COMMITMENT_DOMAIN: &[u8] = b"AVIATOR_CRASH_V1";

/// Compute the commitment for a round's crash point.
///
/// The crash point is hashed in its normalized string form so `2.5` and
/// `2.50` commit to the same value.
pub fn crash_commitment(round_id: &Uuid, crash_point: Decimal, salt: &[u8; 16]) -> Commitment {
    let mut hasher = Sha256::new();
    hasher.update(COMMITMENT_DOMAIN);
    hasher.update(round_id.as_bytes());
    hasher.update(crash_point.normalize().to_string().as_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

/// Check a revealed crash point and salt against a published commitment (hex).
pub fn verify_commitment(
    commitment_hex: &str,
    round_id: &Uuid,
    crash_point: Decimal,
    salt_hex: &str,
) -> bool {
    let salt: [u8; 16] = match hex::decode(salt_hex).ok().and_then(|b| b.try_into().ok()) {
        Some(s) => s,
        None => return false,
    };
    hex::encode(crash_commitment(round_id, crash_point, &salt)) == commitment_hex
}
