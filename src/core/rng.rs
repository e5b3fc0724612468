//! Crash Point Random Number Generator
//!
//! Uses Xorshift128+ for fast, deterministic randomness.
//! Seeded once per engine; given the same seed the engine draws the
//! same sequence of crash points, which keeps round tests reproducible.

use sha2::{Sha256, Digest};

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use aviator::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create an RNG seeded from process entropy (UUID v4 + wall clock).
    pub fn from_entropy() -> Self {
        let nonce = uuid::Uuid::new_v4();
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();

        let mut entropy = Vec::with_capacity(24);
        entropy.extend_from_slice(nonce.as_bytes());
        entropy.extend_from_slice(&nanos.to_le_bytes());

        Self::new(derive_seed(&entropy))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [min, max] (inclusive).
    ///
    /// Simple modulo; the bias is negligible for the small ranges used
    /// for crash points.
    #[inline]
    pub fn next_range(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        // Zero span means the full i64 range.
        let span = max.abs_diff(min).wrapping_add(1);
        let offset = if span == 0 { self.next_u64() } else { self.next_u64() % span };
        min.saturating_add_unsigned(offset)
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Fold arbitrary entropy into a 64-bit seed.
pub fn derive_seed(entropy: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"AVIATOR_SEED_V1");
    hasher.update(entropy);
    let hash = hasher.finalize();

    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed_bytes)
}
