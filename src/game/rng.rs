//! Deterministic Random Number Generator
//!
//! Xorshift128+ PRNG used for minefield placement. Given the same seed,
//! produces an identical sequence on all platforms, so the host can derive
//! a field once and every test can replay it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Deterministic PRNG using the Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG produces the exact same sequence of
/// random numbers on any platform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldRng {
    state: [u64; 2],
}

impl Default for FieldRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FieldRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // State must never be all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
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

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }

    /// Shuffle a slice in place using Fisher-Yates.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
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

/// Derive a minefield seed from the session parameters.
///
/// The host derives the seed once per game instance, at first-move time:
/// - `session_id`: the hosting participant's id (unique per session)
/// - `game_nonce`: incremented on every reset, so replays within one
///   session do not repeat fields
/// - `entropy`: host clock nanoseconds, so two sessions differ
pub fn derive_field_seed(session_id: &str, game_nonce: u32, entropy: u64) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"MINELINK_FIELD_V1");
    hasher.update(session_id.as_bytes());
    hasher.update(game_nonce.to_le_bytes());
    hasher.update(entropy.to_le_bytes());

    let hash = hasher.finalize();

    // First 8 bytes as seed
    u64::from_le_bytes(hash[0..8].try_into().unwrap())
}

// =============================================================================
// TESTS
// =============================================================================
