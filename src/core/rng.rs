//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ algorithm for fast, high-quality, deterministic randomness.
//! Given the same seed, produces identical sequence on all platforms.
//!
//! Every draw used by gameplay comes from one shared stream so that a replay,
//! re-fed with the recorded stage seed, reproduces the run bit for bit. Visual
//! draws (particle scatter, shake jitter) pull from the same stream and must
//! happen in the same order during recording and playback.

use serde::{Serialize, Deserialize};

use super::fixed::{Fixed, FIXED_ONE, VIEWPORT_W, VIEWPORT_H};
use super::vec2::FixedVec2;

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform (x86, ARM, WASM).
///
/// # Example
///
/// ```
/// use spellframe::core::rng::GameRng;
///
/// let mut rng = GameRng::new(12345);
/// let value = rng.next_u64();
/// assert_eq!(value, 6233086606872742541); // Always the same!
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameRng {
    state: [u64; 2],
}

impl Default for GameRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl GameRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds. Replay stage headers
    /// store a 32-bit seed; widen it before calling.
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

    /// Generate a random u32.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
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

    /// Generate a random integer in range [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let range = (max - min + 1) as u32;
        min + self.next_int(range) as i32
    }

    /// Generate a random Fixed in range [0, max).
    #[inline]
    pub fn next_fixed(&mut self, max: Fixed) -> Fixed {
        if max <= 0 {
            return 0;
        }
        // Use upper 32 bits to avoid overflow in multiplication
        let raw = (self.next_u64() >> 32) as u32;
        // Scale to [0, max) range: (raw * max) / 2^32
        ((raw as i64 * max as i64) >> 32) as Fixed
    }

    /// Generate a random Fixed in range [min, max).
    #[inline]
    pub fn next_fixed_range(&mut self, min: Fixed, max: Fixed) -> Fixed {
        if min >= max {
            return min;
        }
        let range = max.wrapping_sub(min);
        min.wrapping_add(self.next_fixed(range))
    }

    /// Generate a random Fixed in [0, 1).
    #[inline]
    pub fn next_unit(&mut self) -> Fixed {
        self.next_fixed(FIXED_ONE)
    }

    /// Generate a random Fixed in [-1, 1).
    #[inline]
    pub fn next_signed_unit(&mut self) -> Fixed {
        self.next_fixed_range(-FIXED_ONE, FIXED_ONE)
    }

    /// Generate a random position within the playfield.
    #[inline]
    pub fn random_viewport_position(&mut self) -> FixedVec2 {
        let x = self.next_fixed(VIEWPORT_W);
        let y = self.next_fixed(VIEWPORT_H);
        FixedVec2::new(x, y)
    }

    /// Generate a random position within a circular area.
    ///
    /// Uses rejection sampling for uniform distribution.
    pub fn random_position_in_circle(&mut self, center: FixedVec2, radius: Fixed) -> FixedVec2 {
        // Rejection sampling for uniform distribution in circle
        loop {
            let x = self.next_fixed_range(-radius, radius);
            let y = self.next_fixed_range(-radius, radius);
            let offset = FixedVec2::new(x, y);

            // Check if within circle (use squared to avoid sqrt)
            let radius_sq = super::fixed::fixed_mul(radius, radius);
            if offset.length_squared() <= radius_sq {
                return center.add(offset);
            }
        }
    }

    /// Generate a random normalized direction vector.
    pub fn random_direction(&mut self) -> FixedVec2 {
        // Generate point, normalize
        // Rejection sampling to avoid zero vector
        loop {
            let x = self.next_signed_unit();
            let y = self.next_signed_unit();
            let vec = FixedVec2::new(x, y);

            if vec.length_squared() > 0 {
                return vec.normalize();
            }
        }
    }

    /// Generate a random boolean with given probability.
    ///
    /// probability is in range [0, FIXED_ONE] where FIXED_ONE = 100%
    #[inline]
    pub fn next_bool(&mut self, probability: Fixed) -> bool {
        self.next_unit() < probability
    }

    /// Shuffle a slice in place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }

    /// Get current state (for checkpointing/debugging).
    pub fn state(&self) -> [u64; 2] {
        self.state
    }

    /// Restore from saved state.
    pub fn set_state(&mut self, state: [u64; 2]) {
        self.state = state;
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

// =============================================================================
// TESTS
// =============================================================================
