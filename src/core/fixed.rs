//! Q16.16 Fixed-Point Arithmetic
//!
//! This module provides deterministic fixed-point math for game simulation.
//! All operations use integer arithmetic only - no floats in gameplay logic.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q16.16 (32-bit signed integer)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │   │  └──── 16 bits ────┘└──── 16 bits ────┘                 │
//! │   └─ Sign bit                                               │
//! │                                                             │
//! │  Range: -32768.0 to +32767.99998 (approx)                   │
//! │  Precision: 1/65536 ≈ 0.000015 units                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Why Q16.16?
//!
//! - A 480x560 viewport fits comfortably in 16 integer bits
//! - Sub-pixel precision (0.00001 units) for smooth movement
//! - Fast integer ops on all platforms, bit-identical replays

use std::fmt;
use std::ops::{Add, Sub, Mul, Div, Neg};

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE; // 65536

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1; // 32768

/// Maximum positive value
pub const FIXED_MAX: Fixed = i32::MAX;

/// Minimum negative value
pub const FIXED_MIN: Fixed = i32::MIN;

// =============================================================================
// GAME CONSTANTS (All as integer literals - NO float conversion!)
// =============================================================================

/// Simulation rate in frames per second
pub const FPS: i32 = 60;

/// Playfield width in pixels: 480 * 65536
pub const VIEWPORT_W: Fixed = 480 << FIXED_SCALE;

/// Playfield height in pixels: 560 * 65536
pub const VIEWPORT_H: Fixed = 560 << FIXED_SCALE;

/// Minimum distance the player keeps from the playfield border: 16 * 65536
pub const PLR_MIN_BORDER_DIST: Fixed = 16 << FIXED_SCALE;

/// Unfocused player speed: 0.01 * viewport width = 4.8 px/frame
pub const PLR_MOVE_SPEED: Fixed = VIEWPORT_W / 100;

/// Focused player speed: half of the unfocused speed
pub const PLR_FOCUS_SPEED: Fixed = PLR_MOVE_SPEED / 2;

/// Upward drift of the dying player sprite, px/frame
pub const PLR_DEATH_DRIFT: Fixed = FIXED_ONE;

// =============================================================================
// CORE OPERATIONS (All deterministic, wrapping semantics)
// =============================================================================

/// Convert a compile-time float to fixed-point.
///
/// # Warning
/// Only use at compile-time or initialization. NEVER in tick loop.
///
/// # Example
/// ```
/// use spellframe::core::fixed::{to_fixed, FIXED_ONE};
/// const MY_VALUE: i32 = to_fixed(2.5);
/// assert_eq!(MY_VALUE, FIXED_ONE * 2 + FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert fixed-point to float for display/rendering.
///
/// # Warning
/// Only use for visual output. NEVER use result in game logic.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Multiply two fixed-point numbers.
///
/// Uses i64 intermediate to prevent overflow, then truncates.
///
/// # Determinism
/// - Uses wrapping arithmetic
/// - Truncates toward zero (Rust default for integer division)
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    // Widen to i64, multiply, shift back
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Divide two fixed-point numbers.
///
/// Pre-shifts numerator to maintain precision.
/// Returns 0 on divide-by-zero.
///
/// # Determinism
/// - Uses wrapping arithmetic
/// - Truncates toward zero
/// - Divide-by-zero returns 0 (not panic)
#[inline]
pub fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0; // Deterministic: don't panic
    }
    let wide = (a as i64) << FIXED_SCALE;
    (wide / b as i64) as Fixed
}

/// Square root using Newton-Raphson iteration.
///
/// Safe from divide-by-zero: returns 0 for non-positive inputs.
/// Uses exactly 6 iterations for determinism.
///
/// # Prefer Squared Distances
/// When possible, use `distance_squared` instead of `distance`
/// to avoid sqrt entirely. It's faster and equally deterministic.
#[inline]
pub fn fixed_sqrt(x: Fixed) -> Fixed {
    if x <= 0 {
        return 0;
    }

    // Initial guess: x/2, but never zero
    let mut guess = (x >> 1).max(1);

    // Newton-Raphson: guess = (guess + x/guess) / 2
    // Fixed 6 iterations for determinism
    for _ in 0..6 {
        let div = fixed_div(x, guess);
        guess = (guess.wrapping_add(div)) >> 1;

        // Safety: never let guess become zero
        if guess == 0 {
            guess = 1;
        }
    }

    guess
}

/// Absolute value of a fixed-point number.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 { x.wrapping_neg() } else { x }
}

/// Minimum of two fixed-point numbers.
#[inline]
pub fn fixed_min(a: Fixed, b: Fixed) -> Fixed {
    if a < b { a } else { b }
}

/// Maximum of two fixed-point numbers.
#[inline]
pub fn fixed_max(a: Fixed, b: Fixed) -> Fixed {
    if a > b { a } else { b }
}

/// Clamp a fixed-point number to a range.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    fixed_max(min, fixed_min(max, value))
}

/// Linear interpolation: a + (b - a) * t
/// where t is in fixed-point (0.0 = 0, 1.0 = FIXED_ONE)
#[inline]
pub fn fixed_lerp(a: Fixed, b: Fixed, t: Fixed) -> Fixed {
    let diff = b.wrapping_sub(a);
    a.wrapping_add(fixed_mul(diff, t))
}

// =============================================================================
// FIXEDNUM WRAPPER (Optional ergonomic wrapper)
// =============================================================================

/// Ergonomic wrapper around fixed-point with operator overloading.
///
/// Use this for cleaner code when performance isn't critical.
/// For hot paths, use raw `Fixed` with `fixed_*` functions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedNum(pub Fixed);

impl FixedNum {
    /// Zero constant
    pub const ZERO: Self = Self(0);

    /// One constant
    pub const ONE: Self = Self(FIXED_ONE);

    /// Create from raw fixed-point value
    #[inline]
    pub const fn from_raw(raw: Fixed) -> Self {
        Self(raw)
    }

    /// Create from integer
    #[inline]
    pub const fn from_int(i: i32) -> Self {
        Self(i << FIXED_SCALE)
    }

    /// Get raw fixed-point value
    #[inline]
    pub const fn raw(self) -> Fixed {
        self.0
    }

    /// Convert to float for display
    #[inline]
    pub fn to_float(self) -> f32 {
        to_float(self.0)
    }

    /// Absolute value
    #[inline]
    pub fn abs(self) -> Self {
        Self(fixed_abs(self.0))
    }

    /// Square root
    #[inline]
    pub fn sqrt(self) -> Self {
        Self(fixed_sqrt(self.0))
    }
}

impl Add for FixedNum {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for FixedNum {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl Mul for FixedNum {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self(fixed_mul(self.0, rhs.0))
    }
}

impl Div for FixedNum {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        Self(fixed_div(self.0, rhs.0))
    }
}

impl Neg for FixedNum {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

impl fmt::Debug for FixedNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({:.4})", self.to_float())
    }
}

impl fmt::Display for FixedNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_float())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_constants() {
        assert_eq!(FIXED_ONE, 65536);
        assert_eq!(FIXED_HALF, 32768);
        assert_eq!(FIXED_SCALE, 16);
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(1.0), FIXED_ONE);
        assert_eq!(to_fixed(0.5), FIXED_HALF);
        assert_eq!(to_fixed(2.0), FIXED_ONE * 2);
        assert_eq!(to_fixed(-1.0), -FIXED_ONE);
    }

    #[test]
    fn test_fixed_mul() {
        // 2.0 * 3.0 = 6.0
        let a = to_fixed(2.0);
        let b = to_fixed(3.0);
        let result = fixed_mul(a, b);
        assert_eq!(result, to_fixed(6.0));

        // 0.5 * 0.5 = 0.25
        let result2 = fixed_mul(FIXED_HALF, FIXED_HALF);
        assert_eq!(result2, to_fixed(0.25));

        // Negative: -2.0 * 3.0 = -6.0
        let result3 = fixed_mul(to_fixed(-2.0), to_fixed(3.0));
        assert_eq!(result3, to_fixed(-6.0));
    }

    #[test]
    fn test_fixed_div() {
        // 6.0 / 2.0 = 3.0
        let result = fixed_div(to_fixed(6.0), to_fixed(2.0));
        assert_eq!(result, to_fixed(3.0));

        // 1.0 / 4.0 = 0.25
        let result2 = fixed_div(FIXED_ONE, to_fixed(4.0));
        assert_eq!(result2, to_fixed(0.25));

        // Divide by zero returns 0
        let result3 = fixed_div(FIXED_ONE, 0);
        assert_eq!(result3, 0);
    }

    #[test]
    fn test_fixed_sqrt() {
        // sqrt(4.0) = 2.0
        let result = fixed_sqrt(to_fixed(4.0));
        let expected = to_fixed(2.0);
        assert!((result - expected).abs() < 100, "sqrt(4) should be ~2.0");

        // sqrt(1.0) = 1.0
        let result2 = fixed_sqrt(FIXED_ONE);
        assert!((result2 - FIXED_ONE).abs() < 100, "sqrt(1) should be ~1.0");

        // sqrt(0) = 0
        assert_eq!(fixed_sqrt(0), 0);

        // sqrt(negative) = 0
        assert_eq!(fixed_sqrt(-FIXED_ONE), 0);

        // sqrt(very small) doesn't panic
        assert!(fixed_sqrt(1) >= 0);
    }

    #[test]
    fn test_game_constants() {
        // Verify constants are correct
        assert_eq!(VIEWPORT_W, 480 * FIXED_ONE);
        assert_eq!(VIEWPORT_H, 560 * FIXED_ONE);
        assert_eq!(PLR_MIN_BORDER_DIST, 16 * FIXED_ONE);
        assert_eq!(PLR_MOVE_SPEED, to_fixed(4.8));
        assert_eq!(PLR_FOCUS_SPEED, to_fixed(2.4));
    }

    #[test]
    fn test_fixed_determinism() {
        // Same inputs must produce same outputs
        for _ in 0..1000 {
            let a = 12345678;
            let b = 87654321;

            let mul1 = fixed_mul(a, b);
            let mul2 = fixed_mul(a, b);
            assert_eq!(mul1, mul2, "Multiplication must be deterministic");

            let div1 = fixed_div(a, b);
            let div2 = fixed_div(a, b);
            assert_eq!(div1, div2, "Division must be deterministic");

            let sqrt1 = fixed_sqrt(a);
            let sqrt2 = fixed_sqrt(a);
            assert_eq!(sqrt1, sqrt2, "Square root must be deterministic");
        }
    }

    #[test]
    fn test_fixednum_wrapper() {
        let a = FixedNum::from_int(5);
        let b = FixedNum::from_int(3);

        assert_eq!((a + b).raw(), to_fixed(8.0));
        assert_eq!((a - b).raw(), to_fixed(2.0));
        assert_eq!((a * b).raw(), to_fixed(15.0));

        let c = FixedNum::from_raw(to_fixed(10.0));
        let d = FixedNum::from_raw(to_fixed(4.0));
        assert_eq!((c / d).raw(), to_fixed(2.5));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn mul_commutes(a in any::<i32>(), b in any::<i32>()) {
            prop_assert_eq!(fixed_mul(a, b), fixed_mul(b, a));
        }

        #[test]
        fn one_is_identity(a in any::<i32>()) {
            prop_assert_eq!(fixed_mul(a, FIXED_ONE), a);
            prop_assert_eq!(fixed_div(a, FIXED_ONE), a);
        }

        #[test]
        fn div_by_zero_is_zero(a in any::<i32>()) {
            prop_assert_eq!(fixed_div(a, 0), 0);
        }

        #[test]
        fn abs_is_non_negative(a in (i32::MIN + 1)..=i32::MAX) {
            prop_assert!(fixed_abs(a) >= 0);
        }

        #[test]
        fn sqrt_is_non_negative(x in any::<i32>()) {
            prop_assert!(fixed_sqrt(x) >= 0);
        }

        // No wrapping for magnitudes the playfield actually uses
        #[test]
        fn in_range_mul_is_exact(a in -(1i32 << 23)..(1i32 << 23), b in -(1i32 << 23)..(1i32 << 23)) {
            let wide = ((a as i64 * b as i64) >> FIXED_SCALE) as i32;
            prop_assert_eq!(fixed_mul(a, b), wide);
        }
    }
}
