//! Tracking discriminators
//!
//! Pure functions which map correlator outputs to phase,
//! frequency, and delay error estimates. Slope corrections,
//! which depend on correlator spacing, are applied by the
//! caller.

use num_complex::Complex;

/// Two-quadrant arctangent carrier phase discriminator
///
/// Returns `atan(Q/I)` in radians, which is insensitive to
/// data bit transitions. Returns zero if `I` is zero.
pub fn pll_two_quadrant_atan(prompt: Complex<f64>) -> f64 {
    if prompt.re != 0.0 {
        (prompt.im / prompt.re).atan()
    } else {
        0.0
    }
}

/// Normalized non-coherent early-minus-late discriminator
///
/// Returns `½(|E|-|L|)/(|E|+|L|)`, or zero if both are
/// zero. The result is positive when the local replica is
/// late.
pub fn dll_nc_e_minus_l_normalized(early: Complex<f64>, late: Complex<f64>) -> f64 {
    let e = early.norm();
    let l = late.norm();
    if e + l == 0.0 {
        0.0
    } else {
        0.5 * (e - l) / (e + l)
    }
}

/// Two-quadrant arctangent frequency discriminator
///
/// Estimates the phase rotation between two consecutive
/// prompt correlations, in radians, as `atan(cross/dot)`.
/// Like the PLL discriminator, it ignores half-cycle data
/// transitions. Its unambiguous range is `±π/2` per update.
/// Returns zero if the dot product is zero.
pub fn fll_two_quadrant_atan(prev: Complex<f64>, cur: Complex<f64>) -> f64 {
    let dot = prev.re * cur.re + prev.im * cur.im;
    let cross = prev.re * cur.im - prev.im * cur.re;
    if dot != 0.0 {
        (cross / dot).atan()
    } else {
        0.0
    }
}

/// Primary E–L slope correction
///
/// Normalizes the E1-B/C early–late discriminator, with
/// early–late spacing `spacing_cycles`, to subcarrier cycles.
pub fn primary_subcarrier_slope(spacing_cycles: f64) -> f64 {
    2.0 * (1.0 - PRIMARY_SC_CORR_SLOPE * spacing_cycles) / PRIMARY_SC_CORR_SLOPE
}

/// Primary VE–VL slope correction
///
/// Normalizes the E1-B/C very-early–very-late discriminator,
/// with spacing `spacing_chips`, to chips.
pub fn primary_code_slope(spacing_chips: f64) -> f64 {
    2.0 * (1.0 - spacing_chips)
}

/// Secondary E–L slope correction
///
/// The front end is assumed to pass only the main lobe of
/// the E1-A subcarrier.
pub const SECONDARY_SUBCARRIER_SLOPE: f64 = 2.0 / (4.0 * std::f64::consts::PI);

/// Secondary VE–VL slope correction
pub const SECONDARY_CODE_SLOPE: f64 = 1.0;

const PRIMARY_SC_CORR_SLOPE: f64 = 3.0;
