//! Local replica resampling
//!
//! The tracking loops keep their code and subcarrier phase
//! estimates in double precision, but the replicas must be
//! produced at the input sample rate. A [`Resampler`] turns a
//! table of per-chip (or per-slot) values into one output
//! value per input sample, given an initial phase and a
//! constant phase step.
//!
//! The [`FixedPointResampler`] accumulates phase in signed
//! Q32.32 fixed point. Every call restarts from the
//! double-precision initial phase, so rounding error never
//! accumulates across epochs.

/// Subcarrier phasing
///
/// BOC subcarriers are square waves. With sine phasing the
/// wave is `+1` for the first half of each cycle; with cosine
/// phasing it is advanced by a quarter cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubcarrierPhasing {
    /// `sign(sin(2πφ))`, used by E1-B/C
    Sine,

    /// `sign(cos(2πφ))`, used by E1-A
    Cosine,
}

/// Replica resampling strategy
pub trait Resampler {
    /// Resample `table` into `out`
    ///
    /// The first output sample is taken from `table` at
    /// `init_phase`, measured in table slots, and each
    /// subsequent sample advances the phase by `step` slots.
    /// Phases wrap modulo the table length, so negative
    /// initial phases are permitted. Exactly `out.len()`
    /// samples are written. An empty table writes nothing.
    fn resample_into<T: Copy>(&self, table: &[T], init_phase: f64, step: f64, out: &mut [T]);

    /// Generate a square-wave subcarrier into `out`
    ///
    /// `init_cycles` is the subcarrier phase of the first
    /// output sample, and `step` is the phase advance per
    /// sample, both in cycles. Outputs are `±1.0`.
    fn subcarrier_into(
        &self,
        init_cycles: f64,
        step: f64,
        phasing: SubcarrierPhasing,
        out: &mut [f32],
    );
}

/// Q32.32 fixed-point phase accumulator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedPointResampler;

impl FixedPointResampler {
    /// New resampler
    pub fn new() -> Self {
        Self
    }
}

impl Resampler for FixedPointResampler {
    fn resample_into<T: Copy>(&self, table: &[T], init_phase: f64, step: f64, out: &mut [T]) {
        if table.is_empty() {
            return;
        }

        let len = table.len() as i64;
        let mut phase = to_fixed(init_phase);
        let step = to_fixed(step);
        for o in out.iter_mut() {
            let idx = (phase >> FRAC_BITS).rem_euclid(len) as usize;
            *o = table[idx];
            phase = phase.wrapping_add(step);
        }
    }

    fn subcarrier_into(
        &self,
        init_cycles: f64,
        step: f64,
        phasing: SubcarrierPhasing,
        out: &mut [f32],
    ) {
        let offset = match phasing {
            SubcarrierPhasing::Sine => 0,
            SubcarrierPhasing::Cosine => QUARTER_CYCLE,
        };

        let mut phase = to_fixed(init_cycles).wrapping_add(offset);
        let step = to_fixed(step);
        for o in out.iter_mut() {
            *o = if phase & FRAC_MASK < HALF_CYCLE {
                1.0
            } else {
                -1.0
            };
            phase = phase.wrapping_add(step);
        }
    }
}

// convert to Q32.32
#[inline]
fn to_fixed(val: f64) -> i64 {
    (val * FIXED_ONE).round() as i64
}

const FRAC_BITS: u32 = 32;
const FIXED_ONE: f64 = (1u64 << FRAC_BITS) as f64;
const FRAC_MASK: i64 = 0xFFFF_FFFF;
const HALF_CYCLE: i64 = 0x8000_0000;
const QUARTER_CYCLE: i64 = 0x4000_0000;
