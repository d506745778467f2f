//! Carrier wipe-off and five-arm correlation
//!
//! Each epoch, the input samples are mixed down by the local
//! carrier replica and correlated against five local code
//! replicas: very early (VE), early (E), prompt (P), late (L)
//! and very late (VL).
//!
//! ```txt
//!          VE    E   P   L    VL
//!           |    |   |   |    |
//!  ---------+----+---+---+----+--------> code phase
//!           |<-->|           |<-->|
//!         VE spacing        VL spacing
//! ```
//!
//! The primary signal uses [`correlate()`], which is an
//! ordinary dot product against each replica. The E1-A
//! secondary signal has an unknown spreading code, so
//! [`correlate_codeless()`] instead sums each arm per chip and
//! combines the per-chip sums so that the unknown chip signs
//! cancel.
//!
//! The [`Correlator`] owns the scratch buffers for both. They
//! are sized once, at construction, from the nominal epoch
//! length.

use std::ops::AddAssign;

use nalgebra::DVector;
use num_complex::Complex;
use num_traits::Zero;

#[cfg(not(test))]
use log::warn;

#[cfg(test)]
use std::println as warn;

use crate::resampler::{Resampler, SubcarrierPhasing};

/// Number of correlator arms
pub const NUM_ARMS: usize = 5;

/// Correlator arm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arm {
    VeryEarly = 0,
    Early = 1,
    Prompt = 2,
    Late = 3,
    VeryLate = 4,
}

/// Five-arm correlator output
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correlation {
    pub very_early: Complex<f64>,
    pub early: Complex<f64>,
    pub prompt: Complex<f64>,
    pub late: Complex<f64>,
    pub very_late: Complex<f64>,
}

impl Correlation {
    /// From an array ordered `[VE, E, P, L, VL]`
    pub fn from_arms(arms: [Complex<f64>; NUM_ARMS]) -> Self {
        Self {
            very_early: arms[Arm::VeryEarly as usize],
            early: arms[Arm::Early as usize],
            prompt: arms[Arm::Prompt as usize],
            late: arms[Arm::Late as usize],
            very_late: arms[Arm::VeryLate as usize],
        }
    }

    /// As an array ordered `[VE, E, P, L, VL]`
    pub fn arms(&self) -> [Complex<f64>; NUM_ARMS] {
        [
            self.very_early,
            self.early,
            self.prompt,
            self.late,
            self.very_late,
        ]
    }

    /// Magnitudes ordered `[VE, E, P, L, VL]`
    pub fn magnitudes(&self) -> [f64; NUM_ARMS] {
        self.arms().map(|c| c.norm())
    }

    /// True if no arm is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.arms().iter().all(|c| c.is_finite())
    }
}

impl Default for Correlation {
    fn default() -> Self {
        Self::from_arms([Complex::zero(); NUM_ARMS])
    }
}

impl AddAssign for Correlation {
    fn add_assign(&mut self, rhs: Self) {
        self.very_early += rhs.very_early;
        self.early += rhs.early;
        self.prompt += rhs.prompt;
        self.late += rhs.late;
        self.very_late += rhs.very_late;
    }
}

/// Primary replica parameters
///
/// Phases and step are in replica table slots.
#[derive(Clone, Debug)]
pub struct CodeReplica<'a> {
    /// Replica table
    pub table: &'a [f32],

    /// Initial phase of each arm `[VE, E, P, L, VL]`
    pub phases: [f64; NUM_ARMS],

    /// Phase advance per sample
    pub step: f64,

    /// Separately-resampled subcarrier, if any
    pub subcarrier: Option<SubcarrierReplica>,
}

/// Subcarrier replica parameters
///
/// Phases and step are in subcarrier cycles.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubcarrierReplica {
    /// Initial phase of each arm `[VE, E, P, L, VL]`
    pub phases: [f64; NUM_ARMS],

    /// Phase advance per sample
    pub step: f64,

    /// Subcarrier phasing
    pub phasing: SubcarrierPhasing,
}

/// Codeless replica parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CodelessReplica {
    /// Initial chip phase of each arm (chips, non-negative)
    pub chip_phases: [f64; NUM_ARMS],

    /// Chip phase advance per sample
    pub chip_step: f64,

    /// Subcarrier replica
    pub subcarrier: SubcarrierReplica,
}

/// Correlator scratch arena
#[derive(Clone, Debug)]
pub struct Correlator {
    // samples each buffer can hold
    capacity: usize,

    // input sampling rate (Hz)
    sample_rate: f64,

    // secondary chip rate bound used for the chip-index table (chips/s)
    max_chip_rate: f64,

    // resampled primary code replicas
    replicas: [Vec<f32>; NUM_ARMS],

    // resampled subcarriers, shared by both components
    subcarriers: [Vec<f32>; NUM_ARMS],

    // identity table of chip indices
    chip_table: Vec<u32>,

    // resampled chip indices
    chip_indices: [Vec<u32>; NUM_ARMS],

    // per-chip partial sums
    chip_sums: [DVector<Complex<f64>>; NUM_ARMS],
}

impl Correlator {
    /// New correlator arena
    ///
    /// Buffers hold up to `capacity` samples at `sample_rate`.
    /// Codeless chip-index buffers are sized for a chip rate of
    /// at most `max_chip_rate`.
    pub fn new(capacity: usize, sample_rate: f64, max_chip_rate: f64) -> Self {
        let mut out = Self {
            capacity: 0,
            sample_rate,
            max_chip_rate,
            replicas: Default::default(),
            subcarriers: Default::default(),
            chip_table: Vec::new(),
            chip_indices: Default::default(),
            chip_sums: std::array::from_fn(|_| DVector::zeros(0)),
        };
        out.allocate(capacity.max(1));
        out
    }

    /// Buffer capacity, in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length of the codeless chip-index table
    pub fn chip_table_len(&self) -> usize {
        self.chip_table.len()
    }

    /// Correlate the primary signal
    ///
    /// Mixes `input` with the carrier replica, starting at
    /// `carrier_phase` radians and advancing `phase_step` radians
    /// per sample, and correlates with the code replica.
    pub fn correlate_primary<R: Resampler>(
        &mut self,
        resampler: &R,
        input: &[Complex<f32>],
        carrier_phase: f64,
        phase_step: f64,
        replica: &CodeReplica<'_>,
    ) -> Correlation {
        let len = input.len();
        self.reserve(len);

        for (arm, buf) in self.replicas.iter_mut().enumerate() {
            resampler.resample_into(
                replica.table,
                replica.phases[arm],
                replica.step,
                &mut buf[0..len],
            );
        }

        if let Some(sc) = &replica.subcarrier {
            for (arm, (buf, scbuf)) in self
                .replicas
                .iter_mut()
                .zip(self.subcarriers.iter_mut())
                .enumerate()
            {
                resampler.subcarrier_into(sc.phases[arm], sc.step, sc.phasing, &mut scbuf[0..len]);
                for (r, s) in buf[0..len].iter_mut().zip(scbuf[0..len].iter()) {
                    *r *= *s;
                }
            }
        }

        let [ve, e, p, l, vl] = &self.replicas;
        correlate(
            input,
            carrier_phase,
            phase_step,
            [&ve[0..len], &e[0..len], &p[0..len], &l[0..len], &vl[0..len]],
        )
    }

    /// Correlate the secondary signal codelessly
    pub fn correlate_secondary<R: Resampler>(
        &mut self,
        resampler: &R,
        input: &[Complex<f32>],
        carrier_phase: f64,
        phase_step: f64,
        replica: &CodelessReplica,
    ) -> Correlation {
        let len = input.len();
        self.reserve(len);

        for (arm, buf) in self.chip_indices.iter_mut().enumerate() {
            resampler.resample_into(
                &self.chip_table,
                replica.chip_phases[arm],
                replica.chip_step,
                &mut buf[0..len],
            );
        }

        let sc = &replica.subcarrier;
        for (arm, buf) in self.subcarriers.iter_mut().enumerate() {
            resampler.subcarrier_into(sc.phases[arm], sc.step, sc.phasing, &mut buf[0..len]);
        }

        let [ive, ie, ip, il, ivl] = &self.chip_indices;
        let [sve, se, sp, sl, svl] = &self.subcarriers;
        correlate_codeless(
            input,
            carrier_phase,
            phase_step,
            [
                &ive[0..len],
                &ie[0..len],
                &ip[0..len],
                &il[0..len],
                &ivl[0..len],
            ],
            [
                &sve[0..len],
                &se[0..len],
                &sp[0..len],
                &sl[0..len],
                &svl[0..len],
            ],
            &mut self.chip_sums,
        )
    }

    // grow if an epoch is ever longer than planned
    fn reserve(&mut self, len: usize) {
        if len > self.capacity {
            warn!(
                "correlator: epoch of {} samples exceeds arena of {}; growing",
                len, self.capacity
            );
            self.allocate(len);
        }
    }

    fn allocate(&mut self, capacity: usize) {
        self.capacity = capacity;
        for buf in self.replicas.iter_mut() {
            buf.resize(capacity, 0.0f32);
        }
        for buf in self.subcarriers.iter_mut() {
            buf.resize(capacity, 0.0f32);
        }
        for buf in self.chip_indices.iter_mut() {
            buf.resize(capacity, 0u32);
        }

        let chips = (capacity as f64 * self.max_chip_rate / self.sample_rate).ceil() as usize
            + CHIP_TABLE_MARGIN;
        self.chip_table = (0..chips as u32).collect();
        for sums in self.chip_sums.iter_mut() {
            *sums = DVector::zeros(chips);
        }
    }
}

/// Correlate against five resampled replicas
///
/// Computes `Σ input[n]·exp(-j·φ[n])·replica[n]` for each arm,
/// with `φ[n] = carrier_phase + n·phase_step`. The correlation
/// covers the shortest of `input` and the replicas.
pub fn correlate(
    input: &[Complex<f32>],
    carrier_phase: f64,
    phase_step: f64,
    replicas: [&[f32]; NUM_ARMS],
) -> Correlation {
    let mut acc = [Complex::<f64>::zero(); NUM_ARMS];
    let mut nco = CarrierNco::new(carrier_phase, phase_step);

    for (n, samp) in input.iter().enumerate() {
        let wiped = nco.wipe(samp);
        for (a, rep) in acc.iter_mut().zip(replicas.iter()) {
            if let Some(r) = rep.get(n) {
                *a += wiped * (*r as f64);
            }
        }
    }

    Correlation::from_arms(acc)
}

/// Codeless correlation
///
/// For each arm, the carrier-wiped input is multiplied by the
/// subcarrier replica and summed per chip into `chip_sums`,
/// where `chip_indices` gives the chip of each sample. With
/// `Pₖ` the prompt sum for chip `k` and `Aₖ` the sum for some
/// other arm, the outputs are
///
/// ```txt
/// P = Σₖ Pₖ²
/// A = Σₖ Aₖ·Pₖ
/// ```
///
/// The unknown chip signs cancel in each product. The carrier
/// phase of every output is *doubled*. Chip indices outside
/// of `chip_sums` are ignored.
pub fn correlate_codeless(
    input: &[Complex<f32>],
    carrier_phase: f64,
    phase_step: f64,
    chip_indices: [&[u32]; NUM_ARMS],
    subcarriers: [&[f32]; NUM_ARMS],
    chip_sums: &mut [DVector<Complex<f64>>; NUM_ARMS],
) -> Correlation {
    for sums in chip_sums.iter_mut() {
        sums.fill(Complex::zero());
    }

    let mut nco = CarrierNco::new(carrier_phase, phase_step);
    for (n, samp) in input.iter().enumerate() {
        let wiped = nco.wipe(samp);
        for arm in 0..NUM_ARMS {
            let (Some(&chip), Some(&sc)) = (chip_indices[arm].get(n), subcarriers[arm].get(n))
            else {
                continue;
            };
            if let Some(slot) = chip_sums[arm].get_mut(chip as usize) {
                *slot += wiped * (sc as f64);
            }
        }
    }

    let prompt = &chip_sums[Arm::Prompt as usize];
    let mut out = [Complex::<f64>::zero(); NUM_ARMS];
    for (arm, o) in out.iter_mut().enumerate() {
        *o = chip_sums[arm].dot(prompt);
    }
    Correlation::from_arms(out)
}

// rotating carrier replica
struct CarrierNco {
    rot: Complex<f64>,
    inc: Complex<f64>,
    count: usize,
}

impl CarrierNco {
    fn new(phase: f64, step: f64) -> Self {
        Self {
            rot: Complex::from_polar(1.0, -phase),
            inc: Complex::from_polar(1.0, -step),
            count: 0,
        }
    }

    // mix one sample to baseband
    #[inline]
    fn wipe(&mut self, samp: &Complex<f32>) -> Complex<f64> {
        let out = Complex::new(samp.re as f64, samp.im as f64) * self.rot;
        self.rot *= self.inc;
        self.count += 1;
        if self.count % NCO_RENORMALIZE == 0 {
            self.rot /= self.rot.norm();
        }
        out
    }
}

const NCO_RENORMALIZE: usize = 512;
const CHIP_TABLE_MARGIN: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;
    use rand_core::{RngCore, SeedableRng};
    use rand_xorshift::XorShiftRng;

    use crate::resampler::FixedPointResampler;

    #[test]
    fn test_correlate_carrier_wipe() {
        // a pure tone at the NCO frequency correlates to a
        // constant times the initial phase offset
        let phase0 = 0.7;
        let step = 0.01;
        let input: Vec<Complex<f32>> = (0..1000)
            .map(|n| {
                let c = Complex::from_polar(1.0f64, phase0 + 0.2 + step * n as f64);
                Complex::new(c.re as f32, c.im as f32)
            })
            .collect();
        let ones = vec![1.0f32; 1000];
        let neg = vec![-1.0f32; 1000];

        let corr = correlate(
            &input,
            phase0,
            step,
            [&ones[..], &ones[..], &ones[..], &neg[..], &ones[0..500]],
        );
        assert_approx_eq!(1000.0, corr.prompt.norm(), 1e-2);
        assert_approx_eq!(0.2, corr.prompt.arg(), 1e-5);
        assert_approx_eq!(-corr.prompt.re, corr.late.re, 1e-6);
        assert_approx_eq!(500.0, corr.very_late.norm(), 1e-2);
        assert!(corr.is_finite());
    }

    #[test]
    fn test_correlate_nan() {
        let mut input = vec![Complex::new(1.0f32, 0.0); 10];
        input[3] = Complex::new(f32::NAN, 0.0);
        let ones = vec![1.0f32; 10];
        let corr = correlate(&input, 0.0, 0.0, [&ones[..]; NUM_ARMS]);
        assert!(!corr.is_finite());
        assert!(!corr.prompt.is_finite());
    }

    #[test]
    fn test_correlation_ops() {
        let mut a = Correlation::from_arms([
            Complex::new(1.0, 0.0),
            Complex::new(0.0, 2.0),
            Complex::new(3.0, 4.0),
            Complex::new(0.0, 0.0),
            Complex::new(-1.0, 0.0),
        ]);
        assert_eq!([1.0, 2.0, 5.0, 0.0, 1.0], a.magnitudes());
        a += a;
        assert_eq!(Complex::new(6.0, 8.0), a.prompt);
        assert_eq!(Correlation::default().prompt, Complex::zero());
    }

    #[test]
    fn test_codeless_removes_chip_signs() {
        // four samples per chip, random chip signs, no
        // subcarrier. The codeless prompt is Σ (4·c·e^jθ)² =
        // 16·N·e^j2θ regardless of the chip signs.
        let mut rng = XorShiftRng::seed_from_u64(1234);
        let chips = 50;
        let theta = 0.3f64;
        let mut input = Vec::new();
        for _ in 0..chips {
            let c = if rng.next_u32() & 1 == 0 { 1.0 } else { -1.0 };
            for _ in 0..4 {
                let s = Complex::from_polar(c, theta);
                input.push(Complex::new(s.re as f32, s.im as f32));
            }
        }

        let indices: Vec<u32> = (0..input.len() as u32).map(|n| n / 4).collect();
        let ones = vec![1.0f32; input.len()];
        let mut sums: [DVector<Complex<f64>>; NUM_ARMS] =
            std::array::from_fn(|_| DVector::zeros(chips + 4));

        // stale data in the sums is cleared
        sums[2][0] = Complex::new(99.0, 0.0);

        let corr = correlate_codeless(
            &input,
            0.0,
            0.0,
            [&indices[..]; NUM_ARMS],
            [&ones[..]; NUM_ARMS],
            &mut sums,
        );

        assert_approx_eq!(16.0 * chips as f64, corr.prompt.norm(), 1e-3);
        assert_approx_eq!(2.0 * theta, corr.prompt.arg(), 1e-5);
        assert_approx_eq!(corr.prompt.re, corr.early.re, 1e-6);
    }

    #[test]
    fn test_correlator_primary_aligned() {
        // a signal built from the same table as the replica
        // peaks on the prompt arm
        let mut rng = XorShiftRng::seed_from_u64(99);
        let table: Vec<f32> = (0..100)
            .map(|_| if rng.next_u32() & 1 == 0 { 1.0 } else { -1.0 })
            .collect();
        let step = 0.25;
        let input: Vec<Complex<f32>> = (0..400)
            .map(|n| Complex::new(table[n / 4], 0.0))
            .collect();

        let mut corr = Correlator::new(200, 4.0e6, 2.5575e6);
        let replica = CodeReplica {
            table: &table,
            phases: [1.0, 0.5, 0.0, -0.5, -1.0],
            step,
            subcarrier: None,
        };
        let out = corr.correlate_primary(&FixedPointResampler, &input, 0.0, 0.0, &replica);
        assert!(corr.capacity() >= 400);

        assert_approx_eq!(400.0, out.prompt.re, 1e-3);
        let mags = out.magnitudes();
        for arm in [Arm::VeryEarly, Arm::Early, Arm::Late, Arm::VeryLate] {
            assert!(mags[Arm::Prompt as usize] > mags[arm as usize]);
        }
    }

    #[test]
    fn test_correlator_chip_table() {
        let corr = Correlator::new(16000, 4.0e6, 2.5575e6);
        assert_eq!(10230 + 4, corr.chip_table_len());
    }
}
