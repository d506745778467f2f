//! Primary (E1-B/C) tracking loops
//!
//! The [`PrimaryLoop`] holds the carrier, subcarrier, and code
//! estimates for the primary signal component along with the
//! loop filters that steer them. It knows nothing about input
//! buffers or sample counters: the channel correlates, then
//! hands the [`Correlation`] to the loop.
//!
//! One epoch runs, in order:
//!
//! 1. [`propagate()`](PrimaryLoop::propagate) the phases over
//!    the epoch just correlated
//! 2. [`close_loops()`](PrimaryLoop::close_loops) to update
//!    the Doppler and the subcarrier and code frequencies
//! 3. [`bump_jump()`](PrimaryLoop::bump_jump), which may move
//!    the code by half a subcarrier cycle
//! 4. [`next_epoch_length()`](PrimaryLoop::next_epoch_length)
//! 5. [`evaluate_lock()`](PrimaryLoop::evaluate_lock)
//!
//! Carrier, subcarrier, and code phases are kept wrapped to
//! `(-π, π]` radians, `[0, 1)` cycles, and `[0, 4092)` chips.

use std::f64::consts::{PI, TAU};

use num_complex::Complex;

use crate::builder::{LockParameters, TrackingBuilder};
use crate::bumpjump::{BumpJumper, JumpDirection};
use crate::correlator::{CodeReplica, Correlation, SubcarrierReplica, NUM_ARMS};
use crate::discriminator::{
    dll_nc_e_minus_l_normalized, fll_two_quadrant_atan, pll_two_quadrant_atan,
    primary_code_slope, primary_subcarrier_slope,
};
use crate::dump::DumpBlock;
use crate::lockdetect::{ErrorMean, LockDetector, LockEstimate};
use crate::loopfilter::LoopFilter;
use crate::resampler::SubcarrierPhasing;
use crate::signal::{
    ReplicaMode, SyncHandle, E1B_CHIPS_TO_CYCLES, E1B_CHIP_RATE_HZ, E1B_CODE_LENGTH_CHIPS,
    E1B_CODE_PERIOD_S, E1B_SUBCARRIER_RATE_HZ, E1_CARRIER_FREQ_HZ,
};

/// Primary very-early/very-late spacing (chips)
///
/// Half a BOC(1,1) subcarrier cycle puts the very-early and
/// very-late arms on the side peaks of the correlation.
pub const PRIMARY_VERY_EARLY_LATE_SPACING: f64 = 0.5;

// subcarrier lock hysteresis (cycles)
const SUBCARRIER_LOCK_THRESHOLD: f64 = 0.1;
const SUBCARRIER_UNLOCK_THRESHOLD: f64 = 0.4;

// code lock hysteresis (chips)
const CODE_LOCK_THRESHOLD: f64 = 0.05;
const CODE_UNLOCK_THRESHOLD: f64 = 0.1;

const CODE_LENGTH: f64 = E1B_CODE_LENGTH_CHIPS as f64;

/// Discriminator outputs from the last loop update
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LoopErrors {
    /// Carrier phase error (cycles)
    pub carrier: f64,

    /// Filtered carrier loop output (Hz)
    pub carrier_filt: f64,

    /// Subcarrier phase error (cycles)
    pub subcarrier: f64,

    /// Filtered subcarrier loop output (Hz)
    pub subcarrier_filt: f64,

    /// Very-early–very-late code error (chips)
    pub code: f64,

    /// Filtered divergence loop output (Hz)
    pub code_filt: f64,
}

/// Carrier lock transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockTransition {
    /// Enough consecutive passes: declare lock
    Acquired,

    /// Too many failures while locked: revert to pull-in
    Lost,

    /// Too many failures before lock: give up
    Failed,
}

/// Outcome of one lock window
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LockStatus {
    /// CN0 and lock statistic for the window
    pub estimate: LockEstimate,

    /// Carrier lock transition, if any
    pub transition: Option<LockTransition>,

    /// Subcarrier lock acquired (`true`) or lost
    pub subcarrier_lock: Option<bool>,

    /// Code lock acquired (`true`) or lost
    pub code_lock: Option<bool>,
}

/// Primary carrier and subcarrier/code loops
#[derive(Clone, Debug)]
pub struct PrimaryLoop {
    sample_rate: f64,
    intermediate_freq: f64,

    // (initial, locked) settings
    pll_bandwidth: (f64, f64),
    dll_bandwidth: (f64, f64),
    divergence_bandwidth: (f64, f64),
    early_late_spacing: (f64, f64),
    fll_bandwidth: f64,

    carrier_aiding: bool,
    bump_jumping: bool,
    replica_mode: ReplicaMode,
    lock: LockParameters,

    // estimates
    doppler: f64,
    code_freq: f64,
    subcarrier_freq: f64,
    code_phase: f64,
    subcarrier_phase: f64,
    carrier_phase: f64,
    accumulated_carrier_phase: f64,
    residual_code_samples: f64,
    el_spacing: f64,

    carrier_filter: LoopFilter,
    code_filter: LoopFilter,
    divergence_filter: LoopFilter,

    lock_detector: LockDetector,
    subcarrier_error_mean: ErrorMean,
    code_error_mean: ErrorMean,
    bump: BumpJumper,

    carrier_locked: bool,
    subcarrier_locked: bool,
    code_locked: bool,

    // prompt from the previous epoch, for the FLL
    prev_prompt: Option<Complex<f64>>,

    errors: LoopErrors,
}

impl PrimaryLoop {
    /// New primary loop, configured by `builder`
    ///
    /// The loop is idle until [`start()`](PrimaryLoop::start).
    pub fn new(builder: &TrackingBuilder) -> Self {
        let (carrier_order, code_order) = builder.loop_orders();
        let pll_bandwidth = builder.pll_bandwidth();
        let dll_bandwidth = builder.dll_bandwidth();
        let divergence_bandwidth = builder.divergence_bandwidth();
        let early_late_spacing = builder.early_late_spacing();
        let lock = *builder.lock_parameters();
        let (bump_jumping, bump_threshold) = builder.bump_jumping();

        Self {
            sample_rate: builder.sample_rate(),
            intermediate_freq: builder.intermediate_freq(),
            pll_bandwidth,
            dll_bandwidth,
            divergence_bandwidth,
            early_late_spacing,
            fll_bandwidth: builder.fll_bandwidth(),
            carrier_aiding: builder.carrier_aiding(),
            bump_jumping,
            replica_mode: builder.replica_mode(),
            lock,
            doppler: 0.0,
            code_freq: E1B_CHIP_RATE_HZ,
            subcarrier_freq: E1B_SUBCARRIER_RATE_HZ,
            code_phase: 0.0,
            subcarrier_phase: 0.0,
            carrier_phase: 0.0,
            accumulated_carrier_phase: 0.0,
            residual_code_samples: 0.0,
            el_spacing: early_late_spacing.0,
            carrier_filter: LoopFilter::new(E1B_CODE_PERIOD_S, pll_bandwidth.0, carrier_order),
            code_filter: LoopFilter::new(E1B_CODE_PERIOD_S, dll_bandwidth.0, code_order),
            divergence_filter: LoopFilter::new(E1B_CODE_PERIOD_S, divergence_bandwidth.0, 1),
            lock_detector: LockDetector::new(lock.window, lock.min_cn0_db_hz, lock.threshold),
            subcarrier_error_mean: ErrorMean::new(),
            code_error_mean: ErrorMean::new(),
            bump: BumpJumper::new(bump_threshold),
            carrier_locked: false,
            subcarrier_locked: false,
            code_locked: false,
            prev_prompt: None,
            errors: LoopErrors::default(),
        }
    }

    /// Start from an acquisition handoff
    ///
    /// Phases are zeroed: the channel aligns the input with the
    /// start of a code period before the first epoch. All
    /// filters, flags, and detectors are reset to their pull-in
    /// configuration.
    pub fn start(&mut self, sync: &SyncHandle) {
        self.doppler = sync.doppler_hz;
        self.code_freq = E1B_CHIP_RATE_HZ * (1.0 + self.doppler / E1_CARRIER_FREQ_HZ);
        self.subcarrier_freq = if self.carrier_aiding {
            E1B_SUBCARRIER_RATE_HZ * (1.0 + self.doppler / E1_CARRIER_FREQ_HZ)
        } else {
            E1B_SUBCARRIER_RATE_HZ
        };

        self.code_phase = 0.0;
        self.subcarrier_phase = 0.0;
        self.carrier_phase = 0.0;
        self.accumulated_carrier_phase = 0.0;
        self.residual_code_samples = 0.0;

        self.set_bandwidths(false);
        self.carrier_filter.initialize(self.doppler);
        self.code_filter.initialize(0.0);
        self.divergence_filter.initialize(0.0);

        self.lock_detector.reset();
        self.subcarrier_error_mean.reset();
        self.code_error_mean.reset();
        self.bump.reset();

        self.carrier_locked = false;
        self.subcarrier_locked = false;
        self.code_locked = false;
        self.prev_prompt = None;
        self.errors = LoopErrors::default();
    }

    /// Arm phases for the next epoch
    ///
    /// Returns `(code_phases, code_step, subcarrier_phases,
    /// subcarrier_step)`. Code phases are in chips and
    /// subcarrier phases in cycles, ordered `[VE, E, P, L, VL]`.
    /// Steps are per sample.
    pub fn replica_phases(&self) -> ([f64; NUM_ARMS], f64, [f64; NUM_ARMS], f64) {
        let ve = PRIMARY_VERY_EARLY_LATE_SPACING;
        let el = self.el_spacing / E1B_CHIPS_TO_CYCLES;
        let cp = self.code_phase;
        let code = [cp + ve, cp + el, cp, cp - el, cp - ve];

        let sve = ve * E1B_CHIPS_TO_CYCLES;
        let sel = self.el_spacing;
        let sp = self.subcarrier_phase;
        let subcarrier = [sp + sve, sp + sel, sp, sp - sel, sp - sve];

        (
            code,
            self.code_freq / self.sample_rate,
            subcarrier,
            self.subcarrier_freq / self.sample_rate,
        )
    }

    /// Replica parameters for the correlator
    ///
    /// `table` must have been built with this loop's replica
    /// mode.
    pub fn code_replica<'a>(&self, table: &'a [f32]) -> CodeReplica<'a> {
        let (code, step, subcarrier, subcarrier_step) = self.replica_phases();
        match self.replica_mode {
            ReplicaMode::Combined => {
                let slots = ReplicaMode::Combined.slots_per_chip() as f64;
                CodeReplica {
                    table,
                    phases: code.map(|c| c * slots),
                    step: step * slots,
                    subcarrier: None,
                }
            }
            ReplicaMode::Independent => CodeReplica {
                table,
                phases: code,
                step,
                subcarrier: Some(SubcarrierReplica {
                    phases: subcarrier,
                    step: subcarrier_step,
                    phasing: SubcarrierPhasing::Sine,
                }),
            },
        }
    }

    /// Carrier NCO `(phase, phase step per sample)`, in radians
    pub fn carrier_nco(&self) -> (f64, f64) {
        (
            self.carrier_phase,
            TAU * (self.intermediate_freq + self.doppler) / self.sample_rate,
        )
    }

    /// Advance all phases over an epoch of `epoch_samples`
    pub fn propagate(&mut self, epoch_samples: usize) {
        let t = epoch_samples as f64 / self.sample_rate;

        self.code_phase = (self.code_phase + t * self.code_freq).rem_euclid(CODE_LENGTH);
        self.subcarrier_phase = if self.subcarrier_aiding() {
            (self.subcarrier_phase + t * self.subcarrier_freq).rem_euclid(1.0)
        } else {
            (self.code_phase * E1B_CHIPS_TO_CYCLES).rem_euclid(1.0)
        };
        self.update_residual_code();

        self.carrier_phase =
            wrap_pi(self.carrier_phase + TAU * (self.intermediate_freq + self.doppler) * t);
        self.accumulated_carrier_phase += TAU * self.doppler * t;
    }

    /// True if the FLL should assist the carrier loop
    pub fn fll_active(&self) -> bool {
        !self.carrier_locked && self.fll_bandwidth > 0.0
    }

    /// Run the discriminators and loop filters
    ///
    /// Updates the Doppler and the subcarrier and code
    /// frequencies from this epoch's correlation. When
    /// `fll_enabled`, the frequency discriminator also steers
    /// the carrier.
    pub fn close_loops(&mut self, corr: &Correlation, fll_enabled: bool) {
        let carrier_error = pll_two_quadrant_atan(corr.prompt) / TAU;
        let mut doppler = self.carrier_filter.apply(carrier_error);
        if fll_enabled {
            if let Some(prev) = self.prev_prompt {
                let freq_error =
                    fll_two_quadrant_atan(prev, corr.prompt) / (TAU * E1B_CODE_PERIOD_S);
                let delta = 4.0 * self.fll_bandwidth * E1B_CODE_PERIOD_S * freq_error;
                self.carrier_filter.slew(delta);
                doppler += delta;
            }
        }
        self.prev_prompt = Some(corr.prompt);
        self.doppler = doppler;

        let aiding = if self.carrier_aiding {
            self.doppler * E1B_SUBCARRIER_RATE_HZ / E1_CARRIER_FREQ_HZ
        } else {
            0.0
        };
        let subcarrier_error = dll_nc_e_minus_l_normalized(corr.early, corr.late)
            * primary_subcarrier_slope(self.el_spacing);
        let subcarrier_filt = self.code_filter.apply(subcarrier_error);
        self.subcarrier_freq = E1B_SUBCARRIER_RATE_HZ + aiding + subcarrier_filt;

        let code_error = dll_nc_e_minus_l_normalized(corr.very_early, corr.very_late)
            * primary_code_slope(PRIMARY_VERY_EARLY_LATE_SPACING);
        let code_filt = if self.subcarrier_aiding() && self.subcarrier_locked {
            self.divergence_filter.apply(code_error)
        } else {
            0.0
        };
        self.code_freq = self.subcarrier_freq / E1B_CHIPS_TO_CYCLES + code_filt;

        self.subcarrier_error_mean.input(subcarrier_error);
        self.code_error_mean.input(code_error);
        self.errors = LoopErrors {
            carrier: carrier_error,
            carrier_filt: doppler,
            subcarrier: subcarrier_error,
            subcarrier_filt,
            code: code_error,
            code_filt,
        };
    }

    /// Correct a false peak
    ///
    /// Only runs while bump jumping is enabled and the carrier
    /// is locked. When the very-early or very-late arm has
    /// been strongest for long enough, moves the code half a
    /// subcarrier cycle toward it and returns the direction.
    pub fn bump_jump(&mut self, corr: &Correlation) -> Option<JumpDirection> {
        if !self.bump_jumping || !self.carrier_locked {
            return None;
        }

        let [ve, _, p, _, vl] = corr.magnitudes();
        let dir = self.bump.update(ve, p, vl)?;
        self.code_phase = (self.code_phase
            + dir.sign() * PRIMARY_VERY_EARLY_LATE_SPACING / E1B_CHIPS_TO_CYCLES)
            .rem_euclid(CODE_LENGTH);
        self.subcarrier_phase = (self.code_phase * E1B_CHIPS_TO_CYCLES).rem_euclid(1.0);
        self.update_residual_code();
        Some(dir)
    }

    /// Samples in the next epoch
    ///
    /// One code period at the current code frequency, adjusted
    /// by the residual code phase so the epoch ends on a code
    /// boundary. Always at least one.
    pub fn next_epoch_length(&self) -> usize {
        let len = CODE_LENGTH / self.code_freq * self.sample_rate + self.residual_code_samples;
        len.round().max(1.0) as usize
    }

    /// Feed the lock detector
    ///
    /// Returns `None` until the lock window fills. On a full
    /// window, applies the carrier lock hysteresis and, while
    /// the carrier is locked, the subcarrier and code lock
    /// hysteresis. Carrier lock transitions are only reported:
    /// the caller applies them with
    /// [`enter_locked()`](PrimaryLoop::enter_locked) or
    /// [`enter_unlocked()`](PrimaryLoop::enter_unlocked).
    pub fn evaluate_lock(
        &mut self,
        prompt: Complex<f64>,
        epoch_samples: usize,
    ) -> Option<LockStatus> {
        let estimate = self
            .lock_detector
            .input(prompt, self.sample_rate, epoch_samples)?;
        let subcarrier_mean = self.subcarrier_error_mean.take();
        let code_mean = self.code_error_mean.take();

        let mut status = LockStatus {
            estimate,
            transition: None,
            subcarrier_lock: None,
            code_lock: None,
        };

        let fails = self.lock_detector.fail_count();
        if !self.carrier_locked {
            if self.lock_detector.success_count() >= self.lock.success {
                status.transition = Some(LockTransition::Acquired);
            } else if fails > self.lock.fail {
                status.transition = Some(LockTransition::Failed);
            }
            return Some(status);
        }

        if fails > self.lock.fail {
            status.transition = Some(LockTransition::Lost);
            return Some(status);
        }

        if !self.subcarrier_locked {
            if subcarrier_mean < SUBCARRIER_LOCK_THRESHOLD {
                self.subcarrier_locked = true;
                status.subcarrier_lock = Some(true);
                if self.subcarrier_aiding() {
                    self.divergence_filter
                        .set_noise_bandwidth(self.divergence_bandwidth.0);
                    self.divergence_filter.initialize(0.0);
                }
            }
        } else if subcarrier_mean > SUBCARRIER_UNLOCK_THRESHOLD {
            self.subcarrier_locked = false;
            status.subcarrier_lock = Some(false);
            if self.code_locked {
                self.code_locked = false;
                status.code_lock = Some(false);
            }
            self.divergence_filter
                .set_noise_bandwidth(self.divergence_bandwidth.0);
        }

        if self.subcarrier_locked {
            if !self.code_locked {
                if code_mean < CODE_LOCK_THRESHOLD {
                    self.code_locked = true;
                    status.code_lock = Some(true);
                    self.divergence_filter
                        .set_noise_bandwidth(self.divergence_bandwidth.1);
                }
            } else if code_mean > CODE_UNLOCK_THRESHOLD {
                self.code_locked = false;
                status.code_lock = Some(false);
                self.divergence_filter
                    .set_noise_bandwidth(self.divergence_bandwidth.0);
            }
        }

        Some(status)
    }

    /// Switch to the locked configuration
    ///
    /// Narrows the loop bandwidths and the early–late spacing,
    /// then re-initializes the filters so the new coefficients
    /// start from the current estimates.
    pub fn enter_locked(&mut self) {
        self.carrier_locked = true;
        self.set_bandwidths(true);
        self.carrier_filter.initialize(self.doppler);
        let code = self.code_filter.last_output();
        self.code_filter.initialize(code);
        self.lock_detector.clear_fail_count();
        self.bump.reset();
        self.prev_prompt = None;
    }

    /// Revert to the pull-in configuration
    ///
    /// Restores the initial bandwidths and spacing and clears
    /// the subcarrier and code lock flags.
    pub fn enter_unlocked(&mut self) {
        self.carrier_locked = false;
        self.subcarrier_locked = false;
        self.code_locked = false;
        self.set_bandwidths(false);
        self.carrier_filter.initialize(self.doppler);
        let code = self.code_filter.last_output();
        self.code_filter.initialize(code);
        self.divergence_filter.initialize(0.0);
        self.lock_detector.clear_fail_count();
        self.bump.reset();
        self.prev_prompt = None;
    }

    /// Diagnostics for `corr`
    pub fn dump_block(&self, corr: &Correlation, sample_counter: u64) -> DumpBlock {
        DumpBlock {
            magnitudes: corr.magnitudes().map(|m| m as f32),
            prompt_i: corr.prompt.re as f32,
            prompt_q: corr.prompt.im as f32,
            sample_counter,
            carrier_phase_rad: self.accumulated_carrier_phase as f32,
            doppler_hz: self.doppler,
            code_freq_hz: self.code_freq,
            carrier_error: self.errors.carrier,
            carrier_error_filt: self.errors.carrier_filt,
            subcarrier_error: self.errors.subcarrier,
            subcarrier_error_filt: self.errors.subcarrier_filt,
            cn0_db_hz: self.lock_detector.cn0_db_hz(),
            lock_statistic: self.lock_detector.lock_statistic(),
            code_phase: self.code_phase,
            subcarrier_phase: self.subcarrier_phase,
            code_error: self.errors.code,
            code_error_filt: self.errors.code_filt,
        }
    }

    /// Carrier Doppler (Hz)
    pub fn doppler_hz(&self) -> f64 {
        self.doppler
    }

    /// Code frequency (chips/s)
    pub fn code_freq_hz(&self) -> f64 {
        self.code_freq
    }

    /// Subcarrier frequency (cycles/s)
    pub fn subcarrier_freq_hz(&self) -> f64 {
        self.subcarrier_freq
    }

    /// Code phase (chips), in `[0, 4092)`
    pub fn code_phase_chips(&self) -> f64 {
        self.code_phase
    }

    /// Subcarrier phase (cycles), in `[0, 1)`
    pub fn subcarrier_phase_cycles(&self) -> f64 {
        self.subcarrier_phase
    }

    /// Residual carrier phase (radians), in `(-π, π]`
    pub fn carrier_phase_rad(&self) -> f64 {
        self.carrier_phase
    }

    /// Accumulated carrier phase (radians)
    pub fn accumulated_carrier_phase_rad(&self) -> f64 {
        self.accumulated_carrier_phase
    }

    /// Residual code phase, in samples
    pub fn residual_code_samples(&self) -> f64 {
        self.residual_code_samples
    }

    /// Current early–late spacing (cycles)
    pub fn early_late_spacing(&self) -> f64 {
        self.el_spacing
    }

    /// Carrier loop noise bandwidth (Hz)
    pub fn carrier_bandwidth(&self) -> f64 {
        self.carrier_filter.noise_bandwidth()
    }

    /// Subcarrier loop noise bandwidth (Hz)
    pub fn code_bandwidth(&self) -> f64 {
        self.code_filter.noise_bandwidth()
    }

    /// Divergence loop noise bandwidth (Hz)
    pub fn divergence_bandwidth(&self) -> f64 {
        self.divergence_filter.noise_bandwidth()
    }

    /// Latest CN0 estimate (dB-Hz)
    pub fn cn0_db_hz(&self) -> f64 {
        self.lock_detector.cn0_db_hz()
    }

    /// Latest carrier lock statistic
    pub fn lock_statistic(&self) -> f64 {
        self.lock_detector.lock_statistic()
    }

    /// Latest discriminator outputs
    pub fn errors(&self) -> &LoopErrors {
        &self.errors
    }

    /// Bump jump streaks `(very early, very late)`
    pub fn bump_jump_counts(&self) -> (u32, u32) {
        self.bump.counts()
    }

    /// True if the carrier is locked
    pub fn is_carrier_locked(&self) -> bool {
        self.carrier_locked
    }

    /// True if the subcarrier is locked
    pub fn is_subcarrier_locked(&self) -> bool {
        self.subcarrier_locked
    }

    /// True if the code is locked
    pub fn is_code_locked(&self) -> bool {
        self.code_locked
    }

    /// True if the subcarrier and code are tracked separately
    pub fn subcarrier_aiding(&self) -> bool {
        !self.bump_jumping
    }

    /// Bump jumping enabled
    pub fn bump_jumping(&self) -> bool {
        self.bump_jumping
    }

    /// Input sampling rate (Hz)
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Intermediate frequency (Hz)
    pub fn intermediate_freq(&self) -> f64 {
        self.intermediate_freq
    }

    // apply initial or locked bandwidths and spacing
    fn set_bandwidths(&mut self, locked: bool) {
        let pick = |pair: (f64, f64)| if locked { pair.1 } else { pair.0 };
        self.carrier_filter
            .set_noise_bandwidth(pick(self.pll_bandwidth));
        self.code_filter.set_noise_bandwidth(pick(self.dll_bandwidth));
        self.divergence_filter
            .set_noise_bandwidth(self.divergence_bandwidth.0);
        self.el_spacing = pick(self.early_late_spacing);
    }

    // samples until the next code boundary, signed
    fn update_residual_code(&mut self) {
        let mut rem = CODE_LENGTH - self.code_phase;
        if rem > CODE_LENGTH / 2.0 {
            rem -= CODE_LENGTH;
        }
        self.residual_code_samples = rem * self.sample_rate / E1B_CHIP_RATE_HZ;
    }
}

/// Wrap a phase to `(-π, π]`
pub(crate) fn wrap_pi(phase: f64) -> f64 {
    let wrapped = phase.rem_euclid(TAU);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;
    use rand_core::{RngCore, SeedableRng};
    use rand_xorshift::XorShiftRng;

    use crate::signal::SignalId;

    fn started(builder: &TrackingBuilder, doppler: f64) -> PrimaryLoop {
        let mut lp = PrimaryLoop::new(builder);
        lp.start(&SyncHandle::new(SignalId::E1B, 11, doppler, 0.0));
        lp
    }

    fn correlation(ve: f64, p: f64, vl: f64) -> Correlation {
        Correlation::from_arms([
            Complex::new(ve, 0.0),
            Complex::new(p * 0.8, 0.0),
            Complex::new(p, 0.0),
            Complex::new(p * 0.8, 0.0),
            Complex::new(vl, 0.0),
        ])
    }

    #[test]
    fn test_wrap_pi() {
        assert_approx_eq!(0.0, wrap_pi(TAU));
        assert_approx_eq!(PI, wrap_pi(PI));
        assert_approx_eq!(PI, wrap_pi(-PI));
        assert_approx_eq!(-0.5, wrap_pi(-0.5 + 4.0 * TAU));
    }

    #[test]
    fn test_epoch_length_nominal() {
        let lp = started(&TrackingBuilder::new(4.092e6), 0.0);
        assert_eq!(E1B_CHIP_RATE_HZ, lp.code_freq_hz());
        assert_eq!(0.0, lp.residual_code_samples());
        assert_eq!(16368, lp.next_epoch_length());

        let lp = started(&TrackingBuilder::new(4.0e6), 0.0);
        assert_eq!(16000, lp.next_epoch_length());
    }

    #[test]
    fn test_start() {
        let mut builder = TrackingBuilder::new(4.0e6);
        builder.with_intermediate_freq(1000.0);
        let lp = started(&builder, 1575.42);
        assert_approx_eq!(E1B_CHIP_RATE_HZ * (1.0 + 1.0e-6), lp.code_freq_hz());
        assert_approx_eq!(E1B_SUBCARRIER_RATE_HZ * (1.0 + 1.0e-6), lp.subcarrier_freq_hz());
        assert_eq!(0.0, lp.code_phase_chips());
        assert!(!lp.is_carrier_locked());
        assert_eq!(15.0, lp.carrier_bandwidth());
        assert_eq!(0.15, lp.early_late_spacing());

        let (phase, step) = lp.carrier_nco();
        assert_eq!(0.0, phase);
        assert_approx_eq!(TAU * 2575.42 / 4.0e6, step);

        let (code, code_step, sc, _) = lp.replica_phases();
        assert_approx_eq!(0.5, code[0]);
        assert_approx_eq!(0.15, code[1]);
        assert_eq!(0.0, code[2]);
        assert_approx_eq!(-0.15, code[3]);
        assert_approx_eq!(-0.5, code[4]);
        assert_approx_eq!(0.5, sc[0]);
        assert_approx_eq!(lp.code_freq_hz() / 4.0e6, code_step);

        // combined replicas are two slots per chip
        let table = vec![0.0f32; 8184];
        let rep = lp.code_replica(&table);
        assert_approx_eq!(1.0, rep.phases[0]);
        assert_approx_eq!(2.0 * code_step, rep.step);
        assert!(rep.subcarrier.is_none());
    }

    #[test]
    fn test_phase_wrap() {
        let mut rng = XorShiftRng::seed_from_u64(0x1234);
        for bump_jumping in [true, false] {
            let mut builder = TrackingBuilder::new(4.0e6);
            builder.with_bump_jumping(bump_jumping, 10);
            let mut lp = started(&builder, 4321.0);
            for _ in 0..2000 {
                let len = 15000 + (rng.next_u32() % 2000) as usize;
                lp.propagate(len);
                let cp = lp.carrier_phase_rad();
                assert!(cp > -PI && cp <= PI);
                assert!(lp.code_phase_chips() >= 0.0 && lp.code_phase_chips() < CODE_LENGTH);
                let sc = lp.subcarrier_phase_cycles();
                assert!((0.0..1.0).contains(&sc));
                assert!(lp.residual_code_samples().abs() <= CODE_LENGTH / 2.0 * 4.0e6 / 1.023e6);
                assert!(lp.next_epoch_length() > 0);
            }
            assert!(lp.accumulated_carrier_phase_rad() > 0.0);
        }
    }

    #[test]
    fn test_close_loops_direction() {
        let mut builder = TrackingBuilder::new(4.0e6);
        builder.with_fll_bandwidth(0.0);
        let mut lp = started(&builder, 1000.0);
        assert!(!lp.fll_active());

        // prompt leads by 0.1 rad; early stronger than late
        let mut corr = correlation(1.0, 100.0, 1.0);
        corr.prompt = Complex::from_polar(100.0, 0.1);
        corr.early = Complex::new(90.0, 0.0);
        corr.late = Complex::new(70.0, 0.0);
        lp.close_loops(&corr, lp.fll_active());

        assert_approx_eq!(0.1 / TAU, lp.errors().carrier);
        assert!(lp.doppler_hz() > 1000.0);
        assert!(lp.errors().subcarrier > 0.0);
        let aided = E1B_SUBCARRIER_RATE_HZ * (1.0 + lp.doppler_hz() / E1_CARRIER_FREQ_HZ);
        assert!(lp.subcarrier_freq_hz() > aided);
        assert_approx_eq!(lp.subcarrier_freq_hz(), lp.code_freq_hz());
    }

    #[test]
    fn test_fll_assist() {
        let mut builder = TrackingBuilder::new(4.0e6);
        builder.with_fll_bandwidth(20.0);
        let mut lp = started(&builder, 1000.0);
        assert!(lp.fll_active());

        // prompt rotating 0.2 rad per epoch, in phase
        let mut corr = correlation(1.0, 100.0, 1.0);
        corr.prompt = Complex::new(100.0, 0.0);
        lp.close_loops(&corr, true);
        assert_approx_eq!(1000.0, lp.doppler_hz());

        corr.prompt = Complex::from_polar(100.0, 0.2);
        let no_fll = {
            let mut other = lp.clone();
            other.close_loops(&corr, false);
            other.doppler_hz()
        };
        lp.close_loops(&corr, true);
        let freq_error = 0.2 / (TAU * E1B_CODE_PERIOD_S);
        assert_approx_eq!(
            no_fll + 4.0 * 20.0 * E1B_CODE_PERIOD_S * freq_error,
            lp.doppler_hz(),
            1.0e-9
        );
    }

    #[test]
    fn test_bump_jump_threshold() {
        let mut builder = TrackingBuilder::new(4.0e6);
        builder.with_bump_jumping(true, 5);
        let mut lp = started(&builder, 0.0);
        let corr = correlation(150.0, 100.0, 20.0);

        // not while unlocked
        for _ in 0..10 {
            assert_eq!(None, lp.bump_jump(&corr));
        }

        lp.enter_locked();
        for _ in 0..4 {
            assert_eq!(None, lp.bump_jump(&corr));
            assert_eq!(0.0, lp.code_phase_chips());
        }
        assert_eq!((4, 0), lp.bump_jump_counts());
        assert_eq!(Some(JumpDirection::Early), lp.bump_jump(&corr));
        assert_approx_eq!(0.5, lp.code_phase_chips());
        assert_approx_eq!(0.5, lp.subcarrier_phase_cycles());
        assert_eq!((0, 0), lp.bump_jump_counts());

        // the next epoch ends on the new code boundary
        assert_approx_eq!(-0.5 * 4.0e6 / E1B_CHIP_RATE_HZ, lp.residual_code_samples());
        assert_eq!(15998, lp.next_epoch_length());

        let late = correlation(20.0, 100.0, 150.0);
        for _ in 0..4 {
            assert_eq!(None, lp.bump_jump(&late));
        }
        assert_eq!(Some(JumpDirection::Late), lp.bump_jump(&late));
        assert_approx_eq!(0.0, lp.code_phase_chips());
    }

    #[test]
    fn test_no_bump_jump_with_subcarrier_aiding() {
        let mut builder = TrackingBuilder::new(4.0e6);
        builder.with_bump_jumping(false, 1);
        let mut lp = started(&builder, 0.0);
        lp.enter_locked();
        assert!(lp.subcarrier_aiding());
        let corr = correlation(150.0, 100.0, 20.0);
        for _ in 0..10 {
            assert_eq!(None, lp.bump_jump(&corr));
        }
    }

    #[test]
    fn test_lock_transitions() {
        let mut builder = TrackingBuilder::new(4.0e6);
        builder
            .with_lock_detector(1, 30.0, 0.85)
            .with_lock_counters(10, 3);
        let mut lp = started(&builder, 0.0);

        let good = Complex::new(10000.0, 100.0);
        let bad = Complex::new(100.0, 10000.0);

        for _ in 0..9 {
            let status = lp.evaluate_lock(good, 16000).expect("window of one");
            assert_eq!(None, status.transition);
            assert!(status.estimate.cn0_db_hz > 30.0);
        }
        let status = lp.evaluate_lock(good, 16000).expect("window of one");
        assert_eq!(Some(LockTransition::Acquired), status.transition);
        assert_eq!(15.0, lp.carrier_bandwidth());

        lp.enter_locked();
        assert!(lp.is_carrier_locked());
        assert_eq!(5.0, lp.carrier_bandwidth());
        assert_eq!(0.5, lp.code_bandwidth());
        assert_eq!(0.1, lp.early_late_spacing());

        // three failures are tolerated, the fourth is not
        for _ in 0..3 {
            let status = lp.evaluate_lock(bad, 16000).expect("window of one");
            assert_eq!(None, status.transition);
        }
        let status = lp.evaluate_lock(bad, 16000).expect("window of one");
        assert_eq!(Some(LockTransition::Lost), status.transition);

        lp.enter_unlocked();
        assert!(!lp.is_carrier_locked());
        assert_eq!(15.0, lp.carrier_bandwidth());
        assert_eq!(0.15, lp.early_late_spacing());

        for _ in 0..3 {
            let status = lp.evaluate_lock(bad, 16000).expect("window of one");
            assert_eq!(None, status.transition);
        }
        let status = lp.evaluate_lock(bad, 16000).expect("window of one");
        assert_eq!(Some(LockTransition::Failed), status.transition);
    }

    #[test]
    fn test_subcarrier_and_code_lock() {
        let mut builder = TrackingBuilder::new(4.0e6);
        builder
            .with_lock_detector(1, 25.0, 0.85)
            .with_lock_counters(1, 50)
            .with_bump_jumping(false, 10)
            .with_divergence_bandwidth(0.5, 0.05);
        let mut lp = started(&builder, 0.0);
        lp.enter_locked();

        // balanced arms: zero subcarrier and code error
        let corr = correlation(50.0, 100.0, 50.0);
        lp.close_loops(&corr, false);
        let status = lp.evaluate_lock(corr.prompt, 16000).expect("window of one");
        assert_eq!(Some(true), status.subcarrier_lock);
        assert_eq!(Some(true), status.code_lock);
        assert!(lp.is_subcarrier_locked());
        assert!(lp.is_code_locked());
        assert_eq!(0.05, lp.divergence_bandwidth());

        // one-sided very-early/very-late: code lock lost
        let skewed = correlation(100.0, 100.0, 0.0);
        lp.close_loops(&skewed, false);
        assert_approx_eq!(0.5, lp.errors().code);
        let status = lp.evaluate_lock(skewed.prompt, 16000).expect("window of one");
        assert_eq!(None, status.subcarrier_lock);
        assert_eq!(Some(false), status.code_lock);
        assert!(lp.is_subcarrier_locked());
        assert!(!lp.is_code_locked());
        assert_eq!(0.5, lp.divergence_bandwidth());

        lp.enter_unlocked();
        assert!(!lp.is_subcarrier_locked());
    }

    #[test]
    fn test_dump_block() {
        let mut lp = started(&TrackingBuilder::new(4.0e6), 250.0);
        let corr = correlation(30.0, 100.0, 40.0);
        lp.propagate(16000);
        lp.close_loops(&corr, false);
        let blk = lp.dump_block(&corr, 123456);
        assert_eq!(123456, blk.sample_counter);
        assert_eq!([30.0, 80.0, 100.0, 80.0, 40.0], blk.magnitudes);
        assert_eq!(100.0, blk.prompt_i);
        assert_eq!(lp.doppler_hz(), blk.doppler_hz);
        assert_eq!(lp.code_phase_chips(), blk.code_phase);
        assert_eq!(lp.errors().code, blk.code_error);
    }
}
