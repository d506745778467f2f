//! Codeless E1-A secondary loop
//!
//! The E1-A component shares the E1 carrier but its spreading
//! code is unknown. The codeless loop correlates it with
//! [`correlate_codeless()`](crate::correlator::correlate_codeless),
//! which squares away the unknown chip signs, and accumulates
//! the result coherently over `N` primary epochs before running
//! its discriminators.
//!
//! The loop is seeded from a converged [`PrimaryLoop`]. Its
//! code period is much shorter than the primary's, so code and
//! subcarrier phases are kept as a whole-cycle count plus a
//! fraction in `[0, 1)`.
//!
//! By default the loop is *open*: every epoch its frequencies
//! are [slaved](CodelessLoop::slave) to the primary Doppler.
//! With closed loops, its own filtered corrections are added.

use std::f64::consts::{FRAC_PI_2, TAU};

use crate::builder::{DivergenceGate, LockParameters, SecondaryLoopBuilder, TrackingBuilder};
use crate::bumpjump::{BumpJumper, JumpDirection};
use crate::correlator::{CodelessReplica, Correlation, SubcarrierReplica};
use crate::discriminator::{
    dll_nc_e_minus_l_normalized, pll_two_quadrant_atan, SECONDARY_CODE_SLOPE,
    SECONDARY_SUBCARRIER_SLOPE,
};
use crate::dump::DumpBlock;
use crate::lockdetect::{ErrorMean, LockDetector, LockTest};
use crate::loopfilter::LoopFilter;
use crate::primary::{wrap_pi, LoopErrors, PrimaryLoop};
use crate::resampler::SubcarrierPhasing;
use crate::signal::{
    E1A_CHIPS_TO_CYCLES, E1A_CHIP_RATE_HZ, E1A_SUBCARRIER_RATE_HZ, E1B_CHIP_RATE_HZ,
    E1B_CODE_PERIOD_S, E1_CARRIER_FREQ_HZ,
};

// subcarrier lock hysteresis (cycles)
const SUBCARRIER_LOCK_THRESHOLD: f64 = 0.01;
const SUBCARRIER_UNLOCK_THRESHOLD: f64 = 0.4;

// code lock hysteresis (subcarrier cycles)
const CODE_LOCK_THRESHOLD: f64 = 0.1;
const CODE_UNLOCK_THRESHOLD: f64 = 0.5;

// very-early/very-late spacing with bump jumping (chips)
const BUMP_JUMP_SPACING: f64 = 0.5 / E1A_CHIPS_TO_CYCLES;

/// Secondary carrier lock change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecondaryLockChange {
    /// Secondary carrier lock acquired
    Acquired,

    /// Secondary carrier lock lost
    Lost,

    /// Never locked; the loop has stopped itself
    Stopped,
}

/// Result of one secondary epoch
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SecondaryOutcome {
    /// The discriminators ran this epoch
    pub updated: bool,

    /// A bump jump was applied
    pub jump: Option<JumpDirection>,

    /// Carrier lock change
    pub lock: Option<SecondaryLockChange>,

    /// Subcarrier lock acquired (`true`) or lost
    pub subcarrier_lock: Option<bool>,

    /// Code lock acquired (`true`) or lost
    pub code_lock: Option<bool>,
}

/// A cycle count with a fractional part in `[0, 1)`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct SplitPhase {
    whole: i64,
    frac: f64,
}

impl SplitPhase {
    fn from_cycles(cycles: f64) -> Self {
        let mut out = Self::default();
        out.advance(cycles);
        out
    }

    // add cycles, carrying whole cycles out of the fraction
    fn advance(&mut self, cycles: f64) {
        let sum = self.frac + cycles;
        let whole = sum.floor();
        self.whole += whole as i64;
        self.frac = sum - whole;
        if self.frac >= 1.0 {
            self.whole += 1;
            self.frac = 0.0;
        }
    }

    fn total(&self) -> f64 {
        self.whole as f64 + self.frac
    }
}

/// Codeless E1-A tracking loop
#[derive(Clone, Debug)]
pub struct CodelessLoop {
    sample_rate: f64,
    intermediate_freq: f64,
    accumulation_length: u32,
    close_loops: bool,
    subcarrier_aiding: bool,
    bump_jumping: bool,
    divergence_bandwidth: (f64, f64),
    very_early_late_spacing: (f64, f64),
    divergence_gate: DivergenceGate,
    lock: LockParameters,

    active: bool,

    doppler: f64,
    carrier_phase: f64,
    accumulated_carrier_phase: f64,
    code_phase: SplitPhase,
    subcarrier_phase: SplitPhase,
    code_freq: f64,
    subcarrier_freq: f64,
    ve_spacing: f64,

    // position within the coherent accumulation
    index: u32,
    running: Correlation,
    last_sums: Correlation,
    updates: u64,

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

    errors: LoopErrors,
}

impl CodelessLoop {
    /// New codeless loop, configured by `builder` and `secondary`
    ///
    /// The loop is idle until [`start()`](CodelessLoop::start).
    pub fn new(builder: &TrackingBuilder, secondary: &SecondaryLoopBuilder) -> Self {
        let accumulation_length = secondary.accumulation_length().max(1);
        let period = E1B_CODE_PERIOD_S * accumulation_length as f64;
        let (carrier_bw, code_bw) = secondary.bandwidths();
        let divergence_bandwidth = builder.divergence_bandwidth();
        let (bump_jumping, bump_threshold) = builder.bump_jumping();
        let very_early_late_spacing = secondary.very_early_late_spacing();
        let lock = *secondary.lock_parameters();

        Self {
            sample_rate: builder.sample_rate(),
            intermediate_freq: builder.intermediate_freq(),
            accumulation_length,
            close_loops: secondary.close_loops(),
            subcarrier_aiding: builder.subcarrier_aiding(),
            bump_jumping,
            divergence_bandwidth,
            very_early_late_spacing,
            divergence_gate: secondary.divergence_gate(),
            lock,
            active: false,
            doppler: 0.0,
            carrier_phase: 0.0,
            accumulated_carrier_phase: 0.0,
            code_phase: SplitPhase::default(),
            subcarrier_phase: SplitPhase::default(),
            code_freq: E1A_CHIP_RATE_HZ,
            subcarrier_freq: E1A_SUBCARRIER_RATE_HZ,
            ve_spacing: very_early_late_spacing.0,
            index: 0,
            running: Correlation::default(),
            last_sums: Correlation::default(),
            updates: 0,
            carrier_filter: LoopFilter::new(period, carrier_bw, 1),
            code_filter: LoopFilter::new(period, code_bw, 1),
            divergence_filter: LoopFilter::new(period, divergence_bandwidth.0, 1),
            lock_detector: LockDetector::new(lock.window, lock.min_cn0_db_hz, lock.threshold),
            subcarrier_error_mean: ErrorMean::new(),
            code_error_mean: ErrorMean::new(),
            bump: BumpJumper::new(bump_threshold),
            carrier_locked: false,
            subcarrier_locked: false,
            code_locked: false,
            errors: LoopErrors::default(),
        }
    }

    /// Start from the primary's current state
    ///
    /// Must be called between epochs, when the primary phases
    /// refer to the start of the next epoch. The E1-A carrier
    /// is in quadrature with the E1-B/C carrier.
    pub fn start(&mut self, primary: &PrimaryLoop) {
        let chip_ratio = E1A_CHIP_RATE_HZ / E1B_CHIP_RATE_HZ;
        let code = primary.code_phase_chips() * chip_ratio;
        self.code_phase = SplitPhase {
            whole: 0,
            frac: code.rem_euclid(1.0),
        };
        self.subcarrier_phase =
            SplitPhase::from_cycles(self.code_phase.frac * E1A_CHIPS_TO_CYCLES);

        self.carrier_phase = wrap_pi(primary.carrier_phase_rad() - FRAC_PI_2);
        self.accumulated_carrier_phase = 0.0;
        self.doppler = primary.doppler_hz();
        self.code_freq = primary.code_freq_hz() * chip_ratio;
        self.subcarrier_freq =
            E1A_SUBCARRIER_RATE_HZ * (1.0 + self.doppler / E1_CARRIER_FREQ_HZ);

        self.carrier_filter.initialize(0.0);
        self.code_filter.initialize(0.0);
        self.divergence_filter
            .set_noise_bandwidth(self.divergence_bandwidth.0);
        self.divergence_filter.initialize(0.0);

        self.lock_detector.reset();
        self.subcarrier_error_mean.reset();
        self.code_error_mean.reset();
        self.bump.reset();
        self.carrier_locked = false;
        self.subcarrier_locked = false;
        self.code_locked = false;

        self.ve_spacing = if self.bump_jumping {
            BUMP_JUMP_SPACING
        } else {
            self.very_early_late_spacing.0
        };
        self.index = 0;
        self.running = Correlation::default();
        self.last_sums = Correlation::default();
        self.updates = 0;
        self.errors = LoopErrors::default();
        self.active = true;
    }

    /// Stop the loop
    pub fn stop(&mut self) {
        self.active = false;
        self.carrier_locked = false;
        self.subcarrier_locked = false;
        self.code_locked = false;
    }

    /// Replica parameters for the next epoch
    ///
    /// `early_late_spacing` is the primary early–late spacing,
    /// in subcarrier cycles. Chip phases are offset by one
    /// whole chip so that no arm starts at a negative chip.
    pub fn replica(&self, early_late_spacing: f64) -> CodelessReplica {
        let ve = self.ve_spacing;
        let el = early_late_spacing / E1A_CHIPS_TO_CYCLES;
        let cp = self.code_phase.frac + 1.0;

        let sve = ve * E1A_CHIPS_TO_CYCLES;
        let sel = early_late_spacing;
        let sp = self.subcarrier_phase.frac;

        CodelessReplica {
            chip_phases: [cp + ve, cp + el, cp, cp - el, cp - ve],
            chip_step: self.code_freq / self.sample_rate,
            subcarrier: SubcarrierReplica {
                phases: [sp + sve, sp + sel, sp, sp - sel, sp - sve],
                step: self.subcarrier_freq / self.sample_rate,
                phasing: SubcarrierPhasing::Cosine,
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

        self.code_phase.advance(t * self.code_freq);
        if self.subcarrier_aiding {
            self.subcarrier_phase.advance(t * self.subcarrier_freq);
        } else {
            self.subcarrier_phase =
                SplitPhase::from_cycles(self.code_phase.frac * E1A_CHIPS_TO_CYCLES);
        }

        self.carrier_phase =
            wrap_pi(self.carrier_phase + TAU * (self.intermediate_freq + self.doppler) * t);
        self.accumulated_carrier_phase += TAU * self.doppler * t;
    }

    /// Accumulate one epoch's correlation
    ///
    /// Sums are cleared at the start of each accumulation. When
    /// `N` epochs have been summed, runs the discriminators and
    /// filters, the lock detector, and (with closed loops)
    /// the divergence loop and bump jumping. `primary_locked`
    /// gates bump jumping.
    pub fn accumulate(
        &mut self,
        corr: &Correlation,
        epoch_samples: usize,
        primary_locked: bool,
    ) -> SecondaryOutcome {
        let mut outcome = SecondaryOutcome::default();
        if !self.active {
            return outcome;
        }

        if self.index == 0 {
            self.running = Correlation::default();
        }
        self.running += *corr;

        if self.index + 1 < self.accumulation_length {
            self.index += 1;
            return outcome;
        }

        let sums = self.running;
        outcome.updated = true;

        let carrier_error = 0.5 * pll_two_quadrant_atan(sums.prompt) / TAU;
        let carrier_filt = self.carrier_filter.apply(carrier_error);

        let subcarrier_error =
            dll_nc_e_minus_l_normalized(sums.early, sums.late) * SECONDARY_SUBCARRIER_SLOPE;
        let subcarrier_filt = self.code_filter.apply(subcarrier_error);

        let code_error = dll_nc_e_minus_l_normalized(sums.very_early, sums.very_late)
            * SECONDARY_CODE_SLOPE;
        let mut code_filt = self.divergence_filter.last_output();

        if self.close_loops {
            if self.subcarrier_aiding && self.gate_open() {
                code_filt = self.divergence_filter.apply(code_error);
            }
            if self.bump_jumping && primary_locked {
                let [ve, _, p, _, vl] = sums.magnitudes();
                if let Some(dir) = self.bump.update(ve, p, vl) {
                    self.code_phase.advance(dir.sign() * BUMP_JUMP_SPACING);
                    if !self.subcarrier_aiding {
                        self.subcarrier_phase =
                            SplitPhase::from_cycles(self.code_phase.frac * E1A_CHIPS_TO_CYCLES);
                    }
                    outcome.jump = Some(dir);
                }
            }
        }

        self.subcarrier_error_mean.input(subcarrier_error);
        self.code_error_mean.input(code_error);
        self.errors = LoopErrors {
            carrier: carrier_error,
            carrier_filt,
            subcarrier: subcarrier_error,
            subcarrier_filt,
            code: code_error,
            code_filt,
        };

        let samples = epoch_samples * self.accumulation_length as usize;
        if let Some(est) = self
            .lock_detector
            .input(sums.prompt, self.sample_rate, samples)
        {
            self.evaluate_lock(est.test, &mut outcome);
        }

        self.last_sums = sums;
        self.running = Correlation::default();
        self.index = 0;
        self.updates += 1;
        outcome
    }

    /// Follow the primary Doppler
    ///
    /// Sets the secondary frequencies from `primary_doppler`.
    /// With closed loops, the filtered corrections are added,
    /// and the code is steered by the divergence loop once the
    /// divergence gate opens.
    pub fn slave(&mut self, primary_doppler: f64) {
        let scale = 1.0 + primary_doppler / E1_CARRIER_FREQ_HZ;
        self.doppler = primary_doppler;
        self.code_freq = E1A_CHIP_RATE_HZ * scale;
        self.subcarrier_freq = E1A_SUBCARRIER_RATE_HZ * scale;

        if self.close_loops {
            self.doppler += self.carrier_filter.last_output();
            self.subcarrier_freq += self.code_filter.last_output();
            if self.subcarrier_aiding && self.gate_open() {
                self.code_freq = self.subcarrier_freq / E1A_CHIPS_TO_CYCLES
                    + self.divergence_filter.last_output();
            }
        }
    }

    /// True if the divergence loop may steer the code
    pub fn gate_open(&self) -> bool {
        match self.divergence_gate {
            DivergenceGate::SubcarrierLock => self.subcarrier_locked,
            DivergenceGate::SubcarrierAndCarrierLock => {
                self.subcarrier_locked && self.carrier_locked
            }
        }
    }

    /// Diagnostics from the last accumulation
    pub fn dump_block(&self, sample_counter: u64) -> DumpBlock {
        let sums = &self.last_sums;
        DumpBlock {
            magnitudes: sums.magnitudes().map(|m| m as f32),
            prompt_i: sums.prompt.re as f32,
            prompt_q: sums.prompt.im as f32,
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
            code_phase: self.code_phase.total(),
            subcarrier_phase: self.subcarrier_phase.total(),
            code_error: self.errors.code,
            code_error_filt: self.errors.code_filt,
        }
    }

    /// True if the loop is running
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True if the secondary carrier is locked
    pub fn is_carrier_locked(&self) -> bool {
        self.carrier_locked
    }

    /// True if the secondary subcarrier is locked
    pub fn is_subcarrier_locked(&self) -> bool {
        self.subcarrier_locked
    }

    /// True if the secondary code is locked
    pub fn is_code_locked(&self) -> bool {
        self.code_locked
    }

    /// Epochs summed into the current accumulation
    pub fn accumulation_index(&self) -> u32 {
        self.index
    }

    /// Coherent accumulation length (epochs)
    pub fn accumulation_length(&self) -> u32 {
        self.accumulation_length
    }

    /// Running sums of the current accumulation
    pub fn running_sums(&self) -> &Correlation {
        &self.running
    }

    /// Sums from the last completed accumulation
    pub fn last_sums(&self) -> &Correlation {
        &self.last_sums
    }

    /// Number of discriminator updates since start
    pub fn updates(&self) -> u64 {
        self.updates
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

    /// Code phase `(whole chips, fractional chip)`
    pub fn code_phase(&self) -> (i64, f64) {
        (self.code_phase.whole, self.code_phase.frac)
    }

    /// Subcarrier phase `(whole cycles, fractional cycle)`
    pub fn subcarrier_phase(&self) -> (i64, f64) {
        (self.subcarrier_phase.whole, self.subcarrier_phase.frac)
    }

    /// Residual carrier phase (radians), in `(-π, π]`
    pub fn carrier_phase_rad(&self) -> f64 {
        self.carrier_phase
    }

    /// Current very-early–very-late spacing (chips)
    pub fn very_early_late_spacing(&self) -> f64 {
        self.ve_spacing
    }

    /// Divergence loop noise bandwidth (Hz)
    pub fn divergence_bandwidth(&self) -> f64 {
        self.divergence_filter.noise_bandwidth()
    }

    /// Latest CN0 estimate (dB-Hz)
    pub fn cn0_db_hz(&self) -> f64 {
        self.lock_detector.cn0_db_hz()
    }

    /// Latest discriminator outputs
    pub fn errors(&self) -> &LoopErrors {
        &self.errors
    }

    // carrier, subcarrier, and code lock hysteresis
    fn evaluate_lock(&mut self, test: LockTest, outcome: &mut SecondaryOutcome) {
        let subcarrier_mean = self.subcarrier_error_mean.take();
        let code_mean = self.code_error_mean.take() * E1A_CHIPS_TO_CYCLES;
        let fails = self.lock_detector.fail_count();

        if !self.carrier_locked {
            if test == LockTest::Pass && self.lock_detector.success_count() >= self.lock.success {
                self.carrier_locked = true;
                self.lock_detector.clear_fail_count();
                outcome.lock = Some(SecondaryLockChange::Acquired);
            } else if fails > self.lock.fail {
                self.stop();
                outcome.lock = Some(SecondaryLockChange::Stopped);
                return;
            }
        } else if fails > self.lock.fail {
            self.carrier_locked = false;
            self.lock_detector.clear_fail_count();
            outcome.lock = Some(SecondaryLockChange::Lost);
        }

        if !self.subcarrier_locked {
            if subcarrier_mean < SUBCARRIER_LOCK_THRESHOLD {
                self.subcarrier_locked = true;
                self.code_locked = false;
                outcome.subcarrier_lock = Some(true);
                if self.subcarrier_aiding {
                    self.divergence_filter
                        .set_noise_bandwidth(self.divergence_bandwidth.0);
                    self.divergence_filter.initialize(0.0);
                }
            }
        } else if subcarrier_mean > SUBCARRIER_UNLOCK_THRESHOLD {
            self.subcarrier_locked = false;
            outcome.subcarrier_lock = Some(false);
            if self.code_locked {
                self.code_locked = false;
                outcome.code_lock = Some(false);
                self.revert_code_loop();
            }
        }

        if self.subcarrier_locked {
            if !self.code_locked {
                if code_mean < CODE_LOCK_THRESHOLD {
                    self.code_locked = true;
                    outcome.code_lock = Some(true);
                    if self.subcarrier_aiding {
                        self.ve_spacing = self.very_early_late_spacing.1;
                        self.divergence_filter
                            .set_noise_bandwidth(self.divergence_bandwidth.1);
                    }
                }
            } else if code_mean > CODE_UNLOCK_THRESHOLD {
                self.code_locked = false;
                outcome.code_lock = Some(false);
                self.revert_code_loop();
            }
        }
    }

    // initial divergence bandwidth and spacing
    fn revert_code_loop(&mut self) {
        if self.subcarrier_aiding {
            self.ve_spacing = self.very_early_late_spacing.0;
            self.divergence_filter
                .set_noise_bandwidth(self.divergence_bandwidth.0);
        }
    }
}
