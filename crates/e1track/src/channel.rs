//! Per-satellite tracking channel

#[cfg(not(test))]
use log::{debug, info, trace, warn};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as trace;
#[cfg(test)]
use std::println as warn;

use num_complex::Complex;
use thiserror::Error;

use crate::builder::TrackingBuilder;
use crate::codeless::{CodelessLoop, SecondaryLockChange};
use crate::correlator::{Correlation, Correlator};
use crate::dump::{dump_path, DumpBlock, DumpRecord, DumpWriter};
use crate::inbox::{EventInbox, GateFlags};
use crate::primary::{LockTransition, PrimaryLoop};
use crate::record::{ChannelEvent, EpochOutput, TrackingRecord};
use crate::resampler::{FixedPointResampler, Resampler};
use crate::signal::{
    nominal_epoch_samples, PrimaryCode, ReplicaMode, SignalId, SyncHandle, E1A_CHIP_RATE_HZ,
};

/// Tracking state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackingState {
    /// Not tracking; emitting placeholder records
    Disabled,

    /// Aligning the input with the first code epoch
    PullIn,

    /// Tracking with pull-in bandwidths
    Unlocked,

    /// Carrier locked; tracking with narrow bandwidths
    Locked,
}

/// Tracking channel error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TrackingError {
    /// The caller provided fewer samples than
    /// [`required_samples()`](TrackingChannel::required_samples)
    #[error("insufficient input: {needed} samples required, {available} available")]
    InsufficientSamples { needed: usize, available: usize },
}

/// Galileo E1 tracking channel
///
/// A tracking channel follows one satellite's E1-B or E1-C
/// signal, and optionally its E1-A signal, from an acquisition
/// handoff onward. It consumes complex baseband samples one
/// code epoch at a time and emits one [`EpochOutput`] per
/// call to [`process()`](TrackingChannel::process).
///
/// Build the channel with a [`TrackingBuilder`]:
///
/// ```
/// use e1track::{PrimaryCode, SignalId, SyncHandle, TrackingBuilder, TrackingState};
/// use num_complex::Complex;
///
/// let mut channel = TrackingBuilder::new(4.0e6).build();
/// let code = PrimaryCode::from_chips(&[1i8; 4092]).unwrap();
/// let sync = SyncHandle::new(SignalId::E1B, 11, 1250.0, 500.0);
/// channel.start_tracking(&sync, &code);
/// assert_eq!(TrackingState::PullIn, channel.state());
///
/// let input = vec![Complex::new(0.0f32, 0.0); channel.required_samples()];
/// let out = channel.process(&input).unwrap();
/// assert_eq!(input.len(), out.consumed);
/// assert_eq!(TrackingState::Unlocked, channel.state());
/// ```
///
/// The caller must provide at least
/// [`required_samples()`](TrackingChannel::required_samples)
/// samples to each call. This number changes every epoch as the
/// code Doppler is tracked. The channel consumes exactly
/// `out.consumed` samples from the front of the input; the rest
/// belong to the next call.
///
/// When the channel gives up on a satellite, it reports
/// [`ChannelEvent::ReacquisitionRequested`] and disables
/// itself. Disabled channels keep emitting placeholder records
/// so that downstream consumers stay in step.
#[derive(Debug)]
pub struct TrackingChannel<R: Resampler = FixedPointResampler> {
    channel: u32,
    sample_rate: f64,
    nominal_epoch: usize,
    state: TrackingState,
    sync: Option<SyncHandle>,
    replica_mode: ReplicaMode,
    replica_table: Vec<f32>,
    resampler: R,
    correlator: Correlator,
    primary: PrimaryLoop,
    secondary: Option<CodelessLoop>,
    sample_counter: u64,
    epoch_samples: usize,
    last_correlation: Correlation,
    inbox: Option<EventInbox>,
    gate: GateFlags,
    dump_prefix: Option<String>,
    dump: Option<DumpWriter>,
}

impl<R: Resampler> TrackingChannel<R> {
    /// Build a channel with a custom replica resampler
    pub fn with_resampler(cfg: &TrackingBuilder, resampler: R) -> Self {
        let sample_rate = cfg.sample_rate();
        let nominal_epoch = nominal_epoch_samples(sample_rate);
        let secondary = cfg
            .secondary_loop()
            .map(|sec| CodelessLoop::new(cfg, sec));

        Self {
            channel: 0,
            sample_rate,
            nominal_epoch,
            state: TrackingState::Disabled,
            sync: None,
            replica_mode: cfg.replica_mode(),
            replica_table: Vec::new(),
            resampler,
            correlator: Correlator::new(2 * nominal_epoch, sample_rate, E1A_CHIP_RATE_HZ),
            primary: PrimaryLoop::new(cfg),
            secondary,
            sample_counter: 0,
            epoch_samples: nominal_epoch,
            last_correlation: Correlation::default(),
            inbox: None,
            gate: GateFlags::default(),
            dump_prefix: cfg.dump_prefix().map(|s| s.to_owned()),
            dump: None,
        }
    }

    /// Assign the channel number
    ///
    /// If dumps are enabled, opens this channel's dump file.
    /// Failure to open the dump is logged and otherwise
    /// ignored.
    pub fn set_channel(&mut self, channel: u32) {
        self.channel = channel;
        self.dump = None;
        if let Some(prefix) = &self.dump_prefix {
            let path = dump_path(prefix, channel);
            match DumpWriter::create(&path) {
                Ok(writer) => self.dump = Some(writer),
                Err(e) => warn!(
                    "ch{}: unable to create dump file {}: {}",
                    channel,
                    path.display(),
                    e
                ),
            }
        }
    }

    /// Receive navigation events from `inbox`
    ///
    /// The inbox is drained at the start of every epoch.
    pub fn attach_inbox(&mut self, inbox: EventInbox) {
        self.inbox = Some(inbox);
    }

    /// Begin tracking from an acquisition handoff
    ///
    /// `code` is the primary spreading code for the satellite
    /// and signal named in `sync`. The next call to
    /// [`process()`](TrackingChannel::process) performs
    /// pull-in.
    pub fn start_tracking(&mut self, sync: &SyncHandle, code: &PrimaryCode) {
        info!("ch{}: start tracking {}", self.channel, sync);
        self.sync = Some(*sync);
        self.replica_table = code.replica_table(self.replica_mode);
        self.primary.start(sync);
        if let Some(sec) = self.secondary.as_mut() {
            sec.stop();
        }
        self.gate.reset();
        self.epoch_samples = self.nominal_epoch;
        self.state = TrackingState::PullIn;
    }

    /// Stop tracking
    ///
    /// The channel is disabled and emits placeholder records
    /// until it is started again.
    pub fn stop_tracking(&mut self) {
        if self.state != TrackingState::Disabled {
            info!(
                "ch{} E{:02} [{}]: tracking stopped",
                self.channel,
                self.prn(),
                self.sample_counter
            );
        }
        self.state = TrackingState::Disabled;
        if let Some(sec) = self.secondary.as_mut() {
            sec.stop();
        }
    }

    /// Samples required by the next call to `process()`
    pub fn required_samples(&self) -> usize {
        match self.state {
            TrackingState::Disabled => self.nominal_epoch,
            TrackingState::PullIn => self.pull_in_offset(),
            TrackingState::Unlocked | TrackingState::Locked => self.epoch_samples,
        }
    }

    /// Process one epoch
    ///
    /// `input` must hold at least
    /// [`required_samples()`](TrackingChannel::required_samples)
    /// samples. Returns exactly one record. Errors only if the
    /// input is too short, in which case nothing is consumed.
    pub fn process(&mut self, input: &[Complex<f32>]) -> Result<EpochOutput, TrackingError> {
        let needed = self.required_samples();
        if input.len() < needed {
            return Err(TrackingError::InsufficientSamples {
                needed,
                available: input.len(),
            });
        }

        self.poll_inbox();

        Ok(match self.state {
            TrackingState::Disabled => self.placeholder(needed),
            TrackingState::PullIn => self.pull_in(needed),
            TrackingState::Unlocked | TrackingState::Locked => self.track(input, needed),
        })
    }

    /// Process as many epochs as `input` allows
    ///
    /// Bind an iterator which calls
    /// [`process()`](TrackingChannel::process) until the
    /// remaining input is too short.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn epochs<'ch, 'data>(
        &'ch mut self,
        input: &'data [Complex<f32>],
    ) -> EpochIter<'ch, 'data, R> {
        EpochIter {
            channel: self,
            input,
        }
    }

    /// Clear all state
    ///
    /// The channel is disabled and its sample counter is
    /// zeroed. The channel number, inbox, and dump file are
    /// retained.
    pub fn reset(&mut self) {
        self.state = TrackingState::Disabled;
        self.sync = None;
        self.sample_counter = 0;
        self.epoch_samples = self.nominal_epoch;
        self.last_correlation = Correlation::default();
        self.gate.reset();
        if let Some(sec) = self.secondary.as_mut() {
            sec.stop();
        }
    }

    /// Tracking state
    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// Channel number
    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Acquisition handoff, if tracking has been started
    pub fn sync(&self) -> Option<&SyncHandle> {
        self.sync.as_ref()
    }

    /// Lifetime total of input samples consumed
    pub fn sample_counter(&self) -> u64 {
        self.sample_counter
    }

    /// Input sampling rate (Hz)
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Carrier Doppler (Hz)
    pub fn doppler_hz(&self) -> f64 {
        self.primary.doppler_hz()
    }

    /// Code phase (chips)
    pub fn code_phase_chips(&self) -> f64 {
        self.primary.code_phase_chips()
    }

    /// Code frequency (chips/s)
    pub fn code_freq_hz(&self) -> f64 {
        self.primary.code_freq_hz()
    }

    /// Carrier loop noise bandwidth (Hz)
    pub fn carrier_bandwidth(&self) -> f64 {
        self.primary.carrier_bandwidth()
    }

    /// Subcarrier loop noise bandwidth (Hz)
    pub fn code_bandwidth(&self) -> f64 {
        self.primary.code_bandwidth()
    }

    /// Divergence loop noise bandwidth (Hz)
    pub fn divergence_bandwidth(&self) -> f64 {
        self.primary.divergence_bandwidth()
    }

    /// Early–late spacing (cycles)
    pub fn early_late_spacing(&self) -> f64 {
        self.primary.early_late_spacing()
    }

    /// Primary loop state
    pub fn primary(&self) -> &PrimaryLoop {
        &self.primary
    }

    /// Secondary loop state, if configured
    pub fn secondary(&self) -> Option<&CodelessLoop> {
        self.secondary.as_ref()
    }

    /// Primary correlation from the last tracked epoch
    pub fn last_correlation(&self) -> &Correlation {
        &self.last_correlation
    }

    /// Flags from navigation events
    pub fn gate_flags(&self) -> &GateFlags {
        &self.gate
    }

    /// True if a dump file is being written
    pub fn is_dumping(&self) -> bool {
        self.dump.as_ref().map(|d| d.is_active()).unwrap_or(false)
    }

    // samples to skip so the next epoch starts on a code boundary
    fn pull_in_offset(&self) -> usize {
        let Some(sync) = &self.sync else {
            return self.nominal_epoch;
        };
        let nominal = self.nominal_epoch as i64;
        let since = (self.sample_counter as i64 - sync.sample_stamp as i64).rem_euclid(nominal);
        let offset = sync.code_delay_samples + (nominal - since) as f64;
        offset.round().max(0.0) as usize
    }

    fn poll_inbox(&mut self) {
        let Some(inbox) = &self.inbox else {
            return;
        };
        for evt in inbox.drain() {
            trace!(
                "ch{}: event {:?} at {:.3} s",
                self.channel,
                evt.data,
                evt.timestamp
            );
            self.gate.apply(evt.as_ref());
        }
    }

    fn placeholder(&mut self, len: usize) -> EpochOutput {
        self.sample_counter += len as u64;
        let timestamp = self.sample_counter as f64 / self.sample_rate;
        EpochOutput::new(len, self.empty_record(timestamp))
    }

    fn pull_in(&mut self, offset: usize) -> EpochOutput {
        self.sample_counter += offset as u64;
        let timestamp = self.sample_counter as f64 / self.sample_rate;
        self.epoch_samples = self.primary.next_epoch_length();
        self.state = TrackingState::Unlocked;

        let mut record = self.empty_record(timestamp);
        if let Some(sync) = &self.sync {
            record.carrier_doppler_hz = sync.doppler_hz;
        }
        info!(
            "ch{} E{:02} [{}]: pull-in skipped {} samples; tracking",
            self.channel,
            self.prn(),
            self.sample_counter,
            offset
        );
        EpochOutput::new(offset, record)
    }

    fn track(&mut self, input: &[Complex<f32>], len: usize) -> EpochOutput {
        let epoch = &input[0..len];
        let epoch_start = self.sample_counter;
        let timestamp =
            (self.sample_counter as f64 + self.primary.residual_code_samples()) / self.sample_rate;

        let replica = self.primary.code_replica(&self.replica_table);
        let (carrier_phase, carrier_step) = self.primary.carrier_nco();
        let corr = self.correlator.correlate_primary(
            &self.resampler,
            epoch,
            carrier_phase,
            carrier_step,
            &replica,
        );

        if !corr.is_finite() {
            warn!(
                "ch{} E{:02} [{}]: invalid correlation; discarding {} samples",
                self.channel,
                self.prn(),
                self.sample_counter,
                input.len()
            );
            self.sample_counter += input.len() as u64;
            let mut out = EpochOutput::new(input.len(), self.empty_record(timestamp));
            out.push_event(ChannelEvent::InvalidCorrelation);
            return out;
        }

        let secondary_corr = match self.secondary.as_ref() {
            Some(sec) if sec.is_active() => {
                let replica = sec.replica(self.primary.early_late_spacing());
                let (phase, step) = sec.carrier_nco();
                Some(self.correlator.correlate_secondary(
                    &self.resampler,
                    epoch,
                    phase,
                    step,
                    &replica,
                ))
            }
            _ => None,
        };

        let mut out = EpochOutput::new(len, self.empty_record(timestamp));

        self.primary.propagate(len);
        if let (Some(sec), Some(_)) = (self.secondary.as_mut(), &secondary_corr) {
            sec.propagate(len);
        }
        self.sample_counter += len as u64;

        let fll = self.primary.fll_active();
        self.primary.close_loops(&corr, fll);
        if let Some(direction) = self.primary.bump_jump(&corr) {
            info!(
                "ch{} E{:02} [{}]: bump jump {}",
                self.channel,
                self.prn(),
                self.sample_counter,
                direction
            );
            out.push_event(ChannelEvent::BumpJump {
                direction,
                secondary: false,
            });
        }

        let mut secondary_stopped = false;
        if let Some(sec_corr) = &secondary_corr {
            secondary_stopped = self.update_secondary(sec_corr, len, &mut out);
        }

        self.epoch_samples = self.primary.next_epoch_length();

        if let Some(status) = self.primary.evaluate_lock(corr.prompt, len) {
            debug!(
                "ch{} E{:02} [{}]: cn0 {:.1} dB-Hz, lock {:.3}, doppler {:.2} Hz",
                self.channel,
                self.prn(),
                self.sample_counter,
                status.estimate.cn0_db_hz,
                status.estimate.lock_statistic,
                self.primary.doppler_hz()
            );
            if let Some(locked) = status.subcarrier_lock {
                out.push_event(ChannelEvent::SubcarrierLock(locked));
            }
            if let Some(locked) = status.code_lock {
                out.push_event(ChannelEvent::CodeLock(locked));
            }
            if let Some(transition) = status.transition {
                self.apply_transition(transition, &mut out);
            }
        }

        if !secondary_stopped {
            self.try_start_secondary(&mut out);
        }

        if let Some(dump) = self.dump.as_mut() {
            let secondary = match self.secondary.as_ref() {
                Some(sec) if sec.is_active() => sec.dump_block(epoch_start),
                _ => DumpBlock::default(),
            };
            dump.write(&DumpRecord {
                primary: self.primary.dump_block(&corr, epoch_start),
                secondary,
            });
        }

        self.last_correlation = corr;
        out.record = TrackingRecord {
            prompt_i: corr.prompt.re,
            prompt_q: corr.prompt.im,
            carrier_phase_rad: self.primary.accumulated_carrier_phase_rad(),
            carrier_doppler_hz: self.primary.doppler_hz(),
            code_phase_s: 0.0,
            cn0_db_hz: self.primary.cn0_db_hz(),
            valid_tracking: true,
            ..out.record
        };
        out
    }

    // returns true if the secondary loop stopped itself
    fn update_secondary(
        &mut self,
        corr: &Correlation,
        len: usize,
        out: &mut EpochOutput,
    ) -> bool {
        let primary_locked = self.primary.is_carrier_locked();
        let doppler = self.primary.doppler_hz();
        let Some(sec) = self.secondary.as_mut() else {
            return false;
        };

        let outcome = sec.accumulate(corr, len, primary_locked);
        sec.slave(doppler);

        let (channel, prn, counter) = (self.channel, self.prn(), self.sample_counter);
        if let Some(direction) = outcome.jump {
            info!(
                "ch{} E{:02} [{}]: secondary bump jump {}",
                channel, prn, counter, direction
            );
            out.push_event(ChannelEvent::BumpJump {
                direction,
                secondary: true,
            });
        }
        if let Some(locked) = outcome.subcarrier_lock {
            debug!(
                "ch{} E{:02} [{}]: secondary subcarrier lock {}",
                channel, prn, counter, locked
            );
        }
        if let Some(locked) = outcome.code_lock {
            debug!(
                "ch{} E{:02} [{}]: secondary code lock {}",
                channel, prn, counter, locked
            );
        }

        match outcome.lock {
            Some(SecondaryLockChange::Acquired) => {
                info!("ch{} E{:02} [{}]: secondary lock acquired", channel, prn, counter);
                out.push_event(ChannelEvent::SecondaryLockAcquired);
                false
            }
            Some(SecondaryLockChange::Lost) => {
                info!("ch{} E{:02} [{}]: secondary lock lost", channel, prn, counter);
                out.push_event(ChannelEvent::SecondaryLockLost);
                false
            }
            Some(SecondaryLockChange::Stopped) => {
                info!(
                    "ch{} E{:02} [{}]: secondary loop failed to lock; stopped",
                    channel, prn, counter
                );
                out.push_event(ChannelEvent::SecondaryStopped);
                true
            }
            None => false,
        }
    }

    fn apply_transition(&mut self, transition: LockTransition, out: &mut EpochOutput) {
        match transition {
            LockTransition::Acquired => {
                self.primary.enter_locked();
                self.state = TrackingState::Locked;
                info!(
                    "ch{} E{:02} [{}]: carrier lock acquired, doppler {:.2} Hz, cn0 {:.1} dB-Hz",
                    self.channel,
                    self.prn(),
                    self.sample_counter,
                    self.primary.doppler_hz(),
                    self.primary.cn0_db_hz()
                );
                out.push_event(ChannelEvent::CarrierLockAcquired);
            }
            LockTransition::Lost => {
                self.primary.enter_unlocked();
                self.state = TrackingState::Unlocked;
                info!(
                    "ch{} E{:02} [{}]: carrier lock lost",
                    self.channel,
                    self.prn(),
                    self.sample_counter
                );
                out.push_event(ChannelEvent::CarrierLockLost);
                self.stop_secondary(out);
            }
            LockTransition::Failed => {
                self.state = TrackingState::Disabled;
                self.gate.clear_tow();
                warn!(
                    "ch{} E{:02} [{}]: unable to lock; requesting reacquisition",
                    self.channel,
                    self.prn(),
                    self.sample_counter
                );
                self.stop_secondary(out);
                out.push_event(ChannelEvent::ReacquisitionRequested);
            }
        }
    }

    fn try_start_secondary(&mut self, out: &mut EpochOutput) {
        if self.state != TrackingState::Locked || !self.gate.secondary_gate_open() {
            return;
        }
        let Some(sec) = self.secondary.as_mut() else {
            return;
        };
        if sec.is_active() {
            return;
        }

        sec.start(&self.primary);
        info!(
            "ch{} E{:02} [{}]: secondary loop started",
            self.channel,
            self.prn(),
            self.sample_counter
        );
        out.push_event(ChannelEvent::SecondaryStarted);
    }

    fn stop_secondary(&mut self, out: &mut EpochOutput) {
        let Some(sec) = self.secondary.as_mut() else {
            return;
        };
        if sec.is_active() {
            sec.stop();
            out.push_event(ChannelEvent::SecondaryStopped);
        }
    }

    fn empty_record(&self, timestamp: f64) -> TrackingRecord {
        let signal = self.sync.map(|s| s.signal).unwrap_or(SignalId::E1B);
        TrackingRecord::empty(self.channel, signal, self.prn(), timestamp)
    }

    fn prn(&self) -> u8 {
        self.sync.map(|s| s.prn).unwrap_or(0)
    }
}

impl From<&TrackingBuilder> for TrackingChannel<FixedPointResampler> {
    /// Create the tracking channel from its builder
    fn from(cfg: &TrackingBuilder) -> Self {
        Self::with_resampler(cfg, FixedPointResampler::new())
    }
}

/// Epoch iterator
///
/// Calls [`TrackingChannel::process()`] on successive parts of
/// a buffer. Returns `None` once the remaining input is shorter
/// than the channel requires; the unconsumed samples are
/// available from [`remaining()`](EpochIter::remaining).
#[derive(Debug)]
pub struct EpochIter<'ch, 'data, R: Resampler> {
    channel: &'ch mut TrackingChannel<R>,
    input: &'data [Complex<f32>],
}

impl<'ch, 'data, R: Resampler> EpochIter<'ch, 'data, R> {
    /// Input not yet consumed
    pub fn remaining(&self) -> &'data [Complex<f32>] {
        self.input
    }
}

impl<'ch, 'data, R: Resampler> Iterator for EpochIter<'ch, 'data, R> {
    type Item = EpochOutput;

    fn next(&mut self) -> Option<Self::Item> {
        let out = self.channel.process(self.input).ok()?;
        self.input = &self.input[out.consumed..];
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::f64::consts::TAU;
    use std::io::Cursor;

    use assert_approx_eq::assert_approx_eq;
    use rand_core::{RngCore, SeedableRng};
    use rand_xorshift::XorShiftRng;

    use crate::builder::SecondaryLoopBuilder;
    use crate::inbox::{inbox, GnssEvent};
    use crate::signal::{E1B_CHIP_RATE_HZ, E1B_CODE_LENGTH_CHIPS, E1_CARRIER_FREQ_HZ};

    const FS: f64 = 4.0e6;
    const DOPPLER: f64 = 1200.0;

    // noiseless E1-B signal
    struct Synth {
        code: PrimaryCode,
        table: Vec<f32>,
        // sample at which a code period starts
        code_start: f64,
        // sample at which the carrier phase is `phase0`
        carrier_ref: f64,
        phase0: f64,
        chip_rate: f64,
    }

    impl Synth {
        fn new(seed: u64, code_start: f64, carrier_ref: f64, phase0: f64) -> Self {
            let mut rng = XorShiftRng::seed_from_u64(seed);
            let chips: Vec<i8> = (0..E1B_CODE_LENGTH_CHIPS)
                .map(|_| if rng.next_u32() & 1 == 0 { 1 } else { -1 })
                .collect();
            let code = PrimaryCode::from_chips(&chips).expect("valid code");
            let table = code.replica_table(ReplicaMode::Combined);
            Self {
                code,
                table,
                code_start,
                carrier_ref,
                phase0,
                chip_rate: E1B_CHIP_RATE_HZ * (1.0 + DOPPLER / E1_CARRIER_FREQ_HZ),
            }
        }

        fn samples(&self, start: u64, len: usize) -> Vec<Complex<f32>> {
            let slots = self.table.len() as i64;
            (0..len)
                .map(|i| {
                    let n = (start + i as u64) as f64;
                    let chips = (n - self.code_start) * self.chip_rate / FS;
                    let slot = ((chips * 2.0).floor() as i64).rem_euclid(slots) as usize;
                    let phase = TAU * DOPPLER * (n - self.carrier_ref) / FS + self.phase0;
                    let c = Complex::from_polar(self.table[slot] as f64, phase);
                    Complex::new(c.re as f32, c.im as f32)
                })
                .collect()
        }
    }

    // run one epoch, synthesizing exactly the samples required
    fn step<R: Resampler>(ch: &mut TrackingChannel<R>, synth: &Synth) -> EpochOutput {
        let need = ch.required_samples();
        let input = synth.samples(ch.sample_counter(), need);
        ch.process(&input).expect("enough input")
    }

    fn builder_without_secondary() -> TrackingBuilder {
        let mut builder = TrackingBuilder::new(FS);
        builder.without_secondary_loop();
        builder
    }

    #[test]
    fn test_convergence_with_bump_jump() {
        // start 50 Hz and half a chip away from the truth
        let synth = Synth::new(0xe1b, 1000.25, 0.0, 0.3);
        let mut ch = builder_without_secondary().build();
        let sync = SyncHandle::new(SignalId::E1B, 19, DOPPLER + 50.0, 1000.25 + 0.5 * FS / 1.023e6);
        ch.start_tracking(&sync, &synth.code);

        let first = step(&mut ch, &synth);
        assert_eq!(17002, first.consumed);
        assert!(!first.record.valid_tracking);
        assert_eq!(DOPPLER + 50.0, first.record.carrier_doppler_hz);

        let mut locked_at = None;
        let mut jumps = Vec::new();
        for epoch in 0..400 {
            let out = step(&mut ch, &synth);
            assert!(out.record.valid_tracking);
            if out.has_event(ChannelEvent::CarrierLockAcquired) {
                locked_at.get_or_insert(epoch);
            }
            for evt in out.events.iter() {
                if let ChannelEvent::BumpJump { direction, .. } = evt {
                    jumps.push(*direction);
                }
            }
            assert!(!out.reacquisition_requested());
        }

        let locked_at = locked_at.expect("carrier lock");
        assert!(locked_at < 300, "locked at epoch {}", locked_at);
        assert_eq!(TrackingState::Locked, ch.state());
        assert_approx_eq!(DOPPLER, ch.doppler_hz(), 1.0);
        assert_eq!(5.0, ch.carrier_bandwidth());

        // any correction moved toward the true peak
        assert!(jumps.iter().all(|d| *d == crate::bumpjump::JumpDirection::Early));

        // on the main peak
        let [ve, _, p, _, vl] = ch.last_correlation().magnitudes();
        assert!(p > ve && p > vl);
    }

    #[test]
    fn test_pull_in_offset() {
        let synth = Synth::new(1, 0.0, 0.0, 0.0);
        let mut ch = builder_without_secondary().build();
        assert_eq!(TrackingState::Disabled, ch.state());

        let sync = SyncHandle::new(SignalId::E1C, 4, 1250.0, 1002.2);
        ch.start_tracking(&sync, &synth.code);
        assert_eq!(17002, ch.required_samples());

        // acquisition performed 5000 samples into the stream
        let sync = sync.with_sample_stamp(5000);
        ch.start_tracking(&sync, &synth.code);
        assert_eq!(6002, ch.required_samples());

        let out = ch.process(&vec![Complex::new(0.0f32, 0.0); 7000]).expect("pull-in");
        assert_eq!(6002, out.consumed);
        assert_eq!(6002, ch.sample_counter());
        assert_eq!(SignalId::E1C, out.record.signal);
        assert_eq!(4, out.record.prn);
        assert_eq!(1250.0, out.record.carrier_doppler_hz);
        assert_approx_eq!(6002.0 / FS, out.record.timestamp_s);
        assert!(!out.record.valid_tracking);
        assert!(!out.record.valid_pseudorange);
        assert_eq!(TrackingState::Unlocked, ch.state());
        assert_eq!(16000, ch.required_samples());
    }

    #[test]
    fn test_insufficient_samples() {
        let synth = Synth::new(2, 0.0, 0.0, 0.0);
        let mut ch = builder_without_secondary().build();
        ch.start_tracking(&SyncHandle::new(SignalId::E1B, 1, 0.0, 10.0), &synth.code);
        let need = ch.required_samples();
        let short = vec![Complex::new(0.0f32, 0.0); need - 1];
        assert_eq!(
            Err(TrackingError::InsufficientSamples {
                needed: need,
                available: need - 1
            }),
            ch.process(&short)
        );
        assert_eq!(0, ch.sample_counter());
        assert_eq!(TrackingState::PullIn, ch.state());
    }

    #[test]
    fn test_disabled_placeholder() {
        let mut ch = builder_without_secondary().build();
        ch.set_channel(5);
        assert_eq!(16000, ch.required_samples());
        let input = vec![Complex::new(1.0f32, 0.0); 20000];
        let out = ch.process(&input).expect("placeholder");
        assert_eq!(16000, out.consumed);
        assert_eq!(5, out.record.channel);
        assert!(!out.record.valid_tracking);
        assert_eq!(0.0, out.record.prompt_i);
        assert!(out.events.is_empty());
        assert_eq!(16000, ch.sample_counter());

        let synth = Synth::new(3, 0.0, 0.0, 0.0);
        ch.start_tracking(&SyncHandle::new(SignalId::E1B, 1, 0.0, 10.0), &synth.code);
        ch.stop_tracking();
        assert_eq!(TrackingState::Disabled, ch.state());
        assert_eq!(16000, ch.process(&input).expect("placeholder").consumed);
    }

    #[test]
    fn test_nan_epoch() {
        let synth = Synth::new(4, 1000.0, 17000.0, 0.0);
        let mut ch = builder_without_secondary().build();
        ch.start_tracking(&SyncHandle::new(SignalId::E1B, 2, DOPPLER, 1000.0), &synth.code);
        step(&mut ch, &synth);
        let good = step(&mut ch, &synth);
        assert!(good.record.valid_tracking);

        let doppler = ch.doppler_hz();
        let code_phase = ch.code_phase_chips();
        let need = ch.required_samples();
        let counter = ch.sample_counter();

        let mut input = synth.samples(counter, need + 100);
        input[10] = Complex::new(f32::NAN, 0.0);
        let out = ch.process(&input).expect("nan epoch");
        assert_eq!(need + 100, out.consumed);
        assert!(!out.record.valid_tracking);
        assert_eq!(0.0, out.record.prompt_i);
        assert_eq!(0.0, out.record.prompt_q);
        assert!(out.has_event(ChannelEvent::InvalidCorrelation));

        // loop state is untouched
        assert_eq!(doppler, ch.doppler_hz());
        assert_eq!(code_phase, ch.code_phase_chips());
        assert_eq!(need, ch.required_samples());
        assert_eq!(counter + (need + 100) as u64, ch.sample_counter());
        assert_eq!(TrackingState::Unlocked, ch.state());
    }

    #[test]
    fn test_lock_switches_bandwidths() {
        let synth = Synth::new(5, 1000.0, 17000.0, 0.0);
        let mut builder = builder_without_secondary();
        builder
            .with_pll_bandwidth(15.0, 5.0)
            .with_dll_bandwidth(2.0, 0.5)
            .with_lock_detector(1, 30.0, 0.85)
            .with_lock_counters(10, 50);
        let mut ch = builder.build();
        ch.start_tracking(&SyncHandle::new(SignalId::E1B, 2, DOPPLER, 1000.0), &synth.code);
        step(&mut ch, &synth);

        for epoch in 1..=10 {
            assert_eq!(15.0, ch.carrier_bandwidth());
            assert_eq!(2.0, ch.code_bandwidth());
            let out = step(&mut ch, &synth);
            assert!(out.record.cn0_db_hz > 30.0);
            assert_eq!(epoch == 10, out.has_event(ChannelEvent::CarrierLockAcquired));
        }

        assert_eq!(TrackingState::Locked, ch.state());
        assert_eq!(5.0, ch.carrier_bandwidth());
        assert_eq!(0.5, ch.code_bandwidth());
        assert_eq!(0.1, ch.early_late_spacing());
    }

    #[test]
    fn test_reacquisition_request() {
        let synth = Synth::new(6, 0.0, 0.0, 0.0);
        let mut builder = builder_without_secondary();
        builder
            .with_lock_detector(1, 25.0, 0.85)
            .with_lock_counters(10, 2);
        let mut ch = builder.build();
        let (tx, rx) = inbox();
        ch.attach_inbox(rx);
        ch.start_tracking(&SyncHandle::new(SignalId::E1B, 2, 0.0, 0.0), &synth.code);
        tx.send(GnssEvent::TowAcquired(1000.0), 0.0);

        // nothing but silence
        let silence = vec![Complex::new(0.0f32, 0.0); 20000];
        ch.process(&silence).expect("pull-in");
        assert_eq!(Some(1000.0), ch.gate_flags().tow());
        for _ in 0..2 {
            let out = ch.process(&silence).expect("epoch");
            assert!(!out.reacquisition_requested());
        }
        let out = ch.process(&silence).expect("epoch");
        assert!(out.reacquisition_requested());
        assert_eq!(TrackingState::Disabled, ch.state());
        assert_eq!(None, ch.gate_flags().tow());

        let out = ch.process(&silence).expect("placeholder");
        assert_eq!(16000, out.consumed);
        assert!(!out.record.valid_tracking);
    }

    #[test]
    fn test_secondary_gate_and_cadence() {
        let synth = Synth::new(7, 1000.0, 17000.0, 0.0);
        let mut builder = TrackingBuilder::new(FS);
        builder
            .with_lock_detector(1, 25.0, 0.85)
            .with_lock_counters(2, 50)
            .with_secondary_loop(SecondaryLoopBuilder::new().with_accumulation_length(5));
        let mut ch = builder.build();
        let (tx, rx) = inbox();
        ch.attach_inbox(rx);
        ch.start_tracking(&SyncHandle::new(SignalId::E1B, 2, DOPPLER, 1000.0), &synth.code);
        step(&mut ch, &synth);

        // locked, but the gate is closed
        for _ in 0..5 {
            let out = step(&mut ch, &synth);
            assert!(!out.has_event(ChannelEvent::SecondaryStarted));
        }
        assert_eq!(TrackingState::Locked, ch.state());
        assert!(!ch.secondary().expect("configured").is_active());

        tx.send(GnssEvent::PreambleDetected, 0.1);
        tx.send(GnssEvent::ReceiverTimeSet(100.0), 0.1);
        let out = step(&mut ch, &synth);
        assert!(out.has_event(ChannelEvent::SecondaryStarted));
        let sec = ch.secondary().expect("configured");
        assert!(sec.is_active());
        assert_eq!(0, sec.accumulation_index());

        for epoch in 1..=20u64 {
            let out = step(&mut ch, &synth);
            assert!(!out.has_event(ChannelEvent::SecondaryStarted));
            let sec = ch.secondary().expect("configured");
            assert!(sec.is_active());
            assert_eq!((epoch % 5) as u32, sec.accumulation_index());
            assert_eq!(epoch / 5, sec.updates());
            if epoch % 5 == 0 {
                assert_eq!(Correlation::default(), *sec.running_sums());
            }
        }

        ch.stop_tracking();
        assert!(!ch.secondary().expect("configured").is_active());
    }

    #[test]
    fn test_dump_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = format!("{}/trk_", dir.path().display());
        let synth = Synth::new(8, 1000.0, 17000.0, 0.0);

        let mut builder = builder_without_secondary();
        builder.with_dump(&prefix);
        {
            let mut ch = builder.build();
            ch.set_channel(7);
            assert!(ch.is_dumping());
            ch.start_tracking(&SyncHandle::new(SignalId::E1B, 2, DOPPLER, 1000.0), &synth.code);
            step(&mut ch, &synth);
            for _ in 0..5 {
                step(&mut ch, &synth);
            }
        }

        let bytes = std::fs::read(dump_path(&prefix, 7)).expect("dump file");
        assert_eq!(5 * DumpRecord::SIZE, bytes.len());
        let mut cur = Cursor::new(&bytes);
        let first = DumpRecord::read_from(&mut cur).expect("first record");
        assert_eq!(17000, first.primary.sample_counter);
        assert_approx_eq!(DOPPLER, first.primary.doppler_hz, 5.0);
        assert!(first.primary.magnitudes[2] > first.primary.magnitudes[0]);
        assert_eq!(DumpBlock::default(), first.secondary);
        let second = DumpRecord::read_from(&mut cur).expect("second record");
        assert!(second.primary.sample_counter > 17000);
    }

    #[test]
    fn test_epoch_iter() {
        let synth = Synth::new(9, 1000.0, 17000.0, 0.0);
        let mut ch = builder_without_secondary().build();
        ch.start_tracking(&SyncHandle::new(SignalId::E1B, 2, DOPPLER, 1000.0), &synth.code);

        let input = synth.samples(0, 17000 + 3 * 16000 + 500);
        let mut iter = ch.epochs(&input);
        let outs: Vec<_> = iter.by_ref().collect();
        let leftover = iter.remaining().len();
        assert_eq!(4, outs.len());
        assert_eq!(
            input.len(),
            outs.iter().map(|o| o.consumed).sum::<usize>() + leftover
        );
        assert!(leftover < ch.required_samples());
    }
}
