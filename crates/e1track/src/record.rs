//! Tracking channel outputs
//!
//! Every call to
//! [`TrackingChannel::process()`](crate::TrackingChannel::process)
//! produces exactly one [`EpochOutput`]: the number of samples it
//! consumed, a [`TrackingRecord`] for the downstream decoder, and
//! any [`ChannelEvent`]s which occurred during the epoch.

use std::fmt;

#[cfg(not(test))]
use log::warn;

#[cfg(test)]
use std::println as warn;

use arrayvec::ArrayVec;

use crate::bumpjump::JumpDirection;
use crate::signal::SignalId;

/// Per-epoch measurement record
///
/// The record is aligned with the start of the code epoch, so the
/// code phase offset is always zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackingRecord {
    /// Channel number
    pub channel: u32,

    /// Signal component
    pub signal: SignalId,

    /// Satellite PRN
    pub prn: u8,

    /// Prompt correlator, in-phase
    pub prompt_i: f64,

    /// Prompt correlator, quadrature
    pub prompt_q: f64,

    /// Accumulated carrier phase (radians)
    pub carrier_phase_rad: f64,

    /// Carrier Doppler (Hz)
    pub carrier_doppler_hz: f64,

    /// Code phase offset from the epoch start (seconds)
    pub code_phase_s: f64,

    /// Carrier-to-noise density estimate (dB-Hz)
    pub cn0_db_hz: f64,

    /// Epoch start time (seconds of input samples)
    pub timestamp_s: f64,

    /// Measurements are valid
    pub valid_tracking: bool,

    /// Pseudorange is valid
    ///
    /// Always `false` from the tracking channel. The observables
    /// stage sets it.
    pub valid_pseudorange: bool,
}

impl TrackingRecord {
    /// Empty, invalid record
    pub fn empty(channel: u32, signal: SignalId, prn: u8, timestamp_s: f64) -> Self {
        Self {
            channel,
            signal,
            prn,
            prompt_i: 0.0,
            prompt_q: 0.0,
            carrier_phase_rad: 0.0,
            carrier_doppler_hz: 0.0,
            code_phase_s: 0.0,
            cn0_db_hz: 0.0,
            timestamp_s,
            valid_tracking: false,
            valid_pseudorange: false,
        }
    }
}

impl fmt::Display for TrackingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{} E{:02} {} t={:.6} P=({:.1}, {:.1}) fd={:.3} Hz phi={:.3} rad cn0={:.1} dB-Hz{}",
            self.channel,
            self.prn,
            self.signal.as_str(),
            self.timestamp_s,
            self.prompt_i,
            self.prompt_q,
            self.carrier_doppler_hz,
            self.carrier_phase_rad,
            self.cn0_db_hz,
            if self.valid_tracking { "" } else { " (invalid)" }
        )
    }
}

/// Channel event
///
/// Events report state changes in the tracking loops. Most are
/// informational. [`ChannelEvent::ReacquisitionRequested`] is a
/// control message: the channel has given up, and the channel
/// manager should restart acquisition for this satellite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelEvent {
    /// Primary carrier lock acquired
    CarrierLockAcquired,

    /// Primary carrier lock lost; reverted to pull-in bandwidths
    CarrierLockLost,

    /// Channel disabled; please reacquire
    ReacquisitionRequested,

    /// Primary subcarrier lock acquired (`true`) or lost
    SubcarrierLock(bool),

    /// Primary code lock acquired (`true`) or lost
    CodeLock(bool),

    /// A false correlation peak was corrected
    BumpJump {
        /// Direction of the jump
        direction: JumpDirection,

        /// The jump was on the secondary signal
        secondary: bool,
    },

    /// Secondary loop started
    SecondaryStarted,

    /// Secondary loop carrier lock acquired
    SecondaryLockAcquired,

    /// Secondary loop carrier lock lost
    SecondaryLockLost,

    /// Secondary loop stopped
    SecondaryStopped,

    /// Correlator output was NaN or infinite
    InvalidCorrelation,
}

impl ChannelEvent {
    /// Human-readable description
    pub fn as_display_str(&self) -> &'static str {
        match self {
            ChannelEvent::CarrierLockAcquired => "carrier lock acquired",
            ChannelEvent::CarrierLockLost => "carrier lock lost",
            ChannelEvent::ReacquisitionRequested => "reacquisition requested",
            ChannelEvent::SubcarrierLock(true) => "subcarrier lock acquired",
            ChannelEvent::SubcarrierLock(false) => "subcarrier lock lost",
            ChannelEvent::CodeLock(true) => "code lock acquired",
            ChannelEvent::CodeLock(false) => "code lock lost",
            ChannelEvent::BumpJump {
                direction: JumpDirection::Early,
                secondary: false,
            } => "bump jump early",
            ChannelEvent::BumpJump {
                direction: JumpDirection::Late,
                secondary: false,
            } => "bump jump late",
            ChannelEvent::BumpJump {
                direction: JumpDirection::Early,
                secondary: true,
            } => "secondary bump jump early",
            ChannelEvent::BumpJump {
                direction: JumpDirection::Late,
                secondary: true,
            } => "secondary bump jump late",
            ChannelEvent::SecondaryStarted => "secondary loop started",
            ChannelEvent::SecondaryLockAcquired => "secondary lock acquired",
            ChannelEvent::SecondaryLockLost => "secondary lock lost",
            ChannelEvent::SecondaryStopped => "secondary loop stopped",
            ChannelEvent::InvalidCorrelation => "invalid correlation",
        }
    }
}

impl AsRef<str> for ChannelEvent {
    fn as_ref(&self) -> &str {
        self.as_display_str()
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_display_str().fmt(f)
    }
}

/// Maximum events reported per epoch
pub const MAX_EVENTS_PER_EPOCH: usize = 12;

/// Result of one tracking epoch
#[derive(Clone, Debug, PartialEq)]
pub struct EpochOutput {
    /// Input samples consumed
    pub consumed: usize,

    /// Measurement record
    pub record: TrackingRecord,

    /// Events which occurred during the epoch, in order
    pub events: ArrayVec<ChannelEvent, MAX_EVENTS_PER_EPOCH>,
}

impl EpochOutput {
    /// New output with no events
    pub fn new(consumed: usize, record: TrackingRecord) -> Self {
        Self {
            consumed,
            record,
            events: ArrayVec::new(),
        }
    }

    /// Check for an event
    pub fn has_event(&self, evt: ChannelEvent) -> bool {
        self.events.contains(&evt)
    }

    /// True if the channel manager should reacquire
    pub fn reacquisition_requested(&self) -> bool {
        self.has_event(ChannelEvent::ReacquisitionRequested)
    }

    // record an event; false if the list was full and it was dropped
    pub(crate) fn push_event(&mut self, evt: ChannelEvent) -> bool {
        match self.events.try_push(evt) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "ch{} E{:02}: event list full; dropped \"{}\"",
                    self.record.channel,
                    self.record.prn,
                    e.element()
                );
                false
            }
        }
    }
}
