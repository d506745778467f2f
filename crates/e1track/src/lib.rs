//! # e1track: Galileo E1 Signal Tracking
//!
//! This crate provides the per-satellite tracking loops of a
//! Galileo E1 software receiver. Given a coarse Doppler and
//! code delay from an acquisition stage, a
//! [`TrackingChannel`] locks onto the satellite's
//! open-service E1-B (data) or E1-C (pilot) signal and follows
//! it, one 4 ms code epoch at a time. Each epoch yields a
//! [`TrackingRecord`] of measurements for the telemetry
//! decoder and observables stages.
//!
//! Optionally, once the channel is locked and the navigation
//! decoder has established time, the channel also tracks the
//! encrypted E1-A signal *codelessly*: without knowledge of
//! its spreading code. The E1-A loop is slaved to the E1-B
//! loop and uses long coherent accumulations to recover the
//! E1-A subcarrier and chip timing.
//!
//! ## Disclaimer
//!
//! This crate is dual-licensed MIT and Apache 2.0. Read these licenses
//! carefully as they may affect your rights.
//!
//! This crate has not been certified for navigation or for any
//! other purpose. The author **strongly discourages** its use in
//! any safety-critical application.
//!
//! ## Example
//!
//! You will first need complex baseband samples of the
//! Galileo E1 band, from a GNSS front-end or a
//! software-defined radio, and an acquisition stage which can
//! find satellites in them. Both are beyond the scope of this
//! crate.
//!
//! ```
//! use e1track::{PrimaryCode, SecondaryLoopBuilder, SignalId, SyncHandle, TrackingBuilder};
//! use num_complex::Complex;
//!
//! # let spreading_code_for_prn = |_prn| PrimaryCode::from_chips(&[1i8; 4092]).unwrap();
//! # let mut some_sample_source = || vec![Complex::new(0.0f32, 0.0); 40000];
//! #
//! // create a TrackingChannel with your sampling rate
//! let mut channel = TrackingBuilder::new(4.0e6)
//!     .with_pll_bandwidth(15.0, 5.0)    // carrier loop bandwidth (Hz)
//!     .with_dll_bandwidth(2.0, 0.5)     // subcarrier loop bandwidth (Hz)
//!     .with_secondary_loop(             // track E1-A too
//!         SecondaryLoopBuilder::new().with_accumulation_length(10),
//!     )
//!     .build();
//! channel.set_channel(1);
//!
//! // hand off from acquisition
//! let sync = SyncHandle::new(SignalId::E1B, 11, 1250.0, 3127.0);
//! channel.start_tracking(&sync, &spreading_code_for_prn(11));
//!
//! let mut buffer = some_sample_source();
//! while buffer.len() >= channel.required_samples() {
//!     let out = channel.process(&buffer).expect("enough samples");
//!     buffer.drain(0..out.consumed);
//!
//!     println!("{}", out.record);
//!     if out.reacquisition_requested() {
//!         println!("lost E{:02}; reacquire", out.record.prn);
//!     }
//! }
//! ```
//!
//! The channel is created via a [builder](TrackingBuilder).
//! All parameters have sensible defaults.
//!
//! Each call to [`TrackingChannel::process()`] consumes one
//! epoch's worth of samples and returns an [`EpochOutput`]:
//! the number of samples consumed, exactly one record, and any
//! [`ChannelEvent`]s which occurred. The number of samples per
//! epoch changes slightly as the code Doppler is tracked, so
//! always ask [`required_samples()`](TrackingChannel::required_samples)
//! first. [`TrackingChannel::epochs()`] wraps this loop in an
//! iterator.
//!
//! ## Navigation events
//!
//! The E1-A loop may only start once the navigation decoder
//! has found a page preamble and the receiver time is known.
//! Connect the decoder to the channel with an [`inbox()`]:
//!
//! ```
//! use e1track::{inbox, GnssEvent, TrackingBuilder};
//!
//! let mut channel = TrackingBuilder::new(4.0e6).build();
//! let (sender, rx) = inbox();
//! channel.attach_inbox(rx);
//!
//! // from the decoder thread
//! sender.send(GnssEvent::PreambleDetected, 12.5);
//! sender.send(GnssEvent::ReceiverTimeSet(345600.0), 12.5);
//! ```
//!
//! Events are drained at the start of the next epoch.
//!
//! ## Background
//!
//! Galileo satellites transmit three signals on the E1
//! carrier at 1575.42 MHz:
//!
//! * **E1-B**: open-service data, 4092-chip code at
//!   1.023 Mchip/s on a BOC(1,1) subcarrier
//! * **E1-C**: open-service pilot, with the same structure
//! * **E1-A**: the encrypted public regulated service, at
//!   2.5575 Mchip/s on a 15.345 MHz BOC cosine subcarrier
//!
//! The E1-B/C subcarrier makes the correlation function
//! multi-peaked. The channel resolves the ambiguity either by
//! *bump jumping*, which watches very-early and very-late
//! correlators for a stronger neighboring peak, or by tracking
//! the subcarrier and the code in separate loops.

mod builder;
mod bumpjump;
mod channel;
mod codeless;
mod correlator;
mod discriminator;
mod dump;
mod inbox;
mod lockdetect;
mod loopfilter;
mod primary;
mod record;
mod resampler;
mod signal;

pub use builder::{DivergenceGate, LockParameters, SecondaryLoopBuilder, TrackingBuilder};
pub use bumpjump::{BumpJumper, JumpDirection};
pub use channel::{EpochIter, TrackingChannel, TrackingError, TrackingState};
pub use codeless::{CodelessLoop, SecondaryLockChange, SecondaryOutcome};
pub use correlator::{
    Arm, CodeReplica, CodelessReplica, Correlation, Correlator, SubcarrierReplica, NUM_ARMS,
};
pub use dump::{dump_path, DumpBlock, DumpRecord, DumpWriter};
pub use inbox::{inbox, EventInbox, EventSender, GateFlags, GnssEvent, Timestamped};
pub use lockdetect::{LockDetector, LockEstimate, LockTest};
pub use loopfilter::LoopFilter;
pub use primary::{LockStatus, LockTransition, LoopErrors, PrimaryLoop};
pub use record::{ChannelEvent, EpochOutput, TrackingRecord, MAX_EVENTS_PER_EPOCH};
pub use resampler::{FixedPointResampler, Resampler, SubcarrierPhasing};
pub use signal::{
    nominal_epoch_samples, CodeError, PrimaryCode, ReplicaMode, SignalId, SyncHandle,
    E1A_CHIP_RATE_HZ, E1A_SUBCARRIER_RATE_HZ, E1B_CHIP_RATE_HZ, E1B_CODE_LENGTH_CHIPS,
    E1B_CODE_PERIOD_S, E1_CARRIER_FREQ_HZ,
};
