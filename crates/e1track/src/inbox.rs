//! Asynchronous navigation events
//!
//! The navigation message decoder runs downstream of the
//! tracking channel, but some of its discoveries matter to the
//! channel. The secondary (codeless) loop is only started once
//! the decoder has found a preamble *and* the receiver has set
//! its time.
//!
//! The decoder reports these discoveries through an
//! [`EventSender`]. The channel owns the matching
//! [`EventInbox`] and drains it, in arrival order, at the start
//! of every epoch. The resulting [`GateFlags`] are the only
//! thing the channel takes from these events.
//!
//! ```
//! use e1track::{inbox, GateFlags, GnssEvent};
//!
//! let (tx, rx) = inbox();
//! tx.send(GnssEvent::PreambleDetected, 1.0);
//! tx.send(GnssEvent::ReceiverTimeSet(345600.0), 1.5);
//!
//! let mut flags = GateFlags::default();
//! for evt in rx.drain() {
//!     flags.apply(evt.as_ref());
//! }
//! assert!(flags.secondary_gate_open());
//! ```

use crossbeam_channel::{Receiver, Sender, TryIter};

/// Navigation event
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GnssEvent {
    /// Decoder has acquired the time of week (seconds)
    TowAcquired(f64),

    /// Receiver time has been established (seconds of week)
    ReceiverTimeSet(f64),

    /// Decoder has found a page preamble
    PreambleDetected,
}

/// Data stamped with an arrival time
#[derive(Clone, Debug, PartialEq)]
pub struct Timestamped<D> {
    /// Data
    pub data: D,

    /// Arrival time (seconds)
    pub timestamp: f64,
}

impl<D> Timestamped<D> {
    /// Store `data` with the given `timestamp`
    pub fn with_timestamp(data: D, timestamp: f64) -> Self {
        Timestamped { data, timestamp }
    }

    /// Check whether the data arrived at or before `time`
    pub fn arrived_by(&self, time: f64) -> bool {
        self.timestamp <= time
    }
}

impl<D> AsRef<D> for Timestamped<D> {
    fn as_ref(&self) -> &D {
        &self.data
    }
}

/// Create a connected sender and inbox
///
/// The queue is unbounded. Sending never blocks, and sending
/// to a dropped inbox is silently ignored.
pub fn inbox() -> (EventSender, EventInbox) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (EventSender { tx }, EventInbox { rx })
}

/// Producer half of the event queue
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: Sender<Timestamped<GnssEvent>>,
}

impl EventSender {
    /// Queue `event`, which arrived at `timestamp` seconds
    ///
    /// Returns `false` if the inbox has been dropped.
    pub fn send(&self, event: GnssEvent, timestamp: f64) -> bool {
        self.tx
            .send(Timestamped::with_timestamp(event, timestamp))
            .is_ok()
    }
}

/// Consumer half of the event queue
#[derive(Debug)]
pub struct EventInbox {
    rx: Receiver<Timestamped<GnssEvent>>,
}

impl EventInbox {
    /// Take all pending events, oldest first
    ///
    /// Never blocks.
    pub fn drain(&self) -> TryIter<'_, Timestamped<GnssEvent>> {
        self.rx.try_iter()
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if no events are pending
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Flags derived from navigation events
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GateFlags {
    tow: Option<f64>,
    receiver_time: Option<f64>,
    preamble: bool,
}

impl GateFlags {
    /// Update flags from `event`
    pub fn apply(&mut self, event: &GnssEvent) {
        match event {
            GnssEvent::TowAcquired(tow) => self.tow = Some(*tow),
            GnssEvent::ReceiverTimeSet(t) => self.receiver_time = Some(*t),
            GnssEvent::PreambleDetected => self.preamble = true,
        }
    }

    /// True if the secondary loop may be started
    ///
    /// The gate opens once a preamble has been detected and the
    /// receiver time has been set.
    pub fn secondary_gate_open(&self) -> bool {
        self.preamble && self.receiver_time.is_some()
    }

    /// Time of week, if acquired
    pub fn tow(&self) -> Option<f64> {
        self.tow
    }

    /// Receiver time, if set
    pub fn receiver_time(&self) -> Option<f64> {
        self.receiver_time
    }

    /// True if a preamble has been detected
    pub fn preamble_detected(&self) -> bool {
        self.preamble
    }

    /// Forget the time of week
    ///
    /// Called when the channel is disabled, since the decoder
    /// must re-acquire it after reacquisition.
    pub fn clear_tow(&mut self) {
        self.tow = None;
    }

    /// Clear all flags
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_order() {
        let (tx, rx) = inbox();
        assert!(rx.is_empty());
        assert!(tx.send(GnssEvent::TowAcquired(10.0), 0.5));
        assert!(tx.send(GnssEvent::PreambleDetected, 0.6));
        assert!(tx.send(GnssEvent::TowAcquired(12.0), 0.7));
        assert_eq!(3, rx.len());

        let got: Vec<_> = rx.drain().collect();
        assert_eq!(3, got.len());
        assert_eq!(GnssEvent::TowAcquired(10.0), got[0].data);
        assert_eq!(0.7, got[2].timestamp);
        assert!(got[1].arrived_by(0.6));
        assert!(!got[2].arrived_by(0.6));
        assert!(rx.is_empty());

        drop(rx);
        assert!(!tx.send(GnssEvent::PreambleDetected, 1.0));
    }

    #[test]
    fn test_gate_flags() {
        let mut flags = GateFlags::default();
        assert!(!flags.secondary_gate_open());

        flags.apply(&GnssEvent::PreambleDetected);
        assert!(!flags.secondary_gate_open());

        flags.apply(&GnssEvent::TowAcquired(100.0));
        flags.apply(&GnssEvent::TowAcquired(104.0));
        assert_eq!(Some(104.0), flags.tow());
        assert!(!flags.secondary_gate_open());

        flags.apply(&GnssEvent::ReceiverTimeSet(104.1));
        assert!(flags.secondary_gate_open());

        flags.clear_tow();
        assert_eq!(None, flags.tow());
        assert!(flags.secondary_gate_open());

        flags.reset();
        assert!(!flags.preamble_detected());
    }
}
