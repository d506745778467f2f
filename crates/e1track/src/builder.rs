use crate::channel::TrackingChannel;
use crate::resampler::Resampler;
use crate::signal::ReplicaMode;

/// Builds a Galileo E1 tracking channel
///
/// The builder comes with a sensible set of default options.
/// All you really need to provide is the input sampling rate.
/// The defaults were chosen for a 4 MHz complex baseband
/// front end with a wide enough bandwidth to pass the main
/// lobes of the E1-A subcarrier.
///
/// The API specified by the builder is part of this crate's
/// API. The actual default values are *not*, however, and
/// are subject to revision in any minor release. If you
/// care very strongly about a setting, be sure to configure
/// it here.
///
/// ```
/// use e1track::{SecondaryLoopBuilder, TrackingBuilder};
///
/// let mut builder = TrackingBuilder::new(4.0e6);
/// builder
///     .with_pll_bandwidth(20.0, 5.0)
///     .with_secondary_loop(SecondaryLoopBuilder::new().with_close_loops(true));
/// let channel = builder.build();
/// assert_eq!(20.0, channel.carrier_bandwidth());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct TrackingBuilder {
    sample_rate: f64,
    intermediate_freq: f64,
    carrier_loop_order: u8,
    code_loop_order: u8,
    pll_bandwidth_initial: f64,
    pll_bandwidth_final: f64,
    dll_bandwidth_initial: f64,
    dll_bandwidth_final: f64,
    fll_bandwidth: f64,
    early_late_spacing_initial: f64,
    early_late_spacing_final: f64,
    carrier_aiding: bool,
    bump_jumping: bool,
    bump_jump_threshold: u32,
    divergence_bandwidth_initial: f64,
    divergence_bandwidth_final: f64,
    replica_mode: ReplicaMode,
    lock: LockParameters,
    dump_prefix: Option<String>,
    secondary: Option<SecondaryLoopBuilder>,
}

impl TrackingBuilder {
    /// New tracking channel with "sensible" defaults
    ///
    /// The only mandatory parameter is the complex input
    /// sampling rate, in Hz. It should be at least twice the
    /// E1-B/C chip rate.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate: f64::max(sample_rate, 1.0),
            intermediate_freq: 0.0,
            carrier_loop_order: 3,
            code_loop_order: 1,
            pll_bandwidth_initial: 15.0,
            pll_bandwidth_final: 5.0,
            dll_bandwidth_initial: 2.0,
            dll_bandwidth_final: 0.5,
            fll_bandwidth: 20.0,
            early_late_spacing_initial: 0.15,
            early_late_spacing_final: 0.1,
            carrier_aiding: true,
            bump_jumping: true,
            bump_jump_threshold: 10,
            divergence_bandwidth_initial: 0.5,
            divergence_bandwidth_final: 0.05,
            replica_mode: ReplicaMode::Combined,
            lock: LockParameters::default(),
            dump_prefix: None,
            secondary: Some(SecondaryLoopBuilder::default()),
        }
    }

    /// Build a tracking channel
    ///
    /// The channel is idle until given an acquisition handoff
    /// with [`start_tracking()`](TrackingChannel::start_tracking).
    pub fn build(&self) -> TrackingChannel {
        TrackingChannel::from(self)
    }

    /// Build a tracking channel with a custom resampler
    pub fn build_with_resampler<R: Resampler>(&self, resampler: R) -> TrackingChannel<R> {
        TrackingChannel::with_resampler(self, resampler)
    }

    /// Intermediate frequency (Hz)
    ///
    /// Residual carrier frequency of the input, before
    /// Doppler. Zero for a true baseband front end.
    pub fn with_intermediate_freq(&mut self, freq: f64) -> &mut Self {
        self.intermediate_freq = freq;
        self
    }

    /// Loop filter orders
    ///
    /// Sets the order of the carrier (PLL) loop filter and of
    /// the subcarrier/code (DLL) loop filter. Orders are
    /// clamped to `1 ..= 3`. The NCO adds one more integrator,
    /// so a third-order carrier filter tracks Doppler rate
    /// without bias.
    pub fn with_loop_orders(&mut self, carrier: u8, code: u8) -> &mut Self {
        self.carrier_loop_order = carrier.clamp(1, 3);
        self.code_loop_order = code.clamp(1, 3);
        self
    }

    /// Carrier loop noise bandwidth (Hz)
    ///
    /// There are two values:
    ///
    /// 1. The first value is used during pull-in, before the
    ///    carrier lock detector declares lock.
    ///
    /// 2. The second value is used once the carrier is locked.
    ///    It is clamped to the first value.
    pub fn with_pll_bandwidth(&mut self, initial: f64, locked: f64) -> &mut Self {
        self.pll_bandwidth_initial = f64::max(initial, 0.0);
        self.pll_bandwidth_final = f64::clamp(locked, 0.0, self.pll_bandwidth_initial);
        self
    }

    /// Subcarrier/code loop noise bandwidth (Hz)
    ///
    /// The initial and locked bandwidths, as for
    /// [`with_pll_bandwidth()`](TrackingBuilder::with_pll_bandwidth).
    pub fn with_dll_bandwidth(&mut self, initial: f64, locked: f64) -> &mut Self {
        self.dll_bandwidth_initial = f64::max(initial, 0.0);
        self.dll_bandwidth_final = f64::clamp(locked, 0.0, self.dll_bandwidth_initial);
        self
    }

    /// Frequency-assist bandwidth (Hz)
    ///
    /// During pull-in, a frequency-locked loop helps the PLL
    /// remove large initial Doppler errors. The FLL is switched
    /// off when the carrier locks. Zero disables it.
    pub fn with_fll_bandwidth(&mut self, bw: f64) -> &mut Self {
        self.fll_bandwidth = f64::max(bw, 0.0);
        self
    }

    /// Early–late spacing (subcarrier cycles)
    ///
    /// Spacing between prompt and the early and late arms,
    /// during pull-in and once locked. Values are clamped to
    /// `0.0 ..= 0.5`, and the locked spacing is clamped to the
    /// initial spacing.
    pub fn with_early_late_spacing(&mut self, initial: f64, locked: f64) -> &mut Self {
        self.early_late_spacing_initial = f64::clamp(initial, 0.0, 0.5);
        self.early_late_spacing_final = f64::clamp(locked, 0.0, self.early_late_spacing_initial);
        self
    }

    /// Carrier aiding of the subcarrier/code loop
    ///
    /// When enabled, the subcarrier and code frequencies follow
    /// the carrier Doppler, scaled by the ratio of their rates
    /// to the carrier frequency.
    pub fn with_carrier_aiding(&mut self, enable: bool) -> &mut Self {
        self.carrier_aiding = enable;
        self
    }

    /// Bump jumping
    ///
    /// Enables false-peak correction with the given `threshold`,
    /// in epochs. Disabling bump jumping enables subcarrier
    /// aiding instead: the code is tracked by a separate
    /// divergence loop on the very-early and very-late arms.
    pub fn with_bump_jumping(&mut self, enable: bool, threshold: u32) -> &mut Self {
        self.bump_jumping = enable;
        self.bump_jump_threshold = u32::max(threshold, 1);
        self
    }

    /// Divergence loop noise bandwidth (Hz)
    ///
    /// Initial and code-locked bandwidths of the loop which
    /// steers the code against the subcarrier when bump
    /// jumping is disabled. The locked value is clamped to the
    /// initial value.
    pub fn with_divergence_bandwidth(&mut self, initial: f64, locked: f64) -> &mut Self {
        self.divergence_bandwidth_initial = f64::max(initial, 0.0);
        self.divergence_bandwidth_final =
            f64::clamp(locked, 0.0, self.divergence_bandwidth_initial);
        self
    }

    /// Local replica mode
    pub fn with_replica_mode(&mut self, mode: ReplicaMode) -> &mut Self {
        self.replica_mode = mode;
        self
    }

    /// Carrier lock detector
    ///
    /// Lock is evaluated every `window` epochs. A window
    /// passes when its CN0 estimate is at least `min_cn0_db_hz`
    /// and its carrier lock statistic is at least `threshold`.
    pub fn with_lock_detector(
        &mut self,
        window: usize,
        min_cn0_db_hz: f64,
        threshold: f64,
    ) -> &mut Self {
        self.lock.window = usize::max(window, 1);
        self.lock.min_cn0_db_hz = min_cn0_db_hz;
        self.lock.threshold = f64::clamp(threshold, 0.0, 1.0);
        self
    }

    /// Lock hysteresis
    ///
    /// The carrier is declared locked after `success`
    /// consecutive passing windows. It is declared unlocked
    /// when the decaying fail count exceeds `fail`. If this
    /// happens before lock is achieved, the channel gives up
    /// and requests reacquisition.
    pub fn with_lock_counters(&mut self, success: u32, fail: u32) -> &mut Self {
        self.lock.success = u32::max(success, 1);
        self.lock.fail = fail;
        self
    }

    /// Enable diagnostic dumps
    ///
    /// Each channel writes to `<prefix><channel>.dat`.
    pub fn with_dump(&mut self, prefix: &str) -> &mut Self {
        self.dump_prefix = Some(prefix.to_owned());
        self
    }

    /// Disable diagnostic dumps
    pub fn without_dump(&mut self) -> &mut Self {
        self.dump_prefix = None;
        self
    }

    /// Set secondary loop parameters
    ///
    /// To configure the codeless E1-A loop, generate a
    /// [`SecondaryLoopBuilder`] and provide it to this method.
    pub fn with_secondary_loop(&mut self, secondary: &SecondaryLoopBuilder) -> &mut Self {
        self.secondary = Some(secondary.clone());
        self
    }

    /// Disable the secondary loop
    pub fn without_secondary_loop(&mut self) -> &mut Self {
        self.secondary = None;
        self
    }

    /// Input sampling rate (Hz)
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Intermediate frequency (Hz)
    pub fn intermediate_freq(&self) -> f64 {
        self.intermediate_freq
    }

    /// Loop filter orders `(carrier, code)`
    pub fn loop_orders(&self) -> (u8, u8) {
        (self.carrier_loop_order, self.code_loop_order)
    }

    /// Carrier loop bandwidth `(initial, locked)` (Hz)
    pub fn pll_bandwidth(&self) -> (f64, f64) {
        (self.pll_bandwidth_initial, self.pll_bandwidth_final)
    }

    /// Subcarrier/code loop bandwidth `(initial, locked)` (Hz)
    pub fn dll_bandwidth(&self) -> (f64, f64) {
        (self.dll_bandwidth_initial, self.dll_bandwidth_final)
    }

    /// Frequency-assist bandwidth (Hz)
    pub fn fll_bandwidth(&self) -> f64 {
        self.fll_bandwidth
    }

    /// Early–late spacing `(initial, locked)` (cycles)
    pub fn early_late_spacing(&self) -> (f64, f64) {
        (self.early_late_spacing_initial, self.early_late_spacing_final)
    }

    /// Carrier aiding enabled
    pub fn carrier_aiding(&self) -> bool {
        self.carrier_aiding
    }

    /// Bump jumping `(enabled, threshold)`
    pub fn bump_jumping(&self) -> (bool, u32) {
        (self.bump_jumping, self.bump_jump_threshold)
    }

    /// Subcarrier aiding enabled
    ///
    /// Subcarrier aiding is used exactly when bump jumping
    /// is not.
    pub fn subcarrier_aiding(&self) -> bool {
        !self.bump_jumping
    }

    /// Divergence loop bandwidth `(initial, locked)` (Hz)
    pub fn divergence_bandwidth(&self) -> (f64, f64) {
        (
            self.divergence_bandwidth_initial,
            self.divergence_bandwidth_final,
        )
    }

    /// Local replica mode
    pub fn replica_mode(&self) -> ReplicaMode {
        self.replica_mode
    }

    /// Lock detector parameters
    pub fn lock_parameters(&self) -> &LockParameters {
        &self.lock
    }

    /// Dump file prefix, if dumps are enabled
    pub fn dump_prefix(&self) -> Option<&str> {
        self.dump_prefix.as_deref()
    }

    /// Secondary loop configuration
    pub fn secondary_loop(&self) -> Option<&SecondaryLoopBuilder> {
        self.secondary.as_ref()
    }
}

impl std::default::Default for TrackingBuilder {
    fn default() -> Self {
        Self::new(4.0e6)
    }
}

/// Lock detector parameters
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct LockParameters {
    /// Epochs per lock test
    pub window: usize,

    /// Minimum CN0 for a passing test (dB-Hz)
    pub min_cn0_db_hz: f64,

    /// Minimum carrier lock statistic for a passing test
    pub threshold: f64,

    /// Consecutive passes to declare lock
    pub success: u32,

    /// Fail count beyond which lock is dropped
    pub fail: u32,
}

impl std::default::Default for LockParameters {
    fn default() -> Self {
        Self {
            window: 20,
            min_cn0_db_hz: 25.0,
            threshold: 0.85,
            success: 10,
            fail: 50,
        }
    }
}

/// When the secondary divergence loop may steer the code
///
/// The divergence loop corrects the secondary code frequency
/// against its subcarrier. It should only do so once the
/// secondary subcarrier is locked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DivergenceGate {
    /// Secondary subcarrier lock is sufficient
    SubcarrierLock,

    /// Also require secondary carrier lock
    SubcarrierAndCarrierLock,
}

/// Builder for the codeless E1-A secondary loop
///
/// The secondary loop starts once the primary is locked and
/// the navigation decoder has set the receiver time. By
/// default it is *open loop*: its frequencies simply follow
/// the primary Doppler. With
/// [`with_close_loops()`](SecondaryLoopBuilder::with_close_loops),
/// its own discriminators steer it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SecondaryLoopBuilder {
    accumulation_length: u32,
    close_loops: bool,
    carrier_bandwidth: f64,
    code_bandwidth: f64,
    very_early_late_spacing_initial: f64,
    very_early_late_spacing_final: f64,
    divergence_gate: DivergenceGate,
    lock: LockParameters,
}

impl SecondaryLoopBuilder {
    /// New secondary loop builder with sensible defaults
    pub fn new() -> Self {
        Self {
            accumulation_length: 10,
            close_loops: false,
            carrier_bandwidth: 2.0,
            code_bandwidth: 0.1,
            very_early_late_spacing_initial: 0.5,
            very_early_late_spacing_final: 0.1,
            divergence_gate: DivergenceGate::SubcarrierLock,
            lock: LockParameters::default(),
        }
    }

    /// Coherent accumulation length (primary epochs)
    ///
    /// The secondary discriminators and filters run once every
    /// `epochs` primary epochs.
    pub fn with_accumulation_length(&mut self, epochs: u32) -> &mut Self {
        self.accumulation_length = u32::max(epochs, 1);
        self
    }

    /// Close the secondary loops
    pub fn with_close_loops(&mut self, enable: bool) -> &mut Self {
        self.close_loops = enable;
        self
    }

    /// Secondary loop noise bandwidths (Hz)
    pub fn with_bandwidths(&mut self, carrier: f64, code: f64) -> &mut Self {
        self.carrier_bandwidth = f64::max(carrier, 0.0);
        self.code_bandwidth = f64::max(code, 0.0);
        self
    }

    /// Very-early–very-late spacing (E1-A chips)
    ///
    /// Used only when bump jumping is disabled. Values are
    /// clamped to `0.0 ..= 1.0`, and the code-locked spacing is
    /// clamped to the initial spacing.
    pub fn with_very_early_late_spacing(&mut self, initial: f64, locked: f64) -> &mut Self {
        self.very_early_late_spacing_initial = f64::clamp(initial, 0.0, 1.0);
        self.very_early_late_spacing_final =
            f64::clamp(locked, 0.0, self.very_early_late_spacing_initial);
        self
    }

    /// Divergence loop gating policy
    pub fn with_divergence_gate(&mut self, gate: DivergenceGate) -> &mut Self {
        self.divergence_gate = gate;
        self
    }

    /// Secondary lock detector
    ///
    /// As for
    /// [`TrackingBuilder::with_lock_detector()`](TrackingBuilder::with_lock_detector),
    /// but counted in accumulation periods.
    pub fn with_lock_detector(
        &mut self,
        window: usize,
        min_cn0_db_hz: f64,
        threshold: f64,
    ) -> &mut Self {
        self.lock.window = usize::max(window, 1);
        self.lock.min_cn0_db_hz = min_cn0_db_hz;
        self.lock.threshold = f64::clamp(threshold, 0.0, 1.0);
        self
    }

    /// Secondary lock hysteresis
    pub fn with_lock_counters(&mut self, success: u32, fail: u32) -> &mut Self {
        self.lock.success = u32::max(success, 1);
        self.lock.fail = fail;
        self
    }

    /// Coherent accumulation length (primary epochs)
    pub fn accumulation_length(&self) -> u32 {
        self.accumulation_length
    }

    /// Secondary loops closed
    pub fn close_loops(&self) -> bool {
        self.close_loops
    }

    /// Noise bandwidths `(carrier, code)` (Hz)
    pub fn bandwidths(&self) -> (f64, f64) {
        (self.carrier_bandwidth, self.code_bandwidth)
    }

    /// Very-early–very-late spacing `(initial, locked)` (chips)
    pub fn very_early_late_spacing(&self) -> (f64, f64) {
        (
            self.very_early_late_spacing_initial,
            self.very_early_late_spacing_final,
        )
    }

    /// Divergence loop gating policy
    pub fn divergence_gate(&self) -> DivergenceGate {
        self.divergence_gate
    }

    /// Lock detector parameters
    pub fn lock_parameters(&self) -> &LockParameters {
        &self.lock
    }
}

impl std::default::Default for SecondaryLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let b = TrackingBuilder::default();
        assert_eq!(4.0e6, b.sample_rate());
        assert_eq!((3, 1), b.loop_orders());
        assert_eq!((15.0, 5.0), b.pll_bandwidth());
        assert_eq!((2.0, 0.5), b.dll_bandwidth());
        assert_eq!((0.15, 0.1), b.early_late_spacing());
        assert_eq!((true, 10), b.bump_jumping());
        assert!(!b.subcarrier_aiding());
        assert_eq!(ReplicaMode::Combined, b.replica_mode());
        assert_eq!(20, b.lock_parameters().window);
        assert_eq!(None, b.dump_prefix());

        let sec = b.secondary_loop().expect("secondary loop on by default");
        assert_eq!(10, sec.accumulation_length());
        assert!(!sec.close_loops());
        assert_eq!(DivergenceGate::SubcarrierLock, sec.divergence_gate());
    }

    #[test]
    fn test_clamps() {
        let mut b = TrackingBuilder::new(2.0e6);
        b.with_loop_orders(0, 7)
            .with_pll_bandwidth(10.0, 20.0)
            .with_early_late_spacing(0.9, 0.2)
            .with_bump_jumping(false, 0)
            .with_lock_detector(0, 30.0, 1.5)
            .with_dump("/tmp/e1_");
        assert_eq!((1, 3), b.loop_orders());
        assert_eq!((10.0, 10.0), b.pll_bandwidth());
        assert_eq!((0.5, 0.2), b.early_late_spacing());
        assert_eq!((false, 1), b.bump_jumping());
        assert!(b.subcarrier_aiding());
        assert_eq!(1, b.lock_parameters().window);
        assert_eq!(1.0, b.lock_parameters().threshold);
        assert_eq!(Some("/tmp/e1_"), b.dump_prefix());

        b.without_secondary_loop().without_dump();
        assert!(b.secondary_loop().is_none());
        assert!(b.dump_prefix().is_none());

        let mut sec = SecondaryLoopBuilder::new();
        sec.with_accumulation_length(0)
            .with_very_early_late_spacing(2.0, 3.0)
            .with_divergence_gate(DivergenceGate::SubcarrierAndCarrierLock);
        assert_eq!(1, sec.accumulation_length());
        assert_eq!((1.0, 1.0), sec.very_early_late_spacing());
        b.with_secondary_loop(&sec);
        assert_eq!(Some(&sec), b.secondary_loop());
    }

    #[test]
    fn test_secondary_builders_compare_gate() {
        let open = SecondaryLoopBuilder::new();
        let mut strict = open;
        strict.with_divergence_gate(DivergenceGate::SubcarrierAndCarrierLock);
        assert_ne!(open, strict);

        strict.with_divergence_gate(DivergenceGate::SubcarrierLock);
        assert_eq!(open, strict);
    }
}
