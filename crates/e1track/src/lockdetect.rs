//! Carrier lock and CN0 estimation
//!
//! The [`LockDetector`] collects a window of prompt correlator
//! outputs. Each time the window fills, it estimates the
//! carrier-to-noise density and a carrier lock statistic, then
//! empties the window. Each estimate is a pass or a fail:
//!
//! * A **pass** increments the success streak and decays the
//!   fail count by one.
//! * A **fail** increments the fail count and clears the
//!   success streak.
//!
//! The tracking loop compares these counts against its own
//! thresholds to decide when to declare or drop lock.

use num_complex::Complex;

#[cfg(not(test))]
use log::trace;

#[cfg(test)]
use std::println as trace;

/// Result of one lock test
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockTest {
    /// CN0 and lock statistic both meet their thresholds
    Pass,

    /// CN0 or lock statistic is too low
    Fail,
}

/// Statistics from one full window
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LockEstimate {
    /// Carrier-to-noise density ratio (dB-Hz)
    pub cn0_db_hz: f64,

    /// Carrier lock statistic, `0.0 ..= 1.0`
    pub lock_statistic: f64,

    /// Test result
    pub test: LockTest,
}

/// Windowed carrier lock detector
#[derive(Clone, Debug)]
pub struct LockDetector {
    // prompt history, allocated once
    window: Vec<Complex<f64>>,

    // window length
    window_len: usize,

    // minimum CN0 for a pass (dB-Hz)
    min_cn0_db_hz: f64,

    // minimum lock statistic for a pass
    lock_threshold: f64,

    // consecutive passes
    success: u32,

    // decaying count of failures
    fail: u32,

    // latest estimates
    cn0_db_hz: f64,
    lock_statistic: f64,
}

impl LockDetector {
    /// New lock detector
    ///
    /// Evaluates every `window_len` prompt values. A window
    /// passes when the CN0 is at least `min_cn0_db_hz` and the
    /// lock statistic is at least `lock_threshold`.
    pub fn new(window_len: usize, min_cn0_db_hz: f64, lock_threshold: f64) -> Self {
        let window_len = window_len.max(1);
        Self {
            window: Vec::with_capacity(window_len),
            window_len,
            min_cn0_db_hz,
            lock_threshold,
            success: 0,
            fail: 0,
            cn0_db_hz: 0.0,
            lock_statistic: 0.0,
        }
    }

    /// Add a prompt value
    ///
    /// `sample_rate` and `epoch_samples` are the input sampling
    /// rate and the number of samples which produced `prompt`.
    /// When the window fills, returns the estimate for the
    /// window and empties it.
    pub fn input(
        &mut self,
        prompt: Complex<f64>,
        sample_rate: f64,
        epoch_samples: usize,
    ) -> Option<LockEstimate> {
        self.window.push(prompt);
        if self.window.len() < self.window_len {
            return None;
        }

        self.cn0_db_hz = cn0_snv_db_hz(&self.window, sample_rate, epoch_samples);
        self.lock_statistic = carrier_lock_statistic(&self.window);
        self.window.clear();

        let test = if self.lock_statistic < self.lock_threshold
            || self.cn0_db_hz < self.min_cn0_db_hz
        {
            self.fail += 1;
            self.success = 0;
            LockTest::Fail
        } else {
            self.success += 1;
            self.fail = self.fail.saturating_sub(1);
            LockTest::Pass
        };

        trace!(
            "lock window: cn0 {:.1} dB-Hz, statistic {:.3}, {:?} (success {}, fail {})",
            self.cn0_db_hz,
            self.lock_statistic,
            test,
            self.success,
            self.fail
        );

        Some(LockEstimate {
            cn0_db_hz: self.cn0_db_hz,
            lock_statistic: self.lock_statistic,
            test,
        })
    }

    /// Consecutive passes
    pub fn success_count(&self) -> u32 {
        self.success
    }

    /// Decaying failure count
    pub fn fail_count(&self) -> u32 {
        self.fail
    }

    /// Clear the failure count
    pub fn clear_fail_count(&mut self) {
        self.fail = 0;
    }

    /// Latest CN0 estimate (dB-Hz)
    pub fn cn0_db_hz(&self) -> f64 {
        self.cn0_db_hz
    }

    /// Latest carrier lock statistic
    pub fn lock_statistic(&self) -> f64 {
        self.lock_statistic
    }

    /// Values currently in the window
    pub fn window_fill(&self) -> usize {
        self.window.len()
    }

    /// Window length
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Reset to zero initial conditions
    pub fn reset(&mut self) {
        self.window.clear();
        self.success = 0;
        self.fail = 0;
        self.cn0_db_hz = 0.0;
        self.lock_statistic = 0.0;
    }
}

/// Mean absolute discriminator error
///
/// Accumulates `|error|` between calls to
/// [`take()`](ErrorMean::take).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorMean {
    sum: f64,
    count: usize,
}

impl ErrorMean {
    /// Empty mean
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate an error
    pub fn input(&mut self, error: f64) {
        self.sum += error.abs();
        self.count += 1;
    }

    /// Current mean, or zero if empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Return the mean and start over
    pub fn take(&mut self) -> f64 {
        let out = self.mean();
        self.reset();
        out
    }

    /// Discard all accumulated errors
    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Signal-to-noise variance CN0 estimator
///
/// Estimates the carrier-to-noise density ratio, in dB-Hz, from
/// a window of prompt values, each integrated over
/// `epoch_samples` samples at `sample_rate`. The signal power is
/// estimated as the squared mean of `|I|`, and the noise power as
/// the remainder of the total power. If the window has no
/// measurable noise, the noise power is floored at a tiny
/// fraction of the total so that the result stays finite.
pub fn cn0_snv_db_hz(window: &[Complex<f64>], sample_rate: f64, epoch_samples: usize) -> f64 {
    if window.is_empty() {
        return 0.0;
    }

    let n = window.len() as f64;
    let psig = (window.iter().map(|p| p.re.abs()).sum::<f64>() / n).powi(2);
    let ptot = window.iter().map(|p| p.norm_sqr()).sum::<f64>() / n;
    if ptot <= 0.0 {
        return 0.0;
    }

    let noise = (ptot - psig).max(ptot * NOISE_FLOOR);
    let snr = psig / noise;
    10.0 * snr.log10() + 10.0 * (sample_rate / 2.0).log10()
        - 10.0 * (epoch_samples.max(1) as f64).log10()
}

/// Carrier lock statistic
///
/// Returns `((ΣI)² - (ΣQ)²) / ((ΣI)² + (ΣQ)²)`, which is the
/// cosine of twice the mean carrier phase error, clamped to
/// `0.0 ..= 1.0`. Returns zero for an all-zero window.
pub fn carrier_lock_statistic(window: &[Complex<f64>]) -> f64 {
    let si: f64 = window.iter().map(|p| p.re).sum();
    let sq: f64 = window.iter().map(|p| p.im).sum();
    let nbd = si * si + sq * sq;
    if nbd <= 0.0 {
        return 0.0;
    }
    ((si * si - sq * sq) / nbd).clamp(0.0, 1.0)
}

const NOISE_FLOOR: f64 = 1.0e-9;

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;
    use rand_core::{RngCore, SeedableRng};
    use rand_xorshift::XorShiftRng;

    // uniform in ±1
    fn uniform(rng: &mut XorShiftRng) -> f64 {
        (rng.next_u32() as f64 / u32::MAX as f64) * 2.0 - 1.0
    }

    #[test]
    fn test_lock_statistic() {
        let locked = vec![Complex::new(100.0, 0.0); 20];
        assert_approx_eq!(1.0, carrier_lock_statistic(&locked));

        // 45° phase error → cos(90°) = 0
        let skewed = vec![Complex::from_polar(100.0, std::f64::consts::FRAC_PI_4); 20];
        assert_approx_eq!(0.0, carrier_lock_statistic(&skewed));

        // all-quadrature is clamped
        let quad = vec![Complex::new(0.0, 100.0); 20];
        assert_eq!(0.0, carrier_lock_statistic(&quad));
        assert_eq!(0.0, carrier_lock_statistic(&[]));
    }

    #[test]
    fn test_cn0_noiseless_is_finite() {
        let window = vec![Complex::new(5000.0, 0.0); 20];
        let cn0 = cn0_snv_db_hz(&window, 4.0e6, 16000);
        assert!(cn0.is_finite());
        assert!(cn0 > 100.0);
        assert_eq!(0.0, cn0_snv_db_hz(&[], 4.0e6, 16000));
    }

    #[test]
    fn test_cn0_noisy() {
        // prompt = A + complex noise with variance σ² per component
        // over a 4 ms epoch. SNR ≈ A²/(2σ²).
        let mut rng = XorShiftRng::seed_from_u64(0x5eed);
        let amp = 10.0;
        let sigma = 1.0;
        let mut window = Vec::new();
        for _ in 0..2000 {
            // sum of uniforms → approximately gaussian
            let mut n = Complex::new(0.0, 0.0);
            for _ in 0..12 {
                n += Complex::new(uniform(&mut rng), uniform(&mut rng));
            }
            // each uniform has variance 1/3; twelve of them → 4
            window.push(Complex::new(amp, 0.0) + n * (sigma / 2.0));
        }

        let cn0 = cn0_snv_db_hz(&window, 4.0e6, 16000);
        let expect = 10.0 * (amp * amp / (2.0 * sigma * sigma)).log10()
            + 10.0 * (2.0e6f64).log10()
            - 10.0 * (16000.0f64).log10();
        assert_approx_eq!(expect, cn0, 0.5);
    }

    #[test]
    fn test_detector_counts() {
        let mut det = LockDetector::new(4, 25.0, 0.85);
        let good = Complex::new(1000.0, 1.0);
        let bad = Complex::new(0.0, 1000.0);

        assert!(det.input(good, 4.0e6, 16000).is_none());
        assert!(det.input(good, 4.0e6, 16000).is_none());
        assert!(det.input(good, 4.0e6, 16000).is_none());
        assert_eq!(3, det.window_fill());
        let est = det.input(good, 4.0e6, 16000).expect("full window");
        assert_eq!(LockTest::Pass, est.test);
        assert_eq!(0, det.window_fill());
        assert_eq!(1, det.success_count());

        for _ in 0..8 {
            det.input(bad, 4.0e6, 16000);
        }
        assert_eq!(0, det.success_count());
        assert_eq!(2, det.fail_count());

        // a pass decays the fail count by one
        for _ in 0..4 {
            det.input(good, 4.0e6, 16000);
        }
        assert_eq!(1, det.success_count());
        assert_eq!(1, det.fail_count());

        det.reset();
        assert_eq!(0, det.fail_count());
        assert_eq!(0, det.success_count());
    }

    #[test]
    fn test_error_mean() {
        let mut em = ErrorMean::new();
        assert_eq!(0.0, em.mean());
        em.input(0.5);
        em.input(-0.25);
        em.input(0.0);
        assert_approx_eq!(0.25, em.take());
        assert_eq!(0.0, em.mean());
    }
}
