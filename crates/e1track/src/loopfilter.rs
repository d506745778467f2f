//! Tracking loop filter
//!
//! A discrete-time loop filter of order one, two, or three
//! which turns a discriminator error into a frequency
//! correction. The analog prototypes are the standard
//! PLL/DLL loop filters (Kaplan & Hegarty, *Understanding GPS/GNSS*,
//! table 5.6) with damping ζ = 1/√2. Integrators are
//! discretized with the bilinear transform.
//!
//! The filter is a direct-form difference equation
//!
//! ```txt
//! y[n] = Σ a[k]·x[n-k] + Σ b[k]·y[n-1-k]
//! ```
//!
//! whose coefficients depend on the noise bandwidth and the
//! update interval. The bandwidth may be changed between
//! calls to [`LoopFilter::apply()`]. The stored input and
//! output history is kept across bandwidth changes; call
//! [`LoopFilter::initialize()`] afterwards to start the new
//! response from a known output.

use arrayvec::ArrayVec;

/// Loop filter
#[derive(Clone, Debug, PartialEq)]
pub struct LoopFilter {
    // seconds between calls to apply()
    update_interval: f64,

    // noise bandwidth (Hz)
    noise_bandwidth: f64,

    // filter order, 1 ..= 3
    order: u8,

    // include the final output integrator
    last_integrator: bool,

    // feed-forward coefficients, newest input first
    input_coeffs: ArrayVec<f64, MAX_TAPS>,

    // feedback coefficients, newest output first
    output_coeffs: ArrayVec<f64, MAX_TAPS>,

    // input history, newest first
    inputs: [f64; MAX_TAPS],

    // output history, newest first
    outputs: [f64; MAX_TAPS],
}

impl LoopFilter {
    /// New loop filter
    ///
    /// The filter is called every `update_interval` seconds with
    /// a noise bandwidth of `noise_bandwidth` Hz. `order` is
    /// clamped to `1 ..= 3`.
    pub fn new(update_interval: f64, noise_bandwidth: f64, order: u8) -> Self {
        let mut out = Self {
            update_interval,
            noise_bandwidth,
            order: order.clamp(1, 3),
            last_integrator: false,
            input_coeffs: ArrayVec::new(),
            output_coeffs: ArrayVec::new(),
            inputs: [0.0f64; MAX_TAPS],
            outputs: [0.0f64; MAX_TAPS],
        };
        out.compute_coefficients();
        out
    }

    /// Include the final integrator
    ///
    /// The usual tracking loop lets the NCO act as the final
    /// integrator, so the filter output is a frequency. With the
    /// last integrator included, the output is a phase.
    pub fn with_last_integrator(mut self, include: bool) -> Self {
        self.last_integrator = include;
        self.compute_coefficients();
        self
    }

    /// Set the filter state
    ///
    /// Clears the input history and primes the output history
    /// with `value`, so the next output continues from `value`.
    pub fn initialize(&mut self, value: f64) {
        self.inputs = [0.0f64; MAX_TAPS];
        self.outputs = [value; MAX_TAPS];
    }

    /// Filter the next discriminator output
    pub fn apply(&mut self, error: f64) -> f64 {
        self.inputs.rotate_right(1);
        self.inputs[0] = error;

        let ff: f64 = self
            .input_coeffs
            .iter()
            .zip(self.inputs.iter())
            .map(|(a, x)| a * x)
            .sum();
        let fb: f64 = self
            .output_coeffs
            .iter()
            .zip(self.outputs.iter())
            .map(|(b, y)| b * y)
            .sum();
        let result = ff + fb;

        self.outputs.rotate_right(1);
        self.outputs[0] = result;
        result
    }

    /// Shift the output history
    ///
    /// Adds `delta` to every stored output, as if the filter had
    /// always produced outputs `delta` higher. Used to fold an
    /// external frequency correction into the filter state.
    pub fn slew(&mut self, delta: f64) {
        for y in self.outputs.iter_mut() {
            *y += delta;
        }
    }

    /// Change the noise bandwidth
    ///
    /// Takes effect on the next call to `apply()`.
    pub fn set_noise_bandwidth(&mut self, noise_bandwidth: f64) {
        self.noise_bandwidth = noise_bandwidth;
        self.compute_coefficients();
    }

    /// Noise bandwidth (Hz)
    pub fn noise_bandwidth(&self) -> f64 {
        self.noise_bandwidth
    }

    /// Filter order
    pub fn order(&self) -> u8 {
        self.order
    }

    /// Update interval (s)
    pub fn update_interval(&self) -> f64 {
        self.update_interval
    }

    /// Most recent output
    pub fn last_output(&self) -> f64 {
        self.outputs[0]
    }

    // recompute coefficients from bandwidth and order
    fn compute_coefficients(&mut self) {
        let t = self.update_interval;
        let bw = self.noise_bandwidth;

        self.input_coeffs.clear();
        self.output_coeffs.clear();

        match self.order {
            1 => {
                let wn = bw * 4.0;
                if self.last_integrator {
                    self.input_coeffs.push(t / 2.0 * wn);
                    self.input_coeffs.push(t / 2.0 * wn);
                    self.output_coeffs.push(1.0);
                } else {
                    self.input_coeffs.push(wn);
                }
            }
            2 => {
                let wn = bw * 8.0 * ZETA / (4.0 * ZETA * ZETA + 1.0);
                let g1 = wn * wn;
                let g2 = 2.0 * ZETA * wn;
                if self.last_integrator {
                    self.input_coeffs.push(t / 2.0 * g2 + t * t / 4.0 * g1);
                    self.input_coeffs.push(t * t / 2.0 * g1);
                    self.input_coeffs.push(t * t / 4.0 * g1 - t / 2.0 * g2);
                    self.output_coeffs.push(2.0);
                    self.output_coeffs.push(-1.0);
                } else {
                    self.input_coeffs.push(g1 * t / 2.0 + g2);
                    self.input_coeffs.push(g1 * t / 2.0 - g2);
                    self.output_coeffs.push(1.0);
                }
            }
            _ => {
                let wn = bw / 0.7845;
                let g1 = wn * wn * wn;
                let g2 = 1.1 * wn * wn;
                let g3 = 2.4 * wn;
                if self.last_integrator {
                    let t2 = t * t;
                    let t3 = t2 * t;
                    self.input_coeffs
                        .push(t / 2.0 * g3 + t2 / 4.0 * g2 + t3 / 8.0 * g1);
                    self.input_coeffs
                        .push(-t / 2.0 * g3 + t2 / 4.0 * g2 + 3.0 * t3 / 8.0 * g1);
                    self.input_coeffs
                        .push(-t / 2.0 * g3 - t2 / 4.0 * g2 + 3.0 * t3 / 8.0 * g1);
                    self.input_coeffs
                        .push(t / 2.0 * g3 - t2 / 4.0 * g2 + t3 / 8.0 * g1);
                    self.output_coeffs.push(3.0);
                    self.output_coeffs.push(-3.0);
                    self.output_coeffs.push(1.0);
                } else {
                    self.input_coeffs
                        .push(g3 + t / 2.0 * (g2 + t / 2.0 * g1));
                    self.input_coeffs.push(g1 * t * t / 2.0 - 2.0 * g3);
                    self.input_coeffs
                        .push(g3 + t / 2.0 * (-g2 + t / 2.0 * g1));
                    self.output_coeffs.push(2.0);
                    self.output_coeffs.push(-1.0);
                }
            }
        }
    }
}

const ZETA: f64 = std::f64::consts::FRAC_1_SQRT_2;
const MAX_TAPS: usize = 4;
