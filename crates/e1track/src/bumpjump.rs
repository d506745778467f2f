//! Bump-jump false peak correction
//!
//! The autocorrelation of a BOC-modulated signal has side
//! peaks half a subcarrier cycle away from the main peak. An
//! early–late loop is happy to settle on either one. The
//! bump-jumper watches the very-early and very-late correlators,
//! which sit on the expected side peaks. If one of them stays
//! stronger than both the prompt and its opposite, the loop is
//! tracking a side peak, and the local replica is moved half a
//! subcarrier cycle toward the stronger arm.

use std::fmt;

/// Direction of a bump jump
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JumpDirection {
    /// Very-early arm is strongest: advance the replica
    Early,

    /// Very-late arm is strongest: retard the replica
    Late,
}

impl JumpDirection {
    /// Sign of the phase correction: `+1.0` for early, `-1.0` for late
    pub fn sign(&self) -> f64 {
        match self {
            JumpDirection::Early => 1.0,
            JumpDirection::Late => -1.0,
        }
    }
}

impl AsRef<str> for JumpDirection {
    fn as_ref(&self) -> &'static str {
        match self {
            JumpDirection::Early => "early",
            JumpDirection::Late => "late",
        }
    }
}

impl fmt::Display for JumpDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(f)
    }
}

/// Bump-jump detector
///
/// Keeps a streak counter for each outer arm. Each update in
/// which an outer arm beats both the prompt and the opposite
/// arm increments that arm's counter and decays the other.
/// When a counter reaches the threshold, a jump is reported
/// and both counters are cleared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BumpJumper {
    threshold: u32,
    ve_count: u32,
    vl_count: u32,
}

impl BumpJumper {
    /// New detector which jumps after `threshold` updates
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            ve_count: 0,
            vl_count: 0,
        }
    }

    /// Update with correlator magnitudes
    ///
    /// Accepts the very-early, prompt, and very-late magnitudes.
    /// Returns the direction to jump, if a jump is due.
    pub fn update(&mut self, ve: f64, p: f64, vl: f64) -> Option<JumpDirection> {
        let mut jump = None;

        if ve > p && ve > vl {
            self.ve_count += 1;
            self.vl_count = self.vl_count.saturating_sub(1);
            if self.ve_count >= self.threshold {
                jump = Some(JumpDirection::Early);
            }
        }

        if vl > p && vl > ve {
            self.vl_count += 1;
            self.ve_count = self.ve_count.saturating_sub(1);
            if self.vl_count >= self.threshold {
                jump = Some(JumpDirection::Late);
            }
        }

        if jump.is_some() {
            self.reset();
        }
        jump
    }

    /// Clear both streak counters
    pub fn reset(&mut self) {
        self.ve_count = 0;
        self.vl_count = 0;
    }

    /// Streak counters `(very early, very late)`
    pub fn counts(&self) -> (u32, u32) {
        (self.ve_count, self.vl_count)
    }

    /// Jump threshold
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
