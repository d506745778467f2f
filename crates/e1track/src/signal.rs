//! Galileo E1 signal definitions
//!
//! The E1 band carries two components which this crate cares
//! about:
//!
//! * **E1-B/C**, the Open Service. Its 4092-chip primary code is
//!   published, and it is modulated onto a BOC(1,1) subcarrier.
//!   This is the *primary* signal, tracked with full knowledge
//!   of the spreading code.
//!
//! * **E1-A**, the Public Regulated Service. Its code is not
//!   available to us. It rides a BOC(15,2.5) subcarrier in
//!   phase quadrature with E1-B/C. This is the *secondary*
//!   signal, which is tracked codelessly.
//!
//! The reference code itself comes from outside the crate. Use
//! [`PrimaryCode`] to load it from chips or from the hexadecimal
//! form printed in the signal ICD.

use std::fmt;
use std::str::FromStr;

use strum::EnumMessage;
use thiserror::Error;

/// E1 carrier frequency (Hz)
pub const E1_CARRIER_FREQ_HZ: f64 = 1.57542e9;

/// E1-B/C chip rate (chips per second)
pub const E1B_CHIP_RATE_HZ: f64 = 1.023e6;

/// E1-B/C primary code length (chips)
pub const E1B_CODE_LENGTH_CHIPS: usize = 4092;

/// E1-B/C primary code period (seconds)
pub const E1B_CODE_PERIOD_S: f64 = 0.004;

/// E1-B/C BOC(1,1) subcarrier rate (Hz)
pub const E1B_SUBCARRIER_RATE_HZ: f64 = 1.023e6;

/// E1-A chip rate (chips per second)
pub const E1A_CHIP_RATE_HZ: f64 = 2.5575e6;

/// E1-A BOC(15,2.5) subcarrier rate (Hz)
pub const E1A_SUBCARRIER_RATE_HZ: f64 = 15.345e6;

/// Subcarrier cycles per E1-B/C chip
pub const E1B_CHIPS_TO_CYCLES: f64 = E1B_SUBCARRIER_RATE_HZ / E1B_CHIP_RATE_HZ;

/// Subcarrier cycles per E1-A chip
pub const E1A_CHIPS_TO_CYCLES: f64 = E1A_SUBCARRIER_RATE_HZ / E1A_CHIP_RATE_HZ;

/// Number of ICD hex digits in one E1-B/C primary code
const E1B_CODE_HEX_DIGITS: usize = E1B_CODE_LENGTH_CHIPS / 4;

/// Open Service signal component
///
/// Signal identifiers use the short form found in receiver
/// configuration files, like "`1B`."
///
/// ```
/// use e1track::SignalId;
///
/// let sig = SignalId::from_str_or_default("1C");
/// assert_eq!(SignalId::E1C, sig);
/// assert_eq!("1C", sig.as_ref());
/// assert_eq!("E1-C (pilot)", &format!("{}", sig));
/// ```
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::EnumMessage, strum_macros::EnumString,
)]
pub enum SignalId {
    /// Data channel
    #[strum(serialize = "1B", detailed_message = "E1-B (data)")]
    E1B,

    /// Pilot channel
    #[strum(serialize = "1C", detailed_message = "E1-C (pilot)")]
    E1C,
}

impl SignalId {
    /// Human-readable string representation
    pub fn as_display_str(&self) -> &'static str {
        self.get_detailed_message().unwrap_or("E1")
    }

    /// Short string representation, like "`1B`"
    pub fn as_str(&self) -> &'static str {
        self.get_serializations()[0]
    }

    /// Parse a signal identifier, defaulting to E1-B
    ///
    /// Unrecognized identifiers are treated as the data channel.
    /// Use [`FromStr`] to reject them instead.
    pub fn from_str_or_default(s: &str) -> SignalId {
        SignalId::from_str(s).unwrap_or(SignalId::E1B)
    }
}

impl AsRef<str> for SignalId {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_display_str().fmt(f)
    }
}

/// Acquisition handoff
///
/// The acquisition stage hands each channel a coarse estimate
/// of the signal's Doppler and code delay. The estimate is
/// referenced to the input sample counter at `sample_stamp`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncHandle {
    /// Coarse carrier Doppler (Hz)
    pub doppler_hz: f64,

    /// Coarse code delay (samples)
    ///
    /// Number of samples from `sample_stamp` until the start
    /// of the next primary code period.
    pub code_delay_samples: f64,

    /// Input sample counter when acquisition was performed
    pub sample_stamp: u64,

    /// Signal component
    pub signal: SignalId,

    /// Satellite PRN
    pub prn: u8,
}

impl SyncHandle {
    /// New handoff for `prn` on `signal`
    pub fn new(signal: SignalId, prn: u8, doppler_hz: f64, code_delay_samples: f64) -> Self {
        Self {
            doppler_hz,
            code_delay_samples,
            sample_stamp: 0,
            signal,
            prn,
        }
    }

    /// Set the acquisition sample stamp
    pub fn with_sample_stamp(mut self, stamp: u64) -> Self {
        self.sample_stamp = stamp;
        self
    }
}

impl fmt::Display for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "E{:02} {}: doppler {:.1} Hz, delay {:.1} samples @ {}",
            self.prn,
            self.signal.as_str(),
            self.doppler_hz,
            self.code_delay_samples,
            self.sample_stamp
        )
    }
}

/// Error loading a primary code
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CodeError {
    /// The code is the wrong length
    #[error("primary code must have {expected} chips, found {found}")]
    WrongLength { expected: usize, found: usize },

    /// A chip value was not ±1
    #[error("primary code chip {0} is not +1 or -1")]
    InvalidChip(usize),

    /// The ICD representation contained a non-hex character
    #[error("primary code contains non-hexadecimal character {0:?}")]
    InvalidHexDigit(char),
}

/// How the local replica carries the subcarrier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplicaMode {
    /// Code and BOC(1,1) subcarrier share one table
    ///
    /// The replica table holds two slots per chip. The
    /// subcarrier phase is slaved to the code phase.
    Combined,

    /// Code and subcarrier are resampled separately
    ///
    /// The replica table holds one slot per chip, and a
    /// sine-phased square subcarrier is resampled from the
    /// subcarrier phase estimate.
    Independent,
}

impl ReplicaMode {
    /// Replica table slots per code chip
    pub fn slots_per_chip(&self) -> usize {
        match self {
            ReplicaMode::Combined => 2,
            ReplicaMode::Independent => 1,
        }
    }
}

/// E1-B/C primary spreading code
///
/// Holds one period of the primary code as ±1 chips.
///
/// ```
/// use e1track::PrimaryCode;
///
/// // all zero bits → all +1 chips
/// let hex = "0".repeat(1023);
/// let code = PrimaryCode::from_hex(&hex).unwrap();
/// assert_eq!(code.chips().len(), 4092);
/// assert!(code.chips().iter().all(|&c| c == 1));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimaryCode {
    chips: Vec<i8>,
}

impl PrimaryCode {
    /// Load from ±1 chip values
    pub fn from_chips(chips: &[i8]) -> Result<Self, CodeError> {
        if chips.len() != E1B_CODE_LENGTH_CHIPS {
            return Err(CodeError::WrongLength {
                expected: E1B_CODE_LENGTH_CHIPS,
                found: chips.len(),
            });
        }

        if let Some(bad) = chips.iter().position(|&c| c != 1 && c != -1) {
            return Err(CodeError::InvalidChip(bad));
        }

        Ok(Self {
            chips: chips.to_vec(),
        })
    }

    /// Load from the ICD hexadecimal representation
    ///
    /// The ICD prints each code as 1023 hex digits, most
    /// significant bit first. A logic `0` is a `+1` chip and
    /// a logic `1` is a `-1` chip. Whitespace is ignored.
    pub fn from_hex(hex: &str) -> Result<Self, CodeError> {
        let mut chips = Vec::with_capacity(E1B_CODE_LENGTH_CHIPS);
        let mut digits = 0usize;
        for c in hex.chars().filter(|c| !c.is_whitespace()) {
            let nibble = c.to_digit(16).ok_or(CodeError::InvalidHexDigit(c))?;
            for bit in (0..4).rev() {
                chips.push(if (nibble >> bit) & 1 == 0 { 1 } else { -1 });
            }
            digits += 1;
        }

        if digits != E1B_CODE_HEX_DIGITS {
            return Err(CodeError::WrongLength {
                expected: E1B_CODE_LENGTH_CHIPS,
                found: chips.len(),
            });
        }

        Ok(Self { chips })
    }

    /// Chip values, ±1
    pub fn chips(&self) -> &[i8] {
        &self.chips
    }

    /// Build the local replica table
    ///
    /// In [`ReplicaMode::Combined`], each chip `c` becomes the
    /// two slots `[c, -c]`: one sine-phased BOC(1,1) subcarrier
    /// cycle per chip. In [`ReplicaMode::Independent`], each chip
    /// is one slot.
    pub fn replica_table(&self, mode: ReplicaMode) -> Vec<f32> {
        match mode {
            ReplicaMode::Combined => self
                .chips
                .iter()
                .flat_map(|&c| [c as f32, -(c as f32)])
                .collect(),
            ReplicaMode::Independent => self.chips.iter().map(|&c| c as f32).collect(),
        }
    }
}

/// Samples in one nominal primary code period
pub fn nominal_epoch_samples(sample_rate: f64) -> usize {
    (E1B_CODE_PERIOD_S * sample_rate).round().max(1.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_id() {
        assert_eq!(SignalId::E1B, SignalId::from_str_or_default("1B"));
        assert_eq!(SignalId::E1C, SignalId::from_str_or_default("1C"));
        assert_eq!(SignalId::E1B, SignalId::from_str_or_default("garbage"));
        assert_eq!(Ok(SignalId::E1C), "1C".parse::<SignalId>());
        assert!("garbage".parse::<SignalId>().is_err());
        assert_eq!(Ok(SignalId::E1C), SignalId::try_from("1C"));
        assert_eq!("1B", SignalId::E1B.as_ref());
        assert_eq!("E1-B (data)", format!("{}", SignalId::E1B));
    }

    #[test]
    fn test_rate_ratios() {
        assert_eq!(E1B_CHIPS_TO_CYCLES, 1.0);
        assert_eq!(E1A_CHIPS_TO_CYCLES, 6.0);
        assert_eq!(
            E1B_CODE_LENGTH_CHIPS as f64 / E1B_CHIP_RATE_HZ,
            E1B_CODE_PERIOD_S
        );
    }

    #[test]
    fn test_code_from_hex() {
        let mut hex = "F".to_string();
        hex.push_str(&"0".repeat(1021));
        hex.push('8');
        let code = PrimaryCode::from_hex(&hex).expect("valid code");
        assert_eq!(&[-1, -1, -1, -1, 1, 1], &code.chips()[0..6]);
        assert_eq!(&[-1, 1, 1, 1], &code.chips()[4088..]);

        // whitespace is fine
        let spaced = format!("{}\n{}", &hex[0..500], &hex[500..]);
        assert_eq!(code, PrimaryCode::from_hex(&spaced).expect("valid code"));

        assert_eq!(
            Err(CodeError::InvalidHexDigit('x')),
            PrimaryCode::from_hex(&"x".repeat(1023))
        );
        assert_eq!(
            Err(CodeError::WrongLength {
                expected: 4092,
                found: 8
            }),
            PrimaryCode::from_hex("00")
        );
    }

    #[test]
    fn test_code_from_chips() {
        let mut chips = vec![1i8; E1B_CODE_LENGTH_CHIPS];
        assert!(PrimaryCode::from_chips(&chips).is_ok());
        chips[7] = 0;
        assert_eq!(
            Err(CodeError::InvalidChip(7)),
            PrimaryCode::from_chips(&chips)
        );
        assert!(matches!(
            PrimaryCode::from_chips(&chips[0..10]),
            Err(CodeError::WrongLength { .. })
        ));
    }

    #[test]
    fn test_replica_table() {
        let mut chips = vec![1i8; E1B_CODE_LENGTH_CHIPS];
        chips[1] = -1;
        let code = PrimaryCode::from_chips(&chips).expect("valid code");

        let combined = code.replica_table(ReplicaMode::Combined);
        assert_eq!(2 * E1B_CODE_LENGTH_CHIPS, combined.len());
        assert_eq!(&[1.0f32, -1.0, -1.0, 1.0], &combined[0..4]);

        let independent = code.replica_table(ReplicaMode::Independent);
        assert_eq!(E1B_CODE_LENGTH_CHIPS, independent.len());
        assert_eq!(&[1.0f32, -1.0, 1.0], &independent[0..3]);
    }

    #[test]
    fn test_nominal_epoch_samples() {
        assert_eq!(16000, nominal_epoch_samples(4.0e6));
        assert_eq!(16368, nominal_epoch_samples(4.092e6));
    }
}
