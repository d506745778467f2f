use std::fmt::Display;

use clap::{error::ErrorKind, CommandFactory, Parser};

/// Standard input filename
const STDIN_FILE: &str = "-";

const USAGE_SHORT: &str = r#"
This program accepts raw complex baseband samples, as interleaved native-endian f32 I/Q pairs, at the given sampling --rate. It tracks one Galileo E1 satellite from the given acquisition --doppler and --delay and prints one CSV tracking record per 4 ms code epoch.

See --help for more details.
"#;

const USAGE_LONG: &str = r#"
This program accepts raw complex baseband samples, as interleaved native-endian f32 I/Q pairs, at the given sampling --rate. It tracks one Galileo E1 satellite from the given acquisition --doppler and --delay and prints one CSV tracking record per 4 ms code epoch.

The primary spreading code for the satellite must be supplied as a text file containing the 1023 hexadecimal digits printed in the Galileo OS SIS ICD:

    e1trk --rate 4000000 --prn 11 --code e1b_prn11.hex \
        --doppler 1250 --delay 3127 --file capture.cf32

Records are printed as comma-separated values, with a header:

    channel,prn,signal,timestamp_s,prompt_i,prompt_q,carrier_phase_rad,doppler_hz,cn0_db_hz,valid

Use --pretty for a human-readable format instead. Events, such as lock changes and bump jumps, are logged. Use -v to see them.

With --dump PREFIX, binary diagnostics for every epoch are written to PREFIX<channel>.dat.
"#;

const ADVANCED: &str = "Advanced Loop Options";

/// Top-level program arguments
#[derive(Parser, Clone, Debug)]
#[command(version)]
#[command(about, long_about = None)]
#[command(after_help = USAGE_SHORT, after_long_help = USAGE_LONG)]
#[command(max_term_width = 100)]
pub struct Args {
    /// Verbosity level (-vvv for more)
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print NOTHING, not even tracking records
    #[arg(short, long)]
    pub quiet: bool,

    /// Sampling rate (Hz)
    #[arg(short, long, default_value_t = 4.0e6)]
    pub rate: f64,

    /// Input file (or "-" for stdin)
    ///
    /// The input must be interleaved I/Q pairs of
    /// native-endian 32-bit floats at --rate.
    #[arg(long, default_value_t = STDIN_FILE.to_string())]
    pub file: String,

    /// Primary code file (ICD hexadecimal)
    #[arg(long)]
    pub code: String,

    /// Satellite PRN
    #[arg(long, default_value_t = 1)]
    pub prn: u8,

    /// Track the E1-C pilot instead of E1-B data
    #[arg(long)]
    pub pilot: bool,

    /// Acquisition Doppler (Hz)
    #[arg(long, allow_negative_numbers = true)]
    pub doppler: f64,

    /// Acquisition code delay (samples after --stamp)
    #[arg(long)]
    pub delay: f64,

    /// Input sample at which acquisition was performed
    #[arg(long, default_value_t = 0)]
    pub stamp: u64,

    /// Channel number, for output and dump files
    #[arg(long, default_value_t = 0)]
    pub channel: u32,

    /// Print human-readable records instead of CSV
    #[arg(long)]
    pub pretty: bool,

    /// Write diagnostic dumps with this file prefix
    #[arg(long)]
    pub dump: Option<String>,

    /// Disable codeless E1-A tracking
    #[arg(long)]
    pub no_secondary: bool,

    /// Intermediate frequency (Hz)
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub intermediate_freq: f64,

    /// Carrier loop bandwidth, pull-in (Hz)
    #[arg(long, default_value_t = 15.0)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub pll_bw_unlocked: f64,

    /// Carrier loop bandwidth, locked (Hz)
    #[arg(long, default_value_t = 5.0)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub pll_bw_locked: f64,

    /// Subcarrier loop bandwidth, pull-in (Hz)
    #[arg(long, default_value_t = 2.0)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub dll_bw_unlocked: f64,

    /// Subcarrier loop bandwidth, locked (Hz)
    #[arg(long, default_value_t = 0.5)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub dll_bw_locked: f64,

    /// Track subcarrier and code separately instead of bump jumping
    #[arg(long)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub subcarrier_aiding: bool,

    /// E1-A coherent accumulation (epochs)
    #[arg(long, default_value_t = 10)]
    #[arg(value_parser = clap::value_parser!(u32).range(1..=250))]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub accumulation: u32,

    /// Close the E1-A tracking loops
    #[arg(long)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub close_secondary: bool,
}

impl Args {
    /// Return true if the user requests input from stdin
    pub fn input_is_stdin(&self) -> bool {
        self.file == STDIN_FILE
    }
}

/// What went wrong, for exit status and reporting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    /// Bad command line; reported by clap
    Usage,

    /// Unusable channel configuration
    Config,

    /// Unreadable --code or --file
    Input,

    /// Unwritable --dump
    Dump,

    /// I/O failure while tracking
    Tracking,
}

impl Failure {
    /// Process exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Failure::Usage => 2,
            Failure::Config => 3,
            Failure::Input => 4,
            Failure::Dump => 5,
            Failure::Tracking => 1,
        }
    }

    fn clap_kind(&self) -> ErrorKind {
        match self {
            Failure::Usage | Failure::Config => ErrorKind::ValueValidation,
            Failure::Input | Failure::Dump | Failure::Tracking => ErrorKind::Io,
        }
    }
}

/// A program-level error with exit code
#[derive(Debug)]
pub struct CliError {
    error: anyhow::Error,
    failure: Failure,
}

impl CliError {
    /// Create new error of the given kind
    pub fn new(error: anyhow::Error, failure: Failure) -> CliError {
        CliError { error, failure }
    }

    /// The channel cannot be configured as requested
    pub fn config(error: anyhow::Error) -> CliError {
        CliError::new(error, Failure::Config)
    }

    /// The code or sample input cannot be read
    pub fn input(error: anyhow::Error) -> CliError {
        CliError::new(error, Failure::Input)
    }

    /// The diagnostic dump cannot be written
    pub fn dump(error: anyhow::Error) -> CliError {
        CliError::new(error, Failure::Dump)
    }

    /// Kind of failure
    pub fn failure(&self) -> Failure {
        self.failure
    }

    /// Print this error to the terminal
    ///
    /// Errors from clap are printed verbatim.
    pub fn print(&self) -> std::io::Result<()> {
        if let Some(e) = self.error.downcast_ref::<clap::Error>() {
            e.print()
        } else {
            Args::command()
                .error(self.failure.clap_kind(), self.to_string())
                .print()
        }
    }

    /// Print this error to the terminal and exit
    pub fn exit(&self) -> ! {
        drop(self.print());
        std::process::exit(self.exit_code())
    }

    fn exit_code(&self) -> i32 {
        match self.error.downcast_ref::<clap::Error>() {
            // --help and --version
            Some(e) if !e.use_stderr() => 0,
            _ => self.failure.exit_code(),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl std::error::Error for CliError {}

impl From<clap::Error> for CliError {
    fn from(err: clap::Error) -> CliError {
        CliError::new(err.into(), Failure::Usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clap() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_required_args() {
        let args = Args::try_parse_from([
            "e1trk",
            "--code",
            "prn11.hex",
            "--doppler",
            "-1250.5",
            "--delay",
            "3127",
        ])
        .expect("valid arguments");
        assert!(args.input_is_stdin());
        assert_eq!(-1250.5, args.doppler);
        assert_eq!(4.0e6, args.rate);
        assert!(!args.no_secondary);
        assert!(!args.pretty);
        assert_eq!(0, args.stamp);

        assert!(Args::try_parse_from(["e1trk", "--doppler", "0"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let err: CliError = Args::try_parse_from(["e1trk", "--doppler", "0"])
            .expect_err("missing --code")
            .into();
        assert_eq!(Failure::Usage, err.failure());
        assert_eq!(2, err.exit_code());

        let err: CliError = Args::try_parse_from(["e1trk", "--help"])
            .expect_err("help exits early")
            .into();
        assert_eq!(0, err.exit_code());

        let err = CliError::dump(anyhow::anyhow!("read-only").context("Unable to create --dump"));
        assert_eq!(5, err.exit_code());
        assert_eq!("Unable to create --dump: read-only", err.to_string());

        assert_eq!(3, CliError::config(anyhow::anyhow!("bad rate")).exit_code());
        assert_eq!(4, CliError::input(anyhow::anyhow!("no file")).exit_code());
    }
}
