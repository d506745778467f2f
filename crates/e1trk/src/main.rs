use std::io;

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{info, LevelFilter};

use e1track::{
    dump_path, PrimaryCode, SecondaryLoopBuilder, SignalId, SyncHandle, TrackingBuilder,
};

mod app;
mod cli;

use cli::{Args, CliError, Failure};

fn main() {
    match e1trk() {
        Ok(()) => {}
        Err(cli_error) => cli_error.exit(),
    }
}

fn e1trk() -> Result<(), CliError> {
    // Parse options and start logging
    let args = Args::try_parse()?;
    log_setup(&args);

    check_config(&args).map_err(CliError::config)?;
    let code = load_code(&args.code).map_err(CliError::input)?;
    if let Some(prefix) = &args.dump {
        check_dump(prefix, args.channel).map_err(CliError::dump)?;
    }

    // create the tracking channel
    let mut builder = TrackingBuilder::new(args.rate);
    let (_, bump_jump_threshold) = builder.bump_jumping();
    builder
        .with_intermediate_freq(args.intermediate_freq)
        .with_pll_bandwidth(args.pll_bw_unlocked, args.pll_bw_locked)
        .with_dll_bandwidth(args.dll_bw_unlocked, args.dll_bw_locked)
        .with_bump_jumping(!args.subcarrier_aiding, bump_jump_threshold);
    if let Some(prefix) = &args.dump {
        builder.with_dump(prefix);
    }
    if args.no_secondary {
        builder.without_secondary_loop();
    } else {
        builder.with_secondary_loop(
            SecondaryLoopBuilder::new()
                .with_accumulation_length(args.accumulation)
                .with_close_loops(args.close_secondary),
        );
    }

    let mut channel = builder.build();
    channel.set_channel(args.channel);

    let signal = if args.pilot {
        SignalId::E1C
    } else {
        SignalId::E1B
    };
    let sync =
        SyncHandle::new(signal, args.prn, args.doppler, args.delay).with_sample_stamp(args.stamp);
    channel.start_tracking(&sync, &code);

    // file setup: locks stdin in case we need it
    let stdin = io::stdin();
    let stdin_handle = stdin.lock();
    let mut inbuf = file_setup(&args, stdin_handle).map_err(CliError::input)?;

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let summary = app::run(
        &mut channel,
        &mut inbuf,
        app::Output {
            quiet: args.quiet,
            csv: !args.pretty,
        },
        &mut out,
    )
    .context("tracking failed")
    .map_err(|e| CliError::new(e, Failure::Tracking))?;

    info!(
        "processed {} epochs ({} samples); {} reacquisition requests",
        summary.epochs, summary.samples, summary.reacquisitions
    );

    Ok(())
}

fn log_setup(args: &Args) {
    if args.quiet {
        // no logging
        return;
    } else if std::env::var_os("RUST_LOG").is_none() {
        let (driver, library) = log_levels(args.verbose);
        pretty_env_logger::formatted_builder()
            .filter_module("e1trk", driver)
            .filter_module("e1track", library)
            .init();
    } else {
        pretty_env_logger::init();
    }
}

// (driver, library) levels for each -v
//
// The library logs every epoch at trace, so it lags the
// driver by one step.
fn log_levels(verbose: u8) -> (LevelFilter, LevelFilter) {
    match verbose {
        0 => (LevelFilter::Warn, LevelFilter::Warn),
        1 => (LevelFilter::Info, LevelFilter::Warn),
        2 => (LevelFilter::Info, LevelFilter::Info),
        3 => (LevelFilter::Debug, LevelFilter::Debug),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    }
}

/// Galileo satellites are numbered 1 to 50
const MAX_PRN: u8 = 50;

fn check_config(args: &Args) -> Result<(), anyhow::Error> {
    if !(args.rate.is_finite() && args.rate > 0.0) {
        return Err(anyhow!("--rate must be a positive sampling rate, not {}", args.rate));
    }
    if !(1..=MAX_PRN).contains(&args.prn) {
        return Err(anyhow!("--prn must be between 1 and {}, not {}", MAX_PRN, args.prn));
    }
    if !args.doppler.is_finite() {
        return Err(anyhow!("--doppler must be finite"));
    }
    if !(args.delay.is_finite() && args.delay >= 0.0) {
        return Err(anyhow!("--delay must be a non-negative sample count, not {}", args.delay));
    }
    let bandwidths = [
        ("--pll-bw-unlocked", args.pll_bw_unlocked),
        ("--pll-bw-locked", args.pll_bw_locked),
        ("--dll-bw-unlocked", args.dll_bw_unlocked),
        ("--dll-bw-locked", args.dll_bw_locked),
    ];
    for (name, bw) in bandwidths {
        if !(bw.is_finite() && bw > 0.0) {
            return Err(anyhow!("{} must be a positive bandwidth, not {}", name, bw));
        }
    }
    Ok(())
}

// the channel only warns if its dump cannot be created, so
// fail before tracking starts instead
fn check_dump(prefix: &str, channel: u32) -> Result<(), anyhow::Error> {
    let path = dump_path(prefix, channel);
    std::fs::File::create(&path)
        .with_context(|| format!("Unable to create --dump file \"{}\"", path.display()))?;
    Ok(())
}

fn load_code(path: &str) -> Result<PrimaryCode, anyhow::Error> {
    let hex = std::fs::read_to_string(path)
        .with_context(|| format!("Unable to open --code \"{}\"", path))?;
    PrimaryCode::from_hex(&hex).with_context(|| format!("Invalid primary code in \"{}\"", path))
}

fn file_setup<'stdin>(
    args: &Args,
    stdin: std::io::StdinLock<'stdin>,
) -> Result<Box<dyn io::BufRead + 'stdin>, anyhow::Error> {
    if args.input_is_stdin() {
        info!("E1 tracker reading standard input");
        if !is_terminal(&std::io::stdin()) {
            Ok(Box::new(io::BufReader::new(stdin)))
        } else {
            Err(anyhow!(
                "cowardly refusing to read IQ samples from a terminal.

Pipe a source of raw interleaved f32 I/Q samples from a
front-end, rtl_sdr, or similar into this program."
            ))
        }
    } else {
        info!("E1 tracker reading file: \"{}\"", &args.file);
        Ok(Box::new(io::BufReader::new(
            std::fs::File::open(&args.file)
                .with_context(|| format!("Unable to open --file \"{}\"", args.file))?,
        )))
    }
}

#[cfg(not(target_os = "windows"))]
fn is_terminal<S>(stream: &S) -> bool
where
    S: std::os::fd::AsRawFd,
{
    terminal_size::terminal_size_using_fd(stream.as_raw_fd()).is_some()
}

#[cfg(target_os = "windows")]
fn is_terminal<S>(stream: &S) -> bool
where
    S: std::os::windows::io::AsRawHandle,
{
    terminal_size::terminal_size_using_handle(stream.as_raw_handle()).is_some()
}
