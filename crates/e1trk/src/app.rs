//! Sample pump and record output
//!
//! Input samples are read into a buffer until it holds at
//! least as many samples as the channel requires. Each epoch
//! drains the samples it consumed from the front of the
//! buffer.
//!
//! ```txt
//!   input --read--> [ buffer ] --process--> record --> output
//!                      /\                     ||
//!                      ||=== consumed ========||
//! ```
//!
//! When the input is exhausted, any partial epoch remaining
//! in the buffer is discarded.

use std::io::{self, Read, Write};

use byteorder::{NativeEndian, ReadBytesExt};
use log::{info, warn};
use num_complex::Complex;

use e1track::{ChannelEvent, Resampler, TrackingChannel, TrackingRecord};

/// Output options
#[derive(Clone, Copy, Debug, Default)]
pub struct Output {
    pub quiet: bool,
    pub csv: bool,
}

/// Totals from a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub epochs: u64,
    pub samples: u64,
    pub reacquisitions: u64,
}

/// Run the application
///
/// Feeds `channel` with complex samples from `input`, which
/// must contain interleaved native-endian `f32` I/Q pairs,
/// until it is exhausted. Records are written to `out`.
pub fn run<R, I, W>(
    channel: &mut TrackingChannel<R>,
    input: &mut I,
    output: Output,
    out: &mut W,
) -> io::Result<Summary>
where
    R: Resampler,
    I: Read,
    W: Write,
{
    let mut summary = Summary::default();
    let mut buffer: Vec<Complex<f32>> = Vec::with_capacity(2 * channel.required_samples());

    if output.csv && !output.quiet {
        writeln!(out, "{}", CSV_HEADER)?;
    }

    loop {
        let need = channel.required_samples();
        if !fill(input, &mut buffer, need)? {
            break;
        }

        let epoch = match channel.process(&buffer) {
            Ok(epoch) => epoch,
            Err(e) => {
                warn!("{}", e);
                break;
            }
        };
        buffer.drain(0..epoch.consumed);
        summary.epochs += 1;
        summary.samples += epoch.consumed as u64;

        for evt in epoch.events.iter() {
            info!("ch{} E{:02}: {}", epoch.record.channel, epoch.record.prn, evt);
            if *evt == ChannelEvent::ReacquisitionRequested {
                summary.reacquisitions += 1;
            }
        }

        if !output.quiet {
            if output.csv {
                writeln!(out, "{}", csv_row(&epoch.record))?;
            } else {
                writeln!(out, "{}", epoch.record)?;
            }
        }
    }

    if !buffer.is_empty() {
        info!("discarding {} samples of partial epoch", buffer.len());
    }

    out.flush()?;
    Ok(summary)
}

// top up the buffer to `need` samples; false on end of input
fn fill<I: Read>(input: &mut I, buffer: &mut Vec<Complex<f32>>, need: usize) -> io::Result<bool> {
    while buffer.len() < need {
        let re = match input.read_f32::<NativeEndian>() {
            Ok(re) => re,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        };
        let im = match input.read_f32::<NativeEndian>() {
            Ok(im) => im,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        };
        buffer.push(Complex::new(re, im));
    }
    Ok(true)
}

const CSV_HEADER: &str =
    "channel,prn,signal,timestamp_s,prompt_i,prompt_q,carrier_phase_rad,doppler_hz,cn0_db_hz,valid";

fn csv_row(rec: &TrackingRecord) -> String {
    format!(
        "{},{},{},{:.9},{:.3},{:.3},{:.6},{:.4},{:.2},{}",
        rec.channel,
        rec.prn,
        rec.signal.as_str(),
        rec.timestamp_s,
        rec.prompt_i,
        rec.prompt_q,
        rec.carrier_phase_rad,
        rec.carrier_doppler_hz,
        rec.cn0_db_hz,
        rec.valid_tracking as u8
    )
}
