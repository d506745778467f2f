//! Diagnostic dump files
//!
//! When enabled, each tracking channel appends one
//! [`DumpRecord`] per epoch to its own file. A record is two
//! [`DumpBlock`]s, primary then secondary, with the same
//! layout. All fields are little-endian.
//!
//! | offset | type     | field                              |
//! |-------:|----------|------------------------------------|
//! |      0 | 5 × f32  | VE, E, P, L, VL magnitudes         |
//! |     20 | 2 × f32  | prompt I, Q                        |
//! |     28 | u64      | sample counter                     |
//! |     36 | f32      | accumulated carrier phase (rad)    |
//! |     40 | 2 × f64  | Doppler (Hz), code frequency (Hz)  |
//! |     56 | 2 × f64  | carrier error, raw and filtered    |
//! |     72 | 2 × f64  | subcarrier error, raw and filtered |
//! |     88 | 2 × f64  | CN0 (dB-Hz), carrier lock statistic|
//! |    104 | 2 × f64  | code phase, subcarrier phase       |
//! |    120 | 2 × f64  | VE–VL error, raw and filtered      |
//!
//! Dump files are diagnostic only. I/O errors are logged, the
//! dump is abandoned, and tracking carries on.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

#[cfg(not(test))]
use log::{info, warn};

#[cfg(test)]
use std::{println as info, println as warn};

/// One loop's worth of diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DumpBlock {
    /// Correlator magnitudes `[VE, E, P, L, VL]`
    pub magnitudes: [f32; 5],
    pub prompt_i: f32,
    pub prompt_q: f32,
    pub sample_counter: u64,
    pub carrier_phase_rad: f32,
    pub doppler_hz: f64,
    pub code_freq_hz: f64,
    pub carrier_error: f64,
    pub carrier_error_filt: f64,
    pub subcarrier_error: f64,
    pub subcarrier_error_filt: f64,
    pub cn0_db_hz: f64,
    pub lock_statistic: f64,
    pub code_phase: f64,
    pub subcarrier_phase: f64,
    pub code_error: f64,
    pub code_error_filt: f64,
}

impl DumpBlock {
    /// Serialized size (bytes)
    pub const SIZE: usize = 136;

    /// Serialize
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for m in self.magnitudes.iter() {
            w.write_f32::<LittleEndian>(*m)?;
        }
        w.write_f32::<LittleEndian>(self.prompt_i)?;
        w.write_f32::<LittleEndian>(self.prompt_q)?;
        w.write_u64::<LittleEndian>(self.sample_counter)?;
        w.write_f32::<LittleEndian>(self.carrier_phase_rad)?;
        for v in [
            self.doppler_hz,
            self.code_freq_hz,
            self.carrier_error,
            self.carrier_error_filt,
            self.subcarrier_error,
            self.subcarrier_error_filt,
            self.cn0_db_hz,
            self.lock_statistic,
            self.code_phase,
            self.subcarrier_phase,
            self.code_error,
            self.code_error_filt,
        ] {
            w.write_f64::<LittleEndian>(v)?;
        }
        Ok(())
    }

    /// Deserialize
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magnitudes = [0.0f32; 5];
        for m in magnitudes.iter_mut() {
            *m = r.read_f32::<LittleEndian>()?;
        }
        Ok(Self {
            magnitudes,
            prompt_i: r.read_f32::<LittleEndian>()?,
            prompt_q: r.read_f32::<LittleEndian>()?,
            sample_counter: r.read_u64::<LittleEndian>()?,
            carrier_phase_rad: r.read_f32::<LittleEndian>()?,
            doppler_hz: r.read_f64::<LittleEndian>()?,
            code_freq_hz: r.read_f64::<LittleEndian>()?,
            carrier_error: r.read_f64::<LittleEndian>()?,
            carrier_error_filt: r.read_f64::<LittleEndian>()?,
            subcarrier_error: r.read_f64::<LittleEndian>()?,
            subcarrier_error_filt: r.read_f64::<LittleEndian>()?,
            cn0_db_hz: r.read_f64::<LittleEndian>()?,
            lock_statistic: r.read_f64::<LittleEndian>()?,
            code_phase: r.read_f64::<LittleEndian>()?,
            subcarrier_phase: r.read_f64::<LittleEndian>()?,
            code_error: r.read_f64::<LittleEndian>()?,
            code_error_filt: r.read_f64::<LittleEndian>()?,
        })
    }
}

/// Primary and secondary diagnostics for one epoch
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DumpRecord {
    pub primary: DumpBlock,
    pub secondary: DumpBlock,
}

impl DumpRecord {
    /// Serialized size (bytes)
    pub const SIZE: usize = 2 * DumpBlock::SIZE;

    /// Serialize
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.primary.write_to(w)?;
        self.secondary.write_to(w)
    }

    /// Deserialize
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            primary: DumpBlock::read_from(r)?,
            secondary: DumpBlock::read_from(r)?,
        })
    }
}

/// Dump file name for `channel`
pub fn dump_path(prefix: &str, channel: u32) -> PathBuf {
    PathBuf::from(format!("{}{}.dat", prefix, channel))
}

/// Append-only dump file
#[derive(Debug)]
pub struct DumpWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
}

impl DumpWriter {
    /// Create or truncate the dump file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        info!("dump: writing tracking diagnostics to {}", path.display());
        Ok(Self {
            path,
            out: Some(BufWriter::new(file)),
        })
    }

    /// Append a record
    ///
    /// On error, logs a warning and closes the dump. Later
    /// writes are ignored.
    pub fn write(&mut self, rec: &DumpRecord) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        if let Err(e) = rec.write_to(out) {
            warn!(
                "dump: unable to write {}: {}; dump disabled",
                self.path.display(),
                e
            );
            self.out = None;
        }
    }

    /// Flush buffered records
    pub fn flush(&mut self) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        if let Err(e) = out.flush() {
            warn!(
                "dump: unable to flush {}: {}; dump disabled",
                self.path.display(),
                e
            );
            self.out = None;
        }
    }

    /// True if records are still being written
    pub fn is_active(&self) -> bool {
        self.out.is_some()
    }

    /// Dump file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DumpWriter {
    fn drop(&mut self) {
        self.flush();
    }
}
