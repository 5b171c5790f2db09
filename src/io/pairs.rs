//! Binary proton-pair records.
//!
//! Each record holds 15 little-endian `f32`: entry position, exit position,
//! entry direction, exit direction, then entry energy, exit energy and time.
//! An entry energy of 0 means the exit energy field holds the WEPL (mm)
//! instead. Directions need not be normalised.
//!
//! Records with a trailing nuclear-interaction vector (18 values) are not
//! supported. A file of them is only rejected when its length is not a
//! multiple of the 15-value record; otherwise it is misread.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use binrw::{binrw, BinReaderExt, BinWriterExt};

use crate::error::{Error, Result};
use crate::pairs::{Measurement, ProtonPair};
use crate::types::{Point, Vector};

/// Size in bytes of one record
pub const RECORD_SIZE: usize = 15 * 4;

#[binrw]
#[brw(little)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PairRecord {
    pub entry: [f32; 3],
    pub exit: [f32; 3],
    pub entry_direction: [f32; 3],
    pub exit_direction: [f32; 3],
    pub entry_energy: f32,
    pub exit_energy: f32,
    pub time: f32,
}

impl From<PairRecord> for ProtonPair {
    fn from(r: PairRecord) -> Self {
        let point  = |[x, y, z]: [f32; 3]| Point ::new(x as f64, y as f64, z as f64);
        let vector = |[x, y, z]: [f32; 3]| Vector::new(x as f64, y as f64, z as f64);
        let measurement = if r.entry_energy == 0.0 {
            Measurement::Wepl(r.exit_energy as f64)
        } else {
            Measurement::Energies { entry: r.entry_energy as f64, exit: r.exit_energy as f64 }
        };
        ProtonPair {
            entry:           point (r.entry),
            exit:            point (r.exit),
            entry_direction: vector(r.entry_direction),
            exit_direction:  vector(r.exit_direction),
            measurement,
        }
    }
}

impl From<&ProtonPair> for PairRecord {
    fn from(p: &ProtonPair) -> Self {
        let f = |x: f64| x as f32;
        let triple = |a: f64, b: f64, c: f64| [f(a), f(b), f(c)];
        let (entry_energy, exit_energy) = match p.measurement {
            Measurement::Energies { entry, exit } => (f(entry), f(exit)),
            Measurement::Wepl(w) => (0.0, f(w)),
        };
        PairRecord {
            entry:           triple(p.entry.x, p.entry.y, p.entry.z),
            exit:            triple(p.exit .x, p.exit .y, p.exit .z),
            entry_direction: triple(p.entry_direction.x, p.entry_direction.y, p.entry_direction.z),
            exit_direction:  triple(p.exit_direction .x, p.exit_direction .y, p.exit_direction .z),
            entry_energy,
            exit_energy,
            time: 0.0,
        }
    }
}

/// Sequential reader of pair records, delivering them in chunks.
pub struct PairReader<R> {
    reader: R,
    remaining: usize,
}

impl PairReader<BufReader<File>> {

    /// Fails if the file does not hold a whole number of records.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::metadata(path)?.len() as usize;
        if bytes % RECORD_SIZE != 0 {
            return Err(Error::InvalidConfig(format!(
                "{} ({bytes} bytes) does not hold whole {RECORD_SIZE}-byte pair records", path.display())))
        }
        Ok(Self { reader: BufReader::new(File::open(path)?), remaining: bytes / RECORD_SIZE })
    }
}

impl<R: Read + Seek> PairReader<R> {

    pub fn new(reader: R, records: usize) -> Self { Self { reader, remaining: records } }

    /// Records not yet read
    pub fn remaining(&self) -> usize { self.remaining }

    /// Up to `max` more pairs; `None` once all have been read.
    pub fn next_chunk(&mut self, max: usize) -> Result<Option<Vec<ProtonPair>>> {
        if self.remaining == 0 { return Ok(None) }
        let n = max.min(self.remaining);
        let mut chunk = Vec::with_capacity(n);
        for _ in 0..n {
            let record: PairRecord = self.reader.read_le()?;
            chunk.push(record.into());
        }
        self.remaining -= n;
        Ok(Some(chunk))
    }
}

pub fn write_to(pairs: &[ProtonPair], out: &mut (impl Write + Seek)) -> Result<()> {
    for pair in pairs {
        out.write_le(&PairRecord::from(pair))?;
    }
    out.flush()?;
    Ok(())
}

pub fn write(pairs: &[ProtonPair], path: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_to(pairs, &mut out)
}

/// Read every pair in the file at `path`
pub fn read(path: &Path) -> Result<Vec<ProtonPair>> {
    let mut reader = PairReader::open(path)?;
    let n = reader.remaining();
    Ok(reader.next_chunk(n)?.unwrap_or_default())
}
