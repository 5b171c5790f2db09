//! Chunked processing of long projection series and proton-pair streams.
//!
//! The controller splits the input into `divisions` contiguous chunks, so
//! that only one chunk of input is held in memory at a time. Every kernel
//! depends only on the items within the chunk, so results do not depend on
//! the number of divisions. Runs may be aborted between chunks; outputs are
//! written to temporary files and only published by an explicit commit.

use std::fs::File;
use std::io::{BufWriter, Read, Seek};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::s;
use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::circular::CircularGeometry;
use crate::error::{Error, Result};
use crate::fov::FOV;
use crate::image::{Detector, ProjectionStack, Volume};
use crate::io;
use crate::pairs::{Bins, PairBackProjector, PairProjector, ProtonPair, Sums, Tally};
use crate::projector::BackProjector;
use crate::types::Sample;
use crate::utils::group_digits;
use crate::weighting::Weigh;

/// Chunk size used for pair streams of unknown length
pub const DEFAULT_PAIR_CHUNK: usize = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamingConfig {
    /// Number of chunks into which the input is split
    pub divisions: usize,
    /// Weight projections in the buffer they were read into, rather than in
    /// a copy
    #[serde(default)]
    pub in_place: bool,
    /// Show a progress bar
    #[serde(default)]
    pub verbose: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self { Self { divisions: 1, in_place: true, verbose: false } }
}

// ----- Sources and sinks ---------------------------------------------------------

/// An ordered series of projections which can be read in contiguous runs.
pub trait ProjectionSource<T> {
    /// Number of projections in the series
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool { self.len() == 0 }

    /// Projections with series indices `range`
    fn read(&mut self, range: Range<usize>) -> Result<ProjectionStack<T>>;
}

/// Accepts consecutive chunks of projections. Nothing is visible at the
/// destination until `commit` succeeds.
pub trait ProjectionSink<T> {
    fn write(&mut self, stack: &ProjectionStack<T>) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
}

/// A stream of proton pairs, delivered in chunks.
pub trait PairSource {
    /// Up to `max` more pairs; `None` when the stream is exhausted.
    fn next_chunk(&mut self, max: usize) -> Result<Option<Vec<ProtonPair>>>;

    /// Number of pairs still to come, if known
    fn remaining(&self) -> Option<usize> { None }
}

/// A whole series already in memory.
pub struct MemorySource<T> {
    stack: ProjectionStack<T>,
}

impl<T: Sample> MemorySource<T> {
    pub fn new(stack: ProjectionStack<T>) -> Self { Self { stack } }
}

impl<T: Sample> ProjectionSource<T> for MemorySource<T> {
    fn len(&self) -> usize { self.stack.count() }

    fn read(&mut self, range: Range<usize>) -> Result<ProjectionStack<T>> {
        let count = self.len();
        if range.end > count {
            return Err(Error::IndexOutOfRange { index: range.end - 1, count })
        }
        Ok(ProjectionStack {
            detector: self.stack.detector,
            first: self.stack.first + range.start,
            data: self.stack.data.slice(s![range, .., .., ..]).to_owned(),
        })
    }
}

/// A series stored as raw `f32`, projection after projection.
pub struct RawFileSource {
    path: PathBuf,
    detector: Detector,
    len: usize,
}

impl RawFileSource {

    /// Fails if the file does not hold a whole number of projections.
    pub fn open(path: &Path, detector: Detector) -> Result<Self> {
        let values = io::raw::len(path)?;
        let pixels = detector.pixels();
        if values % pixels != 0 {
            return Err(Error::InvalidConfig(format!(
                "{} holds {values} values: not a whole number of {pixels}-pixel projections",
                path.display())))
        }
        Ok(Self { path: path.to_owned(), detector, len: values / pixels })
    }
}

impl<T: Sample> ProjectionSource<T> for RawFileSource {
    fn len(&self) -> usize { self.len }

    fn read(&mut self, range: Range<usize>) -> Result<ProjectionStack<T>> {
        if range.end > self.len {
            return Err(Error::IndexOutOfRange { index: range.end - 1, count: self.len })
        }
        let pixels = self.detector.pixels();
        let values = io::raw::read_range(&self.path, range.start * pixels, range.len() * pixels)?;
        let data = values.into_iter().map(|v| T::of(v as f64)).collect();
        ProjectionStack::from_vec(self.detector, range.start, data)
    }
}

/// Collects chunks in memory.
#[derive(Debug, Default)]
pub struct MemorySink<T> {
    pending: Vec<ProjectionStack<T>>,
    committed: Vec<ProjectionStack<T>>,
}

impl<T: Sample> MemorySink<T> {

    pub fn new() -> Self { Self { pending: vec![], committed: vec![] } }

    /// Committed chunks, in the order they were written
    pub fn chunks(&self) -> &[ProjectionStack<T>] { &self.committed }

    /// All committed projections as a single stack
    pub fn stack(&self) -> Option<ProjectionStack<T>> {
        let first = self.committed.first()?;
        let views: Vec<_> = self.committed.iter().map(|s| s.data.view()).collect();
        let data = ndarray::concatenate(ndarray::Axis(0), &views).ok()?;
        Some(ProjectionStack { detector: first.detector, first: first.first, data })
    }
}

impl<T: Sample> ProjectionSink<T> for MemorySink<T> {
    fn write(&mut self, stack: &ProjectionStack<T>) -> Result<()> {
        self.pending.push(stack.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.committed.append(&mut self.pending);
        Ok(())
    }
}

/// Writes raw `f32` into a temporary file beside `destination`, which is
/// renamed onto `destination` on commit. Dropped without commit, the
/// temporary file is deleted and `destination` is untouched.
pub struct RawFileSink {
    destination: PathBuf,
    temporary: Option<NamedTempFile>,
}

impl RawFileSink {
    pub fn create(destination: &Path) -> Result<Self> {
        let temporary = temporary_beside(destination)?;
        Ok(Self { destination: destination.to_owned(), temporary: Some(temporary) })
    }
}

impl<T: Sample> ProjectionSink<T> for RawFileSink {
    fn write(&mut self, stack: &ProjectionStack<T>) -> Result<()> {
        let file = self.temporary.as_mut()
            .ok_or_else(|| Error::InvalidConfig(format!("{} already committed", self.destination.display())))?;
        let mut out = BufWriter::new(file.as_file_mut());
        io::raw::write_to(stack.values().map(|v| v.as_f64() as f32), &mut out)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if let Some(temporary) = self.temporary.take() {
            temporary.persist(&self.destination).map_err(|e| Error::Io(e.error))?;
        }
        Ok(())
    }
}

fn temporary_beside(destination: &Path) -> Result<NamedTempFile> {
    let directory = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(NamedTempFile::new_in(directory)?)
}

/// Write `volume` as raw `f32` to `destination`, atomically: either the whole
/// volume appears there or nothing changes.
pub fn publish_volume<T: Sample>(volume: &Volume<T>, destination: &Path) -> Result<()> {
    let mut temporary = temporary_beside(destination)?;
    {
        let mut out = BufWriter::new(temporary.as_file_mut());
        io::raw::write_to(volume.values().map(|v| v.as_f64() as f32), &mut out)?;
    }
    temporary.persist(destination).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Pairs already in memory.
pub struct MemoryPairs {
    pairs: Vec<ProtonPair>,
    next: usize,
}

impl MemoryPairs {
    pub fn new(pairs: Vec<ProtonPair>) -> Self { Self { pairs, next: 0 } }
}

impl PairSource for MemoryPairs {
    fn next_chunk(&mut self, max: usize) -> Result<Option<Vec<ProtonPair>>> {
        if self.next >= self.pairs.len() { return Ok(None) }
        let end = (self.next + max.max(1)).min(self.pairs.len());
        let chunk = self.pairs[self.next..end].to_vec();
        self.next = end;
        Ok(Some(chunk))
    }

    fn remaining(&self) -> Option<usize> { Some(self.pairs.len() - self.next) }
}

impl<R: Read + Seek> PairSource for io::pairs::PairReader<R> {
    fn next_chunk(&mut self, max: usize) -> Result<Option<Vec<ProtonPair>>> {
        io::pairs::PairReader::next_chunk(self, max.max(1))
    }

    fn remaining(&self) -> Option<usize> { Some(io::pairs::PairReader::remaining(self)) }
}

/// Open a binary pair file as a `PairSource`
pub fn pair_file(path: &Path) -> Result<io::pairs::PairReader<std::io::BufReader<File>>> {
    io::pairs::PairReader::open(path)
}

// ----- Pair accumulators ---------------------------------------------------------

/// Something which folds chunks of proton pairs into running sums.
pub trait PairAccumulator: Sync {
    type Sums: Send;
    fn start(&self) -> Self::Sums;
    fn accumulate(&self, sums: &mut Self::Sums, pairs: &[ProtonPair]);
    fn tally(sums: &Self::Sums) -> &Tally;
}

impl PairAccumulator for PairProjector {
    type Sums = Bins;
    fn start(&self) -> Bins { self.bins() }
    fn accumulate(&self, sums: &mut Bins, pairs: &[ProtonPair]) { PairProjector::accumulate(self, sums, pairs) }
    fn tally(sums: &Bins) -> &Tally { &sums.tally }
}

impl PairAccumulator for PairBackProjector {
    type Sums = Sums;
    fn start(&self) -> Sums { self.sums() }
    fn accumulate(&self, sums: &mut Sums, pairs: &[ProtonPair]) { PairBackProjector::accumulate(self, sums, pairs) }
    fn tally(sums: &Sums) -> &Tally { &sums.tally }
}

// ----- Run outcome ---------------------------------------------------------------

/// Reported at the end of every run, successful or not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Projections or pairs processed
    pub processed: usize,
    /// Pairs rejected (always 0 for projections)
    pub rejected: usize,
    pub elapsed: Duration,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} processed, {} rejected in {} ms",
               group_digits(self.processed),
               group_digits(self.rejected),
               group_digits(self.elapsed.as_millis()))
    }
}

/// A failed run: what went wrong, and how far it got.
#[derive(Error, Debug)]
#[error("{error} ({summary})")]
pub struct RunFailure {
    pub summary: RunSummary,
    #[source]
    pub error: Error,
}

/// Keeps the summary up to date while a run progresses.
struct Run {
    start: Instant,
    summary: RunSummary,
    chunks: usize,
    bar: ProgressBar,
}

impl Run {

    fn fail(&mut self, error: Error) -> RunFailure {
        self.bar.abandon();
        RunFailure { summary: self.summary(), error }
    }

    fn summary(&mut self) -> RunSummary {
        self.summary.elapsed = self.start.elapsed();
        self.summary
    }

    fn chunk_done(&mut self, items: usize) {
        self.chunks += 1;
        self.bar.inc(items as u64);
    }
}

// ----- Controller ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct StreamingController {
    config: StreamingConfig,
    abort: Option<Arc<AtomicBool>>,
}

impl StreamingController {

    /// Fails with `InvalidConfig` if `divisions` is zero.
    pub fn new(config: StreamingConfig) -> Result<Self> {
        if config.divisions == 0 {
            return Err(Error::InvalidConfig("divisions must be at least 1".into()))
        }
        Ok(Self { config, abort: None })
    }

    /// When `flag` is set, the run stops before starting its next chunk.
    pub fn with_abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    pub fn config(&self) -> &StreamingConfig { &self.config }

    /// Contiguous ranges covering `0..len` in `divisions` near-equal parts
    /// (fewer when `len < divisions`).
    pub fn chunks(&self, len: usize) -> Vec<Range<usize>> {
        let n = self.config.divisions.min(len).max(1);
        let (size, extra) = (len / n, len % n);
        let mut start = 0;
        (0..n).map(|i| {
            let end = start + size + usize::from(i < extra);
            let range = start..end;
            start = end;
            range
        })
        .filter(|r| !r.is_empty())
        .collect()
    }

    fn begin(&self, len: Option<usize>, message: &str) -> Run {
        let bar = if !self.config.verbose {
            ProgressBar::hidden()
        } else if let Some(len) = len {
            let bar = ProgressBar::new(len as u64).with_message(message.to_string());
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{msg}\n[{elapsed_precise}] {wide_bar} {pos}/{len} ({eta_precise})") {
                bar.set_style(style);
            }
            bar
        } else {
            ProgressBar::new_spinner().with_message(message.to_string())
        };
        Run { start: Instant::now(), summary: RunSummary::default(), chunks: 0, bar }
    }

    fn check_abort(&self, run: &Run) -> Result<()> {
        match &self.abort {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(Error::Aborted { chunks: run.chunks }),
            _ => Ok(()),
        }
    }

    /// Apply `weighting` to every projection of `source`, writing the results
    /// to `sink` in order. `sink` is committed only if every chunk succeeded.
    pub fn run_weighting<T, W, Src, Snk>(
        &self,
        weighting: &W,
        geometry : &CircularGeometry,
        source   : &mut Src,
        sink     : &mut Snk,
    ) -> std::result::Result<RunSummary, RunFailure>
    where
        T: Sample,
        W: Weigh,
        Src: ProjectionSource<T> + ?Sized,
        Snk: ProjectionSink<T> + ?Sized,
    {
        let mut run = self.begin(Some(source.len()), "Weighting projections");
        geometry.ensure_projection_count(source.len()).map_err(|e| run.fail(e))?;
        for range in self.chunks(source.len()) {
            let outcome = self.check_abort(&run)
                .and_then(|()| self.weigh_chunk(weighting, source, range))
                .and_then(|stack| { sink.write(&stack)?; Ok(stack.count()) });
            let count = outcome.map_err(|e| run.fail(e))?;
            run.summary.processed += count;
            run.chunk_done(count);
        }
        sink.commit().map_err(|e| run.fail(e))?;
        run.bar.finish();
        Ok(run.summary())
    }

    fn weigh_chunk<T, W, Src>(&self, weighting: &W, source: &mut Src, range: Range<usize>) -> Result<ProjectionStack<T>>
    where
        T: Sample,
        W: Weigh,
        Src: ProjectionSource<T> + ?Sized,
    {
        let mut stack = source.read(range)?;
        if self.config.in_place {
            weighting.apply_in_place(&mut stack)?;
            Ok(stack)
        } else {
            weighting.apply(&stack)
        }
    }

    /// Weight, filter and back-project every projection of `source` into a
    /// fresh volume over `fov`. The volume is returned only if every chunk
    /// succeeded.
    pub fn run_reconstruction<T, W, P, Src>(
        &self,
        weighting: &W,
        projector: &P,
        geometry : &CircularGeometry,
        source   : &mut Src,
        fov      : FOV,
    ) -> std::result::Result<(Volume<T>, RunSummary), RunFailure>
    where
        T: Sample,
        W: Weigh,
        P: BackProjector,
        Src: ProjectionSource<T> + ?Sized,
    {
        let mut run = self.begin(Some(source.len()), "Reconstructing");
        geometry.ensure_projection_count(source.len()).map_err(|e| run.fail(e))?;
        let mut volume = Volume::zeros(fov);
        for range in self.chunks(source.len()) {
            let outcome = self.check_abort(&run)
                .and_then(|()| self.weigh_chunk(weighting, source, range))
                .and_then(|stack| {
                    projector.back_project(&stack, geometry, &mut volume)?;
                    Ok(stack.count())
                });
            let count = outcome.map_err(|e| run.fail(e))?;
            run.summary.processed += count;
            run.chunk_done(count);
        }
        run.bar.finish();
        Ok((volume, run.summary()))
    }

    /// Feed every pair of `source` to `accumulator`. Chunks hold
    /// `1/divisions` of the stream when its length is known, and
    /// `DEFAULT_PAIR_CHUNK` pairs otherwise.
    pub fn run_pairs<A, Src>(
        &self,
        accumulator: &A,
        source     : &mut Src,
    ) -> std::result::Result<(A::Sums, RunSummary), RunFailure>
    where
        A: PairAccumulator,
        Src: PairSource + ?Sized,
    {
        let total = source.remaining();
        let chunk_size = total
            .map(|n| n.div_ceil(self.config.divisions).max(1))
            .unwrap_or(DEFAULT_PAIR_CHUNK);
        let mut run = self.begin(total, "Accumulating proton pairs");
        let mut sums = accumulator.start();
        loop {
            self.check_abort(&run).map_err(|e| run.fail(e))?;
            let Some(chunk) = source.next_chunk(chunk_size).map_err(|e| run.fail(e))? else { break };
            accumulator.accumulate(&mut sums, &chunk);
            let tally = A::tally(&sums);
            run.summary.processed = tally.processed;
            run.summary.rejected = tally.rejected_total();
            run.chunk_done(chunk.len());
        }
        run.bar.finish();
        Ok((sums, run.summary()))
    }
}
