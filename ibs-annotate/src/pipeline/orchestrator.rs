//! Pipeline orchestration
//!
//! Fans chunks out to a fixed-size worker pool over bounded channels and
//! stitches results back in dispatch order. With both sample streams
//! requested, the op stream's merge-write runs on a background thread
//! overlapped with fetch resolution; the orchestrator always joins that
//! thread before returning, so sequential and overlapped runs produce
//! byte-identical output.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::bounded;
use log::info;
use tempfile::TempDir;

use super::chunker::{Chunk, ChunkReader, DEFAULT_LINES_PER_CHUNK};
use super::merger::merge_chunks;
use super::worker::{annotate_chunk, ChunkOutput, ChunkStats, WorkerContext, HEADER_PREFIX};
use crate::disasm::cache::DEFAULT_WINDOW;
use crate::disasm::{AnnotationCache, Disassembler};
use crate::domain::{AnnotateError, Pid, SampleKind};
use crate::resolution::LibraryMap;

/// Tunables for one pipeline run. Values only; behavior is fixed.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub lines_per_chunk: usize,
    /// Prefetch window handed to each worker's annotation cache.
    pub window: u64,
    /// Worker pool size. Defaults to one less than the available cores,
    /// leaving one for orchestration and merging.
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lines_per_chunk: DEFAULT_LINES_PER_CHUNK,
            window: DEFAULT_WINDOW,
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get().saturating_sub(1).max(1))
}

/// One sample stream to annotate.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    pub kind: SampleKind,
}

/// Outcome of one annotated stream.
#[derive(Debug)]
pub struct StreamReport {
    pub kind: SampleKind,
    pub output: PathBuf,
    pub stats: ChunkStats,
    pub resolve_time: Duration,
    pub merge_time: Duration,
}

/// A resolved stream awaiting its merge. Chunk outputs live in `scratch`
/// until the merger consumes them; dropping `scratch` sweeps up whatever
/// an aborted run left behind.
struct ResolvedStream {
    header: String,
    chunks: Vec<PathBuf>,
    stats: ChunkStats,
    elapsed: Duration,
    scratch: TempDir,
}

/// Coordinates chunk partitioning, the worker pool and the merge for up
/// to two independent sample streams.
pub struct Pipeline<'a> {
    pub library_map: &'a LibraryMap,
    pub target_pid: Pid,
    pub binary: &'a Path,
    pub disasm: &'a dyn Disassembler,
    pub config: PipelineConfig,
}

impl Pipeline<'_> {
    /// Annotate the requested streams.
    ///
    /// # Errors
    /// Fails fast on the first I/O, format or tool-invocation error; a
    /// background merge in flight is joined before the error is returned.
    pub fn run(
        &self,
        op: Option<StreamSpec>,
        fetch: Option<StreamSpec>,
    ) -> Result<Vec<StreamReport>> {
        match (op, fetch) {
            (Some(op), Some(fetch)) => {
                let resolved = self.resolve_stream(&op)?;
                let op_stats = resolved.stats;
                let op_resolve_time = resolved.elapsed;
                let op_output = op.output.clone();
                info!("overlapping op merge with fetch resolution");
                let merge = thread::spawn(move || merge_stream(resolved, &op_output));

                let fetch_report = self.process_stream(&fetch);
                let op_merge_time =
                    merge.join().map_err(|_| anyhow!("op merge task panicked"))??;

                Ok(vec![
                    StreamReport {
                        kind: op.kind,
                        output: op.output,
                        stats: op_stats,
                        resolve_time: op_resolve_time,
                        merge_time: op_merge_time,
                    },
                    fetch_report?,
                ])
            }
            (Some(single), None) | (None, Some(single)) => {
                Ok(vec![self.process_stream(&single)?])
            }
            (None, None) => bail!("no sample streams to process"),
        }
    }

    /// Resolve then merge one stream sequentially.
    fn process_stream(&self, spec: &StreamSpec) -> Result<StreamReport> {
        let resolved = self.resolve_stream(spec)?;
        let stats = resolved.stats;
        let resolve_time = resolved.elapsed;
        let merge_time = merge_stream(resolved, &spec.output)?;
        Ok(StreamReport {
            kind: spec.kind,
            output: spec.output.clone(),
            stats,
            resolve_time,
            merge_time,
        })
    }

    /// Run the resolution phase of one stream across the worker pool.
    ///
    /// Chunk outputs come back in completion order; they are re-keyed by
    /// dispatch index so the merge sees them in input order.
    fn resolve_stream(&self, spec: &StreamSpec) -> Result<ResolvedStream> {
        let started = Instant::now();
        let header = read_header(&spec.input)?;
        let scratch = scratch_dir(&spec.output)?;

        let ctx = WorkerContext {
            input: &spec.input,
            kind: spec.kind,
            target_pid: self.target_pid,
            library_map: self.library_map,
            binary: self.binary,
            disasm: self.disasm,
            scratch_dir: scratch.path(),
        };

        let chunks = ChunkReader::new(&spec.input, self.config.lines_per_chunk)?;
        let workers = self.config.workers.max(1);
        // Bounded dispatch keeps only a small multiple of the pool size
        // queued ahead of completion.
        let (job_tx, job_rx) = bounded::<(usize, Chunk)>(workers * 2);
        let (result_tx, result_rx) = bounded::<(usize, Result<ChunkOutput>)>(workers * 2);

        let mut outputs: BTreeMap<usize, ChunkOutput> = BTreeMap::new();
        let mut first_err: Option<anyhow::Error> = None;

        thread::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let window = self.config.window;
                let ctx = &ctx;
                s.spawn(move || {
                    let mut cache = AnnotationCache::new(window);
                    for (idx, chunk) in job_rx {
                        let result = annotate_chunk(ctx, chunk, &mut cache);
                        if result_tx.send((idx, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);

            let feeder_err_tx = result_tx.clone();
            s.spawn(move || {
                for (idx, chunk) in chunks.enumerate() {
                    match chunk {
                        Ok(chunk) => {
                            if job_tx.send((idx, chunk)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = feeder_err_tx.send((idx, Err(e.into())));
                            break;
                        }
                    }
                }
            });
            drop(result_tx);

            while let Ok((idx, result)) = result_rx.recv() {
                match result {
                    Ok(output) => {
                        outputs.insert(idx, output);
                    }
                    Err(e) => {
                        // Dropping the receiver unblocks every sender;
                        // the pool drains and exits.
                        first_err = Some(e);
                        break;
                    }
                }
            }
            drop(result_rx);
        });

        if let Some(e) = first_err {
            return Err(e.context(format!("{} stream resolution failed", spec.kind.label())));
        }

        let mut stats = ChunkStats::default();
        for output in outputs.values() {
            stats.absorb(output.stats);
        }
        let elapsed = started.elapsed();
        info!(
            "{}: {} chunks resolved in {:.2}s ({} records, {} annotated, {} dropped)",
            spec.kind.label(),
            outputs.len(),
            elapsed.as_secs_f64(),
            stats.records,
            stats.annotated,
            stats.dropped,
        );

        Ok(ResolvedStream {
            header,
            chunks: outputs.into_values().map(|o| o.path).collect(),
            stats,
            elapsed,
            scratch,
        })
    }
}

/// Merge one resolved stream into its final output file.
fn merge_stream(resolved: ResolvedStream, output: &Path) -> Result<Duration> {
    let ResolvedStream { header, chunks, scratch, .. } = resolved;
    let started = Instant::now();
    merge_chunks(&header, chunks, output)?;
    drop(scratch);
    let elapsed = started.elapsed();
    info!("merged {} in {:.2}s", output.display(), elapsed.as_secs_f64());
    Ok(elapsed)
}

/// The raw header row, validated up front so a malformed sample file
/// fails before any resolution starts.
fn read_header(input: &Path) -> Result<String> {
    let file = File::open(input)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    let mut header = String::new();
    BufReader::new(file).read_line(&mut header)?;
    if !header.starts_with(HEADER_PREFIX) {
        return Err(AnnotateError::Format(format!(
            "{} does not start with a {HEADER_PREFIX} header row",
            input.display()
        ))
        .into());
    }
    Ok(header)
}

/// Per-chunk temp files live next to the final output so the merge never
/// crosses filesystems.
fn scratch_dir(output: &Path) -> Result<TempDir> {
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    tempfile::Builder::new()
        .prefix("ibs-annotate-")
        .tempdir_in(parent)
        .context("Failed to create scratch directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_keeps_a_core_for_orchestration() {
        let config = PipelineConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.lines_per_chunk, 16_384);
        assert_eq!(config.window, 0x3ff);
    }

    #[test]
    fn test_header_validation_rejects_headerless_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        writeln!(file, "100,0,1234,0,400500,").unwrap();
        file.flush().unwrap();

        let err = read_header(file.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnnotateError>(),
            Some(AnnotateError::Format(_))
        ));
    }

    #[test]
    fn test_header_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        writeln!(file, "TSC,CPU,PID,KERN,IP,").unwrap();
        file.flush().unwrap();
        assert_eq!(read_header(file.path()).unwrap(), "TSC,CPU,PID,KERN,IP,\n");
    }
}
