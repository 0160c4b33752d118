//! Chunk worker: filter, resolve, annotate one byte range
//!
//! Workers are fully independent. Each one opens the input read-only and
//! seeks to its assigned range, owns a private annotation cache, and
//! flushes its annotated rows to a uniquely named temp file whose path is
//! handed back for ordered merging.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use tempfile::NamedTempFile;

use super::chunker::Chunk;
use crate::disasm::{AnnotationCache, Disassembler};
use crate::domain::{Pid, SampleKind};
use crate::resolution::LibraryMap;

/// Zero-based positions of the fixed sample columns.
const COL_PID: usize = 2;
const COL_KERNEL: usize = 3;
const COL_PHYS_VALID: usize = 4;

/// Prefix of the sample file's header row.
pub const HEADER_PREFIX: &str = "TSC";

/// Read-only state shared by every worker of one stream.
pub struct WorkerContext<'a> {
    pub input: &'a Path,
    pub kind: SampleKind,
    pub target_pid: Pid,
    pub library_map: &'a LibraryMap,
    pub binary: &'a Path,
    pub disasm: &'a dyn Disassembler,
    pub scratch_dir: &'a Path,
}

/// Row counters for one chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkStats {
    /// Records that passed the pid/kernel/validity filter.
    pub records: u64,
    /// Records written with all four annotation columns.
    pub annotated: u64,
    /// Records dropped as unresolvable.
    pub dropped: u64,
}

impl ChunkStats {
    pub fn absorb(&mut self, other: ChunkStats) {
        self.records += other.records;
        self.annotated += other.annotated;
        self.dropped += other.dropped;
    }
}

/// Result of one chunk: the temp file holding its annotated rows, plus
/// counters. The merger takes ownership of (and deletes) the file.
pub struct ChunkOutput {
    pub path: PathBuf,
    pub stats: ChunkStats,
}

/// Process one chunk: read its lines, annotate matching records, flush to
/// a temp file in the scratch directory.
///
/// # Errors
/// I/O failures and disassembler invocation failures abort the run.
pub fn annotate_chunk(
    ctx: &WorkerContext<'_>,
    chunk: Chunk,
    cache: &mut AnnotationCache,
) -> Result<ChunkOutput> {
    let mut reader = BufReader::new(
        File::open(ctx.input)
            .with_context(|| format!("Failed to open {}", ctx.input.display()))?,
    );
    reader.seek(SeekFrom::Start(chunk.start))?;

    let mut stats = ChunkStats::default();
    let mut rows = String::new();
    let mut line = String::new();
    let mut pos = chunk.start;

    while pos < chunk.end {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        pos += n as u64;
        if pos > chunk.end {
            // Partial trailing line past our range: the next chunk owns it.
            break;
        }
        annotate_line(ctx, &line, cache, &mut rows, &mut stats)?;
    }

    let mut out = NamedTempFile::new_in(ctx.scratch_dir)
        .context("Failed to create chunk output file")?;
    out.write_all(rows.as_bytes())?;
    out.flush()?;
    let (_, path) = out.keep().context("Failed to keep chunk output file")?;

    Ok(ChunkOutput { path, stats })
}

/// Filter, resolve and annotate a single raw line, appending the output
/// row to `rows` on success.
fn annotate_line(
    ctx: &WorkerContext<'_>,
    line: &str,
    cache: &mut AnnotationCache,
    rows: &mut String,
    stats: &mut ChunkStats,
) -> Result<()> {
    let trimmed = line.trim_end();
    if trimmed.is_empty() || trimmed.starts_with(HEADER_PREFIX) {
        return Ok(());
    }

    let fields: Vec<&str> = trimmed.split(',').collect();
    if !record_matches(ctx.kind, ctx.target_pid, &fields) {
        return Ok(());
    }
    stats.records += 1;

    let Some(ip) = fields.get(ctx.kind.ip_column()).and_then(|f| parse_hex(f)) else {
        debug!("unparsable instruction pointer in row: {trimmed}");
        stats.dropped += 1;
        return Ok(());
    };

    let Some(location) = ctx.library_map.resolve(ip) else {
        debug!("address 0x{ip:x} resolves to no known module, dropping");
        stats.dropped += 1;
        return Ok(());
    };

    let module = location.module_path(ctx.library_map, ctx.binary);
    let Some(annotation) = cache.lookup(ip, location.offset, module, ctx.disasm)? else {
        debug!(
            "address 0x{ip:x} not found in listing of {}, dropping",
            module.display()
        );
        stats.dropped += 1;
        return Ok(());
    };

    let row = trimmed.trim_end_matches(',');
    let _ = writeln!(
        rows,
        "{row},{},{:x},{},{}",
        annotation.source_line, annotation.offset, annotation.opcode, annotation.instruction
    );
    stats.annotated += 1;

    Ok(())
}

/// The record filter: pid must match the profiled process, kernel-mode
/// samples are excluded, and fetch samples additionally require the
/// physical-address-valid flag.
fn record_matches(kind: SampleKind, target_pid: Pid, fields: &[&str]) -> bool {
    if fields.len() <= kind.ip_column() {
        return false;
    }
    let pid_ok = fields[COL_PID].trim().parse::<u32>() == Ok(target_pid.0);
    let user_mode = fields[COL_KERNEL].trim() == "0";
    let phys_ok = kind != SampleKind::Fetch || fields[COL_PHYS_VALID].trim() == "1";
    pid_ok && user_mode && phys_ok
}

fn parse_hex(field: &str) -> Option<u64> {
    let field = field.trim();
    let field = field.strip_prefix("0x").unwrap_or(field);
    u64::from_str_radix(field, 16).ok()
}
