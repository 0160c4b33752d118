//! Library map construction from a dynamic-linker trace
//!
//! The trace records, for each loaded library, a line naming its path and,
//! three lines later, a line carrying its load base and mapped size. The
//! first line of the trace names the profiled process id.

use std::fs;
use std::path::Path;

use log::debug;

use crate::domain::{AnnotateError, Pid};

/// One dynamically loaded module: load base, mapped size, on-disk path.
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub base: u64,
    pub size: u64,
    pub path: String,
}

/// Address-sorted table of loaded libraries.
///
/// Entries are sorted ascending by base address and unique per path;
/// ranges of distinct entries do not overlap. Immutable after
/// construction, so it can be shared by reference across worker threads.
#[derive(Debug, Clone, Default)]
pub struct LibraryMap {
    entries: Vec<LibraryEntry>,
}

/// Marker token on the line carrying a library's load base and size.
const BASE_MARKER: &str = "base:";

/// The path line sits exactly this many lines before its base line.
const PATH_LINE_DISTANCE: usize = 3;

impl LibraryMap {
    /// Parse a loader trace file into (profiled pid, library map).
    ///
    /// # Errors
    /// Returns `AnnotateError::Format` if the pid line is missing, a base
    /// line has no matching path line, or hex fields fail to parse.
    pub fn parse(path: &Path) -> Result<(Pid, LibraryMap), AnnotateError> {
        let text = fs::read_to_string(path)?;
        let (pid, map) = Self::parse_str(&text)?;
        debug!("loader trace {}: {} libraries", path.display(), map.len());
        Ok((pid, map))
    }

    /// Parse loader trace text. Split out from [`Self::parse`] for testing.
    ///
    /// # Errors
    /// Same contract as [`Self::parse`].
    pub fn parse_str(text: &str) -> Result<(Pid, LibraryMap), AnnotateError> {
        let lines: Vec<&str> = text.lines().collect();

        let first = lines
            .first()
            .ok_or_else(|| AnnotateError::Format("loader trace is empty".to_string()))?;
        let pid = parse_pid_line(first)?;

        let mut entries = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let Some(marker) = line.split_whitespace().position(|tok| tok == BASE_MARKER) else {
                continue;
            };
            let (base, size) = parse_base_line(line, marker)
                .ok_or_else(|| AnnotateError::Format(format!("bad base line: {line}")))?;
            let path = path_for_base_line(&lines, idx)?;
            debug!("library {path}: base 0x{base:x} size 0x{size:x}");
            entries.push(LibraryEntry { base, size, path });
        }

        Ok((pid, Self::from_entries(entries)))
    }

    /// Build a map from raw entries: sort ascending by base, keep the
    /// first entry per path.
    #[must_use]
    pub fn from_entries(mut entries: Vec<LibraryEntry>) -> Self {
        entries.sort_by_key(|e| e.base);
        let mut unique: Vec<LibraryEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if unique.iter().any(|e| e.path == entry.path) {
                continue;
            }
            unique.push(entry);
        }
        LibraryMap { entries: unique }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }
}

/// Extract the pid from the first trace line: the token before `:`.
fn parse_pid_line(line: &str) -> Result<Pid, AnnotateError> {
    line.split(':')
        .next()
        .and_then(|tok| tok.trim().parse::<u32>().ok())
        .map(Pid)
        .ok_or_else(|| AnnotateError::Format(format!("bad pid line: {line}")))
}

/// Take the two hex tokens following the `base:` marker as (base, size).
fn parse_base_line(line: &str, marker_idx: usize) -> Option<(u64, u64)> {
    let mut hex = line
        .split_whitespace()
        .skip(marker_idx + 1)
        .filter_map(parse_hex_token);
    let base = hex.next()?;
    let size = hex.next()?;
    Some((base, size))
}

fn parse_hex_token(tok: &str) -> Option<u64> {
    let tok = tok.strip_prefix("0x").unwrap_or(tok);
    u64::from_str_radix(tok, 16).ok()
}

/// The path for a base line sits exactly [`PATH_LINE_DISTANCE`] lines
/// earlier and carries the path to the right of `=`.
fn path_for_base_line(lines: &[&str], base_idx: usize) -> Result<String, AnnotateError> {
    let path_line = base_idx
        .checked_sub(PATH_LINE_DISTANCE)
        .and_then(|i| lines.get(i))
        .ok_or_else(|| {
            AnnotateError::Format(format!("no path line for base line {}", base_idx + 1))
        })?;
    let (_, path) = path_line.split_once('=').ok_or_else(|| {
        AnnotateError::Format(format!("path line has no '=': {path_line}"))
    })?;
    Ok(path.trim().to_string())
}
