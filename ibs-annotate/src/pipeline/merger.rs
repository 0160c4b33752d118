//! Ordered merge of per-chunk outputs
//!
//! Chunks may finish resolution in any order; the merger concatenates
//! their files in dispatch order under a synthesized header, so final
//! output row order always equals input row order. Each temp file is
//! deleted immediately after its bytes are consumed.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

/// Annotation columns appended to the original header.
const ANNOTATION_COLUMNS: &str = "Source_Line,Binary_Offset,Opcode,Instruction";

/// Write the final annotated file: synthesized header, then every chunk's
/// rows in dispatch order.
///
/// # Errors
/// Any I/O failure aborts the run; the destination may be left partial.
pub fn merge_chunks(raw_header: &str, chunks: Vec<PathBuf>, dest: &Path) -> Result<()> {
    let out = File::create(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut writer = BufWriter::new(out);

    writeln!(writer, "{}", annotated_header(raw_header))?;

    for path in chunks {
        let mut chunk = File::open(&path)
            .with_context(|| format!("Missing chunk output {}", path.display()))?;
        let bytes = io::copy(&mut chunk, &mut writer)?;
        debug!("merged {} ({bytes} bytes)", path.display());
        drop(chunk);
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove chunk output {}", path.display()))?;
    }

    writer.flush()?;
    Ok(())
}

/// Original columns minus the trailing delimiter artifact, plus the four
/// annotation columns.
fn annotated_header(raw_header: &str) -> String {
    format!("{},{ANNOTATION_COLUMNS}", raw_header.trim_end().trim_end_matches(','))
}
