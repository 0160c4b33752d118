//! Line-aligned chunk partitioning
//!
//! Splits a sample file into contiguous byte ranges for parallel
//! consumption. Ranges close every `lines_per_chunk` lines or at EOF, so
//! every boundary falls exactly on a line boundary and no record is ever
//! split across workers.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Default number of lines per chunk.
pub const DEFAULT_LINES_PER_CHUNK: usize = 16_384;

/// Half-open, line-aligned byte range over the raw sample file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Lazy iterator of chunks over a file.
pub struct ChunkReader {
    reader: BufReader<File>,
    offset: u64,
    lines_per_chunk: usize,
    buf: Vec<u8>,
    done: bool,
}

impl ChunkReader {
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path, lines_per_chunk: usize) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            offset: 0,
            lines_per_chunk: lines_per_chunk.max(1),
            buf: Vec::new(),
            done: false,
        })
    }
}

impl Iterator for ChunkReader {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let start = self.offset;
        let mut lines = 0;
        while lines < self.lines_per_chunk {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => {
                    self.offset += n as u64;
                    lines += 1;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        if lines == 0 {
            return None;
        }
        Some(Ok(Chunk { start, end: self.offset }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_file(lines: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..lines {
            writeln!(file, "line-{i},with,columns,").unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn collect(path: &Path, per_chunk: usize) -> Vec<Chunk> {
        ChunkReader::new(path, per_chunk).unwrap().map(Result::unwrap).collect()
    }

    #[test]
    fn test_chunk_count_is_ceil_div() {
        let file = sample_file(100);
        assert_eq!(collect(file.path(), 30).len(), 4); // ceil(100/30)
        assert_eq!(collect(file.path(), 100).len(), 1);
        assert_eq!(collect(file.path(), 7).len(), 15); // ceil(100/7)
    }

    #[test]
    fn test_chunks_are_contiguous_and_cover_file() {
        let file = sample_file(50);
        let total = std::fs::metadata(file.path()).unwrap().len();
        let chunks = collect(file.path(), 12);

        assert_eq!(chunks.first().unwrap().start, 0);
        assert_eq!(chunks.last().unwrap().end, total);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_boundaries_fall_on_line_ends() {
        let file = sample_file(40);
        let bytes = std::fs::read(file.path()).unwrap();
        for chunk in collect(file.path(), 9) {
            if (chunk.end as usize) < bytes.len() {
                assert_eq!(bytes[chunk.end as usize - 1], b'\n');
            }
        }
    }

    #[test]
    fn test_empty_file_yields_no_chunks() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(collect(file.path(), 16).is_empty());
    }

    #[test]
    fn test_file_without_trailing_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a,b,c\nd,e,f").unwrap();
        file.flush().unwrap();
        let chunks = collect(file.path(), 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].end, std::fs::metadata(file.path()).unwrap().len());
    }
}
