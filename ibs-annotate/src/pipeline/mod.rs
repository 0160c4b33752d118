//! Sample resolution and annotation pipeline
//!
//! - `chunker`: line-aligned byte ranges over the raw sample file
//! - `worker`: filter + resolve + annotate one chunk
//! - `merger`: ordered concatenation under a synthesized header
//! - `orchestrator`: worker pool, stream overlap, timing

pub mod chunker;
pub mod merger;
pub mod orchestrator;
pub mod worker;

pub use chunker::{Chunk, ChunkReader, DEFAULT_LINES_PER_CHUNK};
pub use merger::merge_chunks;
pub use orchestrator::{Pipeline, PipelineConfig, StreamReport, StreamSpec};
pub use worker::ChunkStats;
