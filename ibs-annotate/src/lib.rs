//! # ibs-annotate - Hardware Sample Annotation Pipeline
//!
//! Annotates instruction-pointer-keyed hardware sampler records with the
//! disassembled instruction and, where debug information allows, the
//! source line that produced each sample.
//!
//! ## Architecture Overview
//!
//! ```text
//! loader trace ──▶ ┌─────────────┐
//!                  │ Library Map │ (built once, read-only)
//!                  └──────┬──────┘
//!                         │ broadcast to workers
//! sample file ──▶ ┌───────▼───────┐     ┌──────────────┐
//!                 │    Chunker    │────▶│  Worker Pool  │
//!                 │ (line-aligned │     │ resolve + per- │
//!                 │  byte ranges) │     │ worker disasm  │
//!                 └───────────────┘     │ cache          │
//!                                       └───────┬───────┘
//!                                 ordered chunk │ files
//!                                       ┌───────▼───────┐
//!                                       │    Merger     │──▶ annotated csv
//!                                       └───────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`resolution`]: loader-trace parsing and pointer-to-module lookup
//! - [`disasm`]: external disassembler invocation, listing parsing, and
//!   the per-worker prefetching annotation cache
//! - [`pipeline`]: chunk partitioning, workers, ordered merge, and the
//!   orchestrator that overlaps the op-stream merge with fetch resolution
//! - [`cli`]: command-line argument parsing
//! - [`domain`]: core newtypes and the fatal error taxonomy
//!
//! ## Key Concepts
//!
//! - Workers share nothing mutable: the library map is read-only, the
//!   input file is independently seeked, and every worker owns a private
//!   annotation cache.
//! - A cache miss disassembles a ~1 KB window ahead of the missed
//!   address, so neighboring samples are answered without re-spawning
//!   the external tool.
//! - Final row order always equals input row order, regardless of chunk
//!   completion order.

pub mod cli;
pub mod disasm;
pub mod domain;
pub mod pipeline;
pub mod resolution;
