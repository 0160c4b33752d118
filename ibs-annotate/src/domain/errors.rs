//! Structured error types for ibs-annotate
//!
//! Using thiserror for automatic Display implementation and error chaining.
//!
//! Only failures that abort the whole run live here. Per-record conditions
//! (an address no library covers, a listing the disassembler cannot locate
//! the requested offset in) are represented as `None` returns at the call
//! site and the record is dropped.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnnotateError {
    /// The loader trace or a sample file does not match its expected
    /// structure. Raised before any resolution starts.
    #[error("malformed input: {0}")]
    Format(String),

    /// The external disassembler failed to start or exited non-zero.
    /// No partial annotation is trustworthy after this.
    #[error("disassembler invocation failed ({tool}): {reason}")]
    ToolInvocation { tool: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
