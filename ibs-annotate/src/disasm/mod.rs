//! External disassembler abstraction
//!
//! Textual scraping of a disassembly listing is fragile, so it sits
//! behind one narrow interface: decode a byte window of a module into an
//! ordered sequence of (offset, opcode, mnemonic, source-line-or-none).
//! The caching/prefetch layer never sees listing text.

pub mod cache;
pub mod objdump;

use std::path::Path;

use crate::domain::AnnotateError;

/// One instruction decoded from a listing window.
///
/// `source` carries the most recent source-location line seen before this
/// instruction, when debug information is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInst {
    /// Module-relative byte offset.
    pub offset: u64,
    /// Opcode bytes as printed by the disassembler; empty on a decode the
    /// tool could not complete.
    pub opcode: String,
    /// Disassembled instruction text.
    pub mnemonic: String,
    pub source: Option<String>,
}

impl DecodedInst {
    /// A decode the prefetch scan must stop at: forward-decoding from a
    /// byte offset that was not a true instruction boundary.
    #[must_use]
    pub fn is_anomalous(&self) -> bool {
        self.opcode.is_empty() || self.mnemonic.is_empty() || self.mnemonic.contains("(bad)")
    }
}

/// Decode `[start, stop)` of `module` into an ordered instruction list.
///
/// Implementations run as independent OS processes; a failed invocation
/// is fatal for the whole run.
pub trait Disassembler: Sync {
    /// # Errors
    /// Returns `AnnotateError::ToolInvocation` when the external tool
    /// cannot be spawned or exits non-zero.
    fn decode(
        &self,
        module: &Path,
        start: u64,
        stop: u64,
    ) -> Result<Vec<DecodedInst>, AnnotateError>;
}

pub use cache::{Annotation, AnnotationCache};
pub use objdump::Objdump;
