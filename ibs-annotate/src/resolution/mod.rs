//! Address resolution
//!
//! Builds the library map from a dynamic-linker trace and resolves raw
//! instruction pointers to (module, offset) pairs. The map is built once,
//! sorted by base address, and shared read-only with every worker.

pub mod library_map;
pub mod resolver;

pub use library_map::{LibraryEntry, LibraryMap};
pub use resolver::{Module, ResolvedLocation};
