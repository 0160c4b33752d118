//! Per-worker annotation cache with window prefetch
//!
//! Each external disassembler invocation pays a process-spawn and
//! binary-parse cost that dominates runtime, so a miss decodes a whole
//! window ahead of the requested offset and caches every instruction in
//! it. Subsequent pointers landing in the same window are answered
//! without another invocation.
//!
//! The cache is owned by exactly one worker and passed explicitly; no
//! sharing or synchronization across the pool. Recomputation between
//! workers is expected and accepted.

use std::collections::HashMap;
use std::path::Path;

use log::debug;

use super::Disassembler;
use crate::domain::AnnotateError;

/// Default prefetch window in bytes.
pub const DEFAULT_WINDOW: u64 = 0x3ff;

/// The four annotation columns attached to a resolved sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Source location text, empty when no debug info covered the address.
    pub source_line: String,
    /// Module-relative byte offset.
    pub offset: u64,
    pub opcode: String,
    pub instruction: String,
}

/// Memoizing layer over disassembler invocations, keyed by absolute
/// instruction pointer. Entries are deterministic for a given pointer and
/// live for the worker's lifetime.
pub struct AnnotationCache {
    window: u64,
    entries: HashMap<u64, Annotation>,
    invocations: u64,
}

impl AnnotationCache {
    #[must_use]
    pub fn new(window: u64) -> Self {
        Self { window, entries: HashMap::new(), invocations: 0 }
    }

    /// Annotate one instruction pointer resolved to `offset` within
    /// `module`.
    ///
    /// `Ok(None)` means the disassembler's listing never produced the
    /// requested offset (or produced it past an anomalous decode); the
    /// sample is dropped without retry.
    ///
    /// # Errors
    /// Propagates `AnnotateError::ToolInvocation` from the disassembler;
    /// fatal for the whole run.
    pub fn lookup(
        &mut self,
        ip: u64,
        offset: u64,
        module: &Path,
        disasm: &dyn Disassembler,
    ) -> Result<Option<Annotation>, AnnotateError> {
        if let Some(hit) = self.entries.get(&ip) {
            return Ok(Some(hit.clone()));
        }

        let base = ip - offset;
        let window = disasm.decode(module, offset, offset + self.window)?;
        self.invocations += 1;

        for inst in window {
            if inst.is_anomalous() {
                // Decoding ran off an instruction boundary; everything
                // from here on is untrustworthy and stays uncached.
                debug!(
                    "anomalous decode at {}+0x{:x}, truncating prefetch",
                    module.display(),
                    inst.offset
                );
                break;
            }
            self.entries.entry(base + inst.offset).or_insert(Annotation {
                source_line: inst.source.unwrap_or_default(),
                offset: inst.offset,
                opcode: inst.opcode,
                instruction: inst.mnemonic,
            });
        }

        Ok(self.entries.get(&ip).cloned())
    }

    /// Number of external invocations performed so far.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::DecodedInst;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits 4-byte instructions covering the requested window, with an
    /// optional anomaly at a fixed offset.
    struct ScriptedDisasm {
        calls: AtomicUsize,
        bad_at: Option<u64>,
    }

    impl ScriptedDisasm {
        fn new(bad_at: Option<u64>) -> Self {
            Self { calls: AtomicUsize::new(0), bad_at }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Disassembler for ScriptedDisasm {
        fn decode(
            &self,
            _module: &Path,
            start: u64,
            stop: u64,
        ) -> Result<Vec<DecodedInst>, AnnotateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut insts = Vec::new();
            let mut offset = start;
            while offset < stop {
                let bad = self.bad_at == Some(offset);
                insts.push(DecodedInst {
                    offset,
                    opcode: if bad { String::new() } else { "90".to_string() },
                    mnemonic: if bad { String::new() } else { "nop".to_string() },
                    source: Some(format!("lib.c:{offset}")),
                });
                offset += 4;
            }
            Ok(insts)
        }
    }

    const MODULE: &str = "/lib/libfake.so";

    #[test]
    fn test_window_neighbors_hit_cache() {
        let disasm = ScriptedDisasm::new(None);
        let mut cache = AnnotationCache::new(DEFAULT_WINDOW);
        let base = 0x7f00_0000_0000u64;

        let first = cache.lookup(base + 0x100, 0x100, Path::new(MODULE), &disasm).unwrap();
        assert!(first.is_some());
        assert_eq!(disasm.calls(), 1);

        // Two more pointers inside the same 1K window: no new invocation.
        assert!(cache.lookup(base + 0x104, 0x104, Path::new(MODULE), &disasm).unwrap().is_some());
        assert!(cache.lookup(base + 0x1fc, 0x1fc, Path::new(MODULE), &disasm).unwrap().is_some());
        assert_eq!(disasm.calls(), 1);
        assert_eq!(cache.invocations(), 1);
    }

    #[test]
    fn test_annotation_fields() {
        let disasm = ScriptedDisasm::new(None);
        let mut cache = AnnotationCache::new(DEFAULT_WINDOW);
        let ann = cache
            .lookup(0x7f00_0000_0100, 0x100, Path::new(MODULE), &disasm)
            .unwrap()
            .unwrap();
        assert_eq!(ann.offset, 0x100);
        assert_eq!(ann.opcode, "90");
        assert_eq!(ann.instruction, "nop");
        assert_eq!(ann.source_line, "lib.c:256");
    }

    #[test]
    fn test_anomaly_truncates_prefetch() {
        let disasm = ScriptedDisasm::new(Some(0x108));
        let mut cache = AnnotationCache::new(DEFAULT_WINDOW);
        let base = 0x7f00_0000_0000u64;

        assert!(cache.lookup(base + 0x100, 0x100, Path::new(MODULE), &disasm).unwrap().is_some());
        // 0x100 and 0x104 cached, nothing at or past the anomaly
        assert_eq!(cache.len(), 2);

        // A pointer past the anomaly needs (and gets) a fresh invocation.
        assert!(cache.lookup(base + 0x10c, 0x10c, Path::new(MODULE), &disasm).unwrap().is_some());
        assert_eq!(disasm.calls(), 2);
    }

    #[test]
    fn test_anomalous_start_drops_sample() {
        let disasm = ScriptedDisasm::new(Some(0x100));
        let mut cache = AnnotationCache::new(DEFAULT_WINDOW);
        let got = cache.lookup(0x7f00_0000_0100, 0x100, Path::new(MODULE), &disasm).unwrap();
        assert!(got.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_start_offset_drops_sample() {
        struct Empty;
        impl Disassembler for Empty {
            fn decode(
                &self,
                _module: &Path,
                _start: u64,
                _stop: u64,
            ) -> Result<Vec<DecodedInst>, AnnotateError> {
                Ok(Vec::new())
            }
        }
        let mut cache = AnnotationCache::new(DEFAULT_WINDOW);
        let got = cache.lookup(0x40_0500, 0x40_0500, Path::new("/usr/bin/app"), &Empty).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_tool_failure_propagates() {
        struct Failing;
        impl Disassembler for Failing {
            fn decode(
                &self,
                _module: &Path,
                _start: u64,
                _stop: u64,
            ) -> Result<Vec<DecodedInst>, AnnotateError> {
                Err(AnnotateError::ToolInvocation {
                    tool: "objdump".to_string(),
                    reason: "exit status 1".to_string(),
                })
            }
        }
        let mut cache = AnnotationCache::new(DEFAULT_WINDOW);
        let err = cache.lookup(0x1000, 0x1000, Path::new("/usr/bin/app"), &Failing);
        assert!(matches!(err, Err(AnnotateError::ToolInvocation { .. })));
    }
}
