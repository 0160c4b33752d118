//! objdump invocation and listing parsing
//!
//! Invokes `objdump -d -l` over a bounded address window and scrapes the
//! per-instruction listing. With debug info present the listing
//! interleaves `path:line` locations between instructions; those are
//! carried forward onto each following instruction until the next one.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{DecodedInst, Disassembler};
use crate::domain::AnnotateError;

/// objdump-backed disassembler.
#[derive(Debug, Clone)]
pub struct Objdump {
    program: PathBuf,
}

impl Objdump {
    #[must_use]
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Verify the tool can be invoked at all, before resolution starts.
    ///
    /// # Errors
    /// Returns `AnnotateError::ToolInvocation` if `--version` fails.
    pub fn preflight(&self) -> Result<(), AnnotateError> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .map_err(|e| self.invocation_error(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(self.invocation_error(format!("--version exited with {}", output.status)))
        }
    }

    fn invocation_error(&self, reason: String) -> AnnotateError {
        AnnotateError::ToolInvocation {
            tool: self.program.display().to_string(),
            reason,
        }
    }
}

impl Disassembler for Objdump {
    fn decode(
        &self,
        module: &Path,
        start: u64,
        stop: u64,
    ) -> Result<Vec<DecodedInst>, AnnotateError> {
        let output = Command::new(&self.program)
            .arg("-d")
            .arg("-l")
            .arg(format!("--start-address=0x{start:x}"))
            .arg(format!("--stop-address=0x{stop:x}"))
            .arg(module)
            .output()
            .map_err(|e| self.invocation_error(e.to_string()))?;

        if !output.status.success() {
            return Err(self.invocation_error(format!(
                "disassembly of {} exited with {}",
                module.display(),
                output.status
            )));
        }

        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse a `-d -l` listing into ordered instructions with carried source
/// locations.
#[must_use]
pub fn parse_listing(text: &str) -> Vec<DecodedInst> {
    let mut insts = Vec::new();
    let mut current_source: Option<String> = None;

    for line in text.lines() {
        if let Some((offset, opcode, mnemonic)) = parse_instruction_line(line) {
            insts.push(DecodedInst { offset, opcode, mnemonic, source: current_source.clone() });
        } else if let Some(source) = parse_source_line(line) {
            current_source = Some(source);
        }
    }

    insts
}

/// Instruction lines look like `  4004f6:\t55          \tpush   %rbp`.
/// Symbol labels (`00000000004004f0 <main>:`) fail the hex parse because
/// of the symbol suffix; section headers have no leading hex at all.
fn parse_instruction_line(line: &str) -> Option<(u64, String, String)> {
    let (addr, rest) = line.split_once(':')?;
    let offset = u64::from_str_radix(addr.trim(), 16).ok()?;
    let mut fields = rest.trim_start_matches('\t').splitn(2, '\t');
    let opcode = fields.next()?.trim().to_string();
    let mnemonic = fields.next().unwrap_or("").trim().to_string();
    Some((offset, opcode, mnemonic))
}

/// Source-location lines start in column zero and end in `:<line>`,
/// optionally followed by a discriminator note.
fn parse_source_line(line: &str) -> Option<String> {
    if line.is_empty() || line.starts_with(char::is_whitespace) {
        return None;
    }
    let body = line.trim_end();
    let body = body.split(" (discriminator").next().unwrap_or(body);
    let (_, lineno) = body.rsplit_once(':')?;
    lineno.parse::<u32>().ok()?;
    Some(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\n\
/usr/bin/app:     file format elf64-x86-64\n\
\n\
Disassembly of section .text:\n\
\n\
0000000000400500 <main>:\n\
main():\n\
/src/app/main.c:10\n\
\x20 400500:\t55                   \tpush   %rbp\n\
\x20 400501:\t48 89 e5             \tmov    %rsp,%rbp\n\
/src/app/main.c:12\n\
\x20 400504:\tb8 00 00 00 00       \tmov    $0x0,%eax\n\
\x20 400509:\t5d                   \tpop    %rbp\n";

    #[test]
    fn test_parse_listing_offsets_and_text() {
        let insts = parse_listing(LISTING);
        assert_eq!(insts.len(), 4);
        assert_eq!(insts[0].offset, 0x40_0500);
        assert_eq!(insts[0].opcode, "55");
        assert_eq!(insts[0].mnemonic, "push   %rbp");
        assert_eq!(insts[1].opcode, "48 89 e5");
    }

    #[test]
    fn test_source_line_carries_forward_until_replaced() {
        let insts = parse_listing(LISTING);
        assert_eq!(insts[0].source.as_deref(), Some("/src/app/main.c:10"));
        assert_eq!(insts[1].source.as_deref(), Some("/src/app/main.c:10"));
        assert_eq!(insts[2].source.as_deref(), Some("/src/app/main.c:12"));
        assert_eq!(insts[3].source.as_deref(), Some("/src/app/main.c:12"));
    }

    #[test]
    fn test_headers_and_labels_are_ignored() {
        // only the four instruction lines survive
        let insts = parse_listing(LISTING);
        assert!(insts.iter().all(|i| i.offset >= 0x40_0500));
    }

    #[test]
    fn test_no_source_before_first_location_line() {
        let listing = "  400500:\t55                   \tpush   %rbp\n";
        let insts = parse_listing(listing);
        assert_eq!(insts.len(), 1);
        assert!(insts[0].source.is_none());
    }

    #[test]
    fn test_bad_decode_is_anomalous() {
        let listing = "  400500:\tff ff                \t(bad)\n";
        let insts = parse_listing(listing);
        assert!(insts[0].is_anomalous());
    }

    #[test]
    fn test_byte_continuation_line_is_anomalous() {
        // long constants wrap onto byte-only lines with no mnemonic
        let listing = "  400500:\t48 b8 00 11 22 33 44 55\n";
        let insts = parse_listing(listing);
        assert_eq!(insts.len(), 1);
        assert!(insts[0].is_anomalous());
    }

    #[test]
    fn test_discriminator_suffix_is_stripped() {
        let listing = "/src/app/loop.c:42 (discriminator 3)\n\
                       \x20 400500:\t90                   \tnop\n";
        let insts = parse_listing(listing);
        assert_eq!(insts[0].source.as_deref(), Some("/src/app/loop.c:42"));
    }
}
