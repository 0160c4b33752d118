//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ibs-annotate",
    about = "Annotate decoded hardware samples with disassembly and source lines",
    after_help = "\
EXAMPLES:
    ibs-annotate --binary ./app --lib-trace ld.log --op op.csv
    ibs-annotate --binary ./app --lib-trace ld.log --op op.csv --fetch fetch.csv
    ibs-annotate --binary ./app --lib-trace ld.log --op op.csv -o results -j 8"
)]
pub struct Args {
    /// Decoded op-sample file to annotate
    #[arg(long, value_name = "FILE")]
    pub op: Option<PathBuf>,

    /// Decoded fetch-sample file to annotate
    #[arg(long, value_name = "FILE")]
    pub fetch: Option<PathBuf>,

    /// Dynamic-linker trace naming library load addresses
    #[arg(long, value_name = "FILE")]
    pub lib_trace: PathBuf,

    /// Profiled binary, used for samples outside every library
    #[arg(short, long, value_name = "FILE")]
    pub binary: PathBuf,

    /// Directory for the annotated output files
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Disassembler executable to invoke
    #[arg(long, default_value = "objdump", value_name = "PATH")]
    pub objdump: PathBuf,

    /// Lines per work chunk
    #[arg(long, default_value_t = 16_384)]
    pub chunk_lines: usize,

    /// Disassembly prefetch window in bytes
    #[arg(long, default_value_t = 0x3ff)]
    pub window: u64,

    /// Worker pool size (default: cores - 1)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Log each dropped record
    #[arg(short, long)]
    pub verbose: bool,
}
