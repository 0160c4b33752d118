//! # ibs-annotate - Main Entry Point
//!
//! Parses arguments, builds the library map from the loader trace,
//! verifies the external disassembler is usable, and hands the requested
//! sample streams to the pipeline orchestrator.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ibs_annotate::cli::Args;
use ibs_annotate::disasm::Objdump;
use ibs_annotate::domain::SampleKind;
use ibs_annotate::pipeline::{Pipeline, PipelineConfig, StreamSpec};
use ibs_annotate::resolution::LibraryMap;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.to_string().to_lowercase().contains("missing required") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run(args: Args) -> Result<()> {
    if args.op.is_none() && args.fetch.is_none() {
        bail!(
            "Missing required argument: --op or --fetch\n\n\
             Usage:\n  \
             ibs-annotate --binary <FILE> --lib-trace <FILE> --op op.csv\n  \
             ibs-annotate --binary <FILE> --lib-trace <FILE> --op op.csv --fetch fetch.csv\n\n\
             Run 'ibs-annotate --help' for more options"
        );
    }

    let started = Instant::now();

    let (pid, library_map) = LibraryMap::parse(&args.lib_trace)
        .with_context(|| format!("Failed to parse loader trace {}", args.lib_trace.display()))?;
    info!("library map: {} entries, profiled pid {pid}", library_map.len());

    let disasm = Objdump::new(args.objdump.clone());
    disasm.preflight()?;

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let config = PipelineConfig {
        lines_per_chunk: args.chunk_lines,
        window: args.window,
        workers: args.jobs.map_or_else(|| PipelineConfig::default().workers, |j| j.max(1)),
    };
    info!("worker pool: {} threads, {} lines per chunk", config.workers, config.lines_per_chunk);

    let pipeline = Pipeline {
        library_map: &library_map,
        target_pid: pid,
        binary: &args.binary,
        disasm: &disasm,
        config,
    };

    let op = stream_spec(args.op, SampleKind::Op, &args.out_dir);
    let fetch = stream_spec(args.fetch, SampleKind::Fetch, &args.out_dir);
    let reports = pipeline.run(op, fetch)?;

    for report in &reports {
        println!(
            "{}: {} samples annotated, {} dropped ({:.1}s resolve, {:.1}s merge) -> {}",
            report.kind.label(),
            report.stats.annotated,
            report.stats.dropped,
            report.resolve_time.as_secs_f64(),
            report.merge_time.as_secs_f64(),
            report.output.display()
        );
    }
    println!("total: {:.1}s", started.elapsed().as_secs_f64());

    Ok(())
}

/// Derive the output path for one stream: `<out_dir>/<stem>_annotated.csv`.
fn stream_spec(input: Option<PathBuf>, kind: SampleKind, out_dir: &Path) -> Option<StreamSpec> {
    input.map(|input| {
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or(kind.label());
        let output = out_dir.join(format!("{stem}_annotated.csv"));
        StreamSpec { input, output, kind }
    })
}
