use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use linkweave::beam::BeamEngine;
use linkweave::collective::Collective;
use linkweave::engine::{synthesize_best_of, SourceSelection, SynthesisEngine};
use linkweave::result::SynthesisResult;
use linkweave::topology::Topology;

#[derive(Parser)]
#[command(version, about = "Synthesize a collective-communication schedule for an NPU topology")]
struct Args {
    /// Topology CSV: NPU count, header, then src,dest,latency,bandwidth records
    topology: PathBuf,

    /// Use delay-ranked greedy source selection instead of uniform-random
    #[arg(long, conflicts_with_all = ["beam", "multiple"])]
    greedy: bool,

    /// Race this many randomized beams in lockstep and keep the earliest
    #[arg(long, value_name = "K", conflicts_with = "multiple")]
    beam: Option<usize>,

    /// Run this many independent baseline syntheses and keep the best
    #[arg(long, value_name = "K")]
    multiple: Option<usize>,

    /// Chunk size in bytes
    #[arg(long, default_value_t = 1 << 20)]
    chunk_size: u64,

    /// Initial chunks per NPU
    #[arg(long, default_value_t = 1)]
    chunks_per_npu: usize,

    /// Where to write the schedule CSV
    #[arg(long, default_value = "linkweave_result.csv")]
    output: PathBuf,

    /// Optional JSON run summary path
    #[arg(long)]
    stats: Option<PathBuf>,

    /// PRNG seed for a reproducible schedule
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            // help and version land on stdout and are not failures
            let code = if err.use_stderr() { 1 } else { 0 };
            return ExitCode::from(code);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.chunk_size == 0 {
        return Err("chunk size must be positive".into());
    }
    if args.chunks_per_npu == 0 {
        return Err("need at least one chunk per NPU".into());
    }
    if args.beam == Some(0) {
        return Err("beam width must be at least 1".into());
    }
    if args.multiple == Some(0) {
        return Err("run count must be at least 1".into());
    }

    let mut topology = Topology::from_csv_file(&args.topology)?;
    topology.set_chunk_size(args.chunk_size)?;
    let topology = Arc::new(topology);

    info!(
        npus = topology.npus_count(),
        links = topology.links_count(),
        "topology loaded"
    );

    let collective = Collective::all_gather(
        topology.npus_count(),
        args.chunk_size,
        args.chunks_per_npu,
    );

    info!(
        chunks = collective.chunks_count(),
        chunk_size = args.chunk_size,
        "all-gather collective prepared"
    );

    let mode = if args.greedy {
        "greedy".to_string()
    } else if let Some(width) = args.beam {
        format!("beam({width})")
    } else if let Some(runs) = args.multiple {
        format!("best-of({runs})")
    } else {
        "baseline".to_string()
    };

    let started = Instant::now();
    let result = synthesize(&args, &topology, &collective)?;
    let solve_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let collective_time = result.collective_time();
    println!(
        "synthesized {mode} all-gather schedule for {} NPUs / {} chunks",
        topology.npus_count(),
        collective.chunks_count()
    );
    println!(
        "  collective time: {collective_time} ps ({:.2} us)",
        collective_time as f64 / 1e6
    );
    println!("  transmissions:   {}", result.transmissions_count());
    println!("  solve time:      {solve_time_ms:.2} ms");

    result.to_csv_file(&args.output)?;
    println!("  schedule:        {}", args.output.display());

    if let Some(stats_path) = &args.stats {
        let summary = serde_json::json!({
            "topology": {
                "npus": topology.npus_count(),
                "links": topology.links_count(),
            },
            "collective": {
                "kind": "all-gather",
                "chunks": collective.chunks_count(),
                "chunk_size_bytes": args.chunk_size,
            },
            "mode": mode,
            "seed": args.seed,
            "collective_time_ps": collective_time,
            "transmissions": result.transmissions_count(),
            "solve_time_ms": solve_time_ms,
        });
        std::fs::write(stats_path, serde_json::to_string_pretty(&summary)?)?;
        println!("  summary:         {}", stats_path.display());
    }

    Ok(())
}

fn synthesize(
    args: &Args,
    topology: &Arc<Topology>,
    collective: &Collective,
) -> Result<SynthesisResult, linkweave::SynthesisError> {
    let selection = if args.greedy {
        SourceSelection::greedy()
    } else {
        SourceSelection::Random
    };

    if let Some(width) = args.beam {
        let engine = match args.seed {
            Some(seed) => BeamEngine::with_seed(
                Arc::clone(topology),
                collective,
                width,
                selection,
                seed,
            )?,
            None => BeamEngine::new(Arc::clone(topology), collective, width, selection)?,
        };
        return engine.synthesize();
    }

    if let Some(runs) = args.multiple {
        return synthesize_best_of(topology, collective, runs, selection, args.seed);
    }

    let engine = match args.seed {
        Some(seed) => {
            SynthesisEngine::with_seed(Arc::clone(topology), collective, selection, seed)?
        }
        None => SynthesisEngine::new(Arc::clone(topology), collective, selection)?,
    };
    engine.synthesize()
}
