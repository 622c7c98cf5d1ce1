#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use env_logger::Env;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Once;
use std::time::Instant;

use concord::config::Manifest;
use concord::pipeline::{self, OutputPaths};

#[derive(Args)]
pub struct VoteArgs {
    /// Path to the ensemble manifest (.toml) listing every model
    pub manifest: PathBuf,

    /// Where to write the final 0/1 decision matrix (.csv). Never overwritten.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,

    /// Optional path for the diagnostic report (.toml)
    #[arg(long, value_name = "TOML")]
    pub report: Option<PathBuf>,

    /// Optional path for the raw weighted vote matrix (.tsv)
    #[arg(long, value_name = "TSV")]
    pub votes: Option<PathBuf>,

    /// Number of worker threads (defaults to all available cores)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the ensemble manifest (.toml) listing every model
    pub manifest: PathBuf,

    /// Number of worker threads (defaults to all available cores)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,
}

#[derive(Parser)]
#[command(
    name = "concord",
    version,
    about = "Weighted-vote aggregation and influence analysis for multi-label ensembles."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Aggregate every model in the manifest into one decision matrix
    #[command(about = "Aggregate an ensemble (outputs: decisions.csv, optional report and votes)")]
    Vote(VoteArgs),

    /// Validate an ensemble without voting or writing anything
    #[command(about = "Validate shapes, sample order, thresholds and weights of an ensemble")]
    Check(CheckArgs),
}

static RAYON_INIT: Once = Once::new();

fn init_thread_pool(threads: Option<usize>) {
    RAYON_INIT.call_once(|| {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        if let Err(e) = builder.build_global() {
            log::warn!("Could not configure the global thread pool: {e}");
        }
    });
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Vote(args)) => run_vote(args),
        Some(Commands::Check(args)) => run_check(args),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_vote(args: VoteArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    init_thread_pool(args.threads);
    let overall_start_time = Instant::now();

    let manifest = Manifest::load(&args.manifest)?;
    eprintln!(
        "> Manifest '{}' lists {} models over {} labels.",
        args.manifest.display(),
        manifest.models.len(),
        manifest.labels
    );

    let paths = OutputPaths {
        decisions: args.out,
        report: args.report,
        votes: args.votes,
    };
    // Fail before any expensive work when an output is already in place.
    pipeline::ensure_outputs_absent(&paths)?;

    let run = pipeline::run(&manifest)?;
    let diagnostics = &run.outcome.diagnostics;
    eprintln!(
        "> Conflict rate {:.4}, {} fallback rows across all models.",
        diagnostics.conflict_rate, diagnostics.total_fallbacks
    );
    for model in &diagnostics.models {
        eprintln!(
            "  - {:<24} weight {:.4}  agreement {:>6.2}%  decisiveness {:>6.2}%",
            model.name,
            model.weight,
            100.0 * model.agreement,
            100.0 * model.decisiveness
        );
    }

    pipeline::write_outputs(&run, &paths)?;
    eprintln!(
        "\nSuccess! Total execution time: {:.2?}",
        overall_start_time.elapsed()
    );
    Ok(())
}

fn run_check(args: CheckArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    init_thread_pool(args.threads);

    let manifest = Manifest::load(&args.manifest)?;
    let summary = pipeline::check(&manifest)?;
    println!(
        "Ensemble OK: {} models agree on {} samples x {} labels.",
        summary.models.len(),
        summary.shape.rows,
        summary.shape.cols
    );
    for (name, weight, fallbacks) in &summary.models {
        println!("  - {name:<24} weight {weight:.4}  fallback rows {fallbacks}");
    }
    Ok(())
}
