//! segmetrics CLI - Segmentation performance evaluation tool

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

/// Evaluate image segmentation results against ground truth.
#[derive(Parser)]
#[command(name = "segmetrics")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a directory of segmentation results
    Evaluate {
        /// Directory containing the segmentation results
        seg_dir: PathBuf,

        /// Path of segmentation results relative to `seg_dir`, with one `*`
        seg_pattern: String,

        /// Path of the ground truth, the `*` is replaced by the part
        /// matched in `seg_pattern`
        gt_pattern: String,

        /// Output file (.csv, .tsv or .json)
        output: PathBuf,

        /// Measure specifications, e.g. `dice:ob` or `hsd:q=0.9:ob:sym`
        #[arg(short, long = "measure")]
        measures: Vec<String>,

        /// Number of worker threads
        #[arg(short, long, env = "SEGMETRICS_JOBS")]
        jobs: Option<usize>,

        /// Search the segmentation directory recursively
        #[arg(short, long)]
        recursive: bool,

        /// Segmentation labels are already unique (skip connected components)
        #[arg(long)]
        seg_unique: bool,

        /// Ground truth labels are already unique (skip connected components)
        #[arg(long)]
        gt_unique: bool,
    },

    /// List available measures
    Measures,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Evaluate {
            seg_dir,
            seg_pattern,
            gt_pattern,
            output,
            measures,
            jobs,
            recursive,
            seg_unique,
            gt_unique,
        } => commands::evaluate::run(
            &commands::evaluate::Args {
                seg_dir,
                seg_pattern,
                gt_pattern,
                output,
                measures,
                jobs,
                recursive,
                seg_unique,
                gt_unique,
            },
            cli.verbose,
        ),
        Commands::Measures => {
            commands::measures::run();
            Ok(())
        }
    }
}
