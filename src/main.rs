use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod aggregate;
mod common;
mod config;
mod dataset;
mod error;
mod excel;
mod logging;
mod mapping;
mod merge;

#[derive(Parser)]
#[command(
    name = "optmerge",
    version,
    about = "Merge duplicate option rows and fill an Excel template.",
    long_about = "optmerge collapses rows of a product export that share two key columns, joining their option text, and writes the result into a copy of an Excel template by matching column names. Outputs land in output/<YYYYMMDD>/MERGED_OPTIONS.xlsx."
)]
struct Cli {
    /// Verbose (debug) logging on stderr
    #[arg(long = "test-mode", global = true)]
    test_mode: bool,

    /// Log file path (default logs/<YYYYMMDD>.log)
    #[arg(long = "log-file", value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge options and write them into the template
    Merge(merge::MergeArgs),
    /// Print merged options as TSV without writing a template
    Aggregate(merge::AggregateArgs),
    /// Show the column mapping between a template and a data file
    Columns(merge::ColumnsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_file = cli
        .log_file
        .unwrap_or_else(|| config::default_log_file(config::today()));
    logging::init(&log_file, cli.test_mode)?;

    let outcome = match cli.command {
        Commands::Merge(args) => merge::run(args),
        Commands::Aggregate(args) => merge::run_aggregate(args),
        Commands::Columns(args) => merge::run_columns(args),
    };
    match &outcome {
        Ok(()) => info!("Program has been run successfully"),
        Err(err) => error!("unhandled error: {:#}", err),
    }
    outcome
}
