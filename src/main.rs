//! CLI entry point for rf-bench.
//!
//! Provides a command-line interface for:
//! - Running a measurement campaign from a JSON test plan
//! - Verifying connectivity to the bench instruments
//!
//! # Usage
//!
//! Run the campaign described by the default plan:
//! ```bash
//! rf-bench run
//! ```
//!
//! Check that both instruments answer `*IDN?`:
//! ```bash
//! rf-bench verify
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use rf_bench::{report, Bench, BenchConfig, Campaign, TestPlan};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "rf-bench")]
#[command(about = "RF test bench automation over SCPI", long_about = None)]
struct Cli {
    /// Test plan JSON file
    #[arg(long, default_value = "config/test_inputs.json")]
    inputs: PathBuf,

    /// Bench configuration INI file with the instrument addresses
    #[arg(long, default_value = "config/bench_config.ini")]
    bench: PathBuf,

    /// Directory for results_output.json and results_output.xlsx
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the measurement campaign (the default)
    Run,
    /// Connect to both instruments and print their identities
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => run_campaign(&cli).await,
        Commands::Verify => verify_bench(&cli).await,
    }
}

async fn run_campaign(cli: &Cli) -> Result<()> {
    let bench_config = BenchConfig::load(&cli.bench)?;
    let plan = TestPlan::load(&cli.inputs)?;
    let bench = Bench::new(bench_config);

    let records = Campaign::new(plan).run(&bench).await;

    std::fs::create_dir_all(&cli.output_dir)?;
    report::write_json(&records, &cli.output_dir)?;
    report::write_xlsx(&records, &cli.output_dir)?;

    let failed = records.iter().filter(|r| r.error.is_some()).count();
    tracing::info!(
        "Campaign finished: {} test sets, {} failed",
        records.len(),
        failed
    );
    Ok(())
}

async fn verify_bench(cli: &Cli) -> Result<()> {
    let bench_config = BenchConfig::load(&cli.bench)?;
    let bench = Bench::new(bench_config);
    let (vsa, vsg) = bench.verify().await?;
    println!("VSA: {}", vsa);
    println!("VSG: {}", vsg);
    Ok(())
}
