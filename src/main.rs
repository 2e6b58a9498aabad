//! Command-line entry point for the TCP echo benchmark.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use echo_bench::{Args, BenchmarkConfig, BenchmarkRunner};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = BenchmarkConfig::from_args(&args)?;

    let report = BenchmarkRunner::new(config).run()?;
    println!("{}", report);

    if let Some(path) = args.output_file {
        let json = serde_json::to_string_pretty(&report).context("serialize report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("write report to {}", path.display()))?;
        info!("report written to {}", path.display());
    }

    Ok(())
}
