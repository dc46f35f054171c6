//! BugHunter - locate bugs in code snippets against their documentation
//!
//! Reads a CSV of snippets, runs the verification-retrieval loop on each row,
//! and writes the suspected bug lines with an explanation.

use anyhow::{Context, Result};
use bughunter_adapters::config::load_env_file;
use bughunter_adapters::csv_io::{load_input_csv, write_output_csv};
use bughunter_adapters::{Config, McpSearch};
use bughunter_engine::llm::{ChatClient, RetryPolicy};
use bughunter_engine::steps::HeuristicAnalyzer;
use bughunter_engine::{Pipeline, Workflow};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "bughunter",
    about = "Locate bugs in code snippets using documentation retrieval",
    version
)]
struct Args {
    /// Input CSV with ID, Code and Context columns
    #[arg(long)]
    input: PathBuf,

    /// Where to write the ID, Bug Line, Explanation CSV
    #[arg(long)]
    output: PathBuf,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the verification iteration cap
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Record failed rows as ERROR instead of aborting the batch
    #[arg(long)]
    keep_going: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "bughunter=debug,bughunter_engine=debug,bughunter_adapters=debug"
    } else {
        "bughunter=info,bughunter_engine=info,bughunter_adapters=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(env_file) = load_env_file(None) {
        debug!("Loaded environment from {}", env_file.display());
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .with_env_overrides();
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations.max(1);
    }

    let api_key = config.require_api_key()?;

    // Column check happens here, before any row runs.
    let rows = load_input_csv(&args.input)?;
    info!(
        "Loaded {} rows from {} (model {}, max {} iterations)",
        rows.len(),
        args.input.display(),
        config.model,
        config.max_iterations
    );

    let completion = ChatClient::new(&config, api_key).context("Failed to set up chat client")?;
    let search = McpSearch::new(
        config.mcp_server_url.clone(),
        config.search_tool.clone(),
        config.request_timeout_secs,
    )
    .context("Failed to set up MCP search client")?;

    let workflow = Workflow::new(
        Arc::new(HeuristicAnalyzer),
        Arc::new(search),
        Arc::new(completion),
    )
    .with_retry_policy(RetryPolicy::from_config(&config));
    let pipeline = Pipeline::new(workflow, config.max_iterations);

    let results = pipeline.run_batch(rows, args.keep_going).await?;
    write_output_csv(&results, &args.output)?;

    eprintln!(
        "Output written to {} ({} rows)",
        args.output.display(),
        results.len()
    );
    Ok(())
}
