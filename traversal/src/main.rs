//! Run repeat queries from TOML files.
//!
//! Outputs are printed to stdout as JSON lines, one per traverser.
//! Diagnostics go to stderr (see [`traversal::logging`]).

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use traversal::error::StepError;
use traversal::exit_codes;
use traversal::io::config::{DEFAULT_CONFIG_PATH, TraversalConfig, load_config, write_config};
use traversal::io::query::load_query;
use traversal::logging;
use traversal::run::run_query_file;

#[derive(Parser)]
#[command(
    name = "traversal",
    version,
    about = "Run repeat queries over an in-memory graph"
)]
struct Cli {
    /// Path to the CLI config file. Missing means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run a query file and print each output as a JSON line.
    Run {
        query: PathBuf,
        /// Stop after this many outputs (overrides the query and config).
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Parse and validate a query file without running it.
    Validate { query: PathBuf },
    /// Print the compiled pipeline.
    Explain { query: PathBuf },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{:#}", err);
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run { query, limit } => cmd_run(&cli.config, &query, limit),
        Command::Validate { query } => cmd_validate(&query),
        Command::Explain { query } => cmd_explain(&query),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if !force && config_path.exists() {
        return Ok(());
    }
    write_config(config_path, &TraversalConfig::default())
}

fn cmd_run(config_path: &Path, query_path: &Path, limit: Option<usize>) -> Result<()> {
    let config = load_config(config_path)?;
    let outcome = run_query_file(query_path, &config, limit, |output| {
        println!("{}", serde_json::to_string(output)?);
        Ok(())
    })?;
    if config.print_side_effects {
        let line = serde_json::json!({ "side_effects": outcome.side_effects });
        println!("{line}");
    }
    Ok(())
}

fn cmd_validate(query_path: &Path) -> Result<()> {
    let query = load_query(query_path)?;
    query.compile()?;
    Ok(())
}

fn cmd_explain(query_path: &Path) -> Result<()> {
    let query = load_query(query_path)?;
    println!("{}", query.compile()?);
    Ok(())
}

/// Failures raised mid-pull map to `STEP_FAILED`; everything else is `INVALID`.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<StepError>() {
        Some(step_err) if !step_err.is_configuration() => exit_codes::STEP_FAILED,
        _ => exit_codes::INVALID,
    }
}
