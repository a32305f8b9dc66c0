//! pixstash command-line entry point.
//!
//! Results are printed to stdout as pretty JSON. Logging goes to stderr so the
//! output stays machine-readable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pixstash_core::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pixstash")]
#[command(about = "Resolve remote images through a memory + disk cache", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Override the disk cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve image URLs and report which tier served each
    Resolve(commands::resolve::ResolveArgs),
    /// Delete every entry from the disk cache
    Purge,
    /// Print the effective configuration
    Config,
}

fn init_logging(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let mut config = AppConfig::load().context("failed to load configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    let output = match cli.command {
        Command::Resolve(args) => commands::resolve::run(&config, args).await?,
        Command::Purge => commands::purge::run(&config).await?,
        Command::Config => serde_json::to_value(&config)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
