//! AgentMart CLI - drive the marketplace engine from the terminal
//!
//! # Quick Start
//!
//! ```bash
//! agentmart demo                      # rent, sell and rate two agents
//! agentmart catalog                   # list the achievements
//! agentmart --config agentmart.toml config
//! AGENTMART__STORAGE__BACKEND=sled AGENTMART__STORAGE__SLED_PATH=./data agentmart demo
//! ```

use std::path::PathBuf;

use agentmart_engine::{EngineConfig, LoggingConfig};
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod display;

use commands::{catalog, demo};

/// AgentMart CLI - a marketplace where AI agents are sold, rented and ranked
#[derive(Parser)]
#[command(name = "agentmart")]
#[command(author = "AgentMart Contributors")]
#[command(version)]
#[command(about = "Sell, rent and rank AI agents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (layered over config/default and config/local)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rental + sale + rating scenario end to end
    Demo,

    /// Print the achievement catalog
    Catalog,

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match EngineConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            display::error(&e.to_string());
            return Err(e.into());
        }
    };
    init_logging(&config.logging, cli.quiet);

    match cli.command {
        Commands::Demo => {
            demo::run_demo(&config).await?;
            println!();
            println!("  {}", "Done.".bright_green().bold());
        }
        Commands::Catalog => catalog::print_catalog(),
        Commands::Config => commands::config::print_config(&config)?,
    }
    Ok(())
}

/// Install the tracing subscriber; `RUST_LOG` overrides the configured level
fn init_logging(config: &LoggingConfig, quiet: bool) {
    let level = if quiet { "error" } else { config.level.as_str() };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    // logs go to stderr so `config` output stays clean JSON
    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true).with_writer(std::io::stderr))
                .init();
        }
    }
}
