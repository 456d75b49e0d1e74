//! sublinear-solver CLI - JSON front-end for the sublinear estimators

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod format;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "sublinear-solver")]
#[command(about = "Approximate solutions of diagonally dominant linear systems", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Pretty-print JSON responses
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve A x = b from a JSON request
    Solve {
        /// Request file, or - for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Analyze a matrix from a JSON request
    Analyze {
        /// Request file, or - for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Serve JSON-lines tool calls on stdin/stdout
    Rpc,
}

fn init_logging(debug: bool, no_color: bool) {
    let filter = if debug {
        EnvFilter::new("sublinear_solver=debug,sublinear_solver_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    init_logging(cli.debug, cli.no_color);

    let result = run(&cli);

    match result {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("{}", format::format_error(&format!("{e:#}")));
            if cli.debug {
                eprintln!("\n{:#?}", e);
            } else {
                eprintln!("\n{}", "Run with --debug for more details".dimmed());
            }
            std::process::exit(1);
        }
    }
}

/// Execute the subcommand; `Ok(false)` means the request itself failed.
fn run(cli: &Cli) -> Result<bool> {
    let config = Config::load(cli.config.as_deref())?;
    config.apply_threads()?;
    let defaults = config.to_solver_config();

    match &cli.command {
        Commands::Solve { input } => commands::run_solve(input, &defaults, cli.pretty),
        Commands::Analyze { input } => commands::run_analyze(input, cli.pretty),
        Commands::Rpc => commands::run_rpc_stdio(&defaults).map(|()| true),
    }
}
