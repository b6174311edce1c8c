//! Binary entry point for advisory.
//!
//! This binary wires host hooks to the advisory engine.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use advisory::config::{ConfigPaths, ConfigResolver, EnvVars};
use advisory::sources::{FileSource, SourceRegistry};
use advisory::{AdvisoryEngine, observability};
use clap::{Parser, Subcommand};
use commands::HookEvent;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Advisory - decision-time guidance for AI coding assistant sessions.
#[derive(Parser)]
#[command(name = "advisory")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding `baseline.toml` and `overrides.toml`.
    #[arg(short, long, global = true, env = "ADVISORY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Handle one hook event read from stdin.
    Hook {
        /// Hook event type.
        #[command(subcommand)]
        event: HookEvent,
    },

    /// Handle newline-delimited hook events from stdin with background workers.
    Serve,

    /// Run one cache sweep and expire unmatched emissions.
    Sweep,

    /// Show the resolved configuration.
    Config,
}

/// Main entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = cli
        .config_dir
        .as_deref()
        .map_or_else(ConfigPaths::discover, ConfigPaths::in_dir);
    let resolver = match ConfigResolver::bootstrap(paths.clone(), EnvVars::from_process()) {
        Ok(resolver) => resolver,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let config = resolver.snapshot();
    if let Err(e) = observability::init(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Config => commands::cmd_config(&config, &paths),
        command => {
            let engine = open_engine(resolver);
            match command {
                Commands::Hook { event } => commands::cmd_hook(event, &engine),
                Commands::Serve => commands::cmd_serve(&engine),
                Commands::Sweep => commands::cmd_sweep(&engine),
                Commands::Config => Ok(()),
            }
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Opens the engine over the file sources under the data directory.
fn open_engine(resolver: ConfigResolver) -> AdvisoryEngine {
    let sources_dir = resolver.snapshot().sources_dir();
    let mut registry = SourceRegistry::new();
    for source in FileSource::discover(&sources_dir) {
        registry.register(Arc::new(source));
    }
    if registry.is_empty() {
        tracing::debug!(dir = %sources_dir.display(), "No advice sources found");
    }
    AdvisoryEngine::open(resolver, registry)
}
