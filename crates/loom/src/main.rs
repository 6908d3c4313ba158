//! Loom - configuration-driven pipeline orchestration
//!
//! Main entry point for the Loom CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{activities, bridge, config, pipelines, run, validate};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Loom - compose, check and run activity pipelines
#[derive(Parser)]
#[command(name = "loom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Services file declaring activities and pipelines
    #[arg(long, global = true, env = "LOOM_SERVICES")]
    pub services: Option<PathBuf>,

    /// Directory holding the user config (default: ~/.config/loom)
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the activity catalog
    Activities(activities::ActivitiesArgs),

    /// List pipeline definitions
    Pipelines(pipelines::PipelinesArgs),

    /// Check that a pipeline's steps fit together
    Validate(validate::ValidateArgs),

    /// Suggest intermediate activities connecting two activities
    Bridge(bridge::BridgeArgs),

    /// Execute a pipeline with in-process workers
    Run(run::RunArgs),

    /// Show the effective configuration
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = loom_config::ConfigPaths::resolve(None, cli.config_dir.as_deref()).load();
    let logging = loaded.config.logging();

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "loom=debug,loom_pipeline=debug,loom_config=debug,info"
    } else {
        "loom=info,loom_pipeline=info,warn"
    };

    let file_layer = if logging.file_enabled {
        let log_dir = logging
            .directory
            .clone()
            .or_else(|| {
                cli.config_dir
                    .clone()
                    .or_else(loom_config::xdg_config_dir)
                    .map(|d| d.join("logs"))
            })
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "loom.log");
        Some(tracing_appender::non_blocking(file_appender))
    } else {
        None
    };
    let (file_writer, _guard) = match file_layer {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "loom=trace,loom_pipeline=trace,loom_config=trace,info",
                ))
        }))
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        services: cli.services,
        config: loaded,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Activities(args) => activities::run(args, &ctx).await,
        Commands::Pipelines(args) => pipelines::run(args, &ctx).await,
        Commands::Validate(args) => validate::run(args, &ctx).await,
        Commands::Bridge(args) => bridge::run(args, &ctx).await,
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
