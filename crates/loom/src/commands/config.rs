//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::Style;
use serde::Serialize;

use loom_config::{LoomConfig, PipelineSection};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: Option<ConfigCommand>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration (default)
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./loom.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Serialize)]
struct ShowOutput<'a> {
    sources: Vec<PathBuf>,
    services_file: Option<PathBuf>,
    config: &'a LoomConfig,
    warnings: &'a [String],
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command.unwrap_or(ConfigCommand::Show) {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local, force } => cmd_init(ctx, local, force),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.config;
    let sources: Vec<PathBuf> = loaded
        .loaded_from()
        .into_iter()
        .map(|p| p.to_path_buf())
        .collect();

    if ctx.json_output {
        let output = ShowOutput {
            sources,
            services_file: ctx.services_path(),
            config: &loaded.config,
            warnings: &loaded.warnings,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("# Loom Configuration\n");

    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    match ctx.services_path() {
        Some(path) => println!("Services file: {}\n", path.display()),
        None => println!("Services file: (none)\n"),
    }

    let pipeline = loaded.config.pipeline();
    println!("Pipeline:");
    println!("  default_collection:    {}", pipeline.default_collection);
    println!("  default_top_k:         {}", pipeline.default_top_k);
    println!("  revalidate_before_run: {}", pipeline.revalidate_before_run);
    println!("  max_bridge_hops:       {}", pipeline.max_bridge_hops);
    println!("  default_timeout:       {:?}", pipeline.default_timeout());
    println!(
        "  default_retry:         {} attempts, {:?} initial, {:?} max, x{}",
        pipeline.default_retry_attempts,
        pipeline.default_retry_initial_interval(),
        pipeline.default_retry_max_interval(),
        pipeline.default_backoff_coefficient
    );
    println!();

    let logging = loaded.config.logging();
    println!("Logging:");
    println!("  file_enabled: {}", logging.file_enabled);
    if let Some(ref dir) = logging.directory {
        println!("  directory:    {}", dir.display());
    }
    println!();

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        if let Ok(toml_str) = loaded.config.to_toml() {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    let green = Style::new().green();
    let dim = Style::new().dim();

    println!("Config file search order (later overrides earlier):\n");
    for source in &ctx.config.sources {
        let status = if source.loaded {
            green.apply_to("✓ loaded")
        } else {
            dim.apply_to("· not found")
        };
        println!("  {} {:<8} {}", status, source.layer, source.path.display());
    }
    println!();

    Ok(())
}

fn cmd_init(ctx: &Context, local: bool, force: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("loom.toml")
    } else {
        match ctx.config.user_config_path() {
            Some(path) => path.to_path_buf(),
            None => bail!("Could not determine the user config directory"),
        }
    };

    if path.exists() && !force {
        bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    let config = LoomConfig {
        pipeline: Some(PipelineSection::default()),
        logging: None,
    };
    loom_config::save_config(&config, &path)?;
    println!("Created {}", path.display());

    Ok(())
}
