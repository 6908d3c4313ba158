//! Bridge command - suggest activities that connect two activities.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use loom_pipeline::{ActivityCatalog, ActivityKey, BridgeSuggestion, GapBridger};

use super::Context;

/// Arguments for the bridge command.
#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Producing activity (`service.activity` or a unique bare name)
    pub start: String,

    /// Consuming activity (`service.activity` or a unique bare name)
    pub end: String,

    /// Maximum intermediate activities to insert
    #[arg(long)]
    pub max_hops: Option<usize>,
}

#[derive(Debug, Serialize)]
struct BridgeOutput {
    start: ActivityKey,
    end: ActivityKey,
    max_hops: usize,
    suggestion: Option<BridgeSuggestion>,
}

/// Run the bridge command.
pub async fn run(args: BridgeArgs, ctx: &Context) -> Result<()> {
    let services = ctx.load_services()?;
    let start = resolve_key(&services.catalog, &args.start)?;
    let end = resolve_key(&services.catalog, &args.end)?;

    let max_hops = args
        .max_hops
        .unwrap_or_else(|| ctx.config.config.pipeline().max_bridge_hops);
    let bridger = GapBridger::new(&services.catalog, &services.transforms).with_max_hops(max_hops);
    let suggestion = bridger.suggest_bridge(&start, &end)?;

    if ctx.json_output {
        let output = BridgeOutput {
            start,
            end,
            max_hops,
            suggestion,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    match suggestion {
        Some(suggestion) => {
            println!("{}", style("Suggested chain").bold());
            for hop in &suggestion.hops {
                if let Some(ref from) = hop.from {
                    println!(
                        "  {} -> {} {}",
                        from,
                        hop.to,
                        dim.apply_to(format!("via {}", hop.transform))
                    );
                }
            }
            println!();
            println!("{}", suggestion.rationale);
        }
        None => {
            println!(
                "No known bridge from {start} to {end} within {max_hops} intermediate activities"
            );
        }
    }
    println!();

    Ok(())
}

/// Accept either the qualified form or a bare name unique across services.
fn resolve_key(catalog: &ActivityCatalog, name: &str) -> Result<ActivityKey> {
    if name.contains('.') {
        let key: ActivityKey = name.parse()?;
        catalog.get(&key)?;
        return Ok(key);
    }
    Ok(catalog.lookup_by_name(name)?.key.clone())
}
