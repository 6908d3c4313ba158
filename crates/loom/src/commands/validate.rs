//! Validate command - check a pipeline and suggest bridges for its gaps.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use loom_pipeline::{BridgeSuggestion, GapBridger, StepCheck, ValidationReport};

use super::Context;

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Pipeline to validate
    pub pipeline: String,

    /// Maximum intermediate activities per bridge suggestion
    #[arg(long)]
    pub max_hops: Option<usize>,
}

/// Bridge suggestion for one incompatible step, for JSON output.
#[derive(Debug, Serialize)]
struct StepBridge {
    step_index: usize,
    suggestion: Option<BridgeSuggestion>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidateOutput<'a> {
    report: &'a ValidationReport,
    bridges: Vec<StepBridge>,
}

/// Run the validate command.
pub async fn run(args: ValidateArgs, ctx: &Context) -> Result<()> {
    let services = ctx.load_services()?;
    let executor = services.executor(ctx);
    let report = executor.validate(&args.pipeline)?;

    let max_hops = args
        .max_hops
        .unwrap_or_else(|| ctx.config.config.pipeline().max_bridge_hops);
    let bridger = GapBridger::new(&services.catalog, &services.transforms).with_max_hops(max_hops);

    let bridges: Vec<StepBridge> = report
        .entries
        .iter()
        .filter_map(|entry| entry.bridge.as_ref().map(|req| (entry.step_index, req)))
        .map(|(step_index, request)| match bridger.suggest_for(request) {
            Ok(suggestion) => StepBridge {
                step_index,
                suggestion,
                error: None,
            },
            Err(e) => StepBridge {
                step_index,
                suggestion: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    if ctx.json_output {
        let output = ValidateOutput {
            report: &report,
            bridges,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&report, &bridges);
    }

    if !report.ok {
        bail!("Pipeline '{}' failed validation", report.pipeline);
    }
    Ok(())
}

fn print_report(report: &ValidationReport, bridges: &[StepBridge]) {
    let green = Style::new().green();
    let red = Style::new().red();
    let yellow = Style::new().yellow();
    let dim = Style::new().dim();

    println!();
    println!("{}", style(format!("Pipeline '{}'", report.pipeline)).bold());
    println!("{}", dim.apply_to("─".repeat(40)));

    for problem in &report.problems {
        println!("  {} {}", red.apply_to("✗"), problem);
    }

    for entry in &report.entries {
        let marker = match entry.status {
            StepCheck::Ok => green.apply_to("✓"),
            StepCheck::Unverified => yellow.apply_to("?"),
            _ => red.apply_to("✗"),
        };
        println!(
            "  {} {}. {} {}",
            marker,
            entry.step_index,
            entry.activity,
            dim.apply_to(format!("[{}]", entry.status))
        );
        if !entry.is_ok() {
            println!("      {}", entry.message);
        } else if let Some(ref transform) = entry.transform {
            println!("      {}", dim.apply_to(format!("transform: {transform}")));
        }

        if let Some(bridge) = bridges.iter().find(|b| b.step_index == entry.step_index) {
            match (&bridge.suggestion, &bridge.error) {
                (Some(suggestion), _) => {
                    let chain: Vec<String> =
                        suggestion.chain.iter().map(|k| k.to_string()).collect();
                    println!(
                        "      {} {}",
                        yellow.apply_to("bridge:"),
                        chain.join(" -> ")
                    );
                    println!("      {}", dim.apply_to(&suggestion.rationale));
                }
                (None, Some(error)) => {
                    println!("      {} {}", yellow.apply_to("bridge:"), error);
                }
                (None, None) => {
                    println!("      {} no known bridge", yellow.apply_to("bridge:"));
                }
            }
        }
    }

    println!();
    if report.ok {
        println!("{}", green.apply_to("Pipeline is valid"));
    } else {
        println!("{}", red.apply_to(report.summary()));
    }
    println!();
}
