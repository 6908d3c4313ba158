//! Pipelines command - list pipeline definitions.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use loom_pipeline::PipelineDefinition;

use super::Context;

/// Arguments for the pipelines command.
#[derive(Args, Debug)]
pub struct PipelinesArgs {
    /// Show each pipeline's steps
    #[arg(short, long)]
    pub steps: bool,
}

/// Run the pipelines command.
pub async fn run(args: PipelinesArgs, ctx: &Context) -> Result<()> {
    let services = ctx.load_services()?;
    let definitions: Vec<&PipelineDefinition> = services.pipelines.iter().collect();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    if definitions.is_empty() {
        println!("No pipelines defined in {}", services.path.display());
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    for definition in definitions {
        println!(
            "{} {}",
            style(&definition.name).bold(),
            dim.apply_to(format!("({} steps)", definition.steps.len()))
        );
        if !definition.description.is_empty() {
            println!("  {}", dim.apply_to(&definition.description));
        }
        if args.steps || ctx.verbose {
            for (index, step) in definition.steps.iter().enumerate() {
                let transform = step.transform.as_deref().unwrap_or("-");
                println!(
                    "  {index}. {:<40} {:<6} {}",
                    step.activity.to_string(),
                    step.kind.to_string(),
                    dim.apply_to(format!("transform: {transform}"))
                );
            }
        }
    }
    println!();

    Ok(())
}
