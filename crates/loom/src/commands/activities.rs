//! Activities command - list the activity catalog.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use loom_pipeline::ActivityDescriptor;

use super::Context;

/// Arguments for the activities command.
#[derive(Args, Debug)]
pub struct ActivitiesArgs {
    /// Only list activities of this service
    #[arg(long)]
    pub service: Option<String>,
}

/// Run the activities command.
pub async fn run(args: ActivitiesArgs, ctx: &Context) -> Result<()> {
    let services = ctx.load_services()?;
    let catalog = &services.catalog;

    let listed: Vec<&ActivityDescriptor> = match args.service {
        Some(ref service) => catalog.by_service(service).collect(),
        None => catalog.all().collect(),
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    if listed.is_empty() {
        match args.service.as_deref() {
            Some(service) => println!("No activities registered for service '{service}'"),
            None => println!("No activities registered"),
        }
        return Ok(());
    }

    let dim = Style::new().dim();
    let mut current_service = "";
    for descriptor in listed {
        if descriptor.service() != current_service {
            current_service = descriptor.service();
            println!();
            if descriptor.task_queue.is_empty() {
                println!("{}", style(current_service).bold());
            } else {
                println!(
                    "{} {}",
                    style(current_service).bold(),
                    dim.apply_to(format!("(queue: {})", descriptor.task_queue))
                );
            }
        }

        let params: Vec<String> = descriptor
            .parameters
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.shape)
            })
            .collect();
        println!(
            "  {:<24} ({}) -> {}",
            descriptor.name(),
            params.join(", "),
            descriptor.return_type
        );
        if ctx.verbose {
            if !descriptor.description.is_empty() {
                println!("    {}", dim.apply_to(&descriptor.description));
            }
            println!(
                "    {}",
                dim.apply_to(format!(
                    "timeout {:?}, {} attempts",
                    descriptor.timeout, descriptor.retry_policy.max_attempts
                ))
            );
        }
    }
    println!();

    Ok(())
}
