//! Run command - execute a pipeline with in-process workers.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::{Style, style};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use loom_pipeline::{ActivityCatalog, HandlerTable, PipelineRun, RunStatus, TaskQueueHub, builtin};

use super::Context;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline to execute
    pub pipeline: String,

    /// Input payload as JSON, or `@path` to read it from a file
    #[arg(short, long, default_value = "{}")]
    pub input: String,

    /// Serve remote activities without a built-in handler by echoing their input
    #[arg(long)]
    pub echo_remote: bool,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let services = ctx.load_services()?;
    let input = parse_input(&args.input)?;

    let mut handlers = builtin::handlers();
    if args.echo_remote {
        handlers.extend(echo_handlers(&services.catalog, &handlers));
    }

    let hub = TaskQueueHub::new();
    let cancel = CancellationToken::new();
    for queue in task_queues(&services.catalog) {
        hub.spawn_worker(&queue, handlers.clone(), cancel.child_token());
    }

    let executor = services
        .executor(ctx)
        .with_handlers(handlers)
        .with_remote(Arc::new(hub));

    // Ctrl-C stops the run at the next step boundary.
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling run");
            interrupt.cancel();
        }
    });

    let run = executor
        .execute_with_cancel(&args.pipeline, input, cancel.child_token())
        .await?;
    cancel.cancel();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run, ctx.verbose)?;
    }

    if !run.is_success() {
        bail!("Run {} ended {}", run.run_id, run.status);
    }
    Ok(())
}

fn parse_input(raw: &str) -> Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("Input is not valid JSON")
}

/// Distinct task queues declared in the catalog.
fn task_queues(catalog: &ActivityCatalog) -> BTreeSet<String> {
    catalog
        .all()
        .filter(|d| !d.task_queue.is_empty())
        .map(|d| d.task_queue.clone())
        .collect()
}

/// Echo handlers for remote activities that `existing` does not cover.
fn echo_handlers(catalog: &ActivityCatalog, existing: &HandlerTable) -> HandlerTable {
    let mut table = HandlerTable::new();
    for descriptor in catalog.all().filter(|d| !d.task_queue.is_empty()) {
        if !existing.contains(&descriptor.key) {
            debug!(activity = %descriptor.key, "Serving remote activity with echo");
            table.insert_fn(descriptor.key.clone(), |input| async move {
                builtin::echo(input)
            });
        }
    }
    table
}

fn print_run(run: &PipelineRun, verbose: bool) -> Result<()> {
    let green = Style::new().green();
    let red = Style::new().red();
    let dim = Style::new().dim();

    println!();
    println!(
        "{} {}",
        style(format!("Run of '{}'", run.pipeline_name)).bold(),
        dim.apply_to(run.run_id)
    );
    println!("{}", dim.apply_to("─".repeat(40)));

    for step in &run.steps {
        let marker = if step.succeeded() {
            green.apply_to("✓")
        } else {
            red.apply_to("✗")
        };
        println!(
            "  {} {}. {} {}",
            marker,
            step.step_index,
            step.activity,
            dim.apply_to(format!(
                "{} attempt(s), {:.2?}",
                step.attempt_count, step.elapsed
            ))
        );
        if let Some(ref error) = step.error {
            println!("      {error}");
        }
        if verbose && let Some(ref transform) = step.transform {
            println!("      {}", dim.apply_to(format!("transform: {transform}")));
        }
    }

    println!();
    let status = match run.status {
        RunStatus::Succeeded => green.apply_to(run.status.to_string()),
        _ => red.apply_to(run.status.to_string()),
    };
    println!("Status: {status}");

    if let Some(output) = run.final_output() {
        println!();
        println!("{}", serde_json::to_string_pretty(output)?);
    }
    println!();

    Ok(())
}
