//! `conductor run`: execute a plan end to end and exit 0 only when every
//! task is accepted.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use conductor_core::agent::discover_agents;
use conductor_core::executor::execute_waves;
use conductor_core::invoker::{ClaudeExecutor, Executor};
use conductor_core::logging::{ConsoleSink, EventSink, FileSink, MultiSink};
use conductor_core::plan::file::load_plan_with_qc_defaults;
use conductor_core::wave::plan_waves;

use crate::config::{self, Overrides};

pub async fn run(plan_path: &Path, overrides: Overrides, no_qc: bool, quiet: bool) -> Result<()> {
    let file = config::load_config()?;
    let resolved = config::resolve(overrides, file.as_ref())?;

    let mut plan = load_plan_with_qc_defaults(plan_path, resolved.qc_defaults.clone())
        .with_context(|| format!("failed to load plan {}", plan_path.display()))?;
    if no_qc {
        plan.qc.enabled = false;
    }

    // Sinks: console (unless quiet) + run log files.
    let mut sinks: Vec<Box<dyn EventSink>> = Vec::new();
    if !quiet {
        sinks.push(Box::new(ConsoleSink::new()));
    }
    sinks.push(Box::new(FileSink::new(resolved.log_dir.clone())));
    let sink: Arc<dyn EventSink> = Arc::new(MultiSink::new(sinks));

    // Discovery, then fatal pre-run validation: agent references and the
    // dependency graph, before anything spawns.
    let registry = Arc::new(discover_agents(&resolved.agents_dir, sink.as_ref()));
    plan.verify_agent_references(&registry)
        .context("plan references agents that were not discovered")?;
    let waves = plan_waves(&plan.tasks, resolved.max_concurrency)?;

    println!("Running plan: {}", plan.metadata.name);
    println!("  Tasks: {} in {} wave(s)", plan.tasks.len(), waves.len());
    println!("  Executor: {}", resolved.executor_binary);
    println!("  Max concurrency: {}", display_concurrency(resolved.max_concurrency));
    println!("  Agents: {} discovered", registry.len());

    let executor: Arc<dyn Executor> = Arc::new(
        ClaudeExecutor::with_binary(resolved.executor_binary.clone())
            .timeout(resolved.task_timeout),
    );

    // Graceful shutdown: first Ctrl+C cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let summary = execute_waves(&plan, &waves, registry, executor, sink, cancel).await;

    println!();
    if summary.cancelled {
        println!("Run interrupted. In-flight tasks drained.");
    }
    println!(
        "Result: {} ({} of {} task(s) completed)",
        summary.counts,
        summary.counts.total(),
        summary.planned_tasks
    );
    if !summary.agent_usage.is_empty() {
        println!("Agent usage:");
        for (agent, count) in &summary.agent_usage {
            println!("  {agent}: {count}");
        }
    }
    if !summary.failed_tasks.is_empty() {
        println!("Failed tasks:");
        for failed in &summary.failed_tasks {
            println!("  {} [{}]: {}", failed.task_id, failed.status, failed.feedback);
        }
    }

    if summary.cancelled {
        std::process::exit(130);
    }
    if !summary.all_accepted() {
        std::process::exit(1);
    }
    println!("All tasks accepted.");
    Ok(())
}

fn display_concurrency(max_concurrency: usize) -> String {
    if max_concurrency == 0 {
        "unlimited".to_string()
    } else {
        max_concurrency.to_string()
    }
}
