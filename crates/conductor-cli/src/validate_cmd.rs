//! `conductor validate`: parse a plan, check its graph and agent
//! references, and print the wave layout. Never spawns the executor.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use conductor_core::agent::discover_agents;
use conductor_core::logging::NoopSink;
use conductor_core::plan::file::load_plan;
use conductor_core::wave::plan_waves;

use crate::config::{self, Overrides};

pub fn run(plan_path: &Path, agents_dir: Option<PathBuf>) -> Result<()> {
    let file = config::load_config()?;
    let resolved = config::resolve(
        Overrides {
            agents_dir,
            ..Overrides::default()
        },
        file.as_ref(),
    )?;

    let plan = load_plan(plan_path)
        .with_context(|| format!("failed to load plan {}", plan_path.display()))?;

    let registry = discover_agents(&resolved.agents_dir, &NoopSink);
    plan.verify_agent_references(&registry)
        .context("plan references agents that were not discovered")?;

    let waves = plan_waves(&plan.tasks, resolved.max_concurrency)?;

    println!("Plan: {}", plan.metadata.name);
    if let Some(description) = &plan.metadata.description {
        println!("  {description}");
    }
    println!(
        "  {} task(s), QC {}",
        plan.tasks.len(),
        if plan.qc.enabled { "enabled" } else { "disabled" }
    );
    println!();
    for wave in &waves {
        println!(
            "{} (concurrency {}):",
            wave.name, wave.max_concurrency
        );
        for task_id in &wave.task_ids {
            // Ids in a planner wave always come from the plan.
            if let Some(task) = plan.task(task_id) {
                let agent = task.agent_name.as_deref().unwrap_or("-");
                println!("  {task_id}  agent={agent}");
            }
        }
    }
    println!();
    println!("Plan is valid.");
    Ok(())
}
