//! Wave planning: layers the task DAG into an ordered list of waves, each a
//! set of tasks whose dependencies are satisfied by strictly earlier waves.
//!
//! Validation collects every offender before failing, so a broken plan is
//! reported in one pass. Layering is Kahn's algorithm; ties inside a wave
//! break by lexicographic task id, making the output deterministic.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::plan::{Task, TaskType};

/// A set of tasks executable concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    /// Display name: `wave-1`, `wave-2`, ...
    pub name: String,
    /// Task ids in lexicographic order.
    pub task_ids: Vec<String>,
    /// Concurrency ceiling for this wave: `min(|wave|, configured)`.
    pub max_concurrency: usize,
}

/// One defect in the dependency graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphIssue {
    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnresolvedDependency { task: String, dependency: String },

    #[error("task {task:?} depends on itself")]
    SelfDependency { task: String },

    #[error("integration task {task:?} has no dependencies")]
    IntegrationWithoutDeps { task: String },

    #[error("dependency cycle involving tasks: {}", tasks.join(", "))]
    CycleDetected { tasks: Vec<String> },
}

/// The plan's graph is invalid; every offender is listed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid task graph:\n{}", issues.iter().map(|i| format!("  - {i}")).collect::<Vec<_>>().join("\n"))]
pub struct PlanningError {
    pub issues: Vec<GraphIssue>,
}

/// Layer `tasks` into waves.
///
/// `configured_max_concurrency` caps each wave's parallelism; `0` means no
/// limit (the wave's own size). Planning the same tasks twice yields the
/// identical wave sequence.
pub fn plan_waves(
    tasks: &[Task],
    configured_max_concurrency: usize,
) -> Result<Vec<Wave>, PlanningError> {
    validate(tasks)?;

    let known: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut scheduled: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&Task> = tasks.iter().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&Task>, Vec<&Task>) = remaining
            .into_iter()
            .partition(|t| t.depends_on.iter().all(|d| scheduled.contains(d.as_str())));

        if ready.is_empty() {
            // Every remaining task waits on another remaining task: a cycle.
            let mut tasks_in_cycle: Vec<String> =
                blocked.iter().map(|t| t.id.clone()).collect();
            tasks_in_cycle.sort();
            return Err(PlanningError {
                issues: vec![GraphIssue::CycleDetected {
                    tasks: tasks_in_cycle,
                }],
            });
        }

        let mut task_ids: Vec<String> = ready.iter().map(|t| t.id.clone()).collect();
        task_ids.sort();
        for id in &task_ids {
            scheduled.insert(known[id.as_str()].id.as_str());
        }

        let size = task_ids.len();
        let max_concurrency = if configured_max_concurrency == 0 {
            size
        } else {
            size.min(configured_max_concurrency)
        };

        waves.push(Wave {
            name: format!("wave-{}", waves.len() + 1),
            task_ids,
            max_concurrency,
        });
        remaining = blocked;
    }

    Ok(waves)
}

/// Structural validation, collecting every offender.
fn validate(tasks: &[Task]) -> Result<(), PlanningError> {
    let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut issues = Vec::new();

    for task in tasks {
        for dep in &task.depends_on {
            if dep == &task.id {
                issues.push(GraphIssue::SelfDependency {
                    task: task.id.clone(),
                });
            } else if !known.contains(dep.as_str()) {
                issues.push(GraphIssue::UnresolvedDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if task.task_type == TaskType::Integration && task.depends_on.is_empty() {
            issues.push(GraphIssue::IntegrationWithoutDeps {
                task: task.id.clone(),
            });
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(PlanningError { issues })
    }
}
