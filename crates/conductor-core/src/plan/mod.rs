//! Plan data model: tasks, their dependency edges, and the QC configuration
//! that governs how each task's result is reviewed.
//!
//! A [`Plan`] is immutable once loaded. Tasks reference each other and
//! executor agents by name only; nothing here holds pointers into the
//! registry or the dependency graph.

pub mod file;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentRegistry;

/// Kind of task within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// An ordinary unit of work.
    #[default]
    Regular,
    /// A task that verifies the combined work of its dependencies. Must
    /// have at least one dependency.
    Integration,
}

/// The atomic unit of work: one prompt handed to the external executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, unique within the plan. Used in `depends_on`.
    pub id: String,
    /// Human label.
    pub name: String,
    /// Free text handed to the executor.
    pub prompt: String,
    /// Optional reference into the agent registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Ids of tasks that must complete before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Task kind; integration tasks carry extra criteria.
    #[serde(default)]
    pub task_type: TaskType,
    /// Ordered textual assertions the QC reviewers check.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Additional assertions, used only for integration tasks.
    #[serde(default)]
    pub integration_criteria: Vec<String>,
    /// Advisory list of files the task is expected to touch. Logged, not
    /// enforced.
    #[serde(default)]
    pub file_scope: Vec<String>,
    /// Author's time estimate, free-form (e.g. "30m").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    /// Per-task override for the executor's `--json-schema` flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema_override: Option<serde_json::Value>,
}

impl Task {
    /// The criteria QC reviewers should check for this task: acceptance
    /// criteria, plus integration criteria when the task is an integration
    /// task.
    pub fn review_criteria(&self) -> Vec<&str> {
        let mut criteria: Vec<&str> = self.acceptance_criteria.iter().map(|s| s.as_str()).collect();
        if self.task_type == TaskType::Integration {
            criteria.extend(self.integration_criteria.iter().map(|s| s.as_str()));
        }
        criteria
    }
}

/// How QC reviewer agents are chosen for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Use the configured `agents` list verbatim.
    Explicit,
    /// Deterministic default set derived from the task and registry.
    #[default]
    Auto,
    /// Ask a planner agent to pick reviewers; falls back to `Auto` on any
    /// failure.
    Intelligent,
}

/// Quality-control configuration for a plan.
///
/// Aggregation is always strictest-wins; only selection and retry budgets
/// are configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcConfig {
    /// Whether the QC stage runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Reviewer agent names for `explicit` selection.
    #[serde(default)]
    pub agents: Vec<String>,
    /// Reviewer selection policy.
    #[serde(default)]
    pub selection_mode: SelectionMode,
    /// Extra attempts granted after a RED verdict (and after invalid
    /// responses from the executor).
    #[serde(default = "default_retry_on_red")]
    pub retry_on_red: u32,
    /// The reviewer's own invalid-response retry budget.
    #[serde(default = "default_reviewer_retries")]
    pub reviewer_retries: u32,
    /// Reviewer names tried by `auto` selection, in order.
    #[serde(default = "default_reviewers")]
    pub default_reviewers: Vec<String>,
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            agents: Vec::new(),
            selection_mode: SelectionMode::default(),
            retry_on_red: default_retry_on_red(),
            reviewer_retries: default_reviewer_retries(),
            default_reviewers: default_reviewers(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retry_on_red() -> u32 {
    2
}

fn default_reviewer_retries() -> u32 {
    1
}

fn default_reviewers() -> Vec<String> {
    vec!["code-review".to_string()]
}

/// Plan-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMeta {
    /// Human-readable plan name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A complete, immutable plan: metadata, tasks, and QC configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub metadata: PlanMeta,
    pub tasks: Vec<Task>,
    pub qc: QcConfig,
}

impl Plan {
    /// Look up a task by id.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Verify that every agent reference in the plan resolves in the
    /// registry: task `agent_name`s and, for explicit QC selection, the
    /// configured reviewer list.
    ///
    /// Runs before any task is dispatched; a failure names every unresolved
    /// reference at once.
    pub fn verify_agent_references(&self, registry: &AgentRegistry) -> Result<(), MissingAgents> {
        let mut missing = BTreeSet::new();

        for task in &self.tasks {
            if let Some(name) = &task.agent_name {
                if registry.lookup(name).is_none() {
                    missing.insert(name.clone());
                }
            }
        }

        if self.qc.enabled && self.qc.selection_mode == SelectionMode::Explicit {
            for name in &self.qc.agents {
                if registry.lookup(name).is_none() {
                    missing.insert(name.clone());
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingAgents {
                names: missing.into_iter().collect(),
            })
        }
    }
}

/// One or more agent references did not resolve in the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown agent reference(s): {}", names.join(", "))]
pub struct MissingAgents {
    /// Every unresolved name, sorted and deduplicated.
    pub names: Vec<String>,
}
