//! Reviewer selection and invocation for the QC stage.
//!
//! For one task result, [`QcAggregator::review_task`] selects reviewer
//! agents (explicit, auto, or intelligent), invokes each one through the
//! shared [`Executor`], and merges their reviews with strictest-wins.
//! A reviewer that cannot produce a valid review contributes YELLOW with a
//! note -- fail-soft, never a silent pass.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::AgentRegistry;
use crate::invoker::{AgentResponse, Executor, InvocationRequest};
use crate::logging::EventSink;
use crate::plan::{QcConfig, SelectionMode, Task, TaskType};

use super::{CriterionResult, QcOutcome, QcReview, Verdict, aggregate_reviews};

/// Name of the planner agent consulted by `intelligent` selection.
const PLANNER_AGENT: &str = "qc-planner";

/// Reviewer added for integration tasks by `auto` selection, when present.
const INTEGRATION_REVIEWER: &str = "integration-review";

/// Runs the QC stage for task results.
pub struct QcAggregator {
    executor: Arc<dyn Executor>,
    registry: Arc<AgentRegistry>,
}

/// Shape a reviewer must reply with (enforced via `--json-schema`).
#[derive(Debug, Deserialize)]
struct ReviewPayload {
    verdict: Verdict,
    #[serde(default)]
    criteria: Vec<CriterionResult>,
    #[serde(default)]
    feedback: String,
}

/// Shape the planner agent replies with for `intelligent` selection.
#[derive(Debug, Deserialize)]
struct PlannerPayload {
    reviewers: Vec<String>,
    #[serde(default)]
    rationale: String,
}

/// JSON schema for [`ReviewPayload`].
fn review_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["verdict", "criteria", "feedback"],
        "properties": {
            "verdict": { "type": "string", "enum": ["GREEN", "YELLOW", "RED"] },
            "criteria": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["criterion", "passed"],
                    "properties": {
                        "criterion": { "type": "string" },
                        "passed": { "type": "boolean" },
                        "rationale": { "type": "string" }
                    }
                }
            },
            "feedback": { "type": "string" }
        }
    })
}

/// JSON schema for [`PlannerPayload`].
fn planner_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["reviewers", "rationale"],
        "properties": {
            "reviewers": { "type": "array", "items": { "type": "string" } },
            "rationale": { "type": "string" }
        }
    })
}

impl QcAggregator {
    pub fn new(executor: Arc<dyn Executor>, registry: Arc<AgentRegistry>) -> Self {
        Self { executor, registry }
    }

    /// Review one valid task response and return the merged outcome.
    pub async fn review_task(
        &self,
        task: &Task,
        response: &AgentResponse,
        qc: &QcConfig,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> QcOutcome {
        let reviewers = self.select_reviewers(task, qc, sink, cancel).await;
        if reviewers.is_empty() {
            sink.log_warning(&format!(
                "no QC reviewers resolved for task {}; accepting without review",
                task.id
            ));
            return aggregate_reviews(vec![]);
        }

        let mut reviews = Vec::with_capacity(reviewers.len());
        for reviewer in reviewers {
            reviews.push(self.run_reviewer(&reviewer, task, response, qc, cancel).await);
        }
        aggregate_reviews(reviews)
    }

    /// Resolve the reviewer list for `task` according to the selection mode.
    async fn select_reviewers(
        &self,
        task: &Task,
        qc: &QcConfig,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Vec<String> {
        match qc.selection_mode {
            SelectionMode::Explicit => qc.agents.clone(),
            SelectionMode::Auto => self.auto_reviewers(task, qc),
            SelectionMode::Intelligent => {
                match self.intelligent_reviewers(task, cancel).await {
                    Ok(reviewers) if !reviewers.is_empty() => reviewers,
                    Ok(_) => {
                        sink.log_warning(&format!(
                            "QC planner returned no usable reviewers for task {}; falling back to auto selection",
                            task.id
                        ));
                        self.auto_reviewers(task, qc)
                    }
                    Err(reason) => {
                        sink.log_warning(&format!(
                            "QC planner failed for task {}: {reason}; falling back to auto selection",
                            task.id
                        ));
                        self.auto_reviewers(task, qc)
                    }
                }
            }
        }
    }

    /// Deterministic default reviewer set: the configured defaults that
    /// exist in the registry, plus the integration reviewer for integration
    /// tasks.
    fn auto_reviewers(&self, task: &Task, qc: &QcConfig) -> Vec<String> {
        let mut reviewers: Vec<String> = qc
            .default_reviewers
            .iter()
            .filter(|name| self.registry.lookup(name).is_some())
            .cloned()
            .collect();
        if task.task_type == TaskType::Integration
            && self.registry.lookup(INTEGRATION_REVIEWER).is_some()
            && !reviewers.iter().any(|r| r == INTEGRATION_REVIEWER)
        {
            reviewers.push(INTEGRATION_REVIEWER.to_string());
        }
        reviewers
    }

    /// Ask the planner agent to choose reviewers. Any failure is returned as
    /// an error string so the caller can fall back to auto selection.
    async fn intelligent_reviewers(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, String> {
        let planner = self
            .registry
            .lookup(PLANNER_AGENT)
            .ok_or_else(|| format!("planner agent {PLANNER_AGENT:?} is not in the registry"))?;

        let request = InvocationRequest {
            task_id: format!("qc-planner:{}", task.id),
            prompt: planner_prompt(task, &self.registry),
            agent: Some(planner.clone()),
            json_schema: Some(planner_schema()),
        };
        let result = self.executor.invoke(&request, cancel).await;
        let payload = result.payload.map_err(|e| e.to_string())?;
        let parsed: PlannerPayload =
            serde_json::from_str(&payload.text).map_err(|e| e.to_string())?;

        debug!(
            task_id = %task.id,
            rationale = %parsed.rationale,
            "QC planner selected reviewers"
        );

        // Drop unknown names and duplicates, preserving planner order.
        let mut reviewers = Vec::new();
        for name in parsed.reviewers {
            if self.registry.lookup(&name).is_none() {
                warn!(reviewer = %name, "QC planner proposed unknown reviewer, dropping");
                continue;
            }
            if !reviewers.contains(&name) {
                reviewers.push(name);
            }
        }
        Ok(reviewers)
    }

    /// Invoke one reviewer, retrying invalid responses within the
    /// reviewer's own budget. Exhaustion degrades to YELLOW with a note.
    async fn run_reviewer(
        &self,
        reviewer: &str,
        task: &Task,
        response: &AgentResponse,
        qc: &QcConfig,
        cancel: &CancellationToken,
    ) -> QcReview {
        let Some(agent) = self.registry.lookup(reviewer) else {
            // Explicit lists are validated before the run; auto and
            // intelligent selection only yield registered names. Degrade
            // rather than panic if that ever breaks.
            return fail_soft(reviewer, "reviewer agent is not in the registry");
        };

        let request = InvocationRequest {
            task_id: format!("qc:{reviewer}:{}", task.id),
            prompt: review_prompt(task, response),
            agent: Some(agent.clone()),
            json_schema: Some(review_schema()),
        };

        let mut last_error = String::new();
        for attempt in 0..=qc.reviewer_retries {
            if cancel.is_cancelled() {
                return fail_soft(reviewer, "review cancelled");
            }
            let result = self.executor.invoke(&request, cancel).await;
            match &result.payload {
                Ok(payload) => match serde_json::from_str::<ReviewPayload>(&payload.text) {
                    Ok(parsed) => {
                        return QcReview {
                            reviewer: reviewer.to_string(),
                            verdict: parsed.verdict,
                            criteria: parsed.criteria,
                            feedback: parsed.feedback,
                        };
                    }
                    Err(e) => last_error = format!("invalid review payload: {e}"),
                },
                Err(e) => last_error = e.to_string(),
            }
            debug!(
                reviewer,
                task_id = %task.id,
                attempt,
                error = %last_error,
                "reviewer invocation failed"
            );
        }

        fail_soft(
            reviewer,
            &format!(
                "reviewer produced no valid review after {} attempt(s): {last_error}",
                qc.reviewer_retries + 1
            ),
        )
    }
}

/// The YELLOW review contributed by a reviewer that could not be run.
fn fail_soft(reviewer: &str, reason: &str) -> QcReview {
    QcReview {
        reviewer: reviewer.to_string(),
        verdict: Verdict::Yellow,
        criteria: vec![],
        feedback: format!("review unavailable: {reason}"),
    }
}

/// Compose the review prompt: the original task, the reported result, and
/// each criterion as an explicit yes/no question.
fn review_prompt(task: &Task, response: &AgentResponse) -> String {
    let mut prompt = format!(
        "Review the completed work for task {id} ({name}).\n\n\
         ## Original task\n{task_prompt}\n\n\
         ## Reported result\nSummary: {summary}\n",
        id = task.id,
        name = task.name,
        task_prompt = task.prompt,
        summary = response.summary,
    );
    if !response.output.is_empty() {
        prompt.push_str(&format!("Output:\n{}\n", response.output));
    }
    if !response.files_modified.is_empty() {
        prompt.push_str(&format!(
            "Files modified: {}\n",
            response.files_modified.join(", ")
        ));
    }

    let criteria = task.review_criteria();
    if !criteria.is_empty() {
        prompt.push_str("\n## Criteria\nAnswer each criterion with passed = true or false:\n");
        for (i, criterion) in criteria.iter().enumerate() {
            prompt.push_str(&format!("{}. Is the following satisfied? {criterion}\n", i + 1));
        }
    }

    prompt.push_str(
        "\nGive a verdict: GREEN (accept), YELLOW (accept with concerns), or \
         RED (reject, must be redone), with actionable feedback for RED or YELLOW.",
    );
    prompt
}

/// Compose the planner prompt for `intelligent` selection.
fn planner_prompt(task: &Task, registry: &AgentRegistry) -> String {
    let available = registry
        .iter()
        .map(|a| format!("- {}: {}", a.name, a.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Choose the reviewer agents best suited to quality-check this task.\n\n\
         ## Task\n{id} ({name}): {prompt}\n\n\
         ## Available reviewers\n{available}\n\n\
         Pick only from the available reviewers and explain your choice.",
        id = task.id,
        name = task.name,
        prompt = task.prompt,
    )
}
