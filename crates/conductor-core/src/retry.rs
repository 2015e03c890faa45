//! Per-task retry controller: invoke, validate, review, and retry with
//! accumulated feedback until the budget runs out.
//!
//! One call to [`run_task`] produces exactly one [`TaskResult`]. Invalid
//! responses and RED verdicts are retried up to `retry_on_red` extra
//! attempts; YELLOW is a terminal soft-pass; cancellation ends the task
//! immediately as FAILED.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::AgentRegistry;
use crate::invoker::response::parse_agent_response;
use crate::invoker::{Executor, InvocationRequest, ParsedResponse};
use crate::logging::EventSink;
use crate::plan::{QcConfig, Task};
use crate::qc::reviewer::QcAggregator;
use crate::qc::Verdict;
use crate::report::{FileCounts, TaskResult, TaskStatus};

/// Run one task to a terminal status.
pub async fn run_task(
    task: &Task,
    registry: &Arc<AgentRegistry>,
    executor: &Arc<dyn Executor>,
    qc_config: &QcConfig,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
) -> TaskResult {
    let started = Instant::now();
    let qc = QcAggregator::new(Arc::clone(executor), Arc::clone(registry));
    let agent = task
        .agent_name
        .as_deref()
        .and_then(|name| registry.lookup(name))
        .cloned();

    let mut attempt: u32 = 0;
    let mut feedback = String::new();

    loop {
        if cancel.is_cancelled() {
            return failed(task, attempt, started, "run cancelled".to_string());
        }

        sink.log_task_start(&task.id, &task.name, attempt);

        let request = InvocationRequest {
            task_id: task.id.clone(),
            prompt: build_prompt(task, attempt, &feedback),
            agent: agent.clone(),
            json_schema: task.json_schema_override.clone(),
        };
        let invocation = executor.invoke(&request, cancel).await;
        sink.log_task_detail(
            &task.id,
            &format!(
                "attempt {attempt}: exit={} duration={:.3}s",
                invocation.exit_code,
                invocation.duration.as_secs_f64()
            ),
        );
        if !invocation.raw_output.is_empty() {
            sink.log_task_detail(&task.id, &format!("output: {}", invocation.raw_output));
        }

        let parsed = invocation
            .payload
            .and_then(|payload| parse_agent_response(&payload));

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                if cancel.is_cancelled() {
                    return failed(task, attempt, started, format!("run cancelled: {e}"));
                }
                if attempt < qc_config.retry_on_red {
                    debug!(task_id = %task.id, attempt, error = %e, "invalid response, retrying");
                    attempt += 1;
                    feedback = e.to_string();
                    continue;
                }
                return failed(
                    task,
                    attempt,
                    started,
                    format!("no valid response after {} attempt(s): {e}", attempt + 1),
                );
            }
        };

        // A valid response goes to QC (when enabled).
        let outcome = if qc_config.enabled {
            qc.review_task(task, &parsed.response, qc_config, sink, cancel)
                .await
        } else {
            crate::qc::aggregate_reviews(vec![])
        };

        match outcome.verdict {
            Verdict::Green | Verdict::Yellow => {
                info!(
                    task_id = %task.id,
                    verdict = %outcome.verdict,
                    retries = attempt,
                    "task accepted"
                );
                return completed(task, attempt, started, outcome.verdict.into(), parsed, outcome);
            }
            Verdict::Red => {
                if cancel.is_cancelled() {
                    return failed(task, attempt, started, "run cancelled".to_string());
                }
                if attempt < qc_config.retry_on_red {
                    info!(task_id = %task.id, attempt, "RED verdict, retrying with feedback");
                    attempt += 1;
                    feedback = outcome.feedback;
                    continue;
                }
                info!(task_id = %task.id, retries = attempt, "RED verdict, budget exhausted");
                return completed(task, attempt, started, TaskStatus::Red, parsed, outcome);
            }
        }
    }
}

/// Rebuild the prompt; retries carry the prior review feedback.
fn build_prompt(task: &Task, attempt: u32, feedback: &str) -> String {
    if attempt == 0 || feedback.is_empty() {
        task.prompt.clone()
    } else {
        format!("{}\n\nPrior review feedback:\n{}", task.prompt, feedback)
    }
}

fn failed(task: &Task, attempt: u32, started: Instant, reason: String) -> TaskResult {
    TaskResult {
        task_id: task.id.clone(),
        task_name: task.name.clone(),
        agent_name: task.agent_name.clone(),
        status: TaskStatus::Failed,
        feedback: reason,
        retry_count: attempt,
        duration: started.elapsed(),
        files: FileCounts::default(),
        response: None,
        session_id: None,
        qc_reviews: vec![],
    }
}

fn completed(
    task: &Task,
    attempt: u32,
    started: Instant,
    status: TaskStatus,
    parsed: ParsedResponse,
    outcome: crate::qc::QcOutcome,
) -> TaskResult {
    TaskResult {
        task_id: task.id.clone(),
        task_name: task.name.clone(),
        agent_name: task.agent_name.clone(),
        status,
        feedback: outcome.feedback,
        retry_count: attempt,
        duration: started.elapsed(),
        files: FileCounts {
            created: 0,
            modified: parsed.response.files_modified.len(),
            deleted: 0,
        },
        response: Some(parsed.response),
        session_id: parsed.session_id,
        qc_reviews: outcome.reviews,
    }
}
