//! Wave executor: runs each wave with bounded parallelism, skips the
//! dependents of failed tasks, and drains cleanly on cancellation.
//!
//! Waves execute strictly in planner order; a wave does not start until
//! every task of the previous wave has reached a terminal status. Inside a
//! wave, tasks are independent and their completion order carries no
//! meaning. Results are accumulated under a mutex and sorted by task id
//! before they reach the report, so the summary is deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::agent::AgentRegistry;
use crate::invoker::Executor;
use crate::logging::EventSink;
use crate::plan::Plan;
use crate::report::{ExecutionResult, ReportBuilder, StatusCounts, TaskResult, TaskStatus};
use crate::retry::run_task;
use crate::wave::Wave;

/// Execute `waves` for `plan` and return the frozen summary.
///
/// Cancellation semantics: once `cancel` fires, no further task invokes the
/// external executor, in-flight tasks are drained to FAILED results, no
/// subsequent wave starts, and a partial summary is still produced.
pub async fn execute_waves(
    plan: &Plan,
    waves: &[Wave],
    registry: Arc<AgentRegistry>,
    executor: Arc<dyn Executor>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> ExecutionResult {
    let mut report = ReportBuilder::new(&plan.metadata.name, plan.tasks.len());
    sink.log_run_start(&plan.metadata.name, plan.tasks.len(), waves.len());

    // Terminal status of every finished task, consulted for skip decisions.
    let mut statuses: HashMap<String, TaskStatus> = HashMap::new();

    for wave in waves {
        if cancel.is_cancelled() {
            info!(wave = %wave.name, "cancellation fired, not starting wave");
            break;
        }

        sink.log_wave_start(wave);
        let wave_started = Instant::now();

        let semaphore = Arc::new(Semaphore::new(wave.max_concurrency));
        let results: Arc<Mutex<Vec<TaskResult>>> = Arc::new(Mutex::new(Vec::new()));
        let mut in_flight = JoinSet::new();

        for task_id in &wave.task_ids {
            let Some(task) = plan.task(task_id) else {
                // Unreachable for waves produced by the planner.
                error!(task_id = %task_id, "wave references a task missing from the plan");
                continue;
            };

            // Skip-on-upstream-failure: any dependency that ended RED or
            // FAILED (including earlier skips) blocks this task. YELLOW
            // does not propagate.
            let blocked_by = task.depends_on.iter().find(|dep| {
                statuses
                    .get(dep.as_str())
                    .is_some_and(|s| s.blocks_dependents())
            });
            if let Some(upstream) = blocked_by {
                let result = TaskResult::skipped(task, upstream, statuses[upstream.as_str()]);
                sink.log_task_result(&result);
                push_result(&results, result);
                continue;
            }

            if cancel.is_cancelled() {
                let result = TaskResult::cancelled(task);
                sink.log_task_result(&result);
                push_result(&results, result);
                continue;
            }

            let task = task.clone();
            let qc = plan.qc.clone();
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let registry = Arc::clone(&registry);
            let executor = Arc::clone(&executor);
            let sink = Arc::clone(&sink);
            let cancel = cancel.clone();

            in_flight.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                // A task that was still queued when cancellation fired is
                // drained without ever invoking the executor.
                let result = if cancel.is_cancelled() {
                    TaskResult::cancelled(&task)
                } else {
                    run_task(&task, &registry, &executor, &qc, sink.as_ref(), &cancel).await
                };
                sink.log_task_result(&result);
                push_result(&results, result);
            });
        }

        // Wave barrier: every launched task reaches a terminal result
        // before the next wave is considered.
        while in_flight.join_next().await.is_some() {}

        let mut wave_results = {
            let mut guard = results.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        wave_results.sort_by(|a, b| a.task_id.cmp(&b.task_id));

        let mut counts = StatusCounts::default();
        for result in &wave_results {
            counts.record(result.status);
            statuses.insert(result.task_id.clone(), result.status);
            report.record_task(result);
        }

        let wave_duration = wave_started.elapsed();
        sink.log_wave_complete(wave, wave_duration, &counts);
        report.record_wave(&wave.name, wave_duration);
    }

    let summary = report.finish(cancel.is_cancelled());
    sink.log_summary(&summary);
    summary
}

fn push_result(results: &Arc<Mutex<Vec<TaskResult>>>, result: TaskResult) {
    results
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(result);
}
