//! Per-task outcomes and the final execution report.
//!
//! The [`ReportBuilder`] is append-only while the run executes and is frozen
//! into an [`ExecutionResult`] at the end (or at cancellation, for a partial
//! summary).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::invoker::AgentResponse;
use crate::plan::Task;
use crate::qc::{QcReview, Verdict};

/// Terminal status of one task.
///
/// `Failed` is distinct from `Red`: `Failed` means no verdict could be
/// determined (invalid responses, spawn failures, cancellation, or a skipped
/// task), while `Red` means QC rejected a valid response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Green,
    Yellow,
    Red,
    Failed,
}

impl TaskStatus {
    /// RED and FAILED both land in the failed-task list and fail the run.
    pub fn is_failure(self) -> bool {
        matches!(self, TaskStatus::Red | TaskStatus::Failed)
    }

    /// Whether dependents of a task in this status must be skipped.
    /// YELLOW is a soft-pass and does not propagate.
    pub fn blocks_dependents(self) -> bool {
        self.is_failure()
    }
}

impl From<Verdict> for TaskStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Green => TaskStatus::Green,
            Verdict::Yellow => TaskStatus::Yellow,
            Verdict::Red => TaskStatus::Red,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Green => write!(f, "GREEN"),
            TaskStatus::Yellow => write!(f, "YELLOW"),
            TaskStatus::Red => write!(f, "RED"),
            TaskStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Files touched, as reported by the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCounts {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl FileCounts {
    pub fn add(&mut self, other: FileCounts) {
        self.created += other.created;
        self.modified += other.modified;
        self.deleted += other.deleted;
    }
}

/// The single result every task produces, exactly once.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub task_name: String,
    pub agent_name: Option<String>,
    pub status: TaskStatus,
    /// Last aggregated feedback (QC feedback, error detail, or skip reason).
    pub feedback: String,
    /// Extra attempts performed beyond the first.
    pub retry_count: u32,
    pub duration: Duration,
    pub files: FileCounts,
    pub response: Option<AgentResponse>,
    pub session_id: Option<String>,
    pub qc_reviews: Vec<QcReview>,
}

impl TaskResult {
    /// Result for a task skipped because an upstream task failed. Skipped
    /// tasks never invoke the executor.
    pub fn skipped(task: &Task, upstream_id: &str, upstream_status: TaskStatus) -> Self {
        Self::unrun(
            task,
            format!("skipped: dependency {upstream_id:?} ended {upstream_status}"),
        )
    }

    /// Result for a task drained at cancellation before it could start.
    pub fn cancelled(task: &Task) -> Self {
        Self::unrun(task, "run cancelled before the task started".to_string())
    }

    fn unrun(task: &Task, feedback: String) -> Self {
        Self {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            agent_name: task.agent_name.clone(),
            status: TaskStatus::Failed,
            feedback,
            retry_count: 0,
            duration: Duration::ZERO,
            files: FileCounts::default(),
            response: None,
            session_id: None,
            qc_reviews: vec![],
        }
    }
}

/// Per-status tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub green: usize,
    pub yellow: usize,
    pub red: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Green => self.green += 1,
            TaskStatus::Yellow => self.yellow += 1,
            TaskStatus::Red => self.red += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.green + self.yellow + self.red + self.failed
    }
}

impl std::fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} green, {} yellow, {} red, {} failed",
            self.green, self.yellow, self.red, self.failed
        )
    }
}

/// One entry in the failed-task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTask {
    pub task_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub feedback: String,
}

/// The frozen summary of a run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub plan_name: String,
    /// Number of tasks the plan contains (results may be fewer after
    /// cancellation).
    pub planned_tasks: usize,
    pub counts: StatusCounts,
    /// Sum of per-task wall-clock durations.
    pub task_duration_total: Duration,
    /// Mean per-task duration (zero when nothing ran).
    pub task_duration_mean: Duration,
    /// Tasks completed per agent name; tasks without an agent are not
    /// counted.
    pub agent_usage: BTreeMap<String, usize>,
    pub files: FileCounts,
    /// Every RED or FAILED task, in completion order, with last feedback.
    pub failed_tasks: Vec<FailedTask>,
    /// Wall-clock duration of each wave, in execution order.
    pub wave_durations: Vec<(String, Duration)>,
    pub cancelled: bool,
}

impl ExecutionResult {
    /// True iff every planned task completed GREEN or YELLOW. Drives the
    /// process exit code.
    pub fn all_accepted(&self) -> bool {
        !self.cancelled
            && self.counts.red == 0
            && self.counts.failed == 0
            && self.counts.green + self.counts.yellow == self.planned_tasks
    }
}

/// Append-only accumulator for [`ExecutionResult`].
#[derive(Debug)]
pub struct ReportBuilder {
    plan_name: String,
    planned_tasks: usize,
    counts: StatusCounts,
    duration_sum: Duration,
    agent_usage: BTreeMap<String, usize>,
    files: FileCounts,
    failed_tasks: Vec<FailedTask>,
    wave_durations: Vec<(String, Duration)>,
}

impl ReportBuilder {
    pub fn new(plan_name: impl Into<String>, planned_tasks: usize) -> Self {
        Self {
            plan_name: plan_name.into(),
            planned_tasks,
            counts: StatusCounts::default(),
            duration_sum: Duration::ZERO,
            agent_usage: BTreeMap::new(),
            files: FileCounts::default(),
            failed_tasks: Vec::new(),
            wave_durations: Vec::new(),
        }
    }

    pub fn record_task(&mut self, result: &TaskResult) {
        self.counts.record(result.status);
        self.duration_sum += result.duration;
        self.files.add(result.files);
        if let Some(agent) = result.agent_name.as_deref().filter(|a| !a.is_empty()) {
            *self.agent_usage.entry(agent.to_string()).or_insert(0) += 1;
        }
        if result.status.is_failure() {
            self.failed_tasks.push(FailedTask {
                task_id: result.task_id.clone(),
                task_name: result.task_name.clone(),
                status: result.status,
                feedback: result.feedback.clone(),
            });
        }
    }

    pub fn record_wave(&mut self, name: impl Into<String>, duration: Duration) {
        self.wave_durations.push((name.into(), duration));
    }

    /// Freeze the accumulator into the final summary.
    pub fn finish(self, cancelled: bool) -> ExecutionResult {
        let completed = self.counts.total();
        let mean = if completed == 0 {
            Duration::ZERO
        } else {
            self.duration_sum / completed as u32
        };
        ExecutionResult {
            plan_name: self.plan_name,
            planned_tasks: self.planned_tasks,
            counts: self.counts,
            task_duration_total: self.duration_sum,
            task_duration_mean: mean,
            agent_usage: self.agent_usage,
            files: self.files,
            failed_tasks: self.failed_tasks,
            wave_durations: self.wave_durations,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, status: TaskStatus) -> TaskResult {
        TaskResult {
            task_id: id.to_string(),
            task_name: id.to_string(),
            agent_name: None,
            status,
            feedback: String::new(),
            retry_count: 0,
            duration: Duration::from_secs(2),
            files: FileCounts::default(),
            response: None,
            session_id: None,
            qc_reviews: vec![],
        }
    }

    #[test]
    fn counts_sum_to_number_of_recorded_tasks() {
        let mut builder = ReportBuilder::new("p", 4);
        builder.record_task(&result("a", TaskStatus::Green));
        builder.record_task(&result("b", TaskStatus::Yellow));
        builder.record_task(&result("c", TaskStatus::Red));
        builder.record_task(&result("d", TaskStatus::Failed));
        let summary = builder.finish(false);
        assert_eq!(summary.counts.total(), 4);
        assert_eq!(summary.counts.green, 1);
        assert_eq!(summary.counts.failed, 1);
    }

    #[test]
    fn failed_list_keeps_red_and_failed_in_order() {
        let mut builder = ReportBuilder::new("p", 3);
        builder.record_task(&result("ok", TaskStatus::Green));
        let mut red = result("r", TaskStatus::Red);
        red.feedback = "rejected".to_string();
        builder.record_task(&red);
        builder.record_task(&result("f", TaskStatus::Failed));
        let summary = builder.finish(false);
        assert_eq!(summary.failed_tasks.len(), 2);
        assert_eq!(summary.failed_tasks[0].task_id, "r");
        assert_eq!(summary.failed_tasks[0].feedback, "rejected");
        assert_eq!(summary.failed_tasks[1].task_id, "f");
    }

    #[test]
    fn durations_sum_and_average() {
        let mut builder = ReportBuilder::new("p", 2);
        let mut a = result("a", TaskStatus::Green);
        a.duration = Duration::from_secs(4);
        let mut b = result("b", TaskStatus::Green);
        b.duration = Duration::from_secs(2);
        builder.record_task(&a);
        builder.record_task(&b);
        let summary = builder.finish(false);
        assert_eq!(summary.task_duration_total, Duration::from_secs(6));
        assert_eq!(summary.task_duration_mean, Duration::from_secs(3));
    }

    #[test]
    fn empty_run_has_zero_mean() {
        let summary = ReportBuilder::new("p", 0).finish(false);
        assert_eq!(summary.task_duration_mean, Duration::ZERO);
    }

    #[test]
    fn agent_usage_ignores_missing_and_empty_names() {
        let mut builder = ReportBuilder::new("p", 3);
        let mut a = result("a", TaskStatus::Green);
        a.agent_name = Some("rust-specialist".to_string());
        let mut b = result("b", TaskStatus::Green);
        b.agent_name = Some("rust-specialist".to_string());
        let mut c = result("c", TaskStatus::Green);
        c.agent_name = Some(String::new());
        builder.record_task(&a);
        builder.record_task(&b);
        builder.record_task(&c);
        builder.record_task(&result("d", TaskStatus::Green));
        let summary = builder.finish(false);
        assert_eq!(summary.agent_usage.len(), 1);
        assert_eq!(summary.agent_usage["rust-specialist"], 2);
    }

    #[test]
    fn all_accepted_requires_every_planned_task_green_or_yellow() {
        let mut builder = ReportBuilder::new("p", 2);
        builder.record_task(&result("a", TaskStatus::Green));
        builder.record_task(&result("b", TaskStatus::Yellow));
        assert!(builder.finish(false).all_accepted());

        let mut builder = ReportBuilder::new("p", 2);
        builder.record_task(&result("a", TaskStatus::Green));
        assert!(
            !builder.finish(false).all_accepted(),
            "a task that never ran must fail the run"
        );

        let mut builder = ReportBuilder::new("p", 1);
        builder.record_task(&result("a", TaskStatus::Green));
        assert!(!builder.finish(true).all_accepted(), "cancelled runs fail");
    }

    #[test]
    fn skipped_result_names_the_upstream_task() {
        let task = crate::plan::Task {
            id: "child".into(),
            name: "Child".into(),
            prompt: "p".into(),
            agent_name: None,
            depends_on: vec!["parent".into()],
            task_type: crate::plan::TaskType::Regular,
            acceptance_criteria: vec![],
            integration_criteria: vec![],
            file_scope: vec![],
            estimated_time: None,
            json_schema_override: None,
        };
        let skipped = TaskResult::skipped(&task, "parent", TaskStatus::Red);
        assert_eq!(skipped.status, TaskStatus::Failed);
        assert!(skipped.feedback.contains("parent"));
        assert!(skipped.feedback.contains("RED"));
    }

    #[test]
    fn verdicts_map_onto_statuses() {
        assert_eq!(TaskStatus::from(Verdict::Green), TaskStatus::Green);
        assert_eq!(TaskStatus::from(Verdict::Yellow), TaskStatus::Yellow);
        assert_eq!(TaskStatus::from(Verdict::Red), TaskStatus::Red);
    }

    #[test]
    fn yellow_does_not_block_dependents() {
        assert!(!TaskStatus::Yellow.blocks_dependents());
        assert!(TaskStatus::Red.blocks_dependents());
        assert!(TaskStatus::Failed.blocks_dependents());
    }
}
