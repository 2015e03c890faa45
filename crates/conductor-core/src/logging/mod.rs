//! Multi-sink execution event logging.
//!
//! Every core component reports progress through the [`EventSink`] trait.
//! Three concrete sinks exist: [`ConsoleSink`] renders human-readable lines,
//! [`FileSink`] writes the per-run log tree, and [`NoopSink`] discards
//! everything. [`MultiSink`] fans one event out to several sinks.
//!
//! Each sink serializes its own writes behind a mutex, so log lines never
//! interleave. Timestamps are stamped when the event is logged; their
//! ordering across threads is best-effort only.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Local;
use tracing::warn;

use crate::report::{ExecutionResult, StatusCounts, TaskResult};
use crate::wave::Wave;

/// Event sink consumed by the planner, executor, retry controller, and QC
/// stage.
pub trait EventSink: Send + Sync {
    fn log_run_start(&self, plan_name: &str, total_tasks: usize, total_waves: usize);
    fn log_wave_start(&self, wave: &Wave);
    fn log_wave_complete(&self, wave: &Wave, duration: Duration, counts: &StatusCounts);
    fn log_task_start(&self, task_id: &str, task_name: &str, attempt: u32);
    fn log_task_result(&self, result: &TaskResult);
    /// Verbose per-task detail (raw output, review feedback). Only the file
    /// sink renders this.
    fn log_task_detail(&self, task_id: &str, detail: &str);
    fn log_warning(&self, message: &str);
    fn log_summary(&self, result: &ExecutionResult);
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

// ---------------------------------------------------------------------------
// Noop
// ---------------------------------------------------------------------------

/// Discards every event.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn log_run_start(&self, _plan_name: &str, _total_tasks: usize, _total_waves: usize) {}
    fn log_wave_start(&self, _wave: &Wave) {}
    fn log_wave_complete(&self, _wave: &Wave, _duration: Duration, _counts: &StatusCounts) {}
    fn log_task_start(&self, _task_id: &str, _task_name: &str, _attempt: u32) {}
    fn log_task_result(&self, _result: &TaskResult) {}
    fn log_task_detail(&self, _task_id: &str, _detail: &str) {}
    fn log_warning(&self, _message: &str) {}
    fn log_summary(&self, _result: &ExecutionResult) {}
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Renders one line per event to stdout.
pub struct ConsoleSink {
    lock: Mutex<()>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    fn line(&self, text: String) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        println!("[{}] {text}", timestamp());
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ConsoleSink {
    fn log_run_start(&self, plan_name: &str, total_tasks: usize, total_waves: usize) {
        self.line(format!(
            "plan {plan_name:?}: {total_tasks} task(s) in {total_waves} wave(s)"
        ));
    }

    fn log_wave_start(&self, wave: &Wave) {
        self.line(format!(
            "{} started: {} task(s), concurrency {}",
            wave.name,
            wave.task_ids.len(),
            wave.max_concurrency
        ));
    }

    fn log_wave_complete(&self, wave: &Wave, duration: Duration, counts: &StatusCounts) {
        self.line(format!(
            "{} complete in {:.1}s: {counts}",
            wave.name,
            duration.as_secs_f64()
        ));
    }

    fn log_task_start(&self, task_id: &str, task_name: &str, attempt: u32) {
        if attempt == 0 {
            self.line(format!("task {task_id} ({task_name}) started"));
        } else {
            self.line(format!("task {task_id} ({task_name}) retry #{attempt}"));
        }
    }

    fn log_task_result(&self, result: &TaskResult) {
        self.line(format!(
            "task {} -> {} in {:.1}s ({} retries)",
            result.task_id,
            result.status,
            result.duration.as_secs_f64(),
            result.retry_count
        ));
    }

    fn log_task_detail(&self, _task_id: &str, _detail: &str) {
        // Too verbose for the console; the file sink keeps it.
    }

    fn log_warning(&self, message: &str) {
        self.line(format!("warning: {message}"));
    }

    fn log_summary(&self, result: &ExecutionResult) {
        let mut text = format!(
            "done: {} of {} task(s) completed ({})",
            result.counts.total(),
            result.planned_tasks,
            result.counts
        );
        if result.cancelled {
            text.push_str(" [cancelled]");
        }
        self.line(text);
        for failed in &result.failed_tasks {
            self.line(format!(
                "  {} {}: {}",
                failed.status, failed.task_id, failed.feedback
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Writes the per-run log tree under a root directory:
/// `run-YYYYMMDD-HHMMSS.log`, per-task files under `tasks/`, and a
/// `latest.log` symlink to the newest run log.
///
/// The directory is created lazily on first write; a sink that never logs
/// leaves no trace on disk. Write failures degrade to `tracing` warnings --
/// logging must never fail the run.
pub struct FileSink {
    root: PathBuf,
    state: Mutex<Option<RunLog>>,
}

struct RunLog {
    file: File,
    tasks_dir: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(None),
        }
    }

    /// Append one line to the run log, initializing the log tree on first
    /// use.
    fn line(&self, text: String) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_none() {
            match self.init() {
                Ok(run_log) => *state = Some(run_log),
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "failed to initialize log directory");
                    return;
                }
            }
        }
        if let Some(run_log) = state.as_mut() {
            if let Err(e) = writeln!(run_log.file, "[{}] {text}", timestamp()) {
                warn!(error = %e, "failed to write run log line");
            }
        }
    }

    fn init(&self) -> std::io::Result<RunLog> {
        std::fs::create_dir_all(&self.root)?;
        let tasks_dir = self.root.join("tasks");
        std::fs::create_dir_all(&tasks_dir)?;

        let name = format!("run-{}.log", Local::now().format("%Y%m%d-%H%M%S"));
        let path = self.root.join(&name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        #[cfg(unix)]
        {
            let link = self.root.join("latest.log");
            let _ = std::fs::remove_file(&link);
            if let Err(e) = std::os::unix::fs::symlink(&name, &link) {
                warn!(error = %e, "failed to update latest.log symlink");
            }
        }

        Ok(RunLog { file, tasks_dir })
    }

    /// Append to the per-task detail file for `task_id`.
    fn task_line(&self, task_id: &str, text: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_none() {
            match self.init() {
                Ok(run_log) => *state = Some(run_log),
                Err(e) => {
                    warn!(error = %e, "failed to initialize log directory");
                    return;
                }
            }
        }
        let Some(run_log) = state.as_ref() else {
            return;
        };
        let path = run_log.tasks_dir.join(format!("task-{task_id}.log"));
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "[{}] {text}", timestamp()));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to write task log");
        }
    }
}

impl EventSink for FileSink {
    fn log_run_start(&self, plan_name: &str, total_tasks: usize, total_waves: usize) {
        self.line(format!(
            "run start: plan {plan_name:?}, {total_tasks} task(s), {total_waves} wave(s)"
        ));
    }

    fn log_wave_start(&self, wave: &Wave) {
        self.line(format!(
            "wave start: {} [{}] concurrency={}",
            wave.name,
            wave.task_ids.join(", "),
            wave.max_concurrency
        ));
    }

    fn log_wave_complete(&self, wave: &Wave, duration: Duration, counts: &StatusCounts) {
        self.line(format!(
            "wave complete: {} duration={:.3}s {counts}",
            wave.name,
            duration.as_secs_f64()
        ));
    }

    fn log_task_start(&self, task_id: &str, task_name: &str, attempt: u32) {
        self.line(format!(
            "task start: {task_id} ({task_name}) attempt={attempt}"
        ));
    }

    fn log_task_result(&self, result: &TaskResult) {
        self.line(format!(
            "task result: {} status={} retries={} duration={:.3}s",
            result.task_id,
            result.status,
            result.retry_count,
            result.duration.as_secs_f64()
        ));
        if !result.feedback.is_empty() {
            self.task_line(&result.task_id, &format!("feedback: {}", result.feedback));
        }
    }

    fn log_task_detail(&self, task_id: &str, detail: &str) {
        self.task_line(task_id, detail);
    }

    fn log_warning(&self, message: &str) {
        self.line(format!("warning: {message}"));
    }

    fn log_summary(&self, result: &ExecutionResult) {
        self.line(format!(
            "summary: plan={:?} {} total_duration={:.3}s cancelled={}",
            result.plan_name,
            result.counts,
            result.task_duration_total.as_secs_f64(),
            result.cancelled
        ));
        for (wave, duration) in &result.wave_durations {
            self.line(format!("  {wave}: {:.3}s", duration.as_secs_f64()));
        }
        for failed in &result.failed_tasks {
            self.line(format!(
                "  failed: {} status={} feedback={:?}",
                failed.task_id, failed.status, failed.feedback
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Multi
// ---------------------------------------------------------------------------

/// Fans each event out to every inner sink, in order.
pub struct MultiSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for MultiSink {
    fn log_run_start(&self, plan_name: &str, total_tasks: usize, total_waves: usize) {
        for sink in &self.sinks {
            sink.log_run_start(plan_name, total_tasks, total_waves);
        }
    }

    fn log_wave_start(&self, wave: &Wave) {
        for sink in &self.sinks {
            sink.log_wave_start(wave);
        }
    }

    fn log_wave_complete(&self, wave: &Wave, duration: Duration, counts: &StatusCounts) {
        for sink in &self.sinks {
            sink.log_wave_complete(wave, duration, counts);
        }
    }

    fn log_task_start(&self, task_id: &str, task_name: &str, attempt: u32) {
        for sink in &self.sinks {
            sink.log_task_start(task_id, task_name, attempt);
        }
    }

    fn log_task_result(&self, result: &TaskResult) {
        for sink in &self.sinks {
            sink.log_task_result(result);
        }
    }

    fn log_task_detail(&self, task_id: &str, detail: &str) {
        for sink in &self.sinks {
            sink.log_task_detail(task_id, detail);
        }
    }

    fn log_warning(&self, message: &str) {
        for sink in &self.sinks {
            sink.log_warning(message);
        }
    }

    fn log_summary(&self, result: &ExecutionResult) {
        for sink in &self.sinks {
            sink.log_summary(result);
        }
    }
}
