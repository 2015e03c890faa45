//! Shared test utilities for conductor tests.
//!
//! Two families of fakes stand in for the external LLM tool:
//!
//! - [`ScriptedExecutor`] implements the [`Executor`] trait in-process, with
//!   per-key outcome queues and concurrency instrumentation. Core tests use
//!   it to script exact sequences (RED then GREEN, invalid then valid).
//! - Shell-script helpers ([`write_script`], [`counting_script`]) produce a
//!   fake `claude` binary on disk for tests that exercise real process
//!   spawning or the CLI.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use conductor_core::invoker::{
    Executor, InvocationRequest, InvocationResult, InvokeError, Payload,
};

// ---------------------------------------------------------------------------
// Response payload builders
// ---------------------------------------------------------------------------

/// A schema-valid success payload.
pub fn success_payload(summary: &str) -> String {
    serde_json::json!({
        "status": "success",
        "summary": summary,
        "output": "",
        "errors": [],
        "files_modified": [],
    })
    .to_string()
}

/// A success payload that reports modified files.
pub fn success_payload_with_files(summary: &str, files: &[&str]) -> String {
    serde_json::json!({
        "status": "success",
        "summary": summary,
        "output": "",
        "errors": [],
        "files_modified": files,
    })
    .to_string()
}

/// A schema-valid failed payload.
pub fn failed_payload(summary: &str, errors: &[&str]) -> String {
    serde_json::json!({
        "status": "failed",
        "summary": summary,
        "output": "",
        "errors": errors,
        "files_modified": [],
    })
    .to_string()
}

/// A QC review payload with no per-criterion detail.
pub fn review_payload(verdict: &str, feedback: &str) -> String {
    serde_json::json!({
        "verdict": verdict,
        "criteria": [],
        "feedback": feedback,
    })
    .to_string()
}

/// A QC review payload with explicit criterion results.
pub fn review_payload_with_criteria(
    verdict: &str,
    feedback: &str,
    criteria: &[(&str, bool)],
) -> String {
    let criteria: Vec<_> = criteria
        .iter()
        .map(|(text, passed)| {
            serde_json::json!({"criterion": text, "passed": passed, "rationale": ""})
        })
        .collect();
    serde_json::json!({
        "verdict": verdict,
        "criteria": criteria,
        "feedback": feedback,
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// One scripted invocation outcome.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Return this payload text with exit code 0.
    Payload(String),
    /// Return unparseable output with a non-zero exit code.
    Garbage,
    /// Fail to spawn entirely.
    SpawnError(String),
    /// Block until the cancellation token fires, then return killed output.
    Hang,
}

/// In-process [`Executor`] with per-key outcome queues.
///
/// Outcomes are keyed by `InvocationRequest::task_id` and consumed in FIFO
/// order; when a key's queue is empty the default outcome is returned.
/// Every request is recorded, and the peak number of concurrently running
/// invocations is tracked so tests can observe wave parallelism.
pub struct ScriptedExecutor {
    queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
    default: Mutex<Scripted>,
    calls: Mutex<Vec<InvocationRequest>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    /// An executor that answers every invocation with a success response.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            default: Mutex::new(Scripted::Payload(success_payload("ok"))),
            calls: Mutex::new(Vec::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside each invocation, so overlapping calls are
    /// observable via [`peak_in_flight`](Self::peak_in_flight).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the fallback outcome used when a key's queue is empty.
    pub fn set_default(&self, outcome: Scripted) {
        *self.default.lock().unwrap() = outcome;
    }

    /// Queue an outcome for requests whose `task_id` equals `key`.
    pub fn enqueue(&self, key: &str, outcome: Scripted) {
        self.queues
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Every request seen so far, in arrival order.
    pub fn calls(&self) -> Vec<InvocationRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests whose `task_id` equals `key`.
    pub fn calls_for(&self, key: &str) -> Vec<InvocationRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.task_id == key)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of invocations that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, key: &str) -> Scripted {
        let mut queues = self.queues.lock().unwrap();
        if let Some(queue) = queues.get_mut(key) {
            if let Some(outcome) = queue.pop_front() {
                return outcome;
            }
        }
        self.default.lock().unwrap().clone()
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        self.calls.lock().unwrap().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.next_outcome(&request.task_id);
        let result = match outcome {
            Scripted::Payload(text) => InvocationResult {
                raw_output: text.clone(),
                exit_code: 0,
                duration: Duration::from_millis(1),
                os_error: None,
                payload: Ok(Payload {
                    text,
                    session_id: None,
                }),
            },
            Scripted::Garbage => InvocationResult {
                raw_output: "garbled output {{{".to_string(),
                exit_code: 1,
                duration: Duration::from_millis(1),
                os_error: None,
                payload: Ok(Payload {
                    text: "garbled output {{{".to_string(),
                    session_id: None,
                }),
            },
            Scripted::SpawnError(message) => InvocationResult {
                raw_output: String::new(),
                exit_code: 0,
                duration: Duration::from_millis(1),
                os_error: Some(message.clone()),
                payload: Err(InvokeError::Spawn(message)),
            },
            Scripted::Hang => {
                cancel.cancelled().await;
                InvocationResult {
                    raw_output: "terminated".to_string(),
                    exit_code: -1,
                    duration: Duration::from_millis(1),
                    os_error: None,
                    payload: Ok(Payload {
                        text: "terminated".to_string(),
                        session_id: None,
                    }),
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// On-disk fake executors
// ---------------------------------------------------------------------------

/// Write an executable shell script and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
    }
    path
}

/// A fake executor binary that always emits `payload` wrapped in the
/// `{"result": ...}` envelope.
pub fn response_script(dir: &Path, name: &str, payload: &str) -> PathBuf {
    let envelope = serde_json::json!({ "result": payload }).to_string();
    write_script(dir, name, &format!("cat <<'CONDUCTOR_EOF'\n{envelope}\nCONDUCTOR_EOF"))
}

/// Like [`response_script`], but appends one line to `count_file` per
/// invocation so tests can count process spawns.
pub fn counting_script(dir: &Path, name: &str, payload: &str, count_file: &Path) -> PathBuf {
    let envelope = serde_json::json!({ "result": payload }).to_string();
    write_script(
        dir,
        name,
        &format!(
            "echo spawn >> {count}\ncat <<'CONDUCTOR_EOF'\n{envelope}\nCONDUCTOR_EOF",
            count = count_file.display()
        ),
    )
}

/// Number of lines in a [`counting_script`] count file (0 when absent).
pub fn spawn_count(count_file: &Path) -> usize {
    std::fs::read_to_string(count_file)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}
