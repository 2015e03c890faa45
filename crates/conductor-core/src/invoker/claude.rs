//! Claude CLI executor.
//!
//! Spawns `claude -p ... --output-format json` once per invocation, captures
//! combined stdout + stderr, and extracts the structured payload. The spawned
//! process is terminated (SIGTERM, then SIGKILL after a grace period) when
//! the cancellation token fires or the per-task deadline expires.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::AgentDef;

use super::response::{canonical_response_schema, extract_payload};
use super::{Executor, InvocationRequest, InvocationResult, InvokeError};

/// Instruction block appended to every prompt, demanding the JSON reply
/// structure. Schema-agnostic so it stays correct when a task overrides the
/// response schema.
const RESPONSE_INSTRUCTIONS: &str = "\n\n\
    Reply with a single JSON object that conforms to the JSON schema passed \
    to this invocation. Output the JSON object only, with no surrounding \
    prose and no code fences.";

/// How long a terminated process gets to exit after SIGTERM before SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Executor backed by the `claude` command-line binary.
#[derive(Debug, Clone)]
pub struct ClaudeExecutor {
    /// Path to the binary. Defaults to `"claude"` (found via `$PATH`).
    binary: String,
    /// Optional wall-time limit per invocation.
    task_timeout: Option<Duration>,
}

impl ClaudeExecutor {
    /// Create an executor that looks for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self {
            binary: "claude".to_string(),
            task_timeout: None,
        }
    }

    /// Use a custom binary path or name.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            task_timeout: None,
        }
    }

    /// Set a wall-time limit per invocation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }
}

impl Default for ClaudeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Command construction
// ---------------------------------------------------------------------------

/// Build the argument vector for one invocation.
///
/// The order is part of the executor contract: `--agents` (when the task has
/// a resolved agent) always comes first, then `--json-schema`, the prompt,
/// and the fixed trailing flags.
pub(crate) fn build_args(request: &InvocationRequest) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(agent) = &request.agent {
        args.push("--agents".to_string());
        args.push(serialize_agent(agent));
    }

    let schema = request
        .json_schema
        .clone()
        .unwrap_or_else(canonical_response_schema);
    args.push("--json-schema".to_string());
    args.push(schema.to_string());

    args.push("-p".to_string());
    args.push(format!("{}{}", request.prompt, RESPONSE_INSTRUCTIONS));

    args.push("--permission-mode".to_string());
    args.push("bypassPermissions".to_string());

    args.push("--settings".to_string());
    args.push(r#"{"disableAllHooks": true}"#.to_string());

    args.push("--output-format".to_string());
    args.push("json".to_string());

    args
}

/// Serialize an agent profile as the single-key mapping the `--agents` flag
/// expects: `{name: {description, tools, system_prompt_body, model?}}`.
fn serialize_agent(agent: &AgentDef) -> String {
    let mut body = serde_json::json!({
        "description": agent.description,
        "tools": agent.tools,
        "system_prompt_body": agent.system_prompt_body,
    });
    if let Some(model) = &agent.model {
        body["model"] = serde_json::Value::String(model.clone());
    }
    let mut mapping = serde_json::Map::new();
    mapping.insert(agent.name.clone(), body);
    serde_json::Value::Object(mapping).to_string()
}

// ---------------------------------------------------------------------------
// Process management
// ---------------------------------------------------------------------------

/// Read an async stream to the end, returning what was produced even on a
/// mid-stream error.
async fn read_all<R: AsyncReadExt + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        warn!(error = %e, "error draining executor output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Sleep for the deadline, or forever when there is none.
async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

/// Terminate a child: SIGTERM first, SIGKILL after the grace period.
async fn terminate(child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we spawned.
        let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if ret == 0 {
            if let Ok(status) = tokio::time::timeout(TERM_GRACE, child.wait()).await {
                return status;
            }
            debug!(pid, "process survived SIGTERM, sending SIGKILL");
        }
    }

    child.kill().await?;
    child.wait().await
}

#[async_trait]
impl Executor for ClaudeExecutor {
    fn name(&self) -> &str {
        "claude"
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        let start = Instant::now();
        let args = build_args(request);

        let mut child = match Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let message =
                    format!("failed to spawn executor {:?}: {e}", self.binary);
                return InvocationResult {
                    raw_output: String::new(),
                    exit_code: 0,
                    duration: start.elapsed(),
                    os_error: Some(message.clone()),
                    payload: Err(InvokeError::Spawn(message)),
                };
            }
        };

        debug!(task_id = %request.task_id, binary = %self.binary, "spawned executor");

        // Drain stdout and stderr concurrently with waiting, so a chatty
        // process cannot fill its pipes and deadlock.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_handle = tokio::spawn(read_all(stdout));
        let err_handle = tokio::spawn(read_all(stderr));

        enum Ended {
            Exited(std::io::Result<std::process::ExitStatus>),
            Cancelled,
            DeadlineHit,
        }
        let ended = tokio::select! {
            status = child.wait() => Ended::Exited(status),
            _ = cancel.cancelled() => Ended::Cancelled,
            _ = deadline(self.task_timeout) => Ended::DeadlineHit,
        };
        let status = match ended {
            Ended::Exited(status) => status,
            Ended::Cancelled => {
                debug!(task_id = %request.task_id, "cancellation fired, terminating executor");
                terminate(&mut child).await
            }
            Ended::DeadlineHit => {
                warn!(task_id = %request.task_id, "executor hit its deadline, terminating");
                terminate(&mut child).await
            }
        };

        let mut raw_output = out_handle.await.unwrap_or_default();
        let err_output = err_handle.await.unwrap_or_default();
        raw_output.push_str(&err_output);

        let (exit_code, os_error) = match status {
            Ok(status) => (status.code().unwrap_or(-1), None),
            Err(e) => (0, Some(e.to_string())),
        };

        let payload = match &os_error {
            Some(message) => Err(InvokeError::Spawn(message.clone())),
            None => Ok(extract_payload(&raw_output)),
        };

        InvocationResult {
            raw_output,
            exit_code,
            duration: start.elapsed(),
            os_error,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::response::parse_agent_response;

    fn request(prompt: &str) -> InvocationRequest {
        InvocationRequest {
            task_id: "t1".to_string(),
            prompt: prompt.to_string(),
            agent: None,
            json_schema: None,
        }
    }

    fn agent() -> AgentDef {
        AgentDef {
            name: "rust-specialist".to_string(),
            description: "Writes Rust.".to_string(),
            tools: vec!["Bash".to_string(), "Edit".to_string()],
            system_prompt_body: "You are a Rust specialist.".to_string(),
            model: None,
        }
    }

    /// Write an executable shell script into `dir` and return its path.
    fn script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    // -- argument construction ---------------------------------------------

    #[test]
    fn args_without_agent_start_with_json_schema() {
        let args = build_args(&request("do it"));
        assert_eq!(args[0], "--json-schema");
        assert_eq!(args[2], "-p");
        assert!(args[3].starts_with("do it"));
        assert_eq!(
            &args[4..],
            &[
                "--permission-mode",
                "bypassPermissions",
                "--settings",
                r#"{"disableAllHooks": true}"#,
                "--output-format",
                "json",
            ]
        );
    }

    #[test]
    fn agents_flag_precedes_everything_else() {
        let mut req = request("go");
        req.agent = Some(agent());
        let args = build_args(&req);
        assert_eq!(args[0], "--agents");
        assert_eq!(args[2], "--json-schema");
    }

    #[test]
    fn agent_serializes_as_single_key_mapping() {
        let json: serde_json::Value = serde_json::from_str(&serialize_agent(&agent())).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        let body = &obj["rust-specialist"];
        assert_eq!(body["description"], "Writes Rust.");
        assert_eq!(body["tools"], serde_json::json!(["Bash", "Edit"]));
        assert_eq!(body["system_prompt_body"], "You are a Rust specialist.");
        assert!(body.get("model").is_none());
    }

    #[test]
    fn agent_model_hint_is_included_when_set() {
        let mut a = agent();
        a.model = Some("opus".to_string());
        let json: serde_json::Value = serde_json::from_str(&serialize_agent(&a)).unwrap();
        assert_eq!(json["rust-specialist"]["model"], "opus");
    }

    #[test]
    fn schema_override_replaces_canonical_schema() {
        let mut req = request("go");
        req.json_schema = Some(serde_json::json!({"type": "object"}));
        let args = build_args(&req);
        let idx = args.iter().position(|a| a == "--json-schema").unwrap();
        assert_eq!(args[idx + 1], r#"{"type":"object"}"#);
    }

    #[test]
    fn prompt_carries_the_instruction_block() {
        let args = build_args(&request("original prompt"));
        let idx = args.iter().position(|a| a == "-p").unwrap();
        assert!(args[idx + 1].starts_with("original prompt"));
        assert!(args[idx + 1].contains("single JSON object"));
    }

    // -- process behavior ---------------------------------------------------

    #[tokio::test]
    async fn fake_executor_round_trips_a_response() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(
            tmp.path(),
            "fake_claude.sh",
            r#"echo '{"result":"{\"status\":\"success\",\"summary\":\"done\",\"output\":\"\",\"errors\":[],\"files_modified\":[]}","session_id":"sess-1"}'"#,
        );

        let executor = ClaudeExecutor::with_binary(bin.to_str().unwrap());
        let result = executor
            .invoke(&request("do it"), &CancellationToken::new())
            .await;

        assert_eq!(result.exit_code, 0);
        assert!(result.os_error.is_none());
        let payload = result.payload.expect("payload should extract");
        assert_eq!(payload.session_id.as_deref(), Some("sess-1"));
        let parsed = parse_agent_response(&payload).expect("should parse");
        assert_eq!(parsed.response.summary, "done");
        assert_eq!(parsed.session_id.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_error_with_zero_exit() {
        let executor = ClaudeExecutor::with_binary("/nonexistent/claude");
        let result = executor
            .invoke(&request("go"), &CancellationToken::new())
            .await;

        assert_eq!(result.exit_code, 0);
        assert!(result.os_error.is_some());
        assert!(matches!(result.payload, Err(InvokeError::Spawn(_))));
    }

    #[tokio::test]
    async fn nonzero_exit_preserves_output() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(tmp.path(), "angry.sh", "echo partial output\nexit 3");

        let executor = ClaudeExecutor::with_binary(bin.to_str().unwrap());
        let result = executor
            .invoke(&request("go"), &CancellationToken::new())
            .await;

        assert_eq!(result.exit_code, 3);
        assert!(result.raw_output.contains("partial output"));
        // Non-JSON output passes through verbatim as the payload.
        assert_eq!(
            result.payload.unwrap().text.trim(),
            "partial output"
        );
    }

    #[tokio::test]
    async fn stderr_is_appended_to_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(tmp.path(), "noisy.sh", "echo to-stdout\necho to-stderr >&2");

        let executor = ClaudeExecutor::with_binary(bin.to_str().unwrap());
        let result = executor
            .invoke(&request("go"), &CancellationToken::new())
            .await;

        assert!(result.raw_output.contains("to-stdout"));
        assert!(result.raw_output.contains("to-stderr"));
        let stdout_at = result.raw_output.find("to-stdout").unwrap();
        let stderr_at = result.raw_output.find("to-stderr").unwrap();
        assert!(stdout_at < stderr_at, "stdout should come first");
    }

    #[tokio::test]
    async fn cancellation_terminates_and_keeps_prior_output() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(tmp.path(), "sleepy.sh", "echo started\nsleep 3600");

        let executor = ClaudeExecutor::with_binary(bin.to_str().unwrap());
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel_clone.cancel();
        });

        let result = executor.invoke(&request("go"), &cancel).await;

        assert_ne!(result.exit_code, 0, "killed process must not exit cleanly");
        assert!(result.raw_output.contains("started"));
        assert!(result.duration < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn deadline_terminates_a_hung_process() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(tmp.path(), "hung.sh", "sleep 3600");

        let executor = ClaudeExecutor::with_binary(bin.to_str().unwrap())
            .timeout(Duration::from_millis(200));
        let result = executor
            .invoke(&request("go"), &CancellationToken::new())
            .await;

        assert_ne!(result.exit_code, 0);
        assert!(result.duration < Duration::from_secs(30));
    }

    #[test]
    fn executor_name_is_claude() {
        assert_eq!(ClaudeExecutor::new().name(), "claude");
    }
}
