//! The `Executor` trait -- the seam between the orchestrator and the
//! external LLM command-line tool.
//!
//! The production implementation is [`claude::ClaudeExecutor`], which spawns
//! the `claude` binary once per invocation. Tests substitute in-process
//! implementations. The trait is object-safe so it can be shared as
//! `Arc<dyn Executor>` across concurrently running tasks.

pub mod claude;
pub mod response;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentDef;

pub use claude::ClaudeExecutor;
pub use response::{AgentResponse, ParsedResponse, ResponseStatus};

/// Everything the executor needs for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    /// Task id, for logging only.
    pub task_id: String,
    /// The full prompt, feedback already appended by the caller.
    pub prompt: String,
    /// Resolved agent profile, serialized into `--agents` when present.
    pub agent: Option<AgentDef>,
    /// Override for `--json-schema`; the canonical response schema is used
    /// when absent.
    pub json_schema: Option<serde_json::Value>,
}

/// Failures an invocation can surface.
///
/// Both variants are retriable within the retry budget; whether the run as
/// a whole was cancelled is observed on the [`CancellationToken`] by the
/// retry controller, not encoded here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    /// The process output did not yield a schema-valid response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The process could not be spawned at all.
    #[error("failed to run executor: {0}")]
    Spawn(String),
}

/// The extracted response payload plus the preserved top-level session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// JSON text of the response payload (may be the raw output verbatim).
    pub text: String,
    /// `session_id` from the top-level output document, if present.
    pub session_id: Option<String>,
}

/// Outcome of one external-process invocation.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    /// Combined stdout + stderr, preserved even on kill or failure.
    pub raw_output: String,
    /// Process exit code; 0 when the process never ran.
    pub exit_code: i32,
    /// Wall-clock time of the invocation.
    pub duration: Duration,
    /// OS-level failure (binary not found, wait error), if any.
    pub os_error: Option<String>,
    /// The extracted payload, or the spawn failure.
    pub payload: Result<Payload, InvokeError>,
}

/// Adapter interface for running the external LLM tool.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Human-readable executor name (e.g. "claude").
    fn name(&self) -> &str;

    /// Run the external tool once for `request`.
    ///
    /// Must terminate the process when `cancel` fires, preserving any
    /// output already produced. Never panics on process failure; every
    /// failure mode is encoded in the returned [`InvocationResult`].
    async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: &CancellationToken,
    ) -> InvocationResult;
}

// Compile-time assertion: Executor must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Executor) {}
};
