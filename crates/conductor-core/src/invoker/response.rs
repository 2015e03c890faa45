//! Structured-response parsing and validation.
//!
//! The external executor emits one JSON document; [`extract_payload`] digs
//! the response payload out of its wrapper (precedence: `structured_output`,
//! then `result`, then `content`, then the raw document), and
//! [`parse_agent_response`] turns the payload into a validated
//! [`AgentResponse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{InvokeError, Payload};

/// Terminal status reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// The structured reply the executor must produce for a task.
///
/// All fields are required; `session_id` travels outside this struct (see
/// [`Payload`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub status: ResponseStatus,
    pub summary: String,
    pub output: String,
    pub errors: Vec<String>,
    pub files_modified: Vec<String>,
}

/// A schema-valid response plus the preserved session id.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub response: AgentResponse,
    pub session_id: Option<String>,
}

/// The canonical JSON schema passed via `--json-schema` when a task has no
/// override.
pub fn canonical_response_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["status", "summary", "output", "errors", "files_modified"],
        "properties": {
            "status": { "type": "string", "enum": ["success", "failed"] },
            "summary": { "type": "string" },
            "output": { "type": "string" },
            "errors": { "type": "array", "items": { "type": "string" } },
            "files_modified": { "type": "array", "items": { "type": "string" } },
            "session_id": { "type": "string" }
        },
        "additionalProperties": true
    })
}

/// Extract the response payload from the executor's raw output.
///
/// Precedence, for output that parses as a JSON object:
/// 1. a `structured_output` field, re-serialized;
/// 2. a `result` string field;
/// 3. a `content` string field;
/// 4. neither: empty payload (the wrapper was valid, just empty).
///
/// Anything that is not a JSON object is passed through verbatim as the
/// payload. A top-level `session_id` string is preserved alongside.
pub fn extract_payload(raw: &str) -> Payload {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw.trim()) else {
        return Payload {
            text: raw.to_string(),
            session_id: None,
        };
    };

    let session_id = obj
        .get("session_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let text = if let Some(structured) = obj.get("structured_output") {
        structured.to_string()
    } else if let Some(result) = obj.get("result").and_then(|v| v.as_str()) {
        result.to_string()
    } else if let Some(content) = obj.get("content").and_then(|v| v.as_str()) {
        content.to_string()
    } else {
        String::new()
    };

    Payload { text, session_id }
}

/// Parse and validate a payload as an [`AgentResponse`].
///
/// Any parse or validity failure is an [`InvokeError::InvalidResponse`],
/// which the retry controller treats as retriable.
pub fn parse_agent_response(payload: &Payload) -> Result<ParsedResponse, InvokeError> {
    let response: AgentResponse = serde_json::from_str(&payload.text)
        .map_err(|e| InvokeError::InvalidResponse(format!("response payload: {e}")))?;
    validate(&response)?;
    Ok(ParsedResponse {
        response,
        session_id: payload.session_id.clone(),
    })
}

/// Enforce the validity rule: a `success` response may carry warnings in
/// `errors` but nothing else.
fn validate(response: &AgentResponse) -> Result<(), InvokeError> {
    if response.status == ResponseStatus::Success {
        if let Some(err) = response
            .errors
            .iter()
            .find(|e| !e.trim().to_ascii_lowercase().starts_with("warning"))
        {
            return Err(InvokeError::InvalidResponse(format!(
                "success response carries a non-warning error: {err:?}"
            )));
        }
    }
    Ok(())
}
