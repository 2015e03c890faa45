//! Plan file loading: markdown (frontmatter + task sections) and YAML.
//!
//! The on-disk shape is discriminated by extension: `.yaml`/`.yml` files are
//! one YAML document, `.md` files carry a `---`-fenced YAML header followed
//! by one `## Task: <id>` section per task. Both shapes produce the same
//! [`Plan`]. Graph-shape validation (cycles, unresolved dependencies) is the
//! wave planner's job, not the parser's.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use super::{Plan, PlanMeta, QcConfig, Task, TaskType};

/// Errors raised while reading or parsing a plan file.
#[derive(Debug, Error)]
pub enum PlanFileError {
    #[error("failed to read plan file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported plan extension {0:?} (expected .md, .yaml, or .yml)")]
    UnsupportedExtension(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("markdown plan is missing its `---`-fenced header block")]
    MissingHeader,

    #[error("plan must contain at least one task")]
    NoTasks,

    #[error("duplicate task id: {0:?}")]
    DuplicateTaskId(String),

    #[error("task {0:?} has an empty prompt")]
    EmptyPrompt(String),

    #[error("task {task:?} has unknown field {field:?}")]
    UnknownField { task: String, field: String },

    #[error("task {task:?} has invalid type {value:?} (expected regular or integration)")]
    InvalidTaskType { task: String, value: String },
}

/// Load a plan from disk, discriminating the format by file extension.
pub fn load_plan(path: &Path) -> Result<Plan, PlanFileError> {
    load_plan_with_qc_defaults(path, QcConfig::default())
}

/// Like [`load_plan`], but plans whose file declares no `qc` block inherit
/// `qc_defaults` (machine-level policy) instead of the stock defaults. A
/// declared `qc` block always wins.
pub fn load_plan_with_qc_defaults(
    path: &Path,
    qc_defaults: QcConfig,
) -> Result<Plan, PlanFileError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let content = std::fs::read_to_string(path)?;
    match ext.as_str() {
        "yaml" | "yml" => parse_yaml_plan_with(&content, qc_defaults),
        "md" | "markdown" => parse_markdown_plan_with(&content, qc_defaults),
        other => Err(PlanFileError::UnsupportedExtension(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// YAML shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct YamlPlan {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    qc: Option<QcConfig>,
    #[serde(default)]
    tasks: Vec<YamlTask>,
}

#[derive(Debug, Deserialize)]
struct YamlTask {
    id: String,
    #[serde(default)]
    name: Option<String>,
    prompt: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default, rename = "type")]
    task_type: TaskType,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    integration_criteria: Vec<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    estimated_time: Option<String>,
    #[serde(default)]
    json_schema: Option<serde_json::Value>,
}

/// Parse the YAML plan shape.
pub fn parse_yaml_plan(content: &str) -> Result<Plan, PlanFileError> {
    parse_yaml_plan_with(content, QcConfig::default())
}

fn parse_yaml_plan_with(content: &str, qc_defaults: QcConfig) -> Result<Plan, PlanFileError> {
    let raw: YamlPlan = serde_yaml::from_str(content)?;
    let tasks = raw
        .tasks
        .into_iter()
        .map(|t| Task {
            name: t.name.unwrap_or_else(|| t.id.clone()),
            id: t.id,
            prompt: t.prompt,
            agent_name: t.agent,
            depends_on: t.depends_on,
            task_type: t.task_type,
            acceptance_criteria: t.acceptance_criteria,
            integration_criteria: t.integration_criteria,
            file_scope: t.files,
            estimated_time: t.estimated_time,
            json_schema_override: t.json_schema,
        })
        .collect();
    finish(
        PlanMeta {
            name: raw.name,
            description: raw.description,
        },
        raw.qc.unwrap_or(qc_defaults),
        tasks,
    )
}

// ---------------------------------------------------------------------------
// Markdown shape
// ---------------------------------------------------------------------------

/// Frontmatter of a markdown plan. Tasks live in the body.
#[derive(Debug, Deserialize)]
struct MarkdownHeader {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    qc: Option<QcConfig>,
}

const TASK_HEADING: &str = "## Task: ";
const ACCEPTANCE_HEADING: &str = "### Acceptance Criteria";
const INTEGRATION_HEADING: &str = "### Integration Criteria";

/// Parse the markdown plan shape: `---`-fenced YAML header, then one
/// `## Task: <id>` section per task.
///
/// Inside a section, leading `- key: value` bullets set task fields, the
/// following prose is the prompt, and `### Acceptance Criteria` /
/// `### Integration Criteria` subsections list criteria as bullets.
pub fn parse_markdown_plan(content: &str) -> Result<Plan, PlanFileError> {
    parse_markdown_plan_with(content, QcConfig::default())
}

fn parse_markdown_plan_with(content: &str, qc_defaults: QcConfig) -> Result<Plan, PlanFileError> {
    let (header, body) = split_header(content)?;
    let header: MarkdownHeader = serde_yaml::from_str(header)?;

    let mut tasks = Vec::new();
    for section in body.split(TASK_HEADING).skip(1) {
        tasks.push(parse_task_section(section)?);
    }

    finish(
        PlanMeta {
            name: header.name,
            description: header.description,
        },
        header.qc.unwrap_or(qc_defaults),
        tasks,
    )
}

/// Split a markdown document into its fenced header and the remaining body.
fn split_header(content: &str) -> Result<(&str, &str), PlanFileError> {
    let rest = content
        .strip_prefix("---")
        .ok_or(PlanFileError::MissingHeader)?;
    // The header runs until the next line consisting solely of `---`.
    let mut offset = 0;
    for line in rest.lines() {
        if line.trim_end() == "---" && offset > 0 {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((header, body));
        }
        offset += line.len() + 1;
    }
    Err(PlanFileError::MissingHeader)
}

fn parse_task_section(section: &str) -> Result<Task, PlanFileError> {
    let mut lines = section.lines();
    let id = lines.next().unwrap_or("").trim().to_string();

    let mut task = Task {
        id: id.clone(),
        name: id.clone(),
        prompt: String::new(),
        agent_name: None,
        depends_on: vec![],
        task_type: TaskType::Regular,
        acceptance_criteria: vec![],
        integration_criteria: vec![],
        file_scope: vec![],
        estimated_time: None,
        json_schema_override: None,
    };

    #[derive(PartialEq)]
    enum Mode {
        Fields,
        Prompt,
        Acceptance,
        Integration,
    }
    let mut mode = Mode::Fields;
    let mut prompt_lines: Vec<&str> = Vec::new();

    for line in lines {
        let trimmed = line.trim();
        if trimmed == ACCEPTANCE_HEADING {
            mode = Mode::Acceptance;
            continue;
        }
        if trimmed == INTEGRATION_HEADING {
            mode = Mode::Integration;
            continue;
        }

        match mode {
            Mode::Fields => {
                if trimmed.is_empty() {
                    continue;
                }
                if let Some((key, value)) = field_bullet(trimmed) {
                    apply_field(&mut task, key, value)?;
                } else {
                    mode = Mode::Prompt;
                    prompt_lines.push(line);
                }
            }
            Mode::Prompt => prompt_lines.push(line),
            Mode::Acceptance => {
                if let Some(item) = trimmed.strip_prefix("- ") {
                    task.acceptance_criteria.push(item.trim().to_string());
                }
            }
            Mode::Integration => {
                if let Some(item) = trimmed.strip_prefix("- ") {
                    task.integration_criteria.push(item.trim().to_string());
                }
            }
        }
    }

    task.prompt = prompt_lines.join("\n").trim().to_string();
    Ok(task)
}

/// Parse a `- key: value` field bullet, or return `None` for prose.
fn field_bullet(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("- ")?;
    let (key, value) = rest.split_once(':')?;
    let key = key.trim();
    // Field keys are single lowercase words; anything else is prompt prose
    // that merely looks like a bullet.
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        return None;
    }
    Some((key, value.trim()))
}

fn apply_field(task: &mut Task, key: &str, value: &str) -> Result<(), PlanFileError> {
    match key {
        "name" => task.name = value.to_string(),
        "agent" => {
            if !value.is_empty() {
                task.agent_name = Some(value.to_string());
            }
        }
        "depends_on" => task.depends_on = comma_list(value),
        "type" => {
            task.task_type = match value {
                "regular" => TaskType::Regular,
                "integration" => TaskType::Integration,
                other => {
                    return Err(PlanFileError::InvalidTaskType {
                        task: task.id.clone(),
                        value: other.to_string(),
                    });
                }
            }
        }
        "files" => task.file_scope = comma_list(value),
        "estimated_time" => {
            if !value.is_empty() {
                task.estimated_time = Some(value.to_string());
            }
        }
        other => {
            return Err(PlanFileError::UnknownField {
                task: task.id.clone(),
                field: other.to_string(),
            });
        }
    }
    Ok(())
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Shared validation
// ---------------------------------------------------------------------------

fn finish(metadata: PlanMeta, qc: QcConfig, tasks: Vec<Task>) -> Result<Plan, PlanFileError> {
    if tasks.is_empty() {
        return Err(PlanFileError::NoTasks);
    }
    let mut seen = std::collections::HashSet::new();
    for task in &tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(PlanFileError::DuplicateTaskId(task.id.clone()));
        }
        if task.prompt.is_empty() {
            return Err(PlanFileError::EmptyPrompt(task.id.clone()));
        }
    }
    Ok(Plan {
        metadata,
        tasks,
        qc,
    })
}
