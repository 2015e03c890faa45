//! Agent-definition discovery: builds an [`AgentRegistry`] from a directory
//! tree of markdown files with YAML frontmatter.
//!
//! Scan whitelist: files directly in the root, plus everything under
//! immediate subdirectories named `NN-*` (two digits, dash, suffix). The
//! well-known subdirectories `examples`, `transcripts`, and `logs` are
//! skipped, as is every other immediate subdirectory. Only `*.md` files are
//! parsed; `README.md` and `*-framework.md` are skipped.
//!
//! Discovery never fails: a missing root yields an empty registry, and a
//! file that does not parse produces a warning and is skipped. Traversal is
//! sorted by file name so name collisions resolve deterministically
//! (last writer wins).

use std::path::Path;

use serde::Deserialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::logging::EventSink;

use super::{AgentDef, AgentRegistry};

/// Subdirectory names that are never scanned.
const SKIPPED_DIRS: &[&str] = &["examples", "transcripts", "logs"];

/// Frontmatter of an agent definition file. Only `name` is required.
#[derive(Debug, Deserialize)]
struct AgentHeader {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tools: Option<ToolsField>,
    #[serde(default)]
    model: Option<String>,
}

/// The `tools` field accepts a comma-separated string or a sequence.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolsField {
    List(Vec<String>),
    Csv(String),
}

impl ToolsField {
    /// Normalize either shape to a trimmed list with empty entries dropped.
    fn normalize(self) -> Vec<String> {
        let raw = match self {
            ToolsField::List(items) => items,
            ToolsField::Csv(s) => s.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Scan `root` and build the registry.
pub fn discover_agents(root: &Path, sink: &dyn EventSink) -> AgentRegistry {
    let mut registry = AgentRegistry::new();

    if !root.is_dir() {
        return registry;
    }

    // Files directly in the root, in name order.
    for entry in sorted_walk(root, 1) {
        parse_into(&mut registry, &entry, sink);
    }

    // Whitelisted immediate subdirectories, recursively.
    let mut subdirs: Vec<_> = std::fs::read_dir(root)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    subdirs.sort();

    for dir in subdirs {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if SKIPPED_DIRS.contains(&name) || !is_numbered_dir(name) {
            continue;
        }
        for entry in sorted_walk(&dir, usize::MAX) {
            parse_into(&mut registry, &entry, sink);
        }
    }

    registry
}

/// Walk `dir` up to `depth`, yielding eligible `.md` file paths in sorted
/// order.
fn sorted_walk(dir: &Path, depth: usize) -> Vec<std::path::PathBuf> {
    WalkDir::new(dir)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_agent_file(p))
        .collect()
}

/// `NN-*`: two ASCII digits, a dash, any suffix.
fn is_numbered_dir(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > 3
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2] == b'-'
}

/// Eligible agent files: `*.md`, excluding `README.md` and `*-framework.md`.
fn is_agent_file(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    file_name.ends_with(".md")
        && file_name != "README.md"
        && !file_name.ends_with("-framework.md")
}

/// Parse one file and insert it, or warn and skip.
fn parse_into(registry: &mut AgentRegistry, path: &Path, sink: &dyn EventSink) {
    match parse_agent_file(path) {
        Ok(agent) => {
            if registry.insert(agent).is_some() {
                warn!(path = %path.display(), "agent name collision, later file wins");
            }
        }
        Err(reason) => {
            let message = format!("skipping agent file {}: {reason}", path.display());
            warn!("{message}");
            sink.log_warning(&message);
        }
    }
}

/// Parse a single agent definition file.
fn parse_agent_file(path: &Path) -> Result<AgentDef, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let (header, body) = split_frontmatter(&content)
        .ok_or_else(|| "missing `---` header fence".to_string())?;
    let header: AgentHeader = serde_yaml::from_str(header).map_err(|e| e.to_string())?;
    if header.name.trim().is_empty() {
        return Err("empty agent name".to_string());
    }
    Ok(AgentDef {
        name: header.name,
        description: header.description,
        tools: header.tools.map(ToolsField::normalize).unwrap_or_default(),
        system_prompt_body: body.trim().to_string(),
        model: header.model,
    })
}

/// Split a document into its `---`-fenced header and the body after the
/// closing fence.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---")?;
    let mut offset = 0;
    for line in rest.lines() {
        if line.trim_end() == "---" && offset > 0 {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len() + 1;
    }
    None
}
