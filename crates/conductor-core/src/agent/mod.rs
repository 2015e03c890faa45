//! Executor-agent profiles and the registry that holds them.
//!
//! An [`AgentDef`] is a self-contained profile (system prompt, tool
//! allow-list, optional model hint) handed to the external executor as a
//! JSON descriptor. The registry is built once by [`discovery`] and is
//! read-only for the rest of the run.

pub mod discovery;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use discovery::discover_agents;

/// A named executor-agent profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDef {
    /// Unique name, referenced from tasks and QC configuration.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Ordered tool allow-list; empty means "all tools".
    #[serde(default)]
    pub tools: Vec<String>,
    /// The agent's system prompt.
    #[serde(default)]
    pub system_prompt_body: String,
    /// Optional model hint forwarded to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Case-sensitive `name -> AgentDef` mapping, immutable after discovery.
#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentDef>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a definition under its own name. An existing entry with the
    /// same name is replaced (last-writer-wins) and returned.
    pub fn insert(&mut self, agent: AgentDef) -> Option<AgentDef> {
        self.agents.insert(agent.name.clone(), agent)
    }

    /// Look up an agent by exact name.
    pub fn lookup(&self, name: &str) -> Option<&AgentDef> {
        self.agents.get(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(|s| s.as_str()).collect()
    }

    /// Iterate definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentDef> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
