//! `conductor agents`: list discovered agent definitions.

use std::path::PathBuf;

use anyhow::Result;

use conductor_core::agent::discover_agents;
use conductor_core::logging::ConsoleSink;

use crate::config::{self, Overrides};

pub fn run(agents_dir: Option<PathBuf>) -> Result<()> {
    let file = config::load_config()?;
    let resolved = config::resolve(
        Overrides {
            agents_dir,
            ..Overrides::default()
        },
        file.as_ref(),
    )?;

    let sink = ConsoleSink::new();
    let registry = discover_agents(&resolved.agents_dir, &sink);

    if registry.is_empty() {
        println!("No agents found in {}", resolved.agents_dir.display());
        return Ok(());
    }

    println!("Agents in {}:", resolved.agents_dir.display());
    for agent in registry.iter() {
        let tools = if agent.tools.is_empty() {
            "all tools".to_string()
        } else {
            agent.tools.join(", ")
        };
        println!("  {}  [{}]", agent.name, tools);
        if !agent.description.is_empty() {
            println!("      {}", agent.description);
        }
    }
    Ok(())
}
