//! Configuration file management for conductor.
//!
//! Provides a TOML-based config file at `~/.config/conductor/config.toml`
//! and a resolution chain per setting: CLI flag > `CONDUCTOR_*` env var >
//! config file > built-in default. A missing config file is not an error.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use conductor_core::plan::QcConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub qc: QcSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Executor binary name or path.
    pub binary: Option<String>,
    /// Wall-time limit per invocation, in seconds.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunSection {
    /// Per-wave concurrency cap; 0 means unlimited.
    pub max_concurrency: Option<usize>,
    /// Directory scanned for agent definitions.
    pub agents_dir: Option<PathBuf>,
    /// Directory receiving run logs.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QcSection {
    /// Retry budget applied to plans that declare no `qc` block.
    pub retry_on_red: Option<u32>,
    /// Auto-selection reviewer list for plans that declare no `qc` block.
    pub default_reviewers: Option<Vec<String>>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// The conductor config directory, always in XDG layout:
/// `$XDG_CONFIG_HOME/conductor` or `~/.config/conductor`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("conductor");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("conductor")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the config file, or `None` when it does not exist.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Write a default config file, creating parent directories as needed.
pub fn write_default_config(force: bool) -> Result<PathBuf> {
    let path = config_path();
    if path.exists() && !force {
        bail!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    std::fs::create_dir_all(config_dir())
        .with_context(|| format!("failed to create {}", config_dir().display()))?;

    let default = ConfigFile {
        executor: ExecutorSection {
            binary: Some("claude".to_string()),
            timeout_secs: Some(1800),
        },
        run: RunSection {
            max_concurrency: Some(4),
            agents_dir: Some(PathBuf::from(".conductor/agents")),
            log_dir: Some(PathBuf::from(".conductor/logs")),
        },
        qc: QcSection {
            retry_on_red: Some(2),
            default_reviewers: Some(vec!["code-review".to_string()]),
        },
    };
    let contents = toml::to_string_pretty(&default).context("failed to serialize config")?;
    std::fs::write(&path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(path)
}

// -----------------------------------------------------------------------
// Resolution
// -----------------------------------------------------------------------

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub executor_binary: String,
    pub task_timeout: Duration,
    pub max_concurrency: usize,
    pub agents_dir: PathBuf,
    pub log_dir: PathBuf,
    /// QC defaults for plans that declare no `qc` block.
    pub qc_defaults: QcConfig,
}

/// CLI-flag overrides feeding into [`resolve`].
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub executor_binary: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_concurrency: Option<usize>,
    pub agents_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Resolve every setting through the chain: flag > env > file > default.
pub fn resolve(overrides: Overrides, file: Option<&ConfigFile>) -> Result<ResolvedConfig> {
    let executor_binary = overrides
        .executor_binary
        .or_else(|| env_var("CONDUCTOR_EXECUTOR"))
        .or_else(|| file.and_then(|f| f.executor.binary.clone()))
        .unwrap_or_else(|| "claude".to_string());

    let timeout_secs = match overrides
        .timeout_secs
        .map(Ok)
        .or_else(|| env_var("CONDUCTOR_TIMEOUT_SECS").map(|v| v.parse()))
        .or_else(|| file.and_then(|f| f.executor.timeout_secs.map(Ok)))
    {
        Some(parsed) => parsed.context("invalid CONDUCTOR_TIMEOUT_SECS")?,
        None => 1800,
    };

    let max_concurrency = match overrides
        .max_concurrency
        .map(Ok)
        .or_else(|| env_var("CONDUCTOR_MAX_CONCURRENCY").map(|v| v.parse()))
        .or_else(|| file.and_then(|f| f.run.max_concurrency.map(Ok)))
    {
        Some(parsed) => parsed.context("invalid CONDUCTOR_MAX_CONCURRENCY")?,
        None => 4,
    };

    let agents_dir = overrides
        .agents_dir
        .or_else(|| env_var("CONDUCTOR_AGENTS_DIR").map(PathBuf::from))
        .or_else(|| file.and_then(|f| f.run.agents_dir.clone()))
        .unwrap_or_else(|| PathBuf::from(".conductor/agents"));

    let log_dir = overrides
        .log_dir
        .or_else(|| env_var("CONDUCTOR_LOG_DIR").map(PathBuf::from))
        .or_else(|| file.and_then(|f| f.run.log_dir.clone()))
        .unwrap_or_else(|| PathBuf::from(".conductor/logs"));

    let mut qc_defaults = QcConfig::default();
    if let Some(file) = file {
        if let Some(retry_on_red) = file.qc.retry_on_red {
            qc_defaults.retry_on_red = retry_on_red;
        }
        if let Some(reviewers) = &file.qc.default_reviewers {
            qc_defaults.default_reviewers = reviewers.clone();
        }
    }

    Ok(ResolvedConfig {
        executor_binary,
        task_timeout: Duration::from_secs(timeout_secs),
        max_concurrency,
        agents_dir,
        log_dir,
        qc_defaults,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults_without_file_or_flags() {
        let resolved = resolve(Overrides::default(), None).unwrap();
        assert_eq!(resolved.executor_binary, "claude");
        assert_eq!(resolved.max_concurrency, 4);
        assert_eq!(resolved.task_timeout, Duration::from_secs(1800));
        assert_eq!(resolved.agents_dir, PathBuf::from(".conductor/agents"));
        assert_eq!(resolved.qc_defaults.retry_on_red, 2);
    }

    #[test]
    fn flags_beat_the_config_file() {
        let file = ConfigFile {
            executor: ExecutorSection {
                binary: Some("file-claude".to_string()),
                timeout_secs: Some(60),
            },
            run: RunSection {
                max_concurrency: Some(8),
                ..RunSection::default()
            },
            ..ConfigFile::default()
        };
        let overrides = Overrides {
            executor_binary: Some("flag-claude".to_string()),
            max_concurrency: Some(2),
            ..Overrides::default()
        };
        let resolved = resolve(overrides, Some(&file)).unwrap();
        assert_eq!(resolved.executor_binary, "flag-claude");
        assert_eq!(resolved.max_concurrency, 2);
        // Unset flags fall through to the file.
        assert_eq!(resolved.task_timeout, Duration::from_secs(60));
    }

    #[test]
    fn file_qc_section_feeds_qc_defaults() {
        let file = ConfigFile {
            qc: QcSection {
                retry_on_red: Some(5),
                default_reviewers: Some(vec!["strict-review".to_string()]),
            },
            ..ConfigFile::default()
        };
        let resolved = resolve(Overrides::default(), Some(&file)).unwrap();
        assert_eq!(resolved.qc_defaults.retry_on_red, 5);
        assert_eq!(resolved.qc_defaults.default_reviewers, vec!["strict-review"]);
    }

    #[test]
    fn config_file_round_trips_through_toml() {
        let toml_str = r#"
[executor]
binary = "claude"
timeout_secs = 900

[run]
max_concurrency = 6
agents_dir = "agents"
log_dir = "logs"

[qc]
retry_on_red = 1
default_reviewers = ["code-review", "security-review"]
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(file.executor.timeout_secs, Some(900));
        assert_eq!(file.run.max_concurrency, Some(6));
        assert_eq!(
            file.qc.default_reviewers.unwrap(),
            vec!["code-review", "security-review"]
        );
    }

    #[test]
    fn empty_config_file_parses() {
        let file: ConfigFile = toml::from_str("").unwrap();
        assert!(file.executor.binary.is_none());
        assert!(file.run.max_concurrency.is_none());
    }
}
