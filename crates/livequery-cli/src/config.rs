//! Watch file parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use livequery::{ConnectionConfig, Value};
use regex::{Captures, Regex};
use serde::Deserialize;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// One live query to watch.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub connection: ConnectionConfig,
    pub query: String,
    /// Values for `$1`, `$2`, ...
    #[serde(default)]
    pub params: Vec<Value>,
    /// Default for `--max-updates`.
    #[serde(default)]
    pub max_updates: Option<u64>,
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a watch YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if substitution fails, the YAML is invalid, or the
/// connection settings are incomplete.
pub fn parse_watch_str(yaml_str: &str) -> Result<WatchConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: WatchConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse watch YAML")?;
    config
        .connection
        .validate()
        .context("Invalid connection settings")?;
    if config.query.trim().is_empty() {
        anyhow::bail!("query must not be empty");
    }
    Ok(config)
}

/// Parse a watch YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its contents are invalid.
pub fn parse_watch_file(path: &Path) -> Result<WatchConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read watch file: {}", path.display()))?;
    parse_watch_str(&content)
}
