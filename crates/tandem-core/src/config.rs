use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TandemError};

/// Top-level engine configuration.
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Run deadline in seconds (0 = no deadline). Expiry cancels the run.
    #[serde(default)]
    pub max_duration_secs: u64,
    /// Statically validate the node tree before every run.
    #[serde(default = "default_validate")]
    pub validate: bool,
    /// Capacity of the run event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 0,
            validate: default_validate(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl RunnerConfig {
    pub fn max_duration(&self) -> Option<Duration> {
        (self.max_duration_secs > 0).then(|| Duration::from_secs(self.max_duration_secs))
    }
}

fn default_validate() -> bool { true }
fn default_event_capacity() -> usize { 256 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model invocations allowed per agent node before `ToolLoopExceeded`.
    /// Values below 1 are treated as 1.
    #[serde(default = "default_max_tool_turns")]
    pub max_tool_turns: usize,
    /// Default timeout for function tools.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Run the tool calls of one model turn concurrently.
    #[serde(default)]
    pub parallel_tools: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_turns: default_max_tool_turns(),
            tool_timeout_secs: default_tool_timeout(),
            parallel_tools: false,
        }
    }
}

fn default_max_tool_turns() -> usize { 10 }
fn default_tool_timeout() -> u64 { 30 }

/// What a parallel group does with successful branches when a sibling fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Merge the successful branches, then report `PartialFailure`.
    #[default]
    FailSoft,
    /// Merge nothing if any branch failed.
    AllOrNothing,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default)]
    pub join_policy: JoinPolicy,
    /// Maximum branches in flight at once (0 = unbounded).
    #[serde(default)]
    pub max_concurrency: usize,
}

impl EngineConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TandemError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, expanding `${ENV_VAR}` references.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| TandemError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` and `${ENV_VAR:-default}` patterns in a string.
///
/// Unset variables without a default are left as written.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut inner = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                inner.push(c);
            }
            let (var_name, default) = match inner.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (inner.as_str(), None),
            };
            match (std::env::var(var_name), default) {
                (Ok(val), _) if !val.is_empty() => result.push_str(&val),
                (_, Some(default)) => result.push_str(default),
                (Ok(val), None) => result.push_str(&val),
                (Err(_), None) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", inner));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty() {
        let config = EngineConfig::parse("").unwrap();
        assert_eq!(config.agent.max_tool_turns, 10);
        assert_eq!(config.agent.tool_timeout_secs, 30);
        assert!(config.runner.validate);
        assert_eq!(config.runner.max_duration(), None);
        assert_eq!(config.parallel.join_policy, JoinPolicy::FailSoft);
        assert_eq!(config.parallel.max_concurrency, 0);
    }

    #[test]
    fn test_parse_sections() {
        let config = EngineConfig::parse(
            r#"
[runner]
max_duration_secs = 5

[agent]
max_tool_turns = 3
parallel_tools = true

[parallel]
join_policy = "all_or_nothing"
max_concurrency = 2
"#,
        )
        .unwrap();
        assert_eq!(config.runner.max_duration(), Some(Duration::from_secs(5)));
        assert_eq!(config.agent.max_tool_turns, 3);
        assert!(config.agent.parallel_tools);
        assert_eq!(config.parallel.join_policy, JoinPolicy::AllOrNothing);
        assert_eq!(config.parallel.max_concurrency, 2);
    }

    #[test]
    fn test_invalid_toml() {
        let err = EngineConfig::parse("[agent\nmax_tool_turns = ").unwrap_err();
        assert!(matches!(err, TandemError::Config(_)));
    }

    #[test]
    fn test_expand_env_default() {
        std::env::remove_var("TANDEM_TEST_UNSET_VAR");
        assert_eq!(
            expand_env_vars("model = \"${TANDEM_TEST_UNSET_VAR:-bielik}\""),
            "model = \"bielik\""
        );
        assert_eq!(
            expand_env_vars("${TANDEM_TEST_UNSET_VAR}"),
            "${TANDEM_TEST_UNSET_VAR}"
        );
    }

    #[test]
    fn test_expand_env_set() {
        std::env::set_var("TANDEM_TEST_MODEL_VAR", "gemini");
        assert_eq!(
            expand_env_vars("${TANDEM_TEST_MODEL_VAR:-fallback}/x"),
            "gemini/x"
        );
        assert_eq!(expand_env_vars("no vars here"), "no vars here");
    }
}
