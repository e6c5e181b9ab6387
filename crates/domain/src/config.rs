use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Policy defaults for bounded state and framing (spec §4.10, §4.11, §10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CondensePolicy {
    #[serde(default = "d_max_list")]
    pub max_goals: usize,
    #[serde(default = "d_max_list")]
    pub max_open_loops: usize,
    #[serde(default = "d_max_list")]
    pub max_decisions: usize,
    #[serde(default = "d_max_list")]
    pub max_constraints: usize,
    #[serde(default = "d_max_list")]
    pub max_memory_tags: usize,
    #[serde(default = "d_max_list")]
    pub max_memory_refs: usize,
    #[serde(default = "d_episode_summary_cap")]
    pub episode_summary_cap: usize,
    #[serde(default = "d_max_upstream_chars_per_role")]
    pub max_upstream_chars_per_role: usize,
    #[serde(default = "d_max_upstream_total_chars")]
    pub max_upstream_total_chars: usize,
}

impl Default for CondensePolicy {
    fn default() -> Self {
        Self {
            max_goals: d_max_list(),
            max_open_loops: d_max_list(),
            max_decisions: d_max_list(),
            max_constraints: d_max_list(),
            max_memory_tags: d_max_list(),
            max_memory_refs: d_max_list(),
            episode_summary_cap: d_episode_summary_cap(),
            max_upstream_chars_per_role: d_max_upstream_chars_per_role(),
            max_upstream_total_chars: d_max_upstream_total_chars(),
        }
    }
}

/// History framing caps (spec §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "d_history_max_messages")]
    pub max_messages: usize,
    #[serde(default = "d_history_max_chars")]
    pub max_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: d_history_max_messages(),
            max_chars: d_history_max_chars(),
        }
    }
}

/// Sandboxed-tool policy (spec §4.6, §10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "d_fs_read_max_bytes")]
    pub fs_read_max_bytes: usize,
    #[serde(default = "d_fs_list_max_entries")]
    pub fs_list_max_entries: usize,
    #[serde(default = "d_shell_timeout_s")]
    pub shell_timeout_s: u64,
    #[serde(default = "d_shell_output_max_chars")]
    pub shell_output_max_chars: usize,
    #[serde(default = "d_http_timeout_s")]
    pub http_timeout_s: u64,
    #[serde(default = "d_http_max_bytes")]
    pub http_max_bytes: usize,
    #[serde(default = "d_http_cache_ttl_s")]
    pub http_cache_ttl_s: u64,
    #[serde(default = "d_tool_results_max_chars")]
    pub tool_results_max_chars: usize,
    #[serde(default)]
    pub http_allowlist_enabled: bool,
    #[serde(default)]
    pub http_allowlist: Vec<String>,
    #[serde(default = "d_shell_allowed_prefixes")]
    pub shell_allowed_prefixes: Vec<String>,
    #[serde(default = "d_shell_deny_substrings")]
    pub shell_deny_substrings: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fs_read_max_bytes: d_fs_read_max_bytes(),
            fs_list_max_entries: d_fs_list_max_entries(),
            shell_timeout_s: d_shell_timeout_s(),
            shell_output_max_chars: d_shell_output_max_chars(),
            http_timeout_s: d_http_timeout_s(),
            http_max_bytes: d_http_max_bytes(),
            http_cache_ttl_s: d_http_cache_ttl_s(),
            tool_results_max_chars: d_tool_results_max_chars(),
            http_allowlist_enabled: false,
            http_allowlist: Vec::new(),
            shell_allowed_prefixes: d_shell_allowed_prefixes(),
            shell_deny_substrings: d_shell_deny_substrings(),
        }
    }
}

/// Top-level configuration (spec §10.3), layered beneath the environment
/// variables enumerated in spec §6, which always take precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data_root: Option<PathBuf>,
    #[serde(default = "d_max_tool_rounds")]
    pub max_tool_rounds: u32,
    #[serde(default = "d_trace_tail_cap")]
    pub trace_tail_cap: usize,
    #[serde(default)]
    pub condense: CondensePolicy,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    pub fn load_or_default(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %path.display(), "failed to parse config, using defaults");
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }

    /// Resolve the data root: `DATA_ROOT` env var, then config, then `./data`.
    pub fn resolve_data_root(&self) -> PathBuf {
        if let Ok(v) = std::env::var("DATA_ROOT") {
            return PathBuf::from(v);
        }
        self.data_root.clone().unwrap_or_else(|| PathBuf::from("data"))
    }
}

fn d_max_tool_rounds() -> u32 {
    2
}
fn d_trace_tail_cap() -> usize {
    20
}
fn d_max_list() -> usize {
    32
}
fn d_episode_summary_cap() -> usize {
    2000
}
fn d_max_upstream_chars_per_role() -> usize {
    1500
}
fn d_max_upstream_total_chars() -> usize {
    4000
}
fn d_history_max_messages() -> usize {
    8
}
fn d_history_max_chars() -> usize {
    2000
}
fn d_fs_read_max_bytes() -> usize {
    20_000
}
fn d_fs_list_max_entries() -> usize {
    200
}
fn d_shell_timeout_s() -> u64 {
    20
}
fn d_shell_output_max_chars() -> usize {
    20_000
}
fn d_http_timeout_s() -> u64 {
    10
}
fn d_http_max_bytes() -> usize {
    1_000_000
}
fn d_http_cache_ttl_s() -> u64 {
    3600
}
fn d_tool_results_max_chars() -> usize {
    20_000
}
fn d_shell_allowed_prefixes() -> Vec<String> {
    ["ls", "cat", "echo", "pwd", "python", "pytest", "rg", "grep", "sed", "head", "tail"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn d_shell_deny_substrings() -> Vec<String> {
    ["rm", "sudo", "chmod", "chown", "mkfs", "dd", ":(){", "curl", "wget"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.max_tool_rounds, 2);
        assert_eq!(cfg.trace_tail_cap, 20);
        assert_eq!(cfg.condense.max_goals, 32);
        assert_eq!(cfg.condense.episode_summary_cap, 2000);
        assert_eq!(cfg.history.max_messages, 8);
        assert_eq!(cfg.history.max_chars, 2000);
        assert_eq!(cfg.tools.fs_read_max_bytes, 20_000);
        assert_eq!(cfg.tools.fs_list_max_entries, 200);
        assert_eq!(cfg.tools.shell_timeout_s, 20);
        assert_eq!(cfg.tools.http_timeout_s, 10);
        assert_eq!(cfg.tools.http_max_bytes, 1_000_000);
        assert_eq!(cfg.tools.http_cache_ttl_s, 3600);
        assert_eq!(cfg.tools.tool_results_max_chars, 20_000);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let raw = r#"
            max_tool_rounds = 3

            [tools]
            shell_timeout_s = 5
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.max_tool_rounds, 3);
        assert_eq!(cfg.tools.shell_timeout_s, 5);
        assert_eq!(cfg.tools.http_timeout_s, 10);
        assert_eq!(cfg.condense.max_goals, 32);
    }

    #[test]
    fn shell_policy_defaults_include_rm_and_curl() {
        let cfg = ToolsConfig::default();
        assert!(cfg.shell_deny_substrings.iter().any(|s| s == "rm"));
        assert!(cfg.shell_deny_substrings.iter().any(|s| s == "curl"));
        assert!(cfg.shell_allowed_prefixes.iter().any(|s| s == "ls"));
    }
}
