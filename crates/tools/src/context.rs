//! Per-call context handed to every tool handler (spec §4.6).

use std::path::PathBuf;

use cr_domain::types::State;

/// Tunables threaded from [`cr_domain::config::ToolsConfig`] into handlers.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub http_allowlist_enabled: bool,
    pub http_allowlist: Vec<String>,
    pub http_cache_path: PathBuf,
    pub http_cache_ttl_s: u64,
    pub http_timeout_s: u64,
    pub http_max_bytes: usize,
    pub fs_read_max_bytes: usize,
    pub fs_list_max_entries: usize,
    pub shell_timeout_s: u64,
    pub shell_output_max_chars: usize,
    pub shell_allowed_prefixes: Vec<String>,
    pub shell_deny_substrings: Vec<String>,
}

impl ToolSettings {
    pub fn default_for_root(root: &std::path::Path) -> Self {
        let cfg = cr_domain::config::ToolsConfig::default();
        Self {
            http_allowlist_enabled: cfg.http_allowlist_enabled,
            http_allowlist: cfg.http_allowlist.iter().map(|s| s.to_ascii_lowercase()).collect(),
            http_cache_path: root.join(".cognitive_runtime_http_cache.sqlite"),
            http_cache_ttl_s: cfg.http_cache_ttl_s,
            http_timeout_s: cfg.http_timeout_s,
            http_max_bytes: cfg.http_max_bytes,
            fs_read_max_bytes: cfg.fs_read_max_bytes,
            fs_list_max_entries: cfg.fs_list_max_entries,
            shell_timeout_s: cfg.shell_timeout_s,
            shell_output_max_chars: cfg.shell_output_max_chars,
            shell_allowed_prefixes: cfg.shell_allowed_prefixes,
            shell_deny_substrings: cfg.shell_deny_substrings,
        }
    }
}

/// Bundled state + settings passed to every handler (spec §4.6: `(args, {state, settings})`).
pub struct ToolContext<'a> {
    pub state: &'a State,
    pub settings: &'a ToolSettings,
}
