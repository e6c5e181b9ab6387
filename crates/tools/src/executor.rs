//! Tool executor: the only component permitted to mutate tool-specific side
//! effects (spec §4.6).

use std::path::PathBuf;

use cr_domain::types::{State, ToolCall, ToolResult};
use serde_json::{json, Value};

use crate::context::{ToolContext, ToolSettings};
use crate::registry::{ToolKind, ToolRegistry};
use crate::{fs_tools, http_tool, shell_tool, time_tool};

pub struct ToolExecutor {
    pub root: PathBuf,
    pub registry: ToolRegistry,
    pub settings: ToolSettings,
}

impl ToolExecutor {
    pub fn new(root: PathBuf) -> Self {
        let settings = ToolSettings::default_for_root(&root);
        Self { root, registry: ToolRegistry::with_builtins(), settings }
    }

    pub fn readonly(root: PathBuf) -> Self {
        let settings = ToolSettings::default_for_root(&root);
        Self { root, registry: ToolRegistry::readonly(), settings }
    }

    /// Execute one call, returning a [`ToolResult`] — never propagating a
    /// handler failure as a Rust error (spec §4.6, §7).
    pub async fn execute(&self, call: &ToolCall, state: &State) -> ToolResult {
        let Some(kind) = self.registry.get(&call.tool) else {
            return ToolResult {
                id: call.id.clone(),
                tool: call.tool.clone(),
                ok: false,
                output: None,
                error: Some("unknown tool".to_string()),
                metadata: json!({}),
            };
        };

        let ctx = ToolContext { state, settings: &self.settings };
        let url_for_metadata = call.args.get("url").and_then(Value::as_str).map(str::to_string);

        let outcome: Result<Value, String> = match kind {
            ToolKind::FsReadText => fs_tools::read_text(&self.root, &call.args, &ctx),
            ToolKind::FsListDir => fs_tools::list_dir(&self.root, &call.args, &ctx),
            ToolKind::FsWriteText => fs_tools::write_text(&self.root, &call.args, &ctx),
            ToolKind::ShellExec => shell_tool::exec(&self.root, &call.args, &ctx).await,
            ToolKind::HttpGet => http_tool::get(&call.args, &ctx).await,
            ToolKind::SystemTime => Ok(time_tool::now()),
        };

        let mut metadata = json!({});
        if let Some(url) = url_for_metadata {
            metadata["url"] = json!(url);
            if let Ok(ref v) = outcome {
                metadata["cache_hit"] = v.get("cache_hit").cloned().unwrap_or(json!(false));
            }
        }

        match outcome {
            Ok(output) => ToolResult {
                id: call.id.clone(),
                tool: call.tool.clone(),
                ok: true,
                output: Some(output),
                error: None,
                metadata,
            },
            Err(error) => ToolResult {
                id: call.id.clone(),
                tool: call.tool.clone(),
                ok: false,
                output: None,
                error: Some(error),
                metadata,
            },
        }
    }

    pub async fn execute_calls(&self, calls: &[ToolCall], state: &State) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call, state).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_tool_returns_ok_false() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(dir.path().to_path_buf());
        let state = State::default();
        let call = ToolCall { id: "1".to_string(), tool: "fs.delete_everything".to_string(), args: json!({}) };
        let result = executor.execute(&call, &state).await;
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("unknown tool"));
    }

    #[tokio::test]
    async fn sandbox_escape_is_reported_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(dir.path().to_path_buf());
        let state = State::default();
        let call = ToolCall {
            id: "1".to_string(),
            tool: "fs.write_text".to_string(),
            args: json!({"path": "../escape.txt", "text": "x"}),
        };
        let result = executor.execute(&call, &state).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("escape"));
    }

    #[tokio::test]
    async fn fs_list_dir_succeeds_on_sandbox_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello").unwrap();
        let executor = ToolExecutor::new(dir.path().to_path_buf());
        let state = State::default();
        let call = ToolCall { id: "1".to_string(), tool: "fs.list_dir".to_string(), args: json!({"path": "."}) };
        let result = executor.execute(&call, &state).await;
        assert!(result.ok);
    }
}
