//! `shell.exec` — run an allowlisted command to completion, never hanging
//! past `timeout_s` (spec §4.6, §5).

use serde_json::{json, Value};
use tokio::process::Command;

use crate::context::ToolContext;
use crate::sandbox::validate_shell_cmd;

pub async fn exec(root: &std::path::Path, args: &Value, ctx: &ToolContext<'_>) -> Result<Value, String> {
    let cmd_str = args
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or("shell.exec requires a string 'cmd'")?;
    let timeout_s = args
        .get("timeout_s")
        .and_then(Value::as_u64)
        .unwrap_or(ctx.settings.shell_timeout_s);

    validate_shell_cmd(cmd_str, &ctx.settings.shell_allowed_prefixes, &ctx.settings.shell_deny_substrings)?;

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd_str)
        .current_dir(root)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .stdin(std::process::Stdio::null());

    let child = command.spawn().map_err(|e| format!("failed to spawn: {e}"))?;

    let output = match tokio::time::timeout(std::time::Duration::from_secs(timeout_s), child.wait_with_output()).await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("process error: {e}")),
        Err(_) => return Err("command timed out".to_string()),
    };

    let max_chars = ctx.settings.shell_output_max_chars;
    let stdout = truncate_chars(&String::from_utf8_lossy(&output.stdout), max_chars);
    let stderr = truncate_chars(&String::from_utf8_lossy(&output.stderr), max_chars);

    Ok(json!({
        "stdout": stdout,
        "stderr": stderr,
        "exit_code": output.status.code(),
    }))
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ToolSettings;
    use cr_domain::types::State;

    #[tokio::test]
    async fn runs_allowed_command() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ToolSettings::default_for_root(dir.path());
        let state = State::default();
        let ctx = ToolContext { state: &state, settings: &settings };
        let out = exec(dir.path(), &json!({"cmd": "echo hello"}), &ctx).await.unwrap();
        assert_eq!(out["stdout"].as_str().unwrap().trim(), "hello");
        assert_eq!(out["exit_code"], 0);
    }

    #[tokio::test]
    async fn rejects_denied_command() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ToolSettings::default_for_root(dir.path());
        let state = State::default();
        let ctx = ToolContext { state: &state, settings: &settings };
        let err = exec(dir.path(), &json!({"cmd": "rm -rf /"}), &ctx).await.unwrap_err();
        assert!(!err.is_empty());
    }

    #[tokio::test]
    async fn enforces_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = ToolSettings::default_for_root(dir.path());
        settings.shell_allowed_prefixes.push("sleep".to_string());
        settings.shell_timeout_s = 1;
        let state = State::default();
        let ctx = ToolContext { state: &state, settings: &settings };
        let err = exec(dir.path(), &json!({"cmd": "sleep 5"}), &ctx).await.unwrap_err();
        assert_eq!(err, "command timed out");
    }
}
