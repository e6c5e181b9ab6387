//! `fs.*` sandboxed filesystem tools (spec §4.6).

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::sandbox::resolve_under_root;

fn get_path(root: &Path, user_path: &str) -> Result<PathBuf, String> {
    resolve_under_root(root, user_path)
        .ok_or_else(|| format!("path '{user_path}' escapes the sandbox root"))
}

pub fn read_text(root: &Path, args: &Value, ctx: &ToolContext) -> Result<Value, String> {
    let path = args
        .get("path")
        .and_then(Value::as_str)
        .ok_or("fs.read_text requires a string 'path'")?;
    let max_bytes = args
        .get("max_bytes")
        .and_then(Value::as_u64)
        .unwrap_or(ctx.settings.fs_read_max_bytes as u64) as usize;

    let resolved = get_path(root, path)?;
    let bytes = std::fs::read(&resolved).map_err(|e| format!("read failed: {e}"))?;
    let truncated = bytes.len() > max_bytes;
    let slice = if truncated { &bytes[..max_bytes] } else { &bytes[..] };
    let text = String::from_utf8_lossy(slice).into_owned();

    Ok(json!({
        "text": text,
        "truncated": truncated,
        "bytes_read": slice.len(),
    }))
}

pub fn list_dir(root: &Path, args: &Value, ctx: &ToolContext) -> Result<Value, String> {
    let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
    let max_entries = args
        .get("max_entries")
        .and_then(Value::as_u64)
        .unwrap_or(ctx.settings.fs_list_max_entries as u64) as usize;

    let resolved = get_path(root, path)?;
    let mut names: Vec<String> = std::fs::read_dir(&resolved)
        .map_err(|e| format!("list_dir failed: {e}"))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    let truncated = names.len() > max_entries;
    names.truncate(max_entries);

    Ok(json!({
        "entries": names,
        "truncated": truncated,
    }))
}

pub fn write_text(root: &Path, args: &Value, _ctx: &ToolContext) -> Result<Value, String> {
    let path = args
        .get("path")
        .and_then(Value::as_str)
        .ok_or("fs.write_text requires a string 'path'")?;
    let text = args
        .get("text")
        .and_then(Value::as_str)
        .ok_or("fs.write_text requires a string 'text'")?;
    let overwrite = args.get("overwrite").and_then(Value::as_bool).unwrap_or(false);

    let resolved = get_path(root, path)?;
    if resolved.exists() && !overwrite {
        return Err(format!("'{path}' already exists; pass overwrite=true to replace it"));
    }
    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("create_dir_all failed: {e}"))?;
    }
    std::fs::write(&resolved, text).map_err(|e| format!("write failed: {e}"))?;

    Ok(json!({
        "bytes_written": text.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ToolSettings;
    use cr_domain::types::State;

    fn ctx(settings: &ToolSettings, state: &State) -> ToolContext<'_> {
        ToolContext { state, settings }
    }

    #[test]
    fn read_text_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello").unwrap();
        let settings = ToolSettings::default_for_root(dir.path());
        let state = State::default();
        let out = read_text(dir.path(), &json!({"path": "hello.txt"}), &ctx(&settings, &state)).unwrap();
        assert_eq!(out["text"], "hello");
        assert_eq!(out["truncated"], false);
    }

    #[test]
    fn write_text_refuses_overwrite_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        let settings = ToolSettings::default_for_root(dir.path());
        let state = State::default();
        let err = write_text(dir.path(), &json!({"path": "a.txt", "text": "new"}), &ctx(&settings, &state))
            .unwrap_err();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn write_text_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ToolSettings::default_for_root(dir.path());
        let state = State::default();
        let err = write_text(
            dir.path(),
            &json!({"path": "../escape.txt", "text": "x"}),
            &ctx(&settings, &state),
        )
        .unwrap_err();
        assert!(err.contains("escapes"));
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[test]
    fn list_dir_sorts_alphabetically() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        let settings = ToolSettings::default_for_root(dir.path());
        let state = State::default();
        let out = list_dir(dir.path(), &json!({}), &ctx(&settings, &state)).unwrap();
        let entries: Vec<String> =
            out["entries"].as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
        assert_eq!(entries, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }
}
