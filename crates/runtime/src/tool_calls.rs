//! Tool-call marker parser with loose coercion (spec §4.2).

use std::collections::HashSet;

use cr_domain::trace::TraceKind;
use cr_domain::types::ToolCall;
use serde_json::Value;

use crate::tracer::TraceWriter;

pub const START_MARKER: &str = "<<<TOOL_CALLS_JSON>>>";
pub const END_MARKER: &str = "<<<END_TOOL_CALLS_JSON>>>";
pub const DEFAULT_ALLOWED_PREFIXES: &[&str] = &["fs.", "shell.", "http."];

fn extract_block(text: &str) -> Option<(String, usize, usize)> {
    let start = text.find(START_MARKER)?;
    let end = text[start..].find(END_MARKER).map(|i| start + i)?;
    let payload_start = start + START_MARKER.len();
    let payload = text[payload_start..end].trim().to_string();
    Some((payload, start, end + END_MARKER.len()))
}

fn is_allowed_tool(name: &str, allowed_tools: Option<&HashSet<String>>, allowed_prefixes: &[&str]) -> bool {
    if let Some(set) = allowed_tools {
        if set.contains(name) {
            return true;
        }
    }
    allowed_prefixes.iter().any(|prefix| name.starts_with(prefix))
}

fn emit(tracer: Option<&TraceWriter>, role: Option<&str>, kind: TraceKind, mut data: Value) {
    let Some(tracer) = tracer else { return };
    if let Some(role) = role {
        data["role"] = Value::String(role.to_string());
    }
    let _ = tracer.write(kind, crate::tracer::now_ts(), data);
}

fn coerce_tool_calls(data: &Value) -> Option<Vec<ToolCall>> {
    let items: Vec<&Value> = match data {
        Value::Object(_) => vec![data],
        Value::Array(items) => {
            if !items.iter().all(Value::is_object) {
                return None;
            }
            items.iter().collect()
        }
        _ => return None,
    };

    let mut calls = Vec::with_capacity(items.len());
    for item in items {
        let id = item.get("id").and_then(Value::as_str)?;
        let tool = item.get("tool").and_then(Value::as_str)?;
        let args = item.get("args")?;
        if !args.is_object() {
            return None;
        }
        calls.push(ToolCall { id: id.to_string(), tool: tool.to_string(), args: args.clone() });
    }
    Some(calls)
}

fn parse_args(value: &Value, warnings: &mut Vec<&'static str>) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) if parsed.is_object() => Some(parsed),
            Ok(_) => {
                warnings.push("arguments_not_object");
                None
            }
            Err(_) => {
                warnings.push("arguments_json_invalid");
                None
            }
        },
        _ => {
            warnings.push("arguments_type_invalid");
            None
        }
    }
}

fn coerce_loose_tool_calls(
    data: &Value,
    allowed_tools: Option<&HashSet<String>>,
    allowed_prefixes: &[&str],
    tracer: Option<&TraceWriter>,
    role: Option<&str>,
) -> Vec<ToolCall> {
    let mut warnings: Vec<&'static str> = Vec::new();
    let items: Vec<&Value> = match data {
        Value::Object(_) => vec![data],
        Value::Array(items) => {
            if !items.iter().all(Value::is_object) {
                warnings.push("payload_items_not_objects");
                for w in &warnings {
                    emit(tracer, role, TraceKind::ToolCallsParseWarning, serde_json::json!({"reason": w}));
                }
                return Vec::new();
            }
            items.iter().collect()
        }
        _ => {
            emit(
                tracer,
                role,
                TraceKind::ToolCallsParseWarning,
                serde_json::json!({"reason": "payload_not_object_or_list"}),
            );
            return Vec::new();
        }
    };

    let mut calls = Vec::new();
    let mut formats: HashSet<String> = HashSet::new();
    let mut auto_index = 1;

    for item in items {
        let (tool_key, tool_value) = if let Some(t) = item.get("tool").and_then(Value::as_str) {
            ("tool", t)
        } else if let Some(t) = item.get("name").and_then(Value::as_str) {
            ("name", t)
        } else {
            warnings.push("missing_tool");
            continue;
        };

        let (args_key, raw_args) = if item.get("args").is_some() {
            ("args", item.get("args").unwrap())
        } else if item.get("arguments").is_some() {
            ("arguments", item.get("arguments").unwrap())
        } else {
            warnings.push("missing_arguments");
            continue;
        };

        formats.insert(format!("{tool_key}/{args_key}"));
        if !is_allowed_tool(tool_value, allowed_tools, allowed_prefixes) {
            warnings.push("tool_not_allowed");
            continue;
        }

        let Some(args) = parse_args(raw_args, &mut warnings) else { continue };

        let id = item
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                let id = format!("auto-{auto_index}");
                auto_index += 1;
                id
            });
        calls.push(ToolCall { id, tool: tool_value.to_string(), args });
    }

    if !calls.is_empty() {
        let original_format = if formats.len() == 1 {
            formats.into_iter().next().unwrap()
        } else {
            "mixed".to_string()
        };
        emit(
            tracer,
            role,
            TraceKind::ToolCallsCoerced,
            serde_json::json!({"original_format": original_format, "count": calls.len()}),
        );
    }
    for w in &warnings {
        emit(tracer, role, TraceKind::ToolCallsParseWarning, serde_json::json!({"reason": w}));
    }
    calls
}

/// Extract a tool-call block (or loosely coerce a bare JSON payload) from
/// raw model output. Returns `(visible_text_with_block_removed, calls)`.
pub fn extract_tool_calls(
    text: &str,
    tracer: Option<&TraceWriter>,
    role: Option<&str>,
    allowed_tools: Option<&HashSet<String>>,
    allowed_prefixes: &[&str],
) -> (String, Vec<ToolCall>) {
    let Some((payload, start, end)) = extract_block(text) else {
        let stripped = text.trim();
        if stripped.is_empty() || !matches!(stripped.chars().next(), Some('[') | Some('{')) {
            return (text.to_string(), Vec::new());
        }
        let data: Value = match serde_json::from_str(stripped) {
            Ok(v) => v,
            Err(_) => {
                emit(
                    tracer,
                    role,
                    TraceKind::ToolCallsParseWarning,
                    serde_json::json!({"reason": "payload_json_invalid"}),
                );
                return (text.to_string(), Vec::new());
            }
        };
        let calls = coerce_loose_tool_calls(&data, allowed_tools, allowed_prefixes, tracer, role);
        if calls.is_empty() {
            return (text.to_string(), Vec::new());
        }
        return (String::new(), calls);
    };

    let data: Value = match serde_json::from_str(&payload) {
        Ok(v) => v,
        Err(_) => return (text.to_string(), Vec::new()),
    };
    let Some(calls) = coerce_tool_calls(&data) else {
        return (text.to_string(), Vec::new());
    };

    let mut filtered = Vec::with_capacity(calls.len());
    for call in calls {
        if is_allowed_tool(&call.tool, allowed_tools, allowed_prefixes) {
            filtered.push(call);
        } else {
            emit(
                tracer,
                role,
                TraceKind::ToolCallsParseWarning,
                serde_json::json!({"reason": "tool_not_allowed"}),
            );
        }
    }

    let visible = format!("{}{}", &text[..start], &text[end..]);
    (visible, filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_canonical_block_and_strips_it() {
        let payload = json!([
            {"id": "call-1", "tool": "shell.exec", "args": {"cmd": "echo hi"}},
            {"id": "call-2", "tool": "http.get", "args": {"url": "https://example.com"}},
        ]);
        let text = format!("Intro\n{START_MARKER}\n{payload}\n{END_MARKER}\nOutro");

        let (visible, calls) = extract_tool_calls(&text, None, None, None, DEFAULT_ALLOWED_PREFIXES);

        assert!(!visible.contains("TOOL_CALLS"));
        assert!(visible.trim().starts_with("Intro"));
        assert!(visible.trim().ends_with("Outro"));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool, "shell.exec");
    }

    #[test]
    fn rejects_malformed_json_leaving_text_unchanged() {
        let text = format!("Before\n{START_MARKER}\n{{not-json]\n{END_MARKER}\nAfter");
        let (visible, calls) = extract_tool_calls(&text, None, None, None, DEFAULT_ALLOWED_PREFIXES);
        assert_eq!(visible, text);
        assert!(calls.is_empty());
    }

    #[test]
    fn rejects_partial_block() {
        let text = format!("Before\n{START_MARKER}\n[]\nAfter");
        let (visible, calls) = extract_tool_calls(&text, None, None, None, DEFAULT_ALLOWED_PREFIXES);
        assert_eq!(visible, text);
        assert!(calls.is_empty());
    }

    #[test]
    fn accepts_bare_name_with_arguments_string() {
        let text = r#"{"name":"fs.list_dir","arguments":"{\"path\":\"/sandbox\"}"}"#;
        let (visible, calls) = extract_tool_calls(text, None, None, None, DEFAULT_ALLOWED_PREFIXES);
        assert_eq!(visible.trim(), "");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "fs.list_dir");
        assert_eq!(calls[0].args, json!({"path": "/sandbox"}));
    }

    #[test]
    fn assigns_auto_id_when_missing() {
        let text = r#"{"tool":"fs.list_dir","args":{"path":"."}}"#;
        let (_visible, calls) = extract_tool_calls(text, None, None, None, DEFAULT_ALLOWED_PREFIXES);
        assert_eq!(calls[0].id, "auto-1");
    }

    #[test]
    fn filters_disallowed_tool_name() {
        let payload = json!([{"id": "1", "tool": "os.exec", "args": {}}]);
        let text = format!("{START_MARKER}\n{payload}\n{END_MARKER}");
        let (_visible, calls) = extract_tool_calls(&text, None, None, None, DEFAULT_ALLOWED_PREFIXES);
        assert!(calls.is_empty());
    }
}
