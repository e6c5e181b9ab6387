//! Post-hoc autopsy over a trace JSONL file: pair up `llm_req`/`llm_done` and
//! `tool_start`/`tool_done` events, flag invariant violations, and render a
//! Markdown report (spec §4.15).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub code: String,
    pub severity: String,
    pub evidence: String,
    pub category: String,
    pub invariant: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Stage {
    pub role: Option<String>,
    pub llm_req_ts: Option<f64>,
    pub llm_done_ts: Option<f64>,
    pub llm_req_chars: Option<usize>,
    pub llm_done_chars: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ToolEntry {
    pub id: String,
    pub tool: Option<String>,
    pub args: Option<Value>,
    pub duration_ms: Option<f64>,
    pub ok: Option<bool>,
    pub error: Option<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CauseCategory {
    pub category: String,
    pub invariant: String,
    pub evidence_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Recommendation {
    pub action: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Summary {
    pub trace_path: String,
    pub event_count: usize,
    pub roles: Vec<String>,
    pub tool_count: usize,
    pub anomaly_count: usize,
    pub sanitizer_warning_count: usize,
    pub cause_categories: Vec<CauseCategory>,
    pub checkpoint: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SanitizerReport {
    pub actions: Vec<Value>,
    pub warnings: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct AutopsyReport {
    pub summary: Summary,
    pub stages: Vec<Stage>,
    pub tools: Vec<ToolEntry>,
    pub sanitizer: SanitizerReport,
    pub anomalies: Vec<Anomaly>,
    pub recommendations: Vec<Recommendation>,
}

struct LoadedEvent {
    kind: String,
    data: Value,
}

fn load_trace_events(text: &str) -> Vec<LoadedEvent> {
    let mut events = Vec::new();
    for (index, raw_line) in text.lines().enumerate() {
        let stripped = raw_line.trim();
        if stripped.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(stripped) {
            Ok(Value::Object(map)) => {
                let kind = map.get("kind").and_then(Value::as_str).unwrap_or_default().to_string();
                let data = map.get("data").cloned().unwrap_or(Value::Null);
                events.push(LoadedEvent { kind, data });
            }
            Ok(_) => {}
            Err(_) => {
                let preview: String = stripped.chars().take(200).collect();
                events.push(LoadedEvent {
                    kind: "trace_parse_error".to_string(),
                    data: serde_json::json!({"line": index + 1, "raw": preview}),
                });
            }
        }
    }
    events
}

fn categorize_anomaly(code: &str) -> (&'static str, &'static str) {
    match code {
        "tool_calls_parse_warning" => ("tool_call_format", "Tool calls must be canonical or parseable."),
        "visible_tool_json_leak" => ("visible_leak", "Visible output must not contain tool-call payloads."),
        "tool_failed" => ("tool_execution", "Tool execution must succeed or surface error explicitly."),
        "tool_missing_done" => ("tool_execution", "Tool execution must produce a tool_done event."),
        "llm_req_done_mismatch" => ("trace_integrity", "Trace must pair llm_req and llm_done events."),
        "sanitize_warning" => ("sanitize_output", "Sanitizer must not empty visible output."),
        "tool_results_truncated" => ("tool_results_budget", "Tool results should fit within the configured budget."),
        "trace_parse_error" => ("trace_integrity", "Trace lines must be valid JSON."),
        _ => ("unknown", "Unmapped invariant"),
    }
}

fn bare_tool_json(text: &str) -> bool {
    let stripped = text.trim();
    if stripped.is_empty() || !(stripped.starts_with('{') && stripped.ends_with('}')) {
        return false;
    }
    let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(stripped) else {
        return false;
    };
    if payload.contains_key("name") && payload.contains_key("arguments") {
        return true;
    }
    if payload.contains_key("tool") && (payload.contains_key("args") || payload.contains_key("arguments")) {
        return true;
    }
    false
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn role_field(data: &Value) -> Option<String> {
    str_field(data, "role")
}

pub fn autopsy_from_trace(trace_path: &Path, trace_text: &str, checkpoint_json: Option<&Value>) -> AutopsyReport {
    let events = load_trace_events(trace_text);

    let mut stages: Vec<Stage> = Vec::new();
    let mut open_stages: HashMap<String, Vec<usize>> = HashMap::new();
    let mut tool_entries: HashMap<String, ToolEntry> = HashMap::new();
    let mut tool_order: Vec<String> = Vec::new();
    let mut truncated_tools: HashSet<String> = HashSet::new();
    let mut sanitizer_actions: Vec<Value> = Vec::new();
    let mut sanitizer_warnings: Vec<Value> = Vec::new();
    let mut anomalies: Vec<Anomaly> = Vec::new();

    let mut llm_req_count = 0usize;
    let mut llm_done_count = 0usize;
    let mut tool_start_ids: HashSet<String> = HashSet::new();
    let mut tool_done_ids: HashSet<String> = HashSet::new();
    let mut final_visible: Option<String> = None;
    let mut roles_seen: HashSet<String> = HashSet::new();

    for event in &events {
        let data = &event.data;
        let role = role_field(data);
        if let Some(r) = &role {
            roles_seen.insert(r.clone());
        }

        match event.kind.as_str() {
            "trace_parse_error" => {
                let (category, invariant) = categorize_anomaly("trace_parse_error");
                anomalies.push(Anomaly {
                    code: "trace_parse_error".to_string(),
                    severity: "warn".to_string(),
                    evidence: format!("line={}", data.get("line").cloned().unwrap_or(Value::Null)),
                    category: category.to_string(),
                    invariant: invariant.to_string(),
                });
            }
            "llm_req" => {
                llm_req_count += 1;
                if let Some(r) = &role {
                    if let Some(indices) = open_stages.get(r) {
                        if let Some(&last_idx) = indices.last() {
                            if stages[last_idx].llm_done_ts.is_none() {
                                let (category, invariant) = categorize_anomaly("llm_req_done_mismatch");
                                anomalies.push(Anomaly {
                                    code: "llm_req_done_mismatch".to_string(),
                                    severity: "warn".to_string(),
                                    evidence: format!("role={r} missing llm_done before new llm_req"),
                                    category: category.to_string(),
                                    invariant: invariant.to_string(),
                                });
                            }
                        }
                    }
                }
                let prompt_chars = data.get("prompt").and_then(Value::as_str).map(str::len);
                let ts = data.get("ts").and_then(Value::as_f64);
                let stage = Stage {
                    role: role.clone(),
                    llm_req_ts: ts,
                    llm_done_ts: None,
                    llm_req_chars: prompt_chars,
                    llm_done_chars: None,
                };
                stages.push(stage);
                if let Some(r) = role {
                    open_stages.entry(r).or_default().push(stages.len() - 1);
                }
            }
            "llm_done" => {
                llm_done_count += 1;
                let response_chars = data.get("response").and_then(Value::as_str).map(str::len);
                let ts = data.get("ts").and_then(Value::as_f64);
                let mut matched = false;
                if let Some(r) = &role {
                    if let Some(indices) = open_stages.get_mut(r) {
                        if let Some(idx) = indices.pop() {
                            stages[idx].llm_done_ts = ts;
                            stages[idx].llm_done_chars = response_chars;
                            matched = true;
                        }
                    }
                }
                if !matched {
                    stages.push(Stage {
                        role,
                        llm_req_ts: None,
                        llm_done_ts: ts,
                        llm_req_chars: None,
                        llm_done_chars: response_chars,
                    });
                }
            }
            "tool_start" => {
                if let Some(id) = str_field(data, "id") {
                    tool_start_ids.insert(id.clone());
                    tool_entries.entry(id.clone()).or_insert_with(|| ToolEntry {
                        id: id.clone(),
                        tool: str_field(data, "tool"),
                        args: data.get("args").cloned(),
                        ..Default::default()
                    });
                    if !tool_order.contains(&id) {
                        tool_order.push(id);
                    }
                }
            }
            "tool_done" => {
                if let Some(id) = str_field(data, "id") {
                    tool_done_ids.insert(id.clone());
                    let entry = tool_entries.entry(id.clone()).or_insert_with(|| ToolEntry {
                        id: id.clone(),
                        ..Default::default()
                    });
                    if let Some(tool) = str_field(data, "tool") {
                        entry.tool = Some(tool);
                    }
                    if data.get("args").is_some() {
                        entry.args = data.get("args").cloned();
                    }
                    entry.duration_ms = data.get("duration_ms").and_then(Value::as_f64);
                    entry.ok = data.get("ok").and_then(Value::as_bool);
                    entry.error = str_field(data, "error");
                }
            }
            "tool_result_truncated" => {
                if let Some(Value::Array(tools)) = data.get("tools") {
                    for tool in tools {
                        if let Some(name) = tool.as_str() {
                            truncated_tools.insert(name.to_string());
                        }
                    }
                }
            }
            "sanitize" => {
                sanitizer_actions.push(data.clone());
            }
            "sanitize_warning" => {
                sanitizer_warnings.push(data.clone());
                let (category, invariant) = categorize_anomaly("sanitize_warning");
                let message = str_field(data, "message").unwrap_or_else(|| "sanitize_warning".to_string());
                anomalies.push(Anomaly {
                    code: "sanitize_warning".to_string(),
                    severity: "warn".to_string(),
                    evidence: message,
                    category: category.to_string(),
                    invariant: invariant.to_string(),
                });
            }
            "tool_calls_parse_warning" => {
                let (category, invariant) = categorize_anomaly("tool_calls_parse_warning");
                let reason = str_field(data, "reason").unwrap_or_else(|| "parse_warning".to_string());
                anomalies.push(Anomaly {
                    code: "tool_calls_parse_warning".to_string(),
                    severity: "warn".to_string(),
                    evidence: reason,
                    category: category.to_string(),
                    invariant: invariant.to_string(),
                });
            }
            "visible_response" => {
                if let Some(v) = str_field(data, "visible_response") {
                    final_visible = Some(v);
                }
            }
            _ => {}
        }
    }

    for entry in tool_entries.values_mut() {
        if let Some(name) = &entry.tool {
            if truncated_tools.contains(name) {
                entry.truncated = true;
            }
        }
    }

    for id in tool_start_ids.difference(&tool_done_ids) {
        let (category, invariant) = categorize_anomaly("tool_missing_done");
        anomalies.push(Anomaly {
            code: "tool_missing_done".to_string(),
            severity: "high".to_string(),
            evidence: format!("id={id}"),
            category: category.to_string(),
            invariant: invariant.to_string(),
        });
    }

    for entry in tool_entries.values() {
        if entry.ok == Some(false) {
            let (category, invariant) = categorize_anomaly("tool_failed");
            anomalies.push(Anomaly {
                code: "tool_failed".to_string(),
                severity: "high".to_string(),
                evidence: format!("{}: {}", entry.tool.as_deref().unwrap_or("?"), entry.error.as_deref().unwrap_or("")),
                category: category.to_string(),
                invariant: invariant.to_string(),
            });
        }
    }

    if llm_req_count != llm_done_count {
        let (category, invariant) = categorize_anomaly("llm_req_done_mismatch");
        anomalies.push(Anomaly {
            code: "llm_req_done_mismatch".to_string(),
            severity: "warn".to_string(),
            evidence: format!("llm_req={llm_req_count} llm_done={llm_done_count}"),
            category: category.to_string(),
            invariant: invariant.to_string(),
        });
    }

    if let Some(visible) = &final_visible {
        if bare_tool_json(visible) {
            let (category, invariant) = categorize_anomaly("visible_tool_json_leak");
            let evidence: String = visible.chars().take(200).collect();
            anomalies.push(Anomaly {
                code: "visible_tool_json_leak".to_string(),
                severity: "high".to_string(),
                evidence,
                category: category.to_string(),
                invariant: invariant.to_string(),
            });
        }
    }

    if events.iter().any(|e| e.kind == "tool_result_truncated") {
        let (category, invariant) = categorize_anomaly("tool_results_truncated");
        anomalies.push(Anomaly {
            code: "tool_results_truncated".to_string(),
            severity: "warn".to_string(),
            evidence: "tool_results_truncated".to_string(),
            category: category.to_string(),
            invariant: invariant.to_string(),
        });
    }

    let mut cause_categories: HashMap<String, (String, HashSet<String>)> = HashMap::new();
    for anomaly in &anomalies {
        let entry = cause_categories
            .entry(anomaly.category.clone())
            .or_insert_with(|| (anomaly.invariant.clone(), HashSet::new()));
        entry.1.insert(anomaly.code.clone());
    }
    let mut cause_summary: Vec<CauseCategory> = cause_categories
        .into_iter()
        .map(|(category, (invariant, codes))| {
            let mut evidence_codes: Vec<String> = codes.into_iter().collect();
            evidence_codes.sort();
            CauseCategory { category, invariant, evidence_codes }
        })
        .collect();
    cause_summary.sort_by(|a, b| a.category.cmp(&b.category));

    let mut recommendations: Vec<Recommendation> = Vec::new();
    for anomaly in &anomalies {
        let rec = match anomaly.code.as_str() {
            "visible_tool_json_leak" => Some(Recommendation {
                action: "Add or extend tool-call parsing tests for bare JSON leaks.".to_string(),
                rationale: "Visible output contained a tool-call payload.".to_string(),
            }),
            "tool_calls_parse_warning" => Some(Recommendation {
                action: "Prefer canonical TOOL_CALLS_JSON wrapper in prompts.".to_string(),
                rationale: "Tool-call parser emitted warnings.".to_string(),
            }),
            "tool_failed" => Some(Recommendation {
                action: "Verify tool args and allowlists for failing tool.".to_string(),
                rationale: "Tool execution returned ok=false.".to_string(),
            }),
            "tool_missing_done" => Some(Recommendation {
                action: "Inspect tool executor for missing tool_done events.".to_string(),
                rationale: "Tool started without completion.".to_string(),
            }),
            "sanitize_warning" => Some(Recommendation {
                action: "Review sanitizer rules for unexpected output removal.".to_string(),
                rationale: "Sanitizer reported empty output.".to_string(),
            }),
            "tool_results_truncated" => Some(Recommendation {
                action: "Reduce tool output size or raise tool result budget.".to_string(),
                rationale: "Tool results were truncated.".to_string(),
            }),
            "llm_req_done_mismatch" => Some(Recommendation {
                action: "Check trace logging around llm_req/llm_done.".to_string(),
                rationale: "Trace has mismatched request/response events.".to_string(),
            }),
            "trace_parse_error" => Some(Recommendation {
                action: "Validate trace JSONL writer integrity.".to_string(),
                rationale: "Trace contains invalid JSON lines.".to_string(),
            }),
            _ => None,
        };
        if let Some(rec) = rec {
            recommendations.push(rec);
        }
    }
    let mut seen_recs: HashSet<(String, String)> = HashSet::new();
    recommendations.retain(|rec| seen_recs.insert((rec.action.clone(), rec.rationale.clone())));

    let tools: Vec<ToolEntry> = tool_order.iter().filter_map(|id| tool_entries.get(id).cloned()).collect();
    let mut roles: Vec<String> = roles_seen.into_iter().collect();
    roles.sort();

    let checkpoint_summary = checkpoint_json.map(|cp| {
        let state = cp.get("state").cloned().unwrap_or(Value::Null);
        let count_of = |key: &str| state.get(key).and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);
        serde_json::json!({
            "session_id": cp.get("session_id"),
            "revision": cp.get("revision"),
            "updated_ts": cp.get("updated_ts"),
            "trace_tail": cp.get("trace_tail").cloned().unwrap_or(Value::Array(Vec::new())),
            "state_summary": {
                "goals": count_of("goals"),
                "open_loops": count_of("open_loops"),
                "decisions": count_of("decisions"),
                "constraints": count_of("constraints"),
            }
        })
    });

    let summary = Summary {
        trace_path: trace_path.display().to_string(),
        event_count: events.len(),
        roles,
        tool_count: tools.len(),
        anomaly_count: anomalies.len(),
        sanitizer_warning_count: sanitizer_warnings.len(),
        cause_categories: cause_summary,
        checkpoint: checkpoint_summary,
    };

    AutopsyReport {
        summary,
        stages,
        tools,
        sanitizer: SanitizerReport { actions: sanitizer_actions, warnings: sanitizer_warnings },
        anomalies,
        recommendations,
    }
}

pub fn render_autopsy_markdown(report: &AutopsyReport) -> String {
    let mut lines: Vec<String> = vec!["# Cognitive Autopsy Report".to_string(), String::new()];
    lines.push("## Summary".to_string());
    lines.push(format!("- Trace: `{}`", report.summary.trace_path));
    lines.push(format!("- Events: {}", report.summary.event_count));
    let roles = if report.summary.roles.is_empty() { "none".to_string() } else { report.summary.roles.join(", ") };
    lines.push(format!("- Roles: {roles}"));
    lines.push(format!("- Tools: {}", report.summary.tool_count));
    lines.push(format!("- Anomalies: {}", report.summary.anomaly_count));
    lines.push(format!("- Sanitizer warnings: {}", report.summary.sanitizer_warning_count));
    lines.push(String::new());

    if !report.summary.cause_categories.is_empty() {
        lines.push("## Likely Causes".to_string());
        for entry in &report.summary.cause_categories {
            let codes = entry.evidence_codes.join(", ");
            lines.push(format!("- {}: {} (evidence: {})", entry.category, entry.invariant, codes));
        }
        lines.push(String::new());
    }

    if !report.stages.is_empty() {
        lines.push("## Stages".to_string());
        for stage in &report.stages {
            let role = stage.role.as_deref().unwrap_or("unknown");
            lines.push(format!(
                "- {role}: req_chars={} done_chars={}",
                opt_to_string(stage.llm_req_chars),
                opt_to_string(stage.llm_done_chars)
            ));
        }
        lines.push(String::new());
    }

    if !report.tools.is_empty() {
        lines.push("## Tools".to_string());
        for entry in &report.tools {
            let status = if entry.ok == Some(true) { "ok" } else { "error" };
            let truncated = if entry.truncated { " truncated" } else { "" };
            lines.push(format!(
                "- {} id={} status={status}{truncated} duration_ms={}",
                entry.tool.as_deref().unwrap_or("?"),
                entry.id,
                opt_f64_to_string(entry.duration_ms)
            ));
        }
        lines.push(String::new());
    }

    if !report.sanitizer.actions.is_empty() || !report.sanitizer.warnings.is_empty() {
        lines.push("## Sanitizer".to_string());
        for action in &report.sanitizer.actions {
            lines.push(format!("- action: removed={}", action.get("removed").cloned().unwrap_or(Value::Null)));
        }
        for warning in &report.sanitizer.warnings {
            lines.push(format!("- warning: {}", warning.get("message").and_then(Value::as_str).unwrap_or("")));
        }
        lines.push(String::new());
    }

    if !report.anomalies.is_empty() {
        lines.push("## Anomalies".to_string());
        for anomaly in &report.anomalies {
            lines.push(format!("- {} {}: {}", anomaly.severity, anomaly.code, anomaly.evidence));
        }
        lines.push(String::new());
    }

    if !report.recommendations.is_empty() {
        lines.push("## Recommendations".to_string());
        for rec in &report.recommendations {
            lines.push(format!("- {} ({})", rec.action, rec.rationale));
        }
        lines.push(String::new());
    }

    let mut text = lines.join("\n");
    while text.ends_with('\n') || text.ends_with(' ') {
        text.pop();
    }
    text.push('\n');
    text
}

fn opt_to_string(value: Option<usize>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "None".to_string())
}

fn opt_f64_to_string(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "None".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_line(kind: &str, ts: f64, data: Value) -> String {
        serde_json::json!({"ts": ts, "kind": kind, "data": data}).to_string()
    }

    #[test]
    fn pairs_llm_req_and_done_per_role() {
        let text = format!(
            "{}\n{}\n",
            trace_line("llm_req", 1.0, serde_json::json!({"role": "governor", "prompt": "hello"})),
            trace_line("llm_done", 2.0, serde_json::json!({"role": "governor", "response": "hi"})),
        );
        let report = autopsy_from_trace(Path::new("t.jsonl"), &text, None);
        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.stages[0].llm_req_chars, Some(5));
        assert_eq!(report.stages[0].llm_done_chars, Some(2));
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn detects_missing_tool_done() {
        let text = format!(
            "{}\n",
            trace_line("tool_start", 1.0, serde_json::json!({"id": "t1", "tool": "read_file"})),
        );
        let report = autopsy_from_trace(Path::new("t.jsonl"), &text, None);
        assert!(report.anomalies.iter().any(|a| a.code == "tool_missing_done"));
    }

    #[test]
    fn detects_visible_tool_json_leak() {
        let text = format!(
            "{}\n",
            trace_line("visible_response", 1.0, serde_json::json!({"visible_response": "{\"name\": \"read_file\", \"arguments\": {}}"})),
        );
        let report = autopsy_from_trace(Path::new("t.jsonl"), &text, None);
        assert!(report.anomalies.iter().any(|a| a.code == "visible_tool_json_leak"));
    }

    #[test]
    fn parse_error_line_is_captured() {
        let text = "not json\n";
        let report = autopsy_from_trace(Path::new("t.jsonl"), text, None);
        assert!(report.anomalies.iter().any(|a| a.code == "trace_parse_error"));
    }

    #[test]
    fn render_markdown_includes_summary_section() {
        let report = autopsy_from_trace(Path::new("t.jsonl"), "", None);
        let markdown = render_autopsy_markdown(&report);
        assert!(markdown.starts_with("# Cognitive Autopsy Report"));
        assert!(markdown.contains("## Summary"));
    }

    #[test]
    fn recommendations_are_deduped() {
        let text = format!(
            "{}\n{}\n",
            trace_line("tool_result_truncated", 1.0, serde_json::json!({"tools": ["read_file"]})),
            trace_line("tool_result_truncated", 2.0, serde_json::json!({"tools": ["read_file"]})),
        );
        let report = autopsy_from_trace(Path::new("t.jsonl"), &text, None);
        let truncated_recs = report.recommendations.iter().filter(|r| r.rationale.contains("truncated")).count();
        assert_eq!(truncated_recs, 1);
    }
}
