//! The per-turn role scheduler (spec §4.1).
//!
//! Roles run in order; only `governor` may initiate tool calls and is the
//! sole producer of the visible final answer. Everything else a role
//! produces — notes patches from non-governor roles, a second tool-call
//! block in the governor's post-tool response — is parsed so the protocol
//! stays well-formed, then discarded.

use cr_domain::config::Config;
use cr_domain::trace::TraceKind;
use cr_domain::types::{Checkpoint, FeedbackMode, NotesPatch, RoleResult, RoleSpec, State, ToolResult};
use cr_domain::{Error, Result};
use serde_json::{json, Value};

use cr_providers::{Backend, CompletionParams};
use cr_tools::ToolExecutor;

use crate::retrieval::{format_retrieval_block, RetrievalAdapter};
use crate::tracer::{now_ts, TraceWriter};
use crate::{capabilities, condense, history, memory_feedback, notes, sanitize, tool_calls};

fn emit(tracer: Option<&TraceWriter>, kind: TraceKind, data: Value) {
    let Some(tracer) = tracer else { return };
    let _ = tracer.write(kind, now_ts(), data);
}

fn compact_state(state: &State) -> String {
    serde_json::to_string(&json!({
        "goals": state.goals,
        "open_loops": state.open_loops,
        "decisions": state.decisions,
        "constraints": state.constraints,
        "memory_tags": state.memory_tags,
        "memory_refs": state.memory_refs,
        "capabilities_granted": capabilities_sorted(&state.capabilities_granted),
        "capabilities_pending": capabilities_sorted(&state.capabilities_pending),
        "episode_summary": state.episode_summary,
    }))
    .unwrap_or_default()
}

fn capabilities_sorted(set: &std::collections::HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.iter().cloned().collect();
    v.sort();
    v
}

fn format_telemetry(role: &RoleSpec, checkpoint: &Checkpoint) -> String {
    format!(
        "=== TELEMETRY (basic) ===\nrole: {}\nrevision: {}\n=== END TELEMETRY ===",
        role.name, checkpoint.revision
    )
}

fn compose_prompt(
    role: &RoleSpec,
    checkpoint: &Checkpoint,
    upstream: &[RoleResult],
    user_text: &str,
    retrieval: Option<&dyn RetrievalAdapter>,
    config: &Config,
) -> String {
    let mut parts: Vec<String> = vec![role.system_prompt.clone(), format!("STATE:\n{}", compact_state(&checkpoint.state))];

    if role.telemetry == FeedbackMode::Basic {
        parts.push(format_telemetry(role, checkpoint));
    }

    if role.memory_feedback == FeedbackMode::Basic {
        let pressure = memory_feedback::compute_memory_pressure(&checkpoint.state, &config.condense, upstream, None);
        parts.push(memory_feedback::format_memory_feedback(&pressure));
    }

    if role.wants_retrieval {
        if let Some(adapter) = retrieval {
            let matches = adapter.retrieve(user_text, 5);
            parts.push(format_retrieval_block(&matches));
        }
    }

    let recent: Vec<cr_domain::types::ChatMessage> = checkpoint.recent_messages.clone();
    parts.push(format!("HISTORY_JSON:\n{}", history::frame_history(&recent, &config.history)));

    if !upstream.is_empty() {
        let joined = upstream.iter().map(|r| format!("{}: {}", r.role, r.text)).collect::<Vec<_>>().join("\n");
        parts.push(format!("UPSTREAM:\n{joined}"));
    }

    parts.push(format!("USER:\n{user_text}"));
    parts.join("\n\n")
}

fn build_params(role: &RoleSpec) -> CompletionParams {
    let mut params = CompletionParams::with_role(role.name.clone());
    if let Some(v) = role.params.get("temperature").and_then(Value::as_f64) {
        params.temperature = Some(v);
    }
    if let Some(v) = role.params.get("top_p").and_then(Value::as_f64) {
        params.top_p = Some(v);
    }
    if let Some(v) = role.params.get("max_tokens").and_then(Value::as_u64) {
        params.max_tokens = Some(v);
    }
    if let Some(v) = role.params.get("seed").and_then(Value::as_i64) {
        params.seed = Some(v);
    }
    if let Some(v) = role.params.get("model").and_then(Value::as_str) {
        params.model = Some(v.to_string());
    }
    params
}

/// Truncate `output.text`/`output.stdout`/`output.stderr` fields, longest
/// first, until the serialized block fits `max_chars` (spec §4.9).
fn format_tool_results_block(results: &[ToolResult], max_chars: usize, tracer: Option<&TraceWriter>) -> String {
    let mut values: Vec<Value> = results.iter().map(|r| serde_json::to_value(r).unwrap_or(Value::Null)).collect();
    let mut lines: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    let mut total: usize = lines.iter().map(|l| l.len() + 1).sum();

    if total > max_chars {
        let mut candidates: Vec<(usize, &'static str, usize)> = Vec::new();
        for (i, v) in values.iter().enumerate() {
            if let Some(output) = v.get("output") {
                for field in ["text", "stdout", "stderr"] {
                    if let Some(s) = output.get(field).and_then(Value::as_str) {
                        candidates.push((i, field, s.len()));
                    }
                }
            }
        }
        candidates.sort_by(|a, b| b.2.cmp(&a.2));

        let mut truncated_tools: Vec<String> = Vec::new();
        for (idx, field, _) in candidates {
            if total <= max_chars {
                break;
            }
            let current = values[idx]["output"][field].as_str().unwrap_or("").to_string();
            let excess = total - max_chars;
            let keep = current.len().saturating_sub(excess + 24);
            if keep >= current.len() {
                continue;
            }
            let boundary = current.floor_char_boundary(keep);
            let marker = format!("... <truncated {} chars>", current.len() - boundary);
            let new_value = format!("{}{}", &current[..boundary], marker);

            let old_line_len = lines[idx].len();
            if let Some(obj) = values[idx]["output"].as_object_mut() {
                obj.insert(field.to_string(), Value::String(new_value));
            }
            lines[idx] = values[idx].to_string();
            total = total + lines[idx].len() - old_line_len;

            if let Some(tool_name) = values[idx].get("tool").and_then(Value::as_str) {
                if !truncated_tools.iter().any(|t| t == tool_name) {
                    truncated_tools.push(tool_name.to_string());
                }
            }
        }
        if !truncated_tools.is_empty() {
            emit(tracer, TraceKind::ToolResultTruncated, json!({"tools": truncated_tools}));
        }
    }

    format!("TOOL_RESULTS:\n{}", lines.join("\n"))
}

fn append_unique_all(field: &mut Vec<String>, values: &[String]) {
    for v in values {
        State::append_unique(field, v.clone());
    }
}

/// Apply a governor-authored [`NotesPatch`] to session state (spec §4.1
/// step 5, §4.12). Returns the capability-actions report (if any actions
/// were present) and the condense report from re-bounding state afterward.
fn apply_notes_patch(
    state: &mut State,
    patch: &NotesPatch,
    config: &Config,
) -> (Option<Value>, condense::CondenseReport) {
    if let Some(goals) = &patch.set_goals {
        state.goals = goals.clone();
    }
    if let Some(open_loops) = &patch.add_open_loops {
        append_unique_all(&mut state.open_loops, open_loops);
    }
    if let Some(closed) = &patch.close_open_loops {
        state.open_loops.retain(|item| !closed.contains(item));
    }
    if let Some(decisions) = &patch.add_decisions {
        append_unique_all(&mut state.decisions, decisions);
    }
    if let Some(constraints) = &patch.add_constraints {
        append_unique_all(&mut state.constraints, constraints);
    }
    if let Some(tags) = &patch.add_memory_tags {
        append_unique_all(&mut state.memory_tags, tags);
    }
    if let Some(summary) = &patch.set_episode_summary {
        state.episode_summary = condense::truncate_text(summary, config.condense.episode_summary_cap);
    }

    let actions_report = patch.actions.as_ref().map(|actions| capabilities::apply_permission_actions(state, actions));
    let condense_report = condense::condense_state(state, &config.condense);
    (actions_report, condense_report)
}

/// Run every role in `roles` for this turn, mutating `checkpoint.state` in
/// place and returning `(final_text, per_role_results)` (spec §4.1).
#[allow(clippy::too_many_arguments)]
pub async fn run_pipeline(
    checkpoint: &mut Checkpoint,
    user_text: &str,
    roles: &[RoleSpec],
    backend: &dyn Backend,
    tool_executor: Option<&ToolExecutor>,
    retrieval: Option<&dyn RetrievalAdapter>,
    tracer: Option<&TraceWriter>,
    config: &Config,
) -> Result<(String, Vec<RoleResult>)> {
    let mut accumulated: Vec<RoleResult> = Vec::new();

    for role in roles {
        let before_total: usize = accumulated.iter().map(|r| r.text.len()).sum();
        let condensed_upstream = condense::condense_upstream(&accumulated, &config.condense);
        let after_total: usize = condensed_upstream.iter().map(|r| r.text.len()).sum();
        if after_total != before_total {
            emit(tracer, TraceKind::Condense, json!({"scope": "upstream", "before_chars": before_total, "after_chars": after_total}));
        }

        let prompt = compose_prompt(role, checkpoint, &condensed_upstream, user_text, retrieval, config);
        let params = build_params(role);

        emit(tracer, TraceKind::LlmReq, json!({"role": role.name, "prompt": prompt}));
        let mut raw_response = backend.complete(&prompt, &params).await.map_err(|e| Error::Backend {
            backend: "pipeline".to_string(),
            message: e.to_string(),
        })?;
        emit(tracer, TraceKind::LlmDone, json!({"role": role.name, "response": raw_response}));

        if role.is_governor() {
            if let Some(executor) = tool_executor {
                if config.max_tool_rounds > 1 {
                    let (visible, calls) =
                        tool_calls::extract_tool_calls(&raw_response, tracer, Some(&role.name), None, tool_calls::DEFAULT_ALLOWED_PREFIXES);
                    if !calls.is_empty() {
                        emit(
                            tracer,
                            TraceKind::ToolPlan,
                            json!({"role": role.name, "ignored": false, "calls": calls}),
                        );

                        let mut results: Vec<ToolResult> = Vec::with_capacity(calls.len());
                        for call in &calls {
                            emit(tracer, TraceKind::ToolStart, json!({"role": role.name, "id": call.id, "tool": call.tool}));
                            let started = std::time::Instant::now();
                            let result = executor.execute(call, &checkpoint.state).await;
                            let duration_ms = started.elapsed().as_millis() as u64;
                            emit(
                                tracer,
                                TraceKind::ToolDone,
                                json!({
                                    "role": role.name,
                                    "id": result.id,
                                    "tool": result.tool,
                                    "ok": result.ok,
                                    "error": result.error,
                                    "duration_ms": duration_ms,
                                    "metadata": result.metadata,
                                }),
                            );
                            results.push(result);
                        }

                        let tool_results_block = format_tool_results_block(&results, config.tools.tool_results_max_chars, tracer);
                        let follow_up_prompt = format!("{visible}\n\n{tool_results_block}");

                        emit(tracer, TraceKind::LlmReq, json!({"role": role.name, "prompt": follow_up_prompt}));
                        let second_response = backend.complete(&follow_up_prompt, &params).await.map_err(|e| Error::Backend {
                            backend: "pipeline".to_string(),
                            message: e.to_string(),
                        })?;
                        emit(tracer, TraceKind::LlmDone, json!({"role": role.name, "response": second_response}));

                        let (visible_second, ignored_calls) = tool_calls::extract_tool_calls(
                            &second_response,
                            tracer,
                            Some(&role.name),
                            None,
                            tool_calls::DEFAULT_ALLOWED_PREFIXES,
                        );
                        if !ignored_calls.is_empty() {
                            emit(tracer, TraceKind::ToolPlan, json!({"role": role.name, "ignored": true, "calls": ignored_calls}));
                        }
                        raw_response = visible_second;
                    } else {
                        raw_response = visible;
                    }
                }
            }
        }

        let (stripped, _) = tool_calls::extract_tool_calls(&raw_response, None, None, None, tool_calls::DEFAULT_ALLOWED_PREFIXES);
        let (residue, notes_patch) = notes::extract_notes(&stripped);

        if role.is_governor() {
            if let Some(patch) = &notes_patch {
                let (actions_report, condense_report) = apply_notes_patch(&mut checkpoint.state, patch, config);
                emit(tracer, TraceKind::NotesPatch, json!({"role": role.name, "patch": patch}));
                if condense_report.trimmed() {
                    emit(tracer, TraceKind::Condense, json!({"scope": "state", "report": condense_report}));
                }
                if let Some(actions_report) = actions_report {
                    emit(tracer, TraceKind::Actions, actions_report);
                }
            }
        } else if notes_patch.is_some() {
            emit(tracer, TraceKind::NotesIgnored, json!({"role": role.name}));
        }

        let (sanitized, removed, empty_after) = sanitize::sanitize_visible_text_with_report(&residue);
        if !removed.is_empty() {
            emit(tracer, TraceKind::Sanitize, json!({"role": role.name, "removed": removed}));
        }
        if empty_after {
            emit(tracer, TraceKind::SanitizeWarning, json!({"role": role.name}));
        }
        emit(tracer, TraceKind::VisibleResponse, json!({"role": role.name, "visible_response": sanitized}));

        accumulated.push(RoleResult { role: role.name.clone(), text: sanitized, notes: notes_patch });
    }

    let final_text = accumulated.last().map(|r| r.text.clone()).unwrap_or_default();
    Ok((final_text, accumulated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_providers::fake::FakeBackend;
    use cr_tools::ToolExecutor;

    fn default_roles() -> Vec<RoleSpec> {
        vec![
            RoleSpec::new("reflection", "You reflect."),
            RoleSpec::new("planner", "You plan."),
            RoleSpec::new("critic", "You critique."),
            RoleSpec::new("governor", "You answer."),
        ]
    }

    #[tokio::test]
    async fn runs_four_roles_and_returns_last_as_final() {
        let backend = FakeBackend::new();
        backend.set_responses(vec![
            "reflection output".to_string(),
            "planner output".to_string(),
            "critic output".to_string(),
            "Final answer.".to_string(),
        ]);
        let mut checkpoint = Checkpoint::new("sess-1");
        let config = Config::default();

        let (final_text, results) =
            run_pipeline(&mut checkpoint, "Hello", &default_roles(), &backend, None, None, None, &config).await.unwrap();

        assert_eq!(final_text, "Final answer.");
        assert_eq!(results.len(), 4);
        assert_eq!(results[3].role, "governor");
    }

    #[tokio::test]
    async fn smoke_scenario_runs_tool_round() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello").unwrap();
        let executor = ToolExecutor::new(dir.path().to_path_buf());

        let backend = FakeBackend::new();
        backend.set_responses(vec!["reflection".to_string(), "planner".to_string(), "critic".to_string()]);
        backend.set_role_responses(
            "governor",
            vec![
                "<<<TOOL_CALLS_JSON>>>\n[{\"id\":\"1\",\"tool\":\"fs.list_dir\",\"args\":{\"path\":\".\"}}]\n<<<END_TOOL_CALLS_JSON>>>"
                    .to_string(),
                "Smoke run complete.".to_string(),
            ],
        );

        let mut checkpoint = Checkpoint::new("sess-2");
        let config = Config::default();

        let (final_text, results) = run_pipeline(
            &mut checkpoint,
            "Hello",
            &default_roles(),
            &backend,
            Some(&executor),
            None,
            None,
            &config,
        )
        .await
        .unwrap();

        assert_eq!(final_text, "Smoke run complete.");
        assert!(!results[3].text.contains("TOOL_CALLS_JSON"));
    }

    #[tokio::test]
    async fn non_governor_notes_are_ignored() {
        let backend = FakeBackend::new();
        backend.set_responses(vec![
            "<<<NOTES_JSON>>>\n{\"set_goals\":[\"sneaky\"]}\n<<<END_NOTES_JSON>>>reflecting".to_string(),
            "planner".to_string(),
            "critic".to_string(),
            "Final answer.".to_string(),
        ]);
        let mut checkpoint = Checkpoint::new("sess-3");
        let config = Config::default();

        run_pipeline(&mut checkpoint, "Hello", &default_roles(), &backend, None, None, None, &config).await.unwrap();

        assert!(checkpoint.state.goals.is_empty());
    }

    #[tokio::test]
    async fn governor_notes_patch_updates_state() {
        let backend = FakeBackend::new();
        backend.set_responses(vec!["reflection".to_string(), "planner".to_string(), "critic".to_string()]);
        backend.set_role_responses(
            "governor",
            vec!["Answer.\n<<<NOTES_JSON>>>\n{\"set_goals\":[\"ship it\"]}\n<<<END_NOTES_JSON>>>".to_string()],
        );
        let mut checkpoint = Checkpoint::new("sess-4");
        let config = Config::default();

        let (final_text, _) =
            run_pipeline(&mut checkpoint, "Hello", &default_roles(), &backend, None, None, None, &config).await.unwrap();

        assert_eq!(final_text.trim(), "Answer.");
        assert_eq!(checkpoint.state.goals, vec!["ship it".to_string()]);
    }
}
