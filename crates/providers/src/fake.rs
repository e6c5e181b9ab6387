//! Deterministic backend for tests and the `smoke`/`repl` harness.
//!
//! Grounded in the reference implementation's `backends/fake.py`: responses
//! are consumed FIFO, optionally keyed by role, and a `{{TOOL_OUTPUT}}`
//! placeholder is substituted from the most recent `TOOL_RESULTS:` block in
//! the prompt so a canned governor response can echo a tool's real output.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use cr_domain::Result;
use serde_json::Value;

use crate::traits::{Backend, CompletionParams};

const TOOL_RESULTS_MARKER: &str = "TOOL_RESULTS:\n";

#[derive(Default)]
pub struct FakeBackend {
    responses: Mutex<VecDeque<String>>,
    role_responses: Mutex<HashMap<String, VecDeque<String>>>,
    calls: Mutex<Vec<Value>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `SPECTATOR_FAKE_RESPONSES` / `SPECTATOR_FAKE_ROLE_RESPONSES`
    /// (spec §6 configuration surface).
    pub fn from_env() -> Result<Self> {
        let backend = Self::new();
        if let Ok(raw) = std::env::var("SPECTATOR_FAKE_RESPONSES") {
            let list: Vec<String> = serde_json::from_str(&raw)
                .map_err(|e| cr_domain::Error::Config(format!("SPECTATOR_FAKE_RESPONSES: {e}")))?;
            backend.set_responses(list);
        }
        if let Ok(raw) = std::env::var("SPECTATOR_FAKE_ROLE_RESPONSES") {
            let map: HashMap<String, Vec<String>> = serde_json::from_str(&raw).map_err(|e| {
                cr_domain::Error::Config(format!("SPECTATOR_FAKE_ROLE_RESPONSES: {e}"))
            })?;
            for (role, responses) in map {
                backend.set_role_responses(&role, responses);
            }
        }
        Ok(backend)
    }

    pub fn set_responses(&self, responses: Vec<String>) {
        *self.responses.lock().unwrap() = responses.into_iter().collect();
    }

    pub fn extend_responses(&self, responses: impl IntoIterator<Item = String>) {
        self.responses.lock().unwrap().extend(responses);
    }

    pub fn set_role_responses(&self, role: &str, responses: Vec<String>) {
        self.role_responses
            .lock()
            .unwrap()
            .insert(role.to_string(), responses.into_iter().collect());
    }

    pub fn extend_role_responses(&self, role: &str, responses: impl IntoIterator<Item = String>) {
        self.role_responses
            .lock()
            .unwrap()
            .entry(role.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

fn extract_tool_results(prompt: &str) -> Vec<Value> {
    let Some(start) = prompt.find(TOOL_RESULTS_MARKER) else {
        return Vec::new();
    };
    let tail = &prompt[start + TOOL_RESULTS_MARKER.len()..];
    tail.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(|v| v.is_object())
        .collect()
}

fn select_tool_output(results: &[Value]) -> String {
    let Some(first) = results.first() else {
        return String::new();
    };
    match first.get("output") {
        Some(output) if output.is_object() => {
            if let Some(stdout) = output.get("stdout").and_then(Value::as_str) {
                return stdout.trim().to_string();
            }
            if let Some(text) = output.get("text").and_then(Value::as_str) {
                return text.trim().to_string();
            }
            if let Some(entries) = output.get("entries").and_then(Value::as_array) {
                return entries
                    .iter()
                    .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                    .collect::<Vec<_>>()
                    .join(", ");
            }
            output.to_string()
        }
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn render_response(response: &str, prompt: &str) -> String {
    if !response.contains("{{TOOL_OUTPUT}}") {
        return response.to_string();
    }
    let tool_output = select_tool_output(&extract_tool_results(prompt));
    response.replace("{{TOOL_OUTPUT}}", &tool_output)
}

#[async_trait::async_trait]
impl Backend for FakeBackend {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        self.calls.lock().unwrap().push(serde_json::json!({
            "prompt": prompt,
            "role": params.role,
        }));

        if let Some(role) = &params.role {
            let mut role_responses = self.role_responses.lock().unwrap();
            if let Some(queue) = role_responses.get_mut(role) {
                if let Some(response) = queue.pop_front() {
                    return Ok(render_response(&response, prompt));
                }
            }
        }
        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return Ok(render_response(&response, prompt));
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumes_role_responses_before_generic() {
        let backend = FakeBackend::new();
        backend.set_responses(vec!["generic".to_string()]);
        backend.set_role_responses("governor", vec!["governor-specific".to_string()]);

        let out = backend
            .complete("prompt", &CompletionParams::with_role("governor"))
            .await
            .unwrap();
        assert_eq!(out, "governor-specific");

        let out2 = backend
            .complete("prompt", &CompletionParams::with_role("governor"))
            .await
            .unwrap();
        assert_eq!(out2, "generic");
    }

    #[tokio::test]
    async fn empty_when_exhausted() {
        let backend = FakeBackend::new();
        let out = backend.complete("prompt", &CompletionParams::default()).await.unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn substitutes_tool_output_placeholder() {
        let backend = FakeBackend::new();
        backend.set_responses(vec!["Result: {{TOOL_OUTPUT}}".to_string()]);
        let prompt = "TOOL_RESULTS:\n{\"id\":\"1\",\"output\":{\"stdout\":\"hi\"}}\n";
        let out = backend.complete(prompt, &CompletionParams::default()).await.unwrap();
        assert_eq!(out, "Result: hi");
    }
}
