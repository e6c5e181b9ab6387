//! HTTP adapter for a LlamaServer-compatible (OpenAI-chat-shaped) endpoint.
//!
//! Only the wire contract matters (spec §6): the process that actually
//! serves the model is an external collaborator. Grounded in the reference
//! implementation's `backends/llama_server.py`; per the open question in
//! spec §9, only the most recent `_build_payload` semantics are reproduced
//! (inject `base_rules` into the system slot; accept caller-supplied
//! `messages` with that system content prepended).

use std::time::Duration;

use cr_domain::{Error, Result};
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::traits::{Backend, CompletionParams};

const BASE_RULES: &str =
    "You are one role in a disciplined multi-stage pipeline. Respond with plain text only; \
     do not narrate your reasoning outside the designated marker blocks.";

pub struct LlamaServerBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: Option<String>,
}

impl LlamaServerBackend {
    pub fn new(base_url: impl Into<String>, timeout_s: f64, api_key: Option<String>, model: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_s.max(0.0)))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client, base_url: base_url.into(), api_key, model })
    }

    /// Build from `LLAMA_SERVER_*` environment variables (spec §6).
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("LLAMA_SERVER_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        let timeout_s = std::env::var("LLAMA_SERVER_TIMEOUT_S")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(60.0);
        let api_key = std::env::var("LLAMA_SERVER_API_KEY").ok();
        let model = std::env::var("LLAMA_SERVER_MODEL").ok();
        Self::new(base_url, timeout_s, api_key, model)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn auth_header(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn build_payload(&self, prompt: &str, params: &CompletionParams) -> Value {
        let model = params.model.clone().or_else(|| self.model.clone());
        let messages = match &params.messages {
            Some(messages) => {
                let mut rendered: Vec<Value> = vec![json!({"role": "system", "content": system_rules(&model)})];
                rendered.extend(messages.iter().map(|m| {
                    json!({"role": chat_role_str(m.role), "content": m.content})
                }));
                rendered
            }
            None => vec![
                json!({"role": "system", "content": system_rules(&model)}),
                json!({"role": "user", "content": prompt}),
            ],
        };

        let mut payload = json!({
            "messages": messages,
            "cache_prompt": false,
            "temperature": params.temperature.unwrap_or(0.0),
            "top_p": params.top_p.unwrap_or(1.0),
            "max_tokens": params.max_tokens.unwrap_or(512),
            "seed": params.seed.unwrap_or(7),
        });
        if let Some(model) = model {
            payload["model"] = json!(model);
        }
        if params.stream {
            payload["stream"] = json!(true);
        }
        payload
    }

    fn extract_content(data: &Value) -> String {
        let Some(first) = data.get("choices").and_then(Value::as_array).and_then(|c| c.first()) else {
            return String::new();
        };
        if let Some(content) = first.get("message").and_then(|m| m.get("content")).and_then(Value::as_str) {
            return content.to_string();
        }
        first.get("text").and_then(Value::as_str).unwrap_or_default().to_string()
    }

    fn extract_delta(data: &Value) -> String {
        let Some(first) = data.get("choices").and_then(Value::as_array).and_then(|c| c.first()) else {
            return String::new();
        };
        if let Some(content) = first.get("delta").and_then(|d| d.get("content")).and_then(Value::as_str) {
            return content.to_string();
        }
        first.get("text").and_then(Value::as_str).unwrap_or_default().to_string()
    }
}

fn system_rules(model: &Option<String>) -> String {
    let model_line = match model {
        Some(m) => format!("The underlying model is {m}."),
        None => "The underlying model is unknown.".to_string(),
    };
    format!("{BASE_RULES} {model_line}")
}

fn chat_role_str(role: cr_domain::types::ChatRole) -> &'static str {
    match role {
        cr_domain::types::ChatRole::User => "user",
        cr_domain::types::ChatRole::Assistant => "assistant",
    }
}

#[async_trait::async_trait]
impl Backend for LlamaServerBackend {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        let mut payload = self.build_payload(prompt, params);
        payload["stream"] = json!(false);

        let response = self
            .auth_header(self.client.post(self.endpoint()).json(&payload))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let body: Value = response.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self::extract_content(&body))
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        params: &CompletionParams,
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String> {
        let mut payload = self.build_payload(prompt, params);
        payload["stream"] = json!(true);

        let response = self
            .auth_header(self.client.post(self.endpoint()).json(&payload))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Http(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(idx) = buffer.find('\n') {
                let line = buffer[..idx].trim().to_string();
                buffer.drain(..=idx);
                let Some(data) = line.strip_prefix("data:") else { continue };
                let data = data.trim();
                if data == "[DONE]" {
                    return Ok(full);
                }
                let Ok(parsed) = serde_json::from_str::<Value>(data) else { continue };
                let delta = Self::extract_delta(&parsed);
                if !delta.is_empty() {
                    full.push_str(&delta);
                    on_delta(&delta);
                }
            }
        }
        Ok(full)
    }

    fn supports_messages(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_injects_system_rules_when_no_messages() {
        let backend = LlamaServerBackend::new("http://127.0.0.1:8080", 1.0, None, Some("m".to_string())).unwrap();
        let payload = backend.build_payload("hello", &CompletionParams::default());
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[0]["content"].as_str().unwrap().contains("The underlying model is m."));
        assert_eq!(messages[1]["content"], "hello");
    }

    #[test]
    fn payload_prepends_system_to_caller_messages() {
        let backend = LlamaServerBackend::new("http://127.0.0.1:8080", 1.0, None, None).unwrap();
        let params = CompletionParams {
            messages: Some(vec![cr_domain::types::ChatMessage::user("hi")]),
            ..Default::default()
        };
        let payload = backend.build_payload("unused", &params);
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
    }
}
