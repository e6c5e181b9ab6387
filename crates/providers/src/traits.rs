use cr_domain::types::ChatMessage;
use cr_domain::Result;

/// Recognized `params` keys for [`Backend::complete`] (spec §6).
#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub role: Option<String>,
    pub stream: bool,
    /// Prebuilt message list for message-mode backends (`supports_messages`).
    pub messages: Option<Vec<ChatMessage>>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
    pub seed: Option<i64>,
    pub model: Option<String>,
}

impl CompletionParams {
    pub fn with_role(role: impl Into<String>) -> Self {
        Self { role: Some(role.into()), ..Default::default() }
    }
}

/// The LLM backend contract the scheduler depends on (spec §6).
///
/// The scheduler never couples to a backend's specific chat schema; it
/// speaks in `(prompt, params)` pairs and lets the backend render messages.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String>;

    /// Streaming variant: `on_delta` is invoked once per incremental chunk.
    /// Backends that cannot stream fall back to a single call to `on_delta`
    /// with the full response.
    async fn complete_stream(
        &self,
        prompt: &str,
        params: &CompletionParams,
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String> {
        let text = self.complete(prompt, params).await?;
        on_delta(&text);
        Ok(text)
    }

    /// When true, the scheduler may additionally pass `params.messages` with
    /// a system-content slot carrying the fixed rules prompt (spec §6, §9).
    fn supports_messages(&self) -> bool {
        false
    }
}
