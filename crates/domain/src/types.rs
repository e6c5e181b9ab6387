use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A message role forwarded through history framing (spec §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Bounded, condensed session state (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub open_loops: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub memory_tags: Vec<String>,
    #[serde(default)]
    pub memory_refs: Vec<String>,
    #[serde(default)]
    pub capabilities_granted: HashSet<String>,
    #[serde(default)]
    pub capabilities_pending: HashSet<String>,
    #[serde(default)]
    pub episode_summary: String,
}

impl State {
    /// Append `value` to `field` unless it is already present (spec §3 uniqueness invariant).
    pub fn append_unique(field: &mut Vec<String>, value: String) {
        if !field.contains(&value) {
            field.push(value);
        }
    }
}

/// The durable snapshot of a session (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub revision: u64,
    pub updated_ts: f64,
    pub state: State,
    #[serde(default)]
    pub recent_messages: Vec<ChatMessage>,
    #[serde(default)]
    pub trace_tail: Vec<String>,
}

impl Checkpoint {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            revision: 0,
            updated_ts: 0.0,
            state: State::default(),
            recent_messages: Vec::new(),
            trace_tail: Vec::new(),
        }
    }
}

/// A single tool invocation requested by the model (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The outcome of executing a [`ToolCall`] (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub tool: String,
    pub ok: bool,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A structured state delta emitted in-band by the governor (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_goals: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_open_loops: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_open_loops: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_decisions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_constraints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_episode_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_memory_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
}

/// Telemetry/memory-feedback emission mode for a role (design note in spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackMode {
    None,
    Basic,
}

/// A pipeline role's static configuration (spec §4.1, §9).
#[derive(Debug, Clone)]
pub struct RoleSpec {
    pub name: String,
    pub system_prompt: String,
    pub params: serde_json::Value,
    pub telemetry: FeedbackMode,
    pub memory_feedback: FeedbackMode,
    pub wants_retrieval: bool,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            params: serde_json::json!({}),
            telemetry: FeedbackMode::None,
            memory_feedback: FeedbackMode::None,
            wants_retrieval: false,
        }
    }

    pub fn is_governor(&self) -> bool {
        self.name == "governor"
    }
}

/// The output of running one role through the pipeline (spec §4.1 step 6).
#[derive(Debug, Clone)]
pub struct RoleResult {
    pub role: String,
    pub text: String,
    pub notes: Option<NotesPatch>,
}
