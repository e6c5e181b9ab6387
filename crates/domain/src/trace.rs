use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of trace event kinds a turn may emit (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    LlmReq,
    LlmDone,
    LlmStream,
    ToolPlan,
    ToolStart,
    ToolDone,
    ToolResultTruncated,
    NotesPatch,
    NotesIgnored,
    Condense,
    Sanitize,
    SanitizeWarning,
    VisibleResponse,
    Actions,
    Retrieval,
    Telemetry,
    MemoryPressure,
    ToolCallsParseWarning,
    ToolCallsCoerced,
    Warning,
    IntrospectChunk,
    TraceParseError,
}

impl TraceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceKind::LlmReq => "llm_req",
            TraceKind::LlmDone => "llm_done",
            TraceKind::LlmStream => "llm_stream",
            TraceKind::ToolPlan => "tool_plan",
            TraceKind::ToolStart => "tool_start",
            TraceKind::ToolDone => "tool_done",
            TraceKind::ToolResultTruncated => "tool_result_truncated",
            TraceKind::NotesPatch => "notes_patch",
            TraceKind::NotesIgnored => "notes_ignored",
            TraceKind::Condense => "condense",
            TraceKind::Sanitize => "sanitize",
            TraceKind::SanitizeWarning => "sanitize_warning",
            TraceKind::VisibleResponse => "visible_response",
            TraceKind::Actions => "actions",
            TraceKind::Retrieval => "retrieval",
            TraceKind::Telemetry => "telemetry",
            TraceKind::MemoryPressure => "memory_pressure",
            TraceKind::ToolCallsParseWarning => "tool_calls_parse_warning",
            TraceKind::ToolCallsCoerced => "tool_calls_coerced",
            TraceKind::Warning => "warning",
            TraceKind::IntrospectChunk => "introspect_chunk",
            TraceKind::TraceParseError => "trace_parse_error",
        }
    }
}

/// One line of a trace file: `{ts, kind, data}` (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts: f64,
    pub kind: String,
    pub data: Value,
}

impl TraceEvent {
    pub fn new(kind: TraceKind, ts: f64, data: Value) -> Self {
        Self {
            ts,
            kind: kind.as_str().to_string(),
            data,
        }
    }

    /// Mirror the event into the process log, independent of the JSONL file.
    pub fn log(&self) {
        tracing::debug!(kind = %self.kind, ts = self.ts, data = %self.data, "trace_event");
    }
}
