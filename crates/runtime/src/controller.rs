//! Turn controller: `run_turn` ties the checkpoint store, tracer, tool
//! executor and pipeline scheduler together for one `(user_text ->
//! final_text)` transaction (spec §4.13).

use std::path::Path;

use cr_domain::config::Config;
use cr_domain::types::{ChatMessage, RoleSpec};
use cr_domain::Result;

use cr_providers::Backend;
use cr_tools::ToolExecutor;

use crate::pipeline::run_pipeline;
use crate::tracer::TraceWriter;
use crate::{checkpoint, retrieval::NullRetrievalAdapter};

const SAFETY_SUFFIX: &str = "Don't output chain-of-thought; output only final answer.";

fn default_roles() -> Vec<RoleSpec> {
    let mut reflection = RoleSpec::new(
        "reflection",
        "You are the reflection stage: restate the user's intent and note any ambiguity.",
    );
    let mut planner = RoleSpec::new("planner", "You are the planner stage: lay out the steps needed to answer.");
    let mut critic = RoleSpec::new("critic", "You are the critic stage: challenge the plan and flag risks.");
    let mut governor = RoleSpec::new(
        "governor",
        "You are the governor: the only stage that may call tools and the sole author of the visible answer.",
    );

    for role in [&mut reflection, &mut planner, &mut critic, &mut governor] {
        role.system_prompt = format!("{}\n\n{}", role.system_prompt, SAFETY_SUFFIX);
    }

    vec![reflection, planner, critic, governor]
}

/// Run one turn for `session_id`: load-or-create the checkpoint, run the
/// pipeline, and atomically persist the updated checkpoint (spec §4.13).
pub async fn run_turn(
    session_id: &str,
    user_text: &str,
    backend: &dyn Backend,
    data_root: &Path,
    backend_name: Option<&str>,
) -> Result<String> {
    let checkpoints_dir = data_root.join("checkpoints");
    let traces_dir = data_root.join("traces");
    let sandbox_dir = data_root.join("sandbox");

    let mut cp = checkpoint::load_or_create(&checkpoints_dir, session_id)?;
    cp.recent_messages.push(ChatMessage::user(user_text));

    let run_id = format!("rev-{}", cp.revision + 1);
    let tracer = TraceWriter::open(&traces_dir, session_id, &run_id)?;

    let roles = default_roles();
    let executor = ToolExecutor::new(sandbox_dir);
    let config = Config::default();
    let retrieval = NullRetrievalAdapter;

    if let Some(name) = backend_name {
        tracing::info!(backend = name, session_id, run_id, "starting turn");
    }

    let (final_text, _results) =
        run_pipeline(&mut cp, user_text, &roles, backend, Some(&executor), Some(&retrieval), Some(&tracer), &config).await?;

    cp.recent_messages.push(ChatMessage::assistant(final_text.clone()));

    let trace_file_name = tracer.path().file_name().and_then(|n| n.to_str()).unwrap_or(&run_id).to_string();
    cp.trace_tail.push(trace_file_name);
    if cp.trace_tail.len() > config.trace_tail_cap {
        let drop = cp.trace_tail.len() - config.trace_tail_cap;
        cp.trace_tail.drain(0..drop);
    }

    checkpoint::save_checkpoint(&mut cp, &checkpoints_dir)?;
    Ok(final_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_providers::fake::FakeBackend;

    #[tokio::test]
    async fn run_turn_persists_checkpoint_and_returns_final_text() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        backend.set_responses(vec!["reflection".to_string(), "planner".to_string(), "critic".to_string()]);
        backend.set_role_responses("governor", vec!["Hello back.".to_string()]);

        let final_text = run_turn("sess-1", "Hello", &backend, dir.path(), Some("fake")).await.unwrap();
        assert_eq!(final_text, "Hello back.");

        let loaded = checkpoint::load_checkpoint(&dir.path().join("checkpoints"), "sess-1").unwrap().unwrap();
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.recent_messages.len(), 2);
        assert_eq!(loaded.trace_tail.len(), 1);
    }

    #[tokio::test]
    async fn trace_tail_is_capped_at_twenty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        for i in 0..25 {
            backend.extend_responses(vec![
                format!("reflection-{i}"),
                format!("planner-{i}"),
                format!("critic-{i}"),
            ]);
            backend.extend_role_responses("governor", vec![format!("answer-{i}")]);
            run_turn("sess-2", "Hello", &backend, dir.path(), None).await.unwrap();
        }

        let loaded = checkpoint::load_checkpoint(&dir.path().join("checkpoints"), "sess-2").unwrap().unwrap();
        assert_eq!(loaded.trace_tail.len(), 20);
        assert_eq!(loaded.revision, 25);
    }
}
