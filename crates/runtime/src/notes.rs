//! Notes-patch marker parser (spec §4.3).

use cr_domain::types::NotesPatch;
use serde_json::Value;

pub const START_MARKER: &str = "<<<NOTES_JSON>>>";
pub const END_MARKER: &str = "<<<END_NOTES_JSON>>>";

fn extract_block(text: &str) -> Option<(String, usize, usize)> {
    let start = text.find(START_MARKER)?;
    let end = text[start..].find(END_MARKER).map(|i| start + i)?;
    let payload_start = start + START_MARKER.len();
    let payload = text[payload_start..end].trim().to_string();
    Some((payload, start, end + END_MARKER.len()))
}

fn ensure_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(item.as_str()?.to_string());
            }
            Some(out)
        }
        Some(_) => None,
    }
}

fn ensure_str(value: Option<&Value>) -> Option<Option<String>> {
    match value {
        None | Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s.clone())),
        Some(_) => None,
    }
}

fn coerce_patch(data: &Value) -> Option<NotesPatch> {
    let set_goals = ensure_list(data.get("set_goals"))?;
    let add_open_loops = ensure_list(data.get("add_open_loops"))?;
    let close_open_loops = ensure_list(data.get("close_open_loops"))?;
    let add_decisions = ensure_list(data.get("add_decisions"))?;
    let add_constraints = ensure_list(data.get("add_constraints"))?;
    let add_memory_tags = ensure_list(data.get("add_memory_tags"))?;
    let actions = ensure_list(data.get("actions"))?;
    let set_episode_summary = ensure_str(data.get("set_episode_summary"))?;

    Some(NotesPatch {
        set_goals: (!set_goals.is_empty()).then_some(set_goals),
        add_open_loops: (!add_open_loops.is_empty()).then_some(add_open_loops),
        close_open_loops: (!close_open_loops.is_empty()).then_some(close_open_loops),
        add_decisions: (!add_decisions.is_empty()).then_some(add_decisions),
        add_constraints: (!add_constraints.is_empty()).then_some(add_constraints),
        set_episode_summary,
        add_memory_tags: (!add_memory_tags.is_empty()).then_some(add_memory_tags),
        actions: (!actions.is_empty()).then_some(actions),
    })
}

/// Extract a notes-patch block. On malformed JSON or a type mismatch in any
/// known field, the entire patch is rejected and `text` is returned
/// unchanged (spec §4.3, §7).
pub fn extract_notes(text: &str) -> (String, Option<NotesPatch>) {
    let Some((payload, start, end)) = extract_block(text) else {
        return (text.to_string(), None);
    };

    let Ok(data) = serde_json::from_str::<Value>(&payload) else {
        return (text.to_string(), None);
    };
    if !data.is_object() {
        return (text.to_string(), None);
    }
    let Some(patch) = coerce_patch(&data) else {
        return (text.to_string(), None);
    };

    let visible = format!("{}{}", &text[..start], &text[end..]);
    (visible, Some(patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_patch_and_strips_block() {
        let payload = json!({"set_goals": ["g1"], "add_decisions": ["d1"]});
        let text = format!("before\n{START_MARKER}\n{payload}\n{END_MARKER}\nafter");
        let (visible, patch) = extract_notes(&text);
        assert_eq!(visible.trim(), "before\n\nafter".trim());
        let patch = patch.unwrap();
        assert_eq!(patch.set_goals, Some(vec!["g1".to_string()]));
        assert_eq!(patch.add_decisions, Some(vec!["d1".to_string()]));
        assert!(patch.add_constraints.is_none());
    }

    #[test]
    fn rejects_type_mismatch_and_returns_text_unchanged() {
        let payload = json!({"set_goals": "not-a-list"});
        let text = format!("{START_MARKER}\n{payload}\n{END_MARKER}");
        let (visible, patch) = extract_notes(&text);
        assert_eq!(visible, text);
        assert!(patch.is_none());
    }

    #[test]
    fn absent_block_returns_none() {
        let (visible, patch) = extract_notes("just some text");
        assert_eq!(visible, "just some text");
        assert!(patch.is_none());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let payload = json!({"set_goals": ["g"], "mystery_field": 42});
        let text = format!("{START_MARKER}\n{payload}\n{END_MARKER}");
        let (_visible, patch) = extract_notes(&text);
        assert!(patch.is_some());
    }
}
