//! Raw model output → user-visible string (spec §4.4).
//!
//! Protected blocks (tool-call and notes markers) are swapped for opaque
//! placeholders before any other pass runs, then restored just before the
//! blocks themselves are stripped for good — this lets reasoning/scaffold
//! stripping run without accidentally mangling a marker payload that
//! happens to contain scaffold-looking text.

use regex::Regex;
use std::sync::OnceLock;

use crate::{notes, tool_calls};

const SCAFFOLD_HEADERS: &[(&str, &str)] = &[
    ("HISTORY:", "HISTORY"),
    ("HISTORY_JSON:", "HISTORY"),
    ("STATE:", "STATE"),
    ("UPSTREAM:", "UPSTREAM"),
    ("USER:", "USER"),
    ("TOOL_RESULTS:", "TOOL_RESULTS"),
    ("reflection:", "ROLE_TRANSCRIPT"),
    ("planner:", "ROLE_TRANSCRIPT"),
    ("critic:", "ROLE_TRANSCRIPT"),
    ("assistant:", "ROLE_TRANSCRIPT"),
];
const RETRIEVED_START: &str = "=== RETRIEVED_MEMORY ===";
const RETRIEVED_END: &str = "=== END_RETRIEVED_MEMORY ===";
const RETRIEVAL_START: &str = "=== RETRIEVAL ===";
const RETRIEVAL_END: &str = "=== END RETRIEVAL ===";

fn protected_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            "(?s){}.*?{}|{}.*?{}",
            regex::escape(notes::START_MARKER),
            regex::escape(notes::END_MARKER),
            regex::escape(tool_calls::START_MARKER),
            regex::escape(tool_calls::END_MARKER),
        ))
        .unwrap()
    })
}

fn tools_block_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            "(?s){}.*?{}",
            regex::escape(tool_calls::START_MARKER),
            regex::escape(tool_calls::END_MARKER)
        ))
        .unwrap()
    })
}

fn notes_block_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            "(?s){}.*?{}",
            regex::escape(notes::START_MARKER),
            regex::escape(notes::END_MARKER)
        ))
        .unwrap()
    })
}

fn retrieval_block_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            "(?s){}.*?{}|{}.*?{}",
            regex::escape(RETRIEVED_START),
            regex::escape(RETRIEVED_END),
            regex::escape(RETRIEVAL_START),
            regex::escape(RETRIEVAL_END),
        ))
        .unwrap()
    })
}

fn reasoning_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        vec![
            Regex::new(r"(?s)<think>.*?</think>").unwrap(),
            Regex::new(r"(?s)<<<THOUGHTS>>>.*?<<<END_THOUGHTS>>>").unwrap(),
            Regex::new(r"(?s)=== REASONING ===.*?=== END REASONING ===").unwrap(),
        ]
    })
}

fn strip_reasoning_wrappers(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in reasoning_patterns() {
        out = pattern.replace_all(&out, "").into_owned();
    }
    out
}

fn strip_leading_scaffolding(text: &str) -> (String, Vec<String>) {
    let mut removed = Vec::new();
    let mut working = text.to_string();
    loop {
        let stripped = working.trim_start();
        if stripped.is_empty() {
            return (String::new(), removed);
        }
        if stripped.starts_with(RETRIEVED_START) || stripped.starts_with(RETRIEVAL_START) {
            let end_marker = if stripped.starts_with(RETRIEVAL_START) { RETRIEVAL_END } else { RETRIEVED_END };
            let cut = stripped.find(end_marker).map(|i| i + end_marker.len()).unwrap_or(stripped.len());
            working = stripped[cut..].to_string();
            push_unique(&mut removed, "RETRIEVED_MEMORY");
            continue;
        }
        let mut matched = false;
        for (header, label) in SCAFFOLD_HEADERS {
            if stripped.starts_with(header) {
                let block_end = stripped.find("\n\n").map(|i| i + 2).unwrap_or(stripped.len());
                working = stripped[block_end..].to_string();
                push_unique(&mut removed, label);
                matched = true;
                break;
            }
        }
        if !matched {
            return (stripped.to_string(), removed);
        }
    }
}

fn strip_trailing_scaffolding(text: &str) -> (String, Vec<String>) {
    let mut removed = Vec::new();
    let mut working = text.to_string();
    loop {
        let stripped = working.trim_end();
        if stripped.is_empty() {
            return (String::new(), removed);
        }
        if stripped.ends_with(RETRIEVED_END) || stripped.ends_with(RETRIEVAL_END) {
            let start_marker = if stripped.ends_with(RETRIEVAL_END) { RETRIEVAL_START } else { RETRIEVED_START };
            if let Some(idx) = stripped.rfind(start_marker) {
                working = stripped[..idx].to_string();
                push_unique(&mut removed, "RETRIEVED_MEMORY");
                continue;
            }
        }
        let (last_block, prefix) = match stripped.rfind("\n\n") {
            Some(idx) => (&stripped[idx + 2..], &stripped[..idx]),
            None => (stripped, ""),
        };
        let last_block_stripped = last_block.trim_start();
        let mut matched = false;
        for (header, label) in SCAFFOLD_HEADERS {
            if last_block_stripped.starts_with(header) {
                working = prefix.to_string();
                push_unique(&mut removed, label);
                matched = true;
                break;
            }
        }
        if !matched {
            return (stripped.to_string(), removed);
        }
    }
}

fn strip_dangling_markers(text: &str) -> (String, bool) {
    let mut sanitized = text.to_string();
    let mut removed = false;
    for marker in [tool_calls::START_MARKER, tool_calls::END_MARKER, notes::START_MARKER, notes::END_MARKER] {
        if sanitized.contains(marker) {
            sanitized = sanitized.replace(marker, "");
            removed = true;
        }
    }
    (sanitized, removed)
}

fn strip_tool_notes_blocks(text: &str) -> (String, Vec<String>) {
    let mut sanitized = text.to_string();
    let mut removed = Vec::new();
    if tools_block_pattern().is_match(&sanitized) {
        sanitized = tools_block_pattern().replace_all(&sanitized, "").into_owned();
        removed.push("TOOL_BLOCK_STRIPPED".to_string());
    }
    if notes_block_pattern().is_match(&sanitized) {
        sanitized = notes_block_pattern().replace_all(&sanitized, "").into_owned();
        removed.push("NOTES_BLOCK_STRIPPED".to_string());
    }
    let (sanitized, stripped_markers) = strip_dangling_markers(&sanitized);
    if stripped_markers {
        removed.push("MARKER_POLLUTION".to_string());
    }
    (sanitized, removed)
}

fn push_unique(list: &mut Vec<String>, label: &str) {
    if !list.iter().any(|l| l == label) {
        list.push(label.to_string());
    }
}

/// Run the full sanitizer pipeline. Returns `(sanitized_text, removed_labels, empty_after_sanitize)`.
pub fn sanitize_visible_text_with_report(text: &str) -> (String, Vec<String>, bool) {
    if text.is_empty() {
        return (text.to_string(), Vec::new(), false);
    }

    let mut placeholders: Vec<(String, String)> = Vec::new();
    let mut protected = String::new();
    let mut last_index = 0;
    for (idx, mat) in protected_pattern().find_iter(text).enumerate() {
        let placeholder = format!("<<<SPECTATOR_BLOCK_{idx}>>>");
        protected.push_str(&text[last_index..mat.start()]);
        protected.push_str(&placeholder);
        placeholders.push((placeholder, mat.as_str().to_string()));
        last_index = mat.end();
    }
    protected.push_str(&text[last_index..]);

    let mut sanitized = strip_reasoning_wrappers(&protected);
    let (s, leading_removed) = strip_leading_scaffolding(&sanitized);
    sanitized = s;
    let (s, trailing_removed) = strip_trailing_scaffolding(&sanitized);
    sanitized = s;
    let retrieval_removed = retrieval_block_pattern().is_match(&sanitized);
    if retrieval_removed {
        sanitized = retrieval_block_pattern().replace_all(&sanitized, "").into_owned();
    }
    let (s, stripped_markers) = strip_dangling_markers(&sanitized);
    sanitized = s;

    for (placeholder, original) in &placeholders {
        sanitized = sanitized.replace(placeholder, original);
    }
    let (s, block_removed) = strip_tool_notes_blocks(&sanitized);
    sanitized = s;

    let mut removed = Vec::new();
    for label in leading_removed.into_iter().chain(trailing_removed) {
        push_unique(&mut removed, &label);
    }
    if retrieval_removed {
        push_unique(&mut removed, "RETRIEVED_MEMORY");
    }
    if stripped_markers {
        push_unique(&mut removed, "MARKER_POLLUTION");
    }
    for label in block_removed {
        push_unique(&mut removed, &label);
    }

    if sanitized.trim().is_empty() {
        return ("...".to_string(), removed, true);
    }
    (sanitized, removed, false)
}

pub fn sanitize_visible_text(text: &str) -> String {
    sanitize_visible_text_with_report(text).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_reasoning_wrapper() {
        let text = "<think>internal musing</think>Hello there.";
        let (sanitized, _removed, empty) = sanitize_visible_text_with_report(text);
        assert_eq!(sanitized, "Hello there.");
        assert!(!empty);
    }

    #[test]
    fn strips_leading_state_block() {
        let text = "STATE:\n{goals:[]}\n\nHello.";
        let (sanitized, removed, _empty) = sanitize_visible_text_with_report(text);
        assert_eq!(sanitized, "Hello.");
        assert!(removed.contains(&"STATE".to_string()));
    }

    #[test]
    fn strips_tool_and_notes_blocks_and_flags_them() {
        let text = format!(
            "Answer.\n{}\n[]\n{}",
            tool_calls::START_MARKER,
            tool_calls::END_MARKER
        );
        let (sanitized, removed, _empty) = sanitize_visible_text_with_report(&text);
        assert!(!sanitized.contains(tool_calls::START_MARKER));
        assert!(removed.contains(&"TOOL_BLOCK_STRIPPED".to_string()));
    }

    #[test]
    fn empty_residue_becomes_ellipsis() {
        let text = "STATE:\n{}\n\n";
        let (sanitized, _removed, empty) = sanitize_visible_text_with_report(text);
        assert_eq!(sanitized, "...");
        assert!(empty);
    }

    #[test]
    fn dangling_marker_without_pair_is_removed() {
        let text = format!("Hello {}", tool_calls::START_MARKER);
        let (sanitized, removed, _empty) = sanitize_visible_text_with_report(&text);
        assert!(!sanitized.contains(tool_calls::START_MARKER));
        assert!(removed.contains(&"MARKER_POLLUTION".to_string()));
    }

    #[test]
    fn strips_interior_retrieval_block() {
        let text = "Before === RETRIEVAL ===\nstuff\n=== END RETRIEVAL ===After";
        let (sanitized, removed, _empty) = sanitize_visible_text_with_report(text);
        assert!(!sanitized.contains("RETRIEVAL"));
        assert!(removed.contains(&"RETRIEVED_MEMORY".to_string()));
    }
}
