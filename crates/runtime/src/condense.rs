//! Bounded state lists and upstream-text truncation (spec §4.10).

use cr_domain::config::CondensePolicy;
use cr_domain::types::{RoleResult, State};

pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Per-field removed counts from the most recent [`condense_state`] call.
#[derive(Debug, Clone, Default, Copy, serde::Serialize)]
pub struct CondenseReport {
    pub goals_removed: usize,
    pub open_loops_removed: usize,
    pub decisions_removed: usize,
    pub constraints_removed: usize,
    pub memory_tags_removed: usize,
}

impl CondenseReport {
    pub fn trimmed(&self) -> bool {
        self.goals_removed > 0
            || self.open_loops_removed > 0
            || self.decisions_removed > 0
            || self.constraints_removed > 0
            || self.memory_tags_removed > 0
    }
}

/// Remove duplicates, keeping the first occurrence.
pub fn dedupe_preserve_order(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.iter().filter(|item| seen.insert((*item).clone())).cloned().collect()
}

/// Keep the last `max_n` items (or none when `max_n == 0`).
pub fn cap_tail(items: Vec<String>, max_n: usize) -> Vec<String> {
    if items.len() <= max_n {
        return items;
    }
    if max_n == 0 {
        return Vec::new();
    }
    items[items.len() - max_n..].to_vec()
}

/// Truncate `text` to at most `max_chars`, appending [`TRUNCATION_MARKER`]
/// when shortened (spec §4.10).
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if text.len() <= max_chars {
        return text.to_string();
    }
    if max_chars < TRUNCATION_MARKER.len() {
        return TRUNCATION_MARKER[..max_chars].to_string();
    }
    let available = max_chars - TRUNCATION_MARKER.len();
    let boundary = text.floor_char_boundary(available);
    format!("{}{}", &text[..boundary], TRUNCATION_MARKER)
}

fn condense_list(items: &[String], max_items: usize) -> Vec<String> {
    cap_tail(dedupe_preserve_order(items), max_items)
}

/// Apply dedupe + cap-tail to every bounded state field in place.
pub fn condense_state(state: &mut State, policy: &CondensePolicy) -> CondenseReport {
    let before_goals = state.goals.len();
    let before_open_loops = state.open_loops.len();
    let before_decisions = state.decisions.len();
    let before_constraints = state.constraints.len();
    let before_memory_tags = state.memory_tags.len();

    state.goals = condense_list(&state.goals, policy.max_goals);
    state.open_loops = condense_list(&state.open_loops, policy.max_open_loops);
    state.decisions = condense_list(&state.decisions, policy.max_decisions);
    state.constraints = condense_list(&state.constraints, policy.max_constraints);
    state.memory_tags = condense_list(&state.memory_tags, policy.max_memory_tags);

    CondenseReport {
        goals_removed: before_goals - state.goals.len(),
        open_loops_removed: before_open_loops - state.open_loops.len(),
        decisions_removed: before_decisions - state.decisions.len(),
        constraints_removed: before_constraints - state.constraints.len(),
        memory_tags_removed: before_memory_tags - state.memory_tags.len(),
    }
}

/// Truncate each prior role's text to `max_upstream_chars_per_role`, then,
/// if the total still exceeds `max_upstream_total_chars`, re-truncate in
/// order until the sum fits (spec §4.10).
pub fn condense_upstream(results: &[RoleResult], policy: &CondensePolicy) -> Vec<RoleResult> {
    let truncated: Vec<RoleResult> = results
        .iter()
        .map(|r| RoleResult {
            role: r.role.clone(),
            text: truncate_text(&r.text, policy.max_upstream_chars_per_role),
            notes: r.notes.clone(),
        })
        .collect();

    let total_chars: usize = truncated.iter().map(|r| r.text.len()).sum();
    if total_chars <= policy.max_upstream_total_chars {
        return truncated;
    }

    let mut remaining = policy.max_upstream_total_chars;
    truncated
        .into_iter()
        .map(|r| {
            let text = truncate_text(&r.text, remaining);
            remaining = remaining.saturating_sub(text.len());
            RoleResult { role: r.role, text, notes: r.notes }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let items = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(dedupe_preserve_order(&items), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn cap_tail_keeps_most_recent() {
        let items: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        let capped = cap_tail(items, 32);
        assert_eq!(capped.len(), 32);
        assert_eq!(capped[0], "8");
        assert_eq!(capped[31], "39");
    }

    #[test]
    fn cap_tail_zero_is_empty() {
        assert!(cap_tail(vec!["a".to_string()], 0).is_empty());
    }

    #[test]
    fn truncate_text_appends_marker() {
        let out = truncate_text(&"x".repeat(100), 20);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn truncate_text_shorter_than_marker_returns_prefix() {
        let out = truncate_text(&"x".repeat(100), 5);
        assert_eq!(out, TRUNCATION_MARKER[..5]);
    }

    #[test]
    fn condense_state_reports_removed_counts() {
        let mut state = State::default();
        state.goals = (0..40).map(|i| i.to_string()).collect();
        let policy = CondensePolicy::default();
        let report = condense_state(&mut state, &policy);
        assert_eq!(state.goals.len(), 32);
        assert_eq!(report.goals_removed, 8);
        assert!(report.trimmed());
    }
}
