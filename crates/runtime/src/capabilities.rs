//! Capability grant/request/revoke (spec §4.12).

use cr_domain::types::State;
use serde_json::{json, Value};

const REQUEST_PREFIX: &str = "request_permission:";
const GRANT_PREFIX: &str = "grant_permission:";
const REVOKE_PREFIX: &str = "revoke_permission:";
const CLEAR_PENDING: &str = "clear_pending";

/// Restore the `granted ∩ pending = ∅` invariant (spec §3, §8).
pub fn normalize_capabilities(state: &mut State) {
    if state.capabilities_granted.is_empty() {
        return;
    }
    state.capabilities_pending.retain(|cap| !state.capabilities_granted.contains(cap));
}

pub fn request_permission(state: &mut State, cap: &str) -> bool {
    if state.capabilities_granted.contains(cap) || state.capabilities_pending.contains(cap) {
        return false;
    }
    state.capabilities_pending.insert(cap.to_string());
    true
}

pub fn grant_permission(state: &mut State, cap: &str) -> bool {
    let mut changed = state.capabilities_granted.insert(cap.to_string());
    changed |= state.capabilities_pending.remove(cap);
    changed
}

pub fn revoke_permission(state: &mut State, cap: &str) -> bool {
    state.capabilities_granted.remove(cap)
}

pub fn clear_pending(state: &mut State) -> bool {
    if state.capabilities_pending.is_empty() {
        return false;
    }
    state.capabilities_pending.clear();
    true
}

/// Apply a batch of `NotesPatch.actions` strings, returning the `{before,
/// after, applied, ignored}` report for the `actions` trace event.
pub fn apply_permission_actions(state: &mut State, actions: &[String]) -> Value {
    let before = json!({
        "granted": sorted(&state.capabilities_granted),
        "pending": sorted(&state.capabilities_pending),
    });

    let mut applied = Vec::new();
    let mut ignored = Vec::new();

    for action in actions {
        if let Some(cap) = action.strip_prefix(REQUEST_PREFIX) {
            if cap.is_empty() {
                ignored.push(json!({"action": action, "reason": "empty_capability"}));
            } else if request_permission(state, cap) {
                applied.push(action.clone());
            }
        } else if let Some(cap) = action.strip_prefix(GRANT_PREFIX) {
            if cap.is_empty() {
                ignored.push(json!({"action": action, "reason": "empty_capability"}));
            } else if grant_permission(state, cap) {
                applied.push(action.clone());
            }
        } else if let Some(cap) = action.strip_prefix(REVOKE_PREFIX) {
            if cap.is_empty() {
                ignored.push(json!({"action": action, "reason": "empty_capability"}));
            } else if revoke_permission(state, cap) {
                applied.push(action.clone());
            }
        } else if action == CLEAR_PENDING {
            if clear_pending(state) {
                applied.push(action.clone());
            }
        } else {
            ignored.push(json!({"action": action, "reason": "unknown_action"}));
        }
    }

    normalize_capabilities(state);

    let after = json!({
        "granted": sorted(&state.capabilities_granted),
        "pending": sorted(&state.capabilities_pending),
    });
    json!({"before": before, "after": after, "applied": applied, "ignored": ignored})
}

fn sorted(set: &std::collections::HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.iter().cloned().collect();
    v.sort();
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_grant_removes_from_pending() {
        let mut state = State::default();
        assert!(request_permission(&mut state, "net"));
        assert!(state.capabilities_pending.contains("net"));
        assert!(grant_permission(&mut state, "net"));
        assert!(state.capabilities_granted.contains("net"));
        assert!(!state.capabilities_pending.contains("net"));
    }

    #[test]
    fn grant_is_idempotent() {
        let mut state = State::default();
        assert!(grant_permission(&mut state, "net"));
        assert!(!grant_permission(&mut state, "net"));
        assert_eq!(state.capabilities_granted.len(), 1);
    }

    #[test]
    fn revoke_removes_from_granted_only() {
        let mut state = State::default();
        grant_permission(&mut state, "net");
        assert!(revoke_permission(&mut state, "net"));
        assert!(!state.capabilities_granted.contains("net"));
    }

    #[test]
    fn clear_pending_empties_pending_set() {
        let mut state = State::default();
        request_permission(&mut state, "net:a");
        request_permission(&mut state, "net:b");
        assert!(clear_pending(&mut state));
        assert!(state.capabilities_pending.is_empty());
    }

    #[test]
    fn apply_permission_actions_reports_applied_and_ignored() {
        let mut state = State::default();
        let actions = vec![
            "grant_permission:net".to_string(),
            "request_permission:net".to_string(),
            "unknown_action".to_string(),
            "grant_permission:".to_string(),
        ];
        let report = apply_permission_actions(&mut state, &actions);
        assert_eq!(report["applied"].as_array().unwrap().len(), 1);
        assert_eq!(report["ignored"].as_array().unwrap().len(), 2);
        assert!(state.capabilities_granted.contains("net"));
        assert!(!state.capabilities_pending.contains("net"));
    }

    #[test]
    fn normalize_drops_pending_already_granted() {
        let mut state = State::default();
        state.capabilities_granted.insert("net".to_string());
        state.capabilities_pending.insert("net".to_string());
        normalize_capabilities(&mut state);
        assert!(!state.capabilities_pending.contains("net"));
    }
}
