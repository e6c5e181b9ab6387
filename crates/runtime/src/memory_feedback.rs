//! Memory-pressure ratios and the `=== MEMORY FEEDBACK ===` prompt slot (spec §2, §9).

use cr_domain::config::CondensePolicy;
use cr_domain::types::{RoleResult, State};

use crate::condense::CondenseReport;

#[derive(Debug, Clone)]
pub struct MemoryPressure {
    pub goals_ratio: f64,
    pub open_loops_ratio: f64,
    pub decisions_ratio: f64,
    pub constraints_ratio: f64,
    pub memory_tags_ratio: f64,
    pub upstream_ratio: f64,
    pub high_fields: Vec<String>,
    pub condensed: bool,
    pub last_report: Option<CondenseReport>,
}

fn ratio(current: usize, maximum: usize) -> f64 {
    if maximum == 0 {
        return if current > 0 { 1.0 } else { 0.0 };
    }
    current as f64 / maximum as f64
}

pub fn compute_memory_pressure(
    state: &State,
    policy: &CondensePolicy,
    upstream: &[RoleResult],
    report: Option<&CondenseReport>,
) -> MemoryPressure {
    let fields = [
        ("goals_ratio", ratio(state.goals.len(), policy.max_goals)),
        ("open_loops_ratio", ratio(state.open_loops.len(), policy.max_open_loops)),
        ("decisions_ratio", ratio(state.decisions.len(), policy.max_decisions)),
        ("constraints_ratio", ratio(state.constraints.len(), policy.max_constraints)),
        ("memory_tags_ratio", ratio(state.memory_tags.len(), policy.max_memory_tags)),
        (
            "upstream_ratio",
            ratio(upstream.iter().map(|r| r.text.len()).sum(), policy.max_upstream_total_chars),
        ),
    ];
    let high_fields: Vec<String> =
        fields.iter().filter(|(_, r)| *r >= 0.8).map(|(name, _)| name.to_string()).collect();

    MemoryPressure {
        goals_ratio: fields[0].1,
        open_loops_ratio: fields[1].1,
        decisions_ratio: fields[2].1,
        constraints_ratio: fields[3].1,
        memory_tags_ratio: fields[4].1,
        upstream_ratio: fields[5].1,
        high_fields,
        condensed: report.map(CondenseReport::trimmed).unwrap_or(false),
        last_report: report.cloned(),
    }
}

pub fn format_memory_feedback(pressure: &MemoryPressure) -> String {
    let last_report = match &pressure.last_report {
        Some(r) => serde_json::to_string(r).unwrap_or_else(|_| "none".to_string()),
        None => "none".to_string(),
    };
    format!(
        "=== MEMORY FEEDBACK ===\n\
         goals_ratio: {:.2}\n\
         open_loops_ratio: {:.2}\n\
         decisions_ratio: {:.2}\n\
         constraints_ratio: {:.2}\n\
         memory_tags_ratio: {:.2}\n\
         upstream_ratio: {:.2}\n\
         high_fields: {:?}\n\
         condensed: {}\n\
         last_report: {}\n\
         === END MEMORY FEEDBACK ===",
        pressure.goals_ratio,
        pressure.open_loops_ratio,
        pressure.decisions_ratio,
        pressure.constraints_ratio,
        pressure.memory_tags_ratio,
        pressure.upstream_ratio,
        pressure.high_fields,
        pressure.condensed,
        last_report,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_fields_flagged_at_threshold() {
        let mut state = State::default();
        state.goals = (0..30).map(|i| i.to_string()).collect();
        let policy = CondensePolicy::default();
        let pressure = compute_memory_pressure(&state, &policy, &[], None);
        assert!(pressure.high_fields.contains(&"goals_ratio".to_string()));
        assert!(!pressure.condensed);
    }

    #[test]
    fn format_includes_all_fields() {
        let state = State::default();
        let policy = CondensePolicy::default();
        let pressure = compute_memory_pressure(&state, &policy, &[], None);
        let block = format_memory_feedback(&pressure);
        assert!(block.starts_with("=== MEMORY FEEDBACK ==="));
        assert!(block.ends_with("=== END MEMORY FEEDBACK ==="));
        assert!(block.contains("last_report: none"));
    }
}
