//! Retrieval adapter: turn `(query, k)` into a formatted `=== RETRIEVAL ===`
//! prompt block (spec §2). The vector/embedding store behind `retrieve` is
//! an external collaborator (spec §1) — only the contract is specified
//! here.

pub struct RetrievalMatch {
    pub id: String,
    pub score: f64,
    pub text: String,
}

/// Implemented by whatever backs semantic memory retrieval. The scheduler
/// only ever sees this contract, never a concrete store.
pub trait RetrievalAdapter: Send + Sync {
    fn retrieve(&self, query: &str, k: usize) -> Vec<RetrievalMatch>;
}

/// An adapter with no backing store, used when retrieval is not configured.
pub struct NullRetrievalAdapter;

impl RetrievalAdapter for NullRetrievalAdapter {
    fn retrieve(&self, _query: &str, _k: usize) -> Vec<RetrievalMatch> {
        Vec::new()
    }
}

fn truncate_preview(text: &str, limit: usize) -> String {
    let flattened: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.len() <= limit {
        return flattened;
    }
    let boundary = flattened.floor_char_boundary(limit.saturating_sub(3));
    format!("{}...", &flattened[..boundary])
}

pub fn format_retrieval_block(results: &[RetrievalMatch]) -> String {
    let mut lines = vec!["=== RETRIEVAL ===".to_string()];
    if results.is_empty() {
        lines.push("(no matches)".to_string());
    } else {
        for (i, m) in results.iter().enumerate() {
            lines.push(format!("[{}] score={:.3} id={} text={}", i + 1, m.score, m.id, truncate_preview(&m.text, 160)));
        }
    }
    lines.push("=== END RETRIEVAL ===".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_results_render_no_matches() {
        let block = format_retrieval_block(&[]);
        assert!(block.contains("(no matches)"));
        assert!(block.starts_with("=== RETRIEVAL ==="));
        assert!(block.ends_with("=== END RETRIEVAL ==="));
    }

    #[test]
    fn formats_each_match_with_truncated_preview() {
        let results = vec![RetrievalMatch { id: "rec-1".to_string(), score: 0.9123, text: "a".repeat(200) }];
        let block = format_retrieval_block(&results);
        assert!(block.contains("[1] score=0.912 id=rec-1"));
        assert!(block.contains("..."));
    }

    #[test]
    fn null_adapter_returns_no_matches() {
        let adapter = NullRetrievalAdapter;
        assert!(adapter.retrieve("query", 5).is_empty());
    }
}
