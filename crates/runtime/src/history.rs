//! History framing for the `HISTORY_JSON:` prompt slot (spec §4.11).

use cr_domain::config::HistoryConfig;
use cr_domain::types::ChatMessage;

/// Cap to the last `max_messages`, then shrink the JSON serialization to
/// `max_chars` by dropping the oldest messages, and as a last resort
/// tail-truncating the single remaining message's content.
pub fn frame_history(messages: &[ChatMessage], config: &HistoryConfig) -> String {
    let tail: Vec<ChatMessage> = messages
        .iter()
        .rev()
        .take(config.max_messages)
        .rev()
        .cloned()
        .collect();

    let mut working = tail;
    while working.len() > 1 && serde_json::to_string(&working).unwrap_or_default().len() > config.max_chars {
        working.remove(0);
    }

    let mut serialized = serde_json::to_string(&working).unwrap_or_default();
    if serialized.len() <= config.max_chars {
        return serialized;
    }

    if let Some(message) = working.first_mut() {
        while serialized.len() > config.max_chars && !message.content.is_empty() {
            message.content.pop();
            serialized = serde_json::to_string(&working).unwrap_or_default();
        }
    }
    serialized
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_domain::types::ChatMessage;

    #[test]
    fn caps_to_last_n_messages() {
        let messages: Vec<ChatMessage> = (0..20).map(|i| ChatMessage::user(format!("msg-{i}"))).collect();
        let config = HistoryConfig { max_messages: 8, max_chars: 10_000 };
        let framed = frame_history(&messages, &config);
        let parsed: Vec<ChatMessage> = serde_json::from_str(&framed).unwrap();
        assert_eq!(parsed.len(), 8);
        assert_eq!(parsed[7].content, "msg-19");
    }

    #[test]
    fn shrinks_by_dropping_oldest_when_over_char_cap() {
        let messages: Vec<ChatMessage> =
            (0..8).map(|i| ChatMessage::user("x".repeat(50) + &i.to_string())).collect();
        let config = HistoryConfig { max_messages: 8, max_chars: 120 };
        let framed = frame_history(&messages, &config);
        assert!(framed.len() <= 120);
        let parsed: Vec<ChatMessage> = serde_json::from_str(&framed).unwrap();
        assert!(parsed.len() < 8);
    }

    #[test]
    fn tail_truncates_single_remaining_message() {
        let messages = vec![ChatMessage::user("x".repeat(500))];
        let config = HistoryConfig { max_messages: 8, max_chars: 50 };
        let framed = frame_history(&messages, &config);
        assert!(framed.len() <= 50);
    }
}
