//! Split a file into map/reduce-sized pieces for introspection summaries.
//!
//! Strategy is auto-selected by extension: `.md`/`.rst` by heading, `.py` by
//! top-level `def`/`class` boundary, `.log`/`.jsonl`/`.txt` by log-vs-prose
//! block, everything else by a fixed character budget.

use std::path::Path;

use regex::Regex;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub title: String,
    pub strategy: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

pub fn chunk_file(path: &str, text: &str, strategy: &str, max_chars: usize, overlap_chars: usize) -> Result<Vec<Chunk>, String> {
    if max_chars == 0 {
        return Err("max_chars must be positive".to_string());
    }
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    if normalized.is_empty() {
        return Ok(Vec::new());
    }
    let resolved = resolve_strategy(path, strategy);
    let mut chunks = match resolved {
        "headings" => chunk_by_headings(path, &normalized, max_chars),
        "python_ast" => chunk_by_python_toplevel(path, &normalized, max_chars),
        "log" => chunk_by_log(path, &normalized, max_chars),
        "fixed" => chunk_fixed(path, &normalized, max_chars, overlap_chars),
        other => return Err(format!("Unknown chunking strategy '{other}'")),
    };
    for chunk in &mut chunks {
        chunk.strategy = resolved.to_string();
    }
    Ok(chunks)
}

fn resolve_strategy<'a>(path: &str, strategy: &'a str) -> &'a str {
    let lowered = strategy.to_ascii_lowercase();
    if lowered != "auto" {
        return strategy;
    }
    match Path::new(path).extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("log") | Some("jsonl") | Some("txt") => "log",
        Some("md") | Some("rst") => "headings",
        Some("py") => "python_ast",
        _ => "fixed",
    }
}

fn lines_keep_ends(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch == '\n' {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn chunk_id(path: &str, start_line: usize, end_line: usize, title: &str) -> String {
    let payload = format!("{path}:{start_line}:{end_line}:{title}");
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(digest)[..10].to_string()
}

fn build_chunk(path: &str, title: &str, start_line: usize, end_line: usize, text: String) -> Chunk {
    Chunk {
        id: chunk_id(path, start_line, end_line, title),
        title: title.to_string(),
        strategy: String::new(),
        start_line,
        end_line,
        text,
    }
}

fn split_long_line(path: &str, title: &str, line_no: usize, line: &str, max_chars: usize) -> Vec<Chunk> {
    let mut parts = Vec::new();
    let chars: Vec<char> = line.chars().collect();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let segment: String = chars[start..end].iter().collect();
        parts.push(build_chunk(path, title, line_no, line_no, segment));
        start = end;
    }
    parts
}

fn split_oversize(path: &str, title: &str, start_line: usize, end_line: usize, text: &str, max_chars: usize) -> Vec<Chunk> {
    if text.len() <= max_chars {
        return vec![build_chunk(path, title, start_line, end_line, text.to_string())];
    }
    let lines = lines_keep_ends(text);
    let mut parts: Vec<Chunk> = Vec::new();
    let mut buf = String::new();
    let mut part_start = start_line;
    let mut line_no = start_line;
    for line in &lines {
        if line.len() > max_chars {
            if !buf.is_empty() {
                parts.push(build_chunk(path, title, part_start, line_no - 1, std::mem::take(&mut buf)));
            }
            parts.extend(split_long_line(path, title, line_no, line, max_chars));
            part_start = line_no + 1;
        } else if !buf.is_empty() && buf.len() + line.len() > max_chars {
            parts.push(build_chunk(path, title, part_start, line_no - 1, std::mem::take(&mut buf)));
            buf.push_str(line);
            part_start = line_no;
        } else {
            buf.push_str(line);
        }
        line_no += 1;
    }
    if !buf.is_empty() {
        parts.push(build_chunk(path, title, part_start, line_no - 1, buf));
    }
    if parts.len() == 1 {
        return parts;
    }
    let total = parts.len();
    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            let labeled_title = format!("{} (part {}/{})", title, i + 1, total);
            build_chunk(path, &labeled_title, part.start_line, part.end_line, part.text)
        })
        .collect()
}

fn chunk_by_headings(path: &str, text: &str, max_chars: usize) -> Vec<Chunk> {
    let lines = lines_keep_ends(text);
    if lines.is_empty() {
        return Vec::new();
    }
    let md_re = Regex::new(r"^(#{1,6})\s+(.*)$").unwrap();
    let underline_re = Regex::new(r"^[=\-]{3,}\s*$").unwrap();

    let mut headings: Vec<(usize, String)> = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx].trim_end_matches('\n');
        if let Some(caps) = md_re.captures(line) {
            let title = caps.get(2).map(|m| m.as_str().trim()).filter(|s| !s.is_empty()).unwrap_or("heading");
            headings.push((idx + 1, title.to_string()));
            idx += 1;
            continue;
        }
        if idx + 1 < lines.len() {
            let underline = lines[idx + 1].trim_end_matches('\n');
            if underline_re.is_match(underline) && !line.trim().is_empty() {
                headings.push((idx + 1, line.trim().to_string()));
                idx += 2;
                continue;
            }
        }
        idx += 1;
    }

    let mut sections: Vec<(usize, usize, String)> = Vec::new();
    if headings.is_empty() {
        sections.push((1, lines.len(), "document".to_string()));
    } else {
        let (first_line, _) = &headings[0];
        if *first_line > 1 {
            sections.push((1, first_line - 1, "preamble".to_string()));
        }
        for (i, (line_no, title)) in headings.iter().enumerate() {
            let next_line = headings.get(i + 1).map(|h| h.0).unwrap_or(lines.len() + 1);
            sections.push((*line_no, next_line - 1, title.clone()));
        }
    }

    let mut chunks = Vec::new();
    for (start_line, end_line, title) in sections {
        if end_line < start_line {
            continue;
        }
        let section_text: String = lines[start_line - 1..end_line].concat();
        chunks.extend(split_oversize(path, &title, start_line, end_line, &section_text, max_chars));
    }
    chunks
}

/// Approximates module-level `ast.parse` node boundaries with an
/// indentation-aware scan for top-level `def`/`async def`/`class` headers,
/// since the parser stack has no Python AST implementation.
fn chunk_by_python_toplevel(path: &str, text: &str, max_chars: usize) -> Vec<Chunk> {
    let def_re = Regex::new(r"^(async\s+def|def|class)\s+(\w+)").unwrap();
    let lines = lines_keep_ends(text);
    if lines.is_empty() {
        return Vec::new();
    }

    let mut nodes: Vec<(usize, usize, String)> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if line.starts_with(char::is_whitespace) || line.trim().is_empty() {
            i += 1;
            continue;
        }
        if let Some(caps) = def_re.captures(line.trim_end_matches('\n')) {
            let keyword = caps.get(1).unwrap().as_str();
            let name = caps.get(2).unwrap().as_str();
            let title = if keyword.starts_with("async") {
                format!("async def {name}")
            } else if keyword == "class" {
                format!("class {name}")
            } else {
                format!("def {name}")
            };
            let start = i + 1;
            let mut end = i;
            let mut j = i + 1;
            while j < lines.len() {
                let next = &lines[j];
                if !next.trim().is_empty() && !next.starts_with(char::is_whitespace) {
                    break;
                }
                end = j;
                j += 1;
            }
            nodes.push((start, end + 1, title));
            i = j;
        } else {
            i += 1;
        }
    }

    if nodes.is_empty() {
        let text_all: String = lines.concat();
        return split_oversize(path, "module", 1, lines.len(), &text_all, max_chars);
    }

    let mut chunks = Vec::new();
    let first_start = nodes[0].0;
    if first_start > 1 {
        let pre_text: String = lines[..first_start - 1].concat();
        chunks.extend(split_oversize(path, "module", 1, first_start - 1, &pre_text, max_chars));
    }
    for (start_line, end_line, title) in nodes {
        if end_line < start_line {
            continue;
        }
        let section_text: String = lines[start_line - 1..end_line].concat();
        chunks.extend(split_oversize(path, &title, start_line, end_line, &section_text, max_chars));
    }
    chunks
}

fn compute_overlap(lines: &[String], overlap_chars: usize) -> Vec<String> {
    if overlap_chars == 0 || lines.is_empty() {
        return Vec::new();
    }
    let mut total = 0usize;
    let mut overlap = Vec::new();
    for line in lines.iter().rev() {
        if total + line.len() > overlap_chars && !overlap.is_empty() {
            break;
        }
        overlap.push(line.clone());
        total += line.len();
    }
    overlap.reverse();
    overlap
}

fn chunk_fixed(path: &str, text: &str, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let lines = lines_keep_ends(text);
    if lines.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut start_line = 1usize;
    let mut buf: Vec<String> = Vec::new();
    let mut buf_len = 0usize;

    for (offset, line) in lines.iter().enumerate() {
        let idx = offset + 1;
        let line_len = line.len();
        if line_len > max_chars {
            if !buf.is_empty() {
                chunks.push(build_chunk(path, "chunk", start_line, idx - 1, buf.concat()));
                buf.clear();
                buf_len = 0;
            }
            chunks.extend(split_long_line(path, "chunk", idx, line, max_chars));
            start_line = idx + 1;
            continue;
        }
        if !buf.is_empty() && buf_len + line_len > max_chars {
            let end_line = idx - 1;
            chunks.push(build_chunk(path, "chunk", start_line, end_line, buf.concat()));
            let overlap = compute_overlap(&buf, overlap_chars);
            let overlap_lines = overlap.len();
            buf_len = overlap.iter().map(String::len).sum();
            buf = overlap;
            start_line = if overlap_lines > 0 { end_line - overlap_lines + 1 } else { idx };
        }
        buf.push(line.clone());
        buf_len += line_len;
    }
    if !buf.is_empty() {
        let end_line = start_line + buf.len() - 1;
        chunks.push(build_chunk(path, "chunk", start_line, end_line, buf.concat()));
    }
    chunks
}

fn classify_log_line(line: &str) -> Option<bool> {
    let stripped = line.trim();
    if stripped.is_empty() {
        return None;
    }
    if stripped.starts_with('{') && stripped.ends_with('}') {
        return Some(true);
    }
    static TIMESTAMP_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let ts_re = TIMESTAMP_RE.get_or_init(|| {
        Regex::new(
            r"^(?:\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}|\d{2}:\d{2}:\d{2}|(?:INFO|WARN|WARNING|ERROR|DEBUG|TRACE|FATAL)\b|[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})",
        )
        .unwrap()
    });
    if ts_re.is_match(stripped) {
        return Some(true);
    }
    static PREFIX_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let prefix_re = PREFIX_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]{2,}:\s").unwrap());
    if prefix_re.is_match(stripped) {
        return Some(true);
    }
    let ratio = symbol_ratio(stripped);
    if ratio >= 0.35 {
        return Some(true);
    }
    if looks_like_log_prefix(stripped) {
        return Some(true);
    }
    Some(false)
}

fn symbol_ratio(text: &str) -> f64 {
    const SYMBOL_CHARS: &str = "[]{}()=:+-_/\\|<>.,'\"";
    let mut symbols = 0usize;
    let mut non_space = 0usize;
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        non_space += 1;
        if ch.is_ascii_digit() || SYMBOL_CHARS.contains(ch) {
            symbols += 1;
        }
    }
    if non_space == 0 {
        return 0.0;
    }
    symbols as f64 / non_space as f64
}

fn looks_like_log_prefix(text: &str) -> bool {
    let Some(colon) = text.find(':') else { return false };
    let head = &text[..colon];
    (2..=32).contains(&head.len()) && head.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

fn chunk_by_log(path: &str, text: &str, max_chars: usize) -> Vec<Chunk> {
    let lines = lines_keep_ends(text);
    if lines.is_empty() {
        return Vec::new();
    }
    let tail_count = 200.min(lines.len());
    let tail_start = lines.len() - tail_count + 1;
    let main_lines = &lines[..tail_start - 1];

    let mut blocks: Vec<(usize, usize, bool, String)> = Vec::new();
    if !main_lines.is_empty() {
        let mut current_kind: Option<bool> = None;
        let mut buf = String::new();
        let mut buf_start = 1usize;
        for (offset, line) in main_lines.iter().enumerate() {
            let idx = offset + 1;
            let mut kind = classify_log_line(line).unwrap_or(false);
            if classify_log_line(line).is_none() {
                kind = current_kind.unwrap_or(false);
            }
            match current_kind {
                None => {
                    current_kind = Some(kind);
                    buf_start = idx;
                }
                Some(prev) if prev != kind => {
                    if !buf.is_empty() {
                        blocks.push((buf_start, idx - 1, prev, std::mem::take(&mut buf)));
                    }
                    buf_start = idx;
                    current_kind = Some(kind);
                }
                _ => {}
            }
            buf.push_str(line);
        }
        if !buf.is_empty() {
            blocks.push((buf_start, main_lines.len(), current_kind.unwrap_or(false), buf));
        }
    }

    let mut chunks = Vec::new();
    let mut log_index = 0;
    let mut nonlog_index = 0;
    for (start_line, end_line, is_log, block_text) in blocks {
        let title = if is_log {
            log_index += 1;
            format!("log block {log_index}")
        } else {
            nonlog_index += 1;
            format!("non-log block {nonlog_index}")
        };
        chunks.extend(split_oversize(path, &title, start_line, end_line, &block_text, max_chars));
    }

    let tail_text: String = lines[tail_start - 1..].concat();
    if !tail_text.is_empty() {
        chunks.extend(split_oversize(path, "tail", tail_start, lines.len(), &tail_text, max_chars));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_strategy_splits_by_char_budget() {
        let text = "line one\nline two\nline three\n".repeat(50);
        let chunks = chunk_file("notes.bin", &text, "auto", 200, 0).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.len() <= 200 + 40));
    }

    #[test]
    fn headings_strategy_splits_markdown_sections() {
        let text = "# Title\nIntro text.\n\n## Section A\nbody a\n\n## Section B\nbody b\n";
        let chunks = chunk_file("doc.md", text, "auto", 4000, 0).unwrap();
        assert!(chunks.iter().any(|c| c.title == "Title"));
        assert!(chunks.iter().any(|c| c.title == "Section A"));
        assert!(chunks.iter().any(|c| c.title == "Section B"));
    }

    #[test]
    fn python_strategy_splits_by_top_level_def() {
        let text = "import os\n\ndef foo():\n    return 1\n\n\nclass Bar:\n    def method(self):\n        pass\n";
        let chunks = chunk_file("mod.py", text, "auto", 4000, 0).unwrap();
        assert!(chunks.iter().any(|c| c.title == "def foo"));
        assert!(chunks.iter().any(|c| c.title == "class Bar"));
    }

    #[test]
    fn empty_text_returns_no_chunks() {
        let chunks = chunk_file("empty.txt", "", "auto", 100, 0).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn rejects_zero_max_chars() {
        let err = chunk_file("a.txt", "x", "auto", 0, 0).unwrap_err();
        assert!(err.contains("positive"));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = chunk_file("a.txt", "x", "bogus", 100, 0).unwrap_err();
        assert!(err.contains("Unknown chunking strategy"));
    }
}
