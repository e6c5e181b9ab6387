//! Chunk-map-reduce introspection: summarize a file under the repo root by
//! running each chunk through the pipeline with a governor-only role, then
//! reducing the per-chunk summaries into one final summary (spec §4.16).

use std::env;
use std::path::{Path, PathBuf};

use cr_domain::types::{Checkpoint, RoleSpec};
use cr_domain::{Error, Result};
use cr_providers::Backend;
use cr_runtime::pipeline::run_pipeline;
use cr_runtime::tracer::{now_ts, TraceWriter};
use cr_domain::trace::TraceKind;
use cr_tools::sandbox::resolve_under_root;
use cr_tools::ToolExecutor;

use crate::chunking::{chunk_file, Chunk};

pub const MAX_FILE_BYTES: usize = 1_000_000;
pub const DEFAULT_TAIL_LINES: usize = 200;
pub const DEFAULT_LIST_LIMIT: usize = 500;

pub fn resolve_repo_root() -> PathBuf {
    match env::var("REPO_ROOT") {
        Ok(value) if !value.is_empty() => PathBuf::from(value).canonicalize().unwrap_or_else(|_| PathBuf::from(value)),
        _ => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn resolve_path(repo_root: &Path, path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(Error::Other("path must be a non-empty string".to_string()));
    }
    resolve_under_root(repo_root, path).ok_or_else(|| Error::SandboxViolation(format!("path '{path}' escapes repo root")))
}

pub fn list_repo_files(repo_root: &Path, prefix: Option<&str>, limit: usize) -> Result<Vec<String>> {
    let target = resolve_path(repo_root, prefix.unwrap_or("."))?;
    if target.is_file() {
        let rel = target.strip_prefix(repo_root).unwrap_or(&target);
        return Ok(vec![rel.display().to_string()]);
    }
    let mut results = Vec::new();
    let mut entries = Vec::new();
    collect_files(&target, &mut entries)?;
    entries.sort();
    for path in entries {
        let rel = path.strip_prefix(repo_root).unwrap_or(&path);
        results.push(rel.display().to_string());
        if results.len() >= limit {
            break;
        }
    }
    Ok(results)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).map_err(Error::Io)? {
        let entry = entry.map_err(Error::Io)?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

pub fn read_repo_file(repo_root: &Path, path: &str) -> Result<String> {
    let target = resolve_path(repo_root, path)?;
    if !target.is_file() {
        return Err(Error::Other("path is not a file".to_string()));
    }
    let mut data = std::fs::read(&target).map_err(Error::Io)?;
    if data.len() > MAX_FILE_BYTES {
        data.truncate(MAX_FILE_BYTES);
    }
    Ok(String::from_utf8_lossy(&data).into_owned())
}

pub fn read_repo_file_tail(repo_root: &Path, path: &str, max_lines: usize) -> Result<String> {
    let target = resolve_path(repo_root, path)?;
    if !target.is_file() {
        return Err(Error::Other("path is not a file".to_string()));
    }
    let data = std::fs::read(&target).map_err(Error::Io)?;
    let tail_bytes = if data.len() > MAX_FILE_BYTES { &data[data.len() - MAX_FILE_BYTES..] } else { &data[..] };
    let text = String::from_utf8_lossy(tail_bytes);
    if max_lines == 0 {
        return Ok(String::new());
    }
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    Ok(lines[start..].join("\n"))
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let total = text.chars().count();
    let truncated = total - max_chars;
    let marker = format!("\n... <truncated {truncated} chars>");
    if marker.chars().count() >= max_chars {
        return marker.chars().take(max_chars).collect();
    }
    let keep = max_chars - marker.chars().count();
    let head: String = text.chars().take(keep).collect();
    format!("{head}{marker}")
}

fn build_chunk_prompt(path: &str, chunk: &Chunk, instruction: &str) -> String {
    format!(
        "You are in introspection mode. You may use tools to read files under the repo root.\n\
         Available tools: fs.read_text, fs.list_dir, system.time.\n\
         File: {path}\n\
         Chunk: {title}\n\
         Lines: {start}-{end}\n\
         Content:\n{text}\n\n\
         Task: {instruction}",
        title = chunk.title,
        start = chunk.start_line,
        end = chunk.end_line,
        text = chunk.text,
    )
}

fn build_reduce_prompt(path: &str, chunks: &[Chunk], summaries: &[String], instruction: &str, max_chars: usize) -> String {
    let mut block_parts = Vec::new();
    for (idx, (chunk, summary)) in chunks.iter().zip(summaries.iter()).enumerate() {
        block_parts.push(format!(
            "Chunk {} ({}, lines {}-{}):\n{}",
            idx + 1,
            chunk.title,
            chunk.start_line,
            chunk.end_line,
            summary
        ));
    }
    let summary_block = block_parts.join("\n\n");
    let prefix = format!(
        "You are in introspection mode. You may use tools to read files under the repo root.\n\
         Available tools: fs.read_text, fs.list_dir, system.time.\n\
         File: {path}\n\
         Chunk summaries:\n"
    );
    let suffix = format!("\n\nTask: {instruction}");
    let allowed = max_chars.saturating_sub(prefix.chars().count()).saturating_sub(suffix.chars().count());
    let truncated_block = truncate_text(&summary_block, allowed);
    let mut prompt = format!("{prefix}{truncated_block}{suffix}");
    if prompt.chars().count() > max_chars {
        prompt = truncate_text(&prompt, max_chars);
    }
    prompt
}

fn is_log_chunk(chunk: &Chunk) -> bool {
    chunk.title.starts_with("log ")
}

async fn run_introspect_prompt(
    prompt: &str,
    checkpoint: &Checkpoint,
    roles: &[RoleSpec],
    backend: &dyn Backend,
    executor: &ToolExecutor,
    tracer: &TraceWriter,
) -> Result<String> {
    let mut fresh = Checkpoint::new(checkpoint.session_id.clone());
    fresh.revision = checkpoint.revision;
    fresh.updated_ts = checkpoint.updated_ts;
    let config = cr_domain::config::Config::default();
    let (final_text, _results) =
        run_pipeline(&mut fresh, prompt, roles, backend, Some(executor), None, Some(tracer), &config).await?;
    Ok(final_text)
}

#[allow(clippy::too_many_arguments)]
async fn summarize_chunk_group(
    path: &str,
    chunks: &[Chunk],
    instruction: &str,
    checkpoint: &Checkpoint,
    roles: &[RoleSpec],
    backend: &dyn Backend,
    executor: &ToolExecutor,
    tracer: &TraceWriter,
    max_chars: usize,
) -> Result<(String, usize, usize)> {
    if chunks.is_empty() {
        return Ok(("No content to summarize.".to_string(), 0, 0));
    }
    let mut summaries = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let prompt = build_chunk_prompt(path, chunk, instruction);
        let summary = run_introspect_prompt(&prompt, checkpoint, roles, backend, executor, tracer).await?;
        summaries.push(summary);
    }
    let reduce_prompt = build_reduce_prompt(path, chunks, &summaries, instruction, max_chars);
    let final_text = run_introspect_prompt(&reduce_prompt, checkpoint, roles, backend, executor, tracer).await?;
    Ok((final_text, chunks.len(), 1))
}

fn resolve_chunking_strategy(path: &str, strategy: &str) -> String {
    let lowered = strategy.to_ascii_lowercase();
    if lowered != "auto" {
        return lowered;
    }
    match Path::new(path).extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("log") | Some("jsonl") | Some("txt") => "log".to_string(),
        Some("md") | Some("rst") => "headings".to_string(),
        Some("py") => "python_ast".to_string(),
        _ => "fixed".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub max_lines: usize,
    pub max_tokens: Option<u32>,
    pub instruction: Option<String>,
    pub chunking: String,
    pub max_chars: usize,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_TAIL_LINES,
            max_tokens: None,
            instruction: None,
            chunking: "auto".to_string(),
            max_chars: 40_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummarizeResult {
    pub summary: String,
    pub trace_file: String,
    pub tail_lines: usize,
    pub max_tokens: Option<u32>,
    pub path: String,
    pub chunks: usize,
    pub chunking: String,
    pub max_chars: usize,
}

/// Summarize `path` (relative to `repo_root`) by chunk-map-reduce through the
/// pipeline, reusing a single tracer across every chunk call — an accepted
/// deviation from per-turn tracer isolation that keeps a whole introspection
/// run in one trace file.
pub async fn summarize_repo_file(
    repo_root: &Path,
    path: &str,
    data_root: &Path,
    backend: &dyn Backend,
    options: &SummarizeOptions,
) -> Result<SummarizeResult> {
    let file_text = read_repo_file(repo_root, path)?;
    let chunks = chunk_file(path, &file_text, &options.chunking, options.max_chars, 0).map_err(Error::Other)?;
    let extra_instruction = options.instruction.clone().unwrap_or_else(|| "Summarize the file contents.".to_string());

    let mut params = serde_json::json!({});
    if let Some(max_tokens) = options.max_tokens {
        if max_tokens > 0 {
            params["max_tokens"] = serde_json::json!(max_tokens);
        }
    }
    let mut governor = RoleSpec::new("governor", "You are the governor: read files with tools and produce a concise summary.");
    governor.params = params;
    let roles = vec![governor];

    let checkpoint = Checkpoint::new("introspect");
    let traces_dir = data_root.join("traces");
    let tracer = TraceWriter::open(&traces_dir, "introspect", "introspect")?;
    let executor = ToolExecutor::readonly(repo_root.to_path_buf());

    let mut total_chars = 0usize;
    for chunk in &chunks {
        total_chars += chunk.text.len();
        tracer.write(
            TraceKind::IntrospectChunk,
            now_ts(),
            serde_json::json!({
                "id": chunk.id,
                "title": chunk.title,
                "strategy": chunk.strategy,
                "start_line": chunk.start_line,
                "end_line": chunk.end_line,
                "chars": chunk.text.len(),
            }),
        )?;
    }

    let footer_strategy = resolve_chunking_strategy(path, &options.chunking);
    let final_text = if footer_strategy == "log" {
        let log_chunks: Vec<Chunk> = chunks.iter().filter(|c| is_log_chunk(c)).cloned().collect();
        let nonlog_chunks: Vec<Chunk> = chunks.iter().filter(|c| !is_log_chunk(c)).cloned().collect();
        let (log_summary, _, _) = summarize_chunk_group(
            path,
            &log_chunks,
            "Summarize log events and initialization details.",
            &checkpoint,
            &roles,
            backend,
            &executor,
            &tracer,
            options.max_chars,
        )
        .await?;
        let (nonlog_summary, _, _) = summarize_chunk_group(
            path,
            &nonlog_chunks,
            "Summarize the non-log tail content.",
            &checkpoint,
            &roles,
            backend,
            &executor,
            &tracer,
            options.max_chars,
        )
        .await?;
        let nonlog_lines: usize = nonlog_chunks.iter().map(|c| c.end_line - c.start_line + 1).sum();
        format!("**Log Summary**\n{log_summary}\n\n**Non-log Tail** ({nonlog_lines} lines)\n{nonlog_summary}")
    } else {
        let (summary_text, _, _) = summarize_chunk_group(
            path,
            &chunks,
            &extra_instruction,
            &checkpoint,
            &roles,
            backend,
            &executor,
            &tracer,
            options.max_chars,
        )
        .await?;
        summary_text
    };

    let final_text = format!(
        "{final_text}\n\nChunks: {} (strategy={footer_strategy}, max_chars={})",
        chunks.len(),
        options.max_chars
    );

    let trace_file = tracer.path().file_name().and_then(|n| n.to_str()).unwrap_or("introspect").to_string();

    Ok(SummarizeResult {
        summary: final_text,
        trace_file,
        tail_lines: options.max_lines,
        max_tokens: options.max_tokens,
        path: path.to_string(),
        chunks: chunks.len(),
        chunking: footer_strategy,
        max_chars: options.max_chars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_providers::fake::FakeBackend;

    #[test]
    fn resolve_repo_root_falls_back_to_cwd_without_env() {
        std::env::remove_var("REPO_ROOT");
        let root = resolve_repo_root();
        assert!(root.is_absolute() || root == PathBuf::from("."));
    }

    #[test]
    fn resolve_path_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_path(dir.path(), "../escape.txt").unwrap_err();
        assert!(format!("{err}").contains("escapes"));
    }

    #[test]
    fn list_repo_files_returns_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let files = list_repo_files(dir.path(), None, 500).unwrap();
        assert_eq!(files, vec!["a.txt".to_string()]);
    }

    #[test]
    fn read_repo_file_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_repo_file(dir.path(), ".").unwrap_err();
        assert!(format!("{err}").contains("not a file"));
    }

    #[tokio::test]
    async fn summarize_repo_file_runs_map_reduce_and_writes_trace() {
        let repo_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        std::fs::write(repo_dir.path().join("notes.txt"), "alpha beta gamma\n".repeat(5)).unwrap();

        let backend = FakeBackend::new();
        backend.set_role_responses("governor", vec!["chunk summary".to_string(), "final summary".to_string()]);

        let result = summarize_repo_file(
            repo_dir.path(),
            "notes.txt",
            data_dir.path(),
            &backend,
            &SummarizeOptions::default(),
        )
        .await
        .unwrap();

        assert!(result.summary.contains("final summary"));
        assert!(result.chunks >= 1);
        let trace_path = data_dir.path().join("traces").join(&result.trace_file);
        assert!(trace_path.exists());
    }
}
