//! Append-only JSONL trace writer (spec §3, §4.13, §6).
//!
//! One file per `<session>__<run_id>.jsonl`. Each line is written and
//! flushed immediately so the append-only/monotonic-offset invariant (spec
//! §5, §8) holds even if the process is killed mid-turn.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cr_domain::trace::{TraceEvent, TraceKind};
use cr_domain::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;

pub struct TraceWriter {
    path: PathBuf,
    handle: Mutex<BufWriter<File>>,
}

impl TraceWriter {
    /// Open (creating parents and the file) `<base_dir>/<session>__<run_id>.jsonl`.
    pub fn open(base_dir: &Path, session_id: &str, run_id: &str) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let path = base_dir.join(format!("{session_id}__{run_id}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, handle: Mutex::new(BufWriter::new(file)) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, kind: TraceKind, ts: f64, data: Value) -> Result<()> {
        let event = TraceEvent::new(kind, ts, data);
        event.log();
        let line = serde_json::to_string(&event)?;
        let mut handle = self.handle.lock();
        handle.write_all(line.as_bytes()).map_err(Error::Io)?;
        handle.write_all(b"\n").map_err(Error::Io)?;
        handle.flush().map_err(Error::Io)
    }
}

/// Current wall-clock time as epoch seconds, matching the `ts` field's unit.
pub fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_append_only_and_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::open(dir.path(), "sess", "rev-1").unwrap();
        writer.write(TraceKind::LlmReq, 1.0, serde_json::json!({"role": "governor"})).unwrap();
        writer.write(TraceKind::LlmDone, 2.0, serde_json::json!({"role": "governor"})).unwrap();

        let contents = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("llm_req"));
        assert!(lines[1].contains("llm_done"));
    }

    #[test]
    fn path_matches_session_and_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::open(dir.path(), "abc", "rev-3").unwrap();
        assert_eq!(writer.path().file_name().unwrap(), "abc__rev-3.jsonl");
    }
}
