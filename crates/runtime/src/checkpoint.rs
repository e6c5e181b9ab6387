//! Atomic checkpoint persistence (spec §4.7).

use std::path::{Path, PathBuf};

use cr_domain::types::Checkpoint;
use cr_domain::{Error, Result};

fn checkpoint_path(base_dir: &Path, session_id: &str) -> PathBuf {
    base_dir.join(format!("{session_id}.json"))
}

/// Write-tmp + fsync + rename, matching the sandbox store's atomic-write
/// idiom used elsewhere in this workspace. Increments `revision` and stamps
/// `updated_ts` before writing.
pub fn save_checkpoint(checkpoint: &mut Checkpoint, base_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(base_dir)?;
    let path = checkpoint_path(base_dir, &checkpoint.session_id);
    checkpoint.revision += 1;
    checkpoint.updated_ts = crate::tracer::now_ts();

    let payload = serde_json::to_vec(checkpoint)?;
    let temp_path = path.with_extension("json.tmp");
    {
        let file = std::fs::File::create(&temp_path)?;
        use std::io::Write;
        let mut file = file;
        file.write_all(&payload)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp_path, &path)?;
    Ok(path)
}

/// Load and schema-validate a checkpoint. Returns `Ok(None)` when the file
/// is absent; any parse/type error is a hard failure (spec §4.7, §7).
pub fn load_checkpoint(base_dir: &Path, session_id: &str) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(base_dir, session_id);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    let checkpoint: Checkpoint = serde_json::from_str(&raw)
        .map_err(|e| Error::CheckpointSchema(format!("{session_id}: {e}")))?;
    Ok(Some(checkpoint))
}

/// Load the latest checkpoint, or return a fresh zeroed one (spec §4.13 step 1).
pub fn load_or_create(base_dir: &Path, session_id: &str) -> Result<Checkpoint> {
    Ok(load_checkpoint(base_dir, session_id)?.unwrap_or_else(|| Checkpoint::new(session_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_returns_fresh_checkpoint_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = load_or_create(dir.path(), "sess-1").unwrap();
        assert_eq!(checkpoint.session_id, "sess-1");
        assert_eq!(checkpoint.revision, 0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpoint = Checkpoint::new("sess-2");
        checkpoint.state.goals.push("goal-1".to_string());
        save_checkpoint(&mut checkpoint, dir.path()).unwrap();
        assert_eq!(checkpoint.revision, 1);

        let loaded = load_checkpoint(dir.path(), "sess-2").unwrap().unwrap();
        assert_eq!(loaded.state.goals, vec!["goal-1".to_string()]);
        assert_eq!(loaded.revision, 1);
    }

    #[test]
    fn malformed_checkpoint_fails_instead_of_coercing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sess-3.json"), "{\"session_id\": 5}").unwrap();
        let err = load_checkpoint(dir.path(), "sess-3").unwrap_err();
        assert!(matches!(err, Error::CheckpointSchema(_)));
    }

    #[test]
    fn no_tmp_file_left_behind_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpoint = Checkpoint::new("sess-4");
        save_checkpoint(&mut checkpoint, dir.path()).unwrap();
        assert!(!dir.path().join("sess-4.json.tmp").exists());
        assert!(dir.path().join("sess-4.json").exists());
    }
}
