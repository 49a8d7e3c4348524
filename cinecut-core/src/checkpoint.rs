//! Checkpoint Store (§4.C): atomic per-stage completion record with cascade
//! invalidation on source change.

use std::path::{Path, PathBuf};

use log::warn;

use crate::atomic::write_atomic;
use crate::models::{Checkpoint, SourceFingerprint, Stage};

const CHECKPOINT_FILE_NAME: &str = "pipeline_checkpoint.json";

fn checkpoint_path(work_dir: &Path) -> PathBuf {
    work_dir.join(CHECKPOINT_FILE_NAME)
}

/// Loads the checkpoint for `work_dir`, given the current source
/// fingerprint. Returns `None` if missing, corrupt, or fingerprint-mismatched
/// (§4.C, §8 item 7).
pub fn load(work_dir: &Path, current_fingerprint: &SourceFingerprint) -> Option<Checkpoint> {
    let path = checkpoint_path(work_dir);
    let bytes = std::fs::read(&path).ok()?;
    let checkpoint: Checkpoint = match serde_json::from_slice(&bytes) {
        Ok(c) => c,
        Err(e) => {
            warn!("checkpoint at {} is corrupt, treating as absent: {e}", path.display());
            return None;
        }
    };

    if checkpoint.source_fingerprint != *current_fingerprint {
        warn!("checkpoint source fingerprint mismatch at {}, invalidating", path.display());
        return None;
    }

    Some(checkpoint)
}

/// Writes the checkpoint atomically (temp file + fsync + rename).
pub fn save_atomic(work_dir: &Path, checkpoint: &Checkpoint) -> anyhow::Result<()> {
    let path = checkpoint_path(work_dir);
    let bytes = serde_json::to_vec_pretty(checkpoint)?;
    write_atomic(&path, &bytes)?;
    Ok(())
}

/// Applies the cascade rules named in §4.C / §4.M:
/// - inference cache invalidation clears {narrative, assembly, conform}
/// - anchor changes clear {zone_matching, narrative, assembly, conform}
/// - source fingerprint mismatch clears everything (handled by `load`
///   returning `None`, which callers treat as a fresh `Checkpoint::new`).
pub fn invalidate_on_inference_miss(checkpoint: &mut Checkpoint) {
    checkpoint.invalidate_cascade(Stage::Narrative);
}

pub fn invalidate_on_anchor_change(checkpoint: &mut Checkpoint) {
    checkpoint.invalidate_cascade(Stage::ZoneMatching);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn fp(path: &str, mtime: f64, size: u64) -> SourceFingerprint {
        SourceFingerprint { path: path.to_string(), mtime, size }
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path(), &fp("a", 0.0, 0)).is_none());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let fingerprint = fp("film.mkv", 123.0, 456);
        let mut checkpoint = Checkpoint::new(fingerprint.clone());
        checkpoint.mark_complete(Stage::Proxy);
        checkpoint.mark_complete(Stage::Subtitles);
        save_atomic(dir.path(), &checkpoint).unwrap();

        let loaded = load(dir.path(), &fingerprint).unwrap();
        assert!(loaded.is_complete(Stage::Proxy));
        assert!(loaded.is_complete(Stage::Subtitles));
        assert!(!loaded.is_complete(Stage::Keyframes));
    }

    #[test]
    fn test_corrupt_checkpoint_treated_as_absent_no_tmp_sibling() {
        let dir = tempdir().unwrap();
        let path = checkpoint_path(dir.path());
        // Simulate an interrupted save: a truncated/invalid JSON payload.
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"{\"schema\": \"1\", \"source_fingerprint\": {\"path\"").unwrap();

        assert!(load(dir.path(), &fp("film.mkv", 1.0, 1)).is_none());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_fingerprint_mismatch_returns_none() {
        let dir = tempdir().unwrap();
        let original = fp("film.mkv", 100.0, 1000);
        let checkpoint = Checkpoint::new(original.clone());
        save_atomic(dir.path(), &checkpoint).unwrap();

        let mut changed = original.clone();
        changed.mtime += 1.0;
        assert!(load(dir.path(), &changed).is_none());
    }

    #[test]
    fn test_size_change_also_invalidates() {
        let dir = tempdir().unwrap();
        let original = fp("film.mkv", 100.0, 1000);
        let checkpoint = Checkpoint::new(original.clone());
        save_atomic(dir.path(), &checkpoint).unwrap();

        let mut changed = original;
        changed.size += 1;
        assert!(load(dir.path(), &changed).is_none());
    }

    #[test]
    fn test_invalidate_on_inference_miss_clears_downstream_only() {
        let mut checkpoint = Checkpoint::new(fp("x", 0.0, 0));
        for s in crate::models::STAGE_ORDER {
            checkpoint.mark_complete(*s);
        }
        invalidate_on_inference_miss(&mut checkpoint);
        assert!(checkpoint.is_complete(Stage::Inference));
        assert!(checkpoint.is_complete(Stage::ZoneMatching));
        assert!(!checkpoint.is_complete(Stage::Narrative));
        assert!(!checkpoint.is_complete(Stage::Assembly));
        assert!(!checkpoint.is_complete(Stage::Conform));
    }

    #[test]
    fn test_invalidate_on_anchor_change_clears_zone_matching_onward() {
        let mut checkpoint = Checkpoint::new(fp("x", 0.0, 0));
        for s in crate::models::STAGE_ORDER {
            checkpoint.mark_complete(*s);
        }
        invalidate_on_anchor_change(&mut checkpoint);
        assert!(checkpoint.is_complete(Stage::Inference));
        assert!(!checkpoint.is_complete(Stage::ZoneMatching));
        assert!(!checkpoint.is_complete(Stage::Narrative));
    }
}
