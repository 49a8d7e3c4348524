//! Manifest Model (§4.B): strict schema-validated document, the single
//! source of truth for every stage downstream of narrative generation.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use thiserror::Error;

use crate::atomic::write_atomic;
use crate::models::{TrailerManifest, MANIFEST_SCHEMA_V1, MANIFEST_SCHEMA_V2};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("manifest has no clips")]
    EmptyClipList,
    #[error("clip {index} has source_end_s <= source_start_s ({start} >= {end})")]
    ClipStartAfterEnd { index: usize, start: f64, end: f64 },
    #[error("bpm_grid.beat_times_s is not sorted/strictly increasing")]
    UnsortedBeatTimes,
    #[error("duplicate frame_path across vo_clips: {0}")]
    DuplicateVoFramePath(String),
    #[error("unrecognized schema_version: {0:?}")]
    UnknownSchemaVersion(String),
}

/// Validates structural invariants named in §4.B and §3.
pub fn validate(doc: &TrailerManifest) -> Result<(), ValidationError> {
    if doc.schema_version != MANIFEST_SCHEMA_V1 && doc.schema_version != MANIFEST_SCHEMA_V2 {
        return Err(ValidationError::UnknownSchemaVersion(doc.schema_version.clone()));
    }

    if doc.clips.is_empty() {
        return Err(ValidationError::EmptyClipList);
    }

    for (index, clip) in doc.clips.iter().enumerate() {
        if clip.source_start_s >= clip.source_end_s {
            return Err(ValidationError::ClipStartAfterEnd {
                index,
                start: clip.source_start_s,
                end: clip.source_end_s,
            });
        }
    }

    if let Some(grid) = &doc.bpm_grid {
        if !grid.beat_times_s.windows(2).all(|w| w[0] < w[1]) {
            return Err(ValidationError::UnsortedBeatTimes);
        }
    }

    let mut seen_paths: HashSet<&str> = HashSet::new();
    for vo in &doc.vo_clips {
        if !seen_paths.insert(vo.audio_path.as_str()) {
            return Err(ValidationError::DuplicateVoFramePath(vo.audio_path.clone()));
        }
    }

    Ok(())
}

/// Loads a manifest from disk, accepting both schema versions. A v1.0
/// document reads back with all v2 optionals empty/`None` (§4.B).
pub fn load(path: &Path) -> anyhow::Result<TrailerManifest> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading manifest at {}", path.display()))?;
    let doc: TrailerManifest = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing manifest at {}", path.display()))?;
    validate(&doc)?;
    Ok(doc)
}

/// Writes the manifest to `path` atomically (temp file in same dir, fsync,
/// rename). Fields are serialized in declared struct order so the plan
/// remains byte-identical for identical inputs (§5 ordering guarantee).
pub fn save_atomic(path: &Path, manifest: &TrailerManifest) -> anyhow::Result<()> {
    validate(manifest)?;
    let bytes = serde_json::to_vec_pretty(manifest)?;
    write_atomic(path, &bytes)?;
    Ok(())
}
