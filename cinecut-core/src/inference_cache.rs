//! Inference Cache (§4.D): a content-addressed persistent record of
//! per-frame `SceneDescription` results, binary-serialized as a single
//! payload rather than one file per frame (§9 design note).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::models::{KeyframeRecord, SceneDescription, SceneDescriptionMap, SourceFingerprint};

const CACHE_SCHEMA: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    source_file: String,
    mtime: f64,
    size: u64,
    schema: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachePayload {
    metadata: CacheMetadata,
    results: HashMap<String, Option<SceneDescription>>,
}

fn cache_path(source: &Path, work_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "source".to_string());
    work_dir.join(format!("{stem}.scenedesc.bin"))
}

/// Writes the cache to a sibling temp file and renames (§4.D).
pub fn save_atomic(
    results: &HashMap<String, Option<SceneDescription>>,
    source: &Path,
    work_dir: &Path,
) -> anyhow::Result<()> {
    let fingerprint = SourceFingerprint::from_path(source)?;
    let payload = CachePayload {
        metadata: CacheMetadata {
            source_file: fingerprint.path,
            mtime: fingerprint.mtime,
            size: fingerprint.size,
            schema: CACHE_SCHEMA,
        },
        results: results.clone(),
    };
    let bytes = bincode::serialize(&payload)?;
    write_atomic(&cache_path(source, work_dir), &bytes)?;
    Ok(())
}

/// True if a cache file exists on disk for this source, regardless of
/// whether it's still valid. Lets a caller distinguish "no cache yet" from
/// "cache present but invalidated" when `load` returns `None` (§4.C).
pub fn exists(source: &Path, work_dir: &Path) -> bool {
    cache_path(source, work_dir).exists()
}

/// Loads cached results, returning `None` if absent, unparseable, or if the
/// source file's mtime/size no longer matches the cached metadata (§4.D).
pub fn load(source: &Path, work_dir: &Path) -> Option<HashMap<String, Option<SceneDescription>>> {
    let path = cache_path(source, work_dir);
    let bytes = std::fs::read(&path).ok()?;
    let payload: CachePayload = bincode::deserialize(&bytes).ok()?;

    let current = SourceFingerprint::from_path(source).ok()?;
    if payload.metadata.mtime != current.mtime || payload.metadata.size != current.size {
        return None;
    }

    Some(payload.results)
}

/// Joins cache results by `frame_path`; unknown frames get a `None`
/// `SceneDescription` (§4.D).
pub fn reconcile(
    keyframes: &[KeyframeRecord],
    cache: &HashMap<String, Option<SceneDescription>>,
) -> SceneDescriptionMap {
    keyframes
        .iter()
        .map(|kf| {
            let desc = cache.get(&kf.frame_path).cloned().unwrap_or(None);
            (kf.frame_path.clone(), desc)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyframeSource;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_source(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    fn sample_desc() -> SceneDescription {
        SceneDescription {
            visual_content: "a hallway".into(),
            mood: "tense".into(),
            action: "walking".into(),
            setting: "interior".into(),
        }
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "film.mkv", b"source-bytes");
        let mut results = HashMap::new();
        results.insert("/keyframes/0001.png".to_string(), Some(sample_desc()));
        results.insert("/keyframes/0002.png".to_string(), None);

        save_atomic(&results, &source, dir.path()).unwrap();
        let loaded = load(&source, dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.get("/keyframes/0001.png").unwrap().is_some());
        assert!(loaded.get("/keyframes/0002.png").unwrap().is_none());
    }

    #[test]
    fn test_cache_idempotence_byte_identical() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "film.mkv", b"source-bytes");
        let mut results = HashMap::new();
        results.insert("/keyframes/0001.png".to_string(), Some(sample_desc()));

        save_atomic(&results, &source, dir.path()).unwrap();
        let path = cache_path(&source, dir.path());
        let first = std::fs::read(&path).unwrap();

        save_atomic(&results, &source, dir.path()).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_load_absent_returns_none() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "film.mkv", b"source-bytes");
        assert!(load(&source, dir.path()).is_none());
    }

    #[test]
    fn test_exists_true_after_save_even_once_invalidated() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "film.mkv", b"source-bytes");
        assert!(!exists(&source, dir.path()));

        let mut results = HashMap::new();
        results.insert("/keyframes/0001.png".to_string(), Some(sample_desc()));
        save_atomic(&results, &source, dir.path()).unwrap();
        assert!(exists(&source, dir.path()));

        let mut f = std::fs::OpenOptions::new().append(true).open(&source).unwrap();
        f.write_all(b"more-bytes").unwrap();

        assert!(load(&source, dir.path()).is_none());
        assert!(exists(&source, dir.path()));
    }

    #[test]
    fn test_size_change_invalidates() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "film.mkv", b"source-bytes");
        let mut results = HashMap::new();
        results.insert("/keyframes/0001.png".to_string(), Some(sample_desc()));
        save_atomic(&results, &source, dir.path()).unwrap();

        // Append bytes, changing size (and likely mtime) without deleting the file.
        let mut f = std::fs::OpenOptions::new().append(true).open(&source).unwrap();
        f.write_all(b"more-bytes").unwrap();

        assert!(load(&source, dir.path()).is_none());
    }

    #[test]
    fn test_reconcile_fills_unknown_frames_with_null() {
        let keyframes = vec![
            KeyframeRecord { pts_s: 1.0, frame_path: "/a.png".into(), source: KeyframeSource::SceneChange },
            KeyframeRecord { pts_s: 2.0, frame_path: "/b.png".into(), source: KeyframeSource::IntervalFill },
        ];
        let mut cache = HashMap::new();
        cache.insert("/a.png".to_string(), Some(sample_desc()));

        let joined = reconcile(&keyframes, &cache);
        assert!(joined.get("/a.png").unwrap().is_some());
        assert!(joined.get("/b.png").unwrap().is_none());
    }
}
