//! Shared tempfile+fsync+rename helper. Used independently by the manifest,
//! checkpoint, and inference cache (§3, §5: "all writes atomic").

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Writes `bytes` to `path` atomically: a sibling temp file in the same
/// directory is written, fsynced, then renamed over the destination. A
/// rename within one directory is atomic on every filesystem this pipeline
/// targets, so a reader never observes a torn file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp_name = format!(".{}.{}.tmp", file_name_or(path, "atomic"), uuid::Uuid::new_v4());
    let tmp_path = dir.join(tmp_name);

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn file_name_or<'a>(path: &'a Path, fallback: &'a str) -> std::borrow::Cow<'a, str> {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or(std::borrow::Cow::Borrowed(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_no_tmp_sibling_survives() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("data.bin");
        write_atomic(&target, b"hello").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"hello");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "no .tmp sibling should survive a successful write");
    }

    #[test]
    fn test_write_atomic_overwrites_existing() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("data.bin");
        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"second");
    }

    #[test]
    fn test_write_atomic_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested/deeper/data.bin");
        write_atomic(&target, b"x").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"x");
    }
}
