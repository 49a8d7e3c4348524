//! Orchestrator configuration, parsed from CLI flags + environment by the
//! binary crate; the core crate only ever sees a validated `RunConfig`.

use std::path::PathBuf;

/// Default vision-model HTTP port (§6).
pub const DEFAULT_VISION_PORT: u16 = 8089;
/// Default text-model HTTP port (§6).
pub const DEFAULT_TEXT_PORT: u16 = 8090;

/// Model-call timeout, seconds (§5).
pub const MODEL_CALL_TIMEOUT_S: u64 = 120;
/// Music API read timeout, seconds (§5).
pub const MUSIC_API_TIMEOUT_S: u64 = 30;
/// Music download timeout, seconds (§5).
pub const MUSIC_DOWNLOAD_TIMEOUT_S: u64 = 60;

/// VRAM floor for the vision model, MiB (§4.E).
pub const VRAM_FLOOR_VISION_MIB: u64 = 6144;
/// VRAM floor for the text model, MiB (§4.E).
pub const VRAM_FLOOR_TEXT_MIB: u64 = 4096;

/// Graceful-shutdown window: SIGTERM, then wait, then SIGKILL (§4.E, §5).
pub const SHUTDOWN_SIGTERM_WAIT_S: u64 = 10;

/// VRAM poll timeout between model swaps (§4.E).
pub const VRAM_POLL_TIMEOUT_S: u64 = 15;
/// Minimum floor even if polling reports success quickly (§4.E).
pub const VRAM_POLL_MIN_FLOOR_S: u64 = 3;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_path: PathBuf,
    pub subtitle_path: PathBuf,
    pub vibe_key: String,
    pub work_dir: PathBuf,
    pub vision_model_url: String,
    pub text_model_url: Option<String>,
    pub review: bool,
    pub resume_manifest_path: Option<PathBuf>,
    pub heuristic_structural_only: bool,
}

impl RunConfig {
    /// `<source_parent>/<source_stem>_cinecut_work/` (§6).
    pub fn default_work_dir(source_path: &std::path::Path) -> PathBuf {
        let parent = source_path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "trailer".to_string());
        parent.join(format!("{stem}_cinecut_work"))
    }

    pub fn models_dir() -> PathBuf {
        std::env::var_os("CINECUT_MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".cinecut/models"))
    }

    /// `~/.cinecut/music/`, global and not per-source (§6).
    pub fn music_cache_dir() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".cinecut/music")
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::new(),
            subtitle_path: PathBuf::new(),
            vibe_key: "drama".to_string(),
            work_dir: PathBuf::new(),
            vision_model_url: format!("http://127.0.0.1:{DEFAULT_VISION_PORT}"),
            text_model_url: Some(format!("http://127.0.0.1:{DEFAULT_TEXT_PORT}")),
            review: false,
            resume_manifest_path: None,
            heuristic_structural_only: false,
        }
    }
}

/// Work-directory subdirectories (§6).
pub mod work_subdirs {
    pub const KEYFRAMES: &str = "keyframes";
    pub const VO: &str = "vo";
    pub const SFX: &str = "sfx";
    pub const CONFORM_CLIPS: &str = "conform_clips";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_work_dir_naming() {
        let src = PathBuf::from("/films/Alien.mkv");
        let work_dir = RunConfig::default_work_dir(&src);
        assert_eq!(work_dir, PathBuf::from("/films/Alien_cinecut_work"));
    }

    #[test]
    fn test_default_config_ports() {
        let cfg = RunConfig::default();
        assert!(cfg.vision_model_url.ends_with("8089"));
        assert!(cfg.text_model_url.unwrap().ends_with("8090"));
    }
}
