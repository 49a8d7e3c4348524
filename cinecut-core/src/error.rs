//! Typed error taxonomy (§7). Stage and orchestration code returns
//! `anyhow::Result` at the call boundary; these variants are constructed
//! explicitly at the point of failure so `anyhow::Error::downcast_ref` can
//! recover them at the CLI exit-code boundary.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CineCutError {
    #[error("input error{}: {hint}", path_suffix(.path))]
    InputError {
        path: Option<PathBuf>,
        hint: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("media error{}: {hint}", path_suffix(.path))]
    MediaError {
        path: Option<PathBuf>,
        hint: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("subtitle error{}: {hint}", path_suffix(.path))]
    SubtitleError {
        path: Option<PathBuf>,
        hint: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("inference error: {hint}")]
    InferenceError {
        hint: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("VRAM shortage: {hint}")]
    VramError { hint: String },

    #[error("cache corruption{}: {hint}", path_suffix(.path))]
    CacheCorruption {
        path: Option<PathBuf>,
        hint: String,
    },

    #[error("assembly error: {hint}")]
    AssemblyError { hint: String },

    #[error("mix plan error: {hint}")]
    MixPlanError { hint: String },

    #[error("interrupted")]
    UserAbort,
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" ({})", p.display()),
        None => String::new(),
    }
}

impl CineCutError {
    /// Maps a typed error to the process exit code required by §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            CineCutError::UserAbort => 130,
            _ => 1,
        }
    }

    pub fn input<S: Into<String>>(hint: S) -> Self {
        CineCutError::InputError { path: None, hint: hint.into(), cause: None }
    }

    pub fn input_with_path<S: Into<String>>(path: PathBuf, hint: S) -> Self {
        CineCutError::InputError { path: Some(path), hint: hint.into(), cause: None }
    }

    pub fn media<S: Into<String>>(path: Option<PathBuf>, hint: S) -> Self {
        CineCutError::MediaError { path, hint: hint.into(), cause: None }
    }

    pub fn vram<S: Into<String>>(hint: S) -> Self {
        CineCutError::VramError { hint: hint.into() }
    }

    pub fn assembly<S: Into<String>>(hint: S) -> Self {
        CineCutError::AssemblyError { hint: hint.into() }
    }

    pub fn mix_plan<S: Into<String>>(hint: S) -> Self {
        CineCutError::MixPlanError { hint: hint.into() }
    }

    pub fn subtitle(path: PathBuf) -> Self {
        CineCutError::SubtitleError {
            path: Some(path),
            hint: "encoding unrecoverable after UTF-8 detection".to_string(),
            cause: None,
        }
    }
}

/// Given an `anyhow::Error`, resolve the process exit code per §6:
/// 0 success (not handled here), 1 any typed error, 130 on user abort.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CineCutError>().map(CineCutError::exit_code).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_abort_exit_code() {
        assert_eq!(CineCutError::UserAbort.exit_code(), 130);
    }

    #[test]
    fn test_other_errors_exit_code_one() {
        assert_eq!(CineCutError::vram("low VRAM").exit_code(), 1);
        assert_eq!(CineCutError::assembly("empty zone").exit_code(), 1);
    }

    #[test]
    fn test_exit_code_for_downcasts_through_anyhow() {
        let err: anyhow::Error = CineCutError::UserAbort.into();
        assert_eq!(exit_code_for(&err), 130);

        let err: anyhow::Error = anyhow::anyhow!("plain io failure");
        assert_eq!(exit_code_for(&err), 1);
    }

    #[test]
    fn test_input_with_path_message_includes_path() {
        let err = CineCutError::input_with_path(PathBuf::from("/tmp/x.mkv"), "missing file");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/x.mkv"));
        assert!(msg.contains("missing file"));
    }
}
