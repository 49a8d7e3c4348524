//! Trait-object boundaries for every out-of-scope external system (§1, §6).
//! The orchestrator holds `Box<dyn Trait>` for each of these; `cinecut-cli`
//! supplies the real (HTTP/subprocess-backed) implementations, test code
//! supplies fixtures.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::DialogueEvent;

/// `extract_proxy`/`extract_frame`/`extract_audio_segment`/`probe` (§6).
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    /// Produces a 420p CFR 24 fps H.264 proxy (§6).
    async fn extract_proxy(&self, source: &Path, work_dir: &Path) -> Result<PathBuf>;

    async fn extract_frame(&self, proxy: &Path, timestamp_s: f64, out_path: &Path) -> Result<()>;

    async fn extract_audio_segment(
        &self,
        source: &Path,
        start_s: f64,
        end_s: f64,
        out_path: &Path,
    ) -> Result<()>;

    async fn probe(&self, source: &Path) -> Result<ProbeResult>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProbeResult {
    pub duration_s: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// A single completion request against either the vision-capable or
/// text-only model endpoint (§6) — same trait, different base URL/port.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub json_schema: Option<serde_json::Value>,
    pub image_path: Option<PathBuf>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub tokens_used: u32,
}

#[async_trait::async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
}

/// Yields a parsed dialogue stream; parsing (SRT/ASS, encoding detection)
/// stays external (§1).
pub trait SubtitleSource: Send + Sync {
    fn load(&self, subtitle_path: &Path) -> Result<Vec<DialogueEvent>>;
}

/// Runs a planned mix graph. Never receives raw filter syntax, only the
/// `MixPlan` data structure (§4.L design note).
#[async_trait::async_trait]
pub trait FiltergraphRunner: Send + Sync {
    async fn run(
        &self,
        plan: &crate::mixplan::MixPlan,
        input_paths: &[PathBuf],
        output_path: &Path,
    ) -> Result<()>;
}

/// Royalty-free music search/fetch. Must not raise on HTTP errors — returns
/// `None` instead (§6).
#[async_trait::async_trait]
pub trait MusicApi: Send + Sync {
    async fn search_and_fetch(&self, tags: &[String], cache_dir: &Path) -> Option<PathBuf>;
}

/// The `--review` pause: after the assembly stage writes its manifest, block
/// until the operator approves continuing to conform (§6). The orchestrator
/// only calls this when `RunConfig::review` is set.
#[async_trait::async_trait]
pub trait ReviewGate: Send + Sync {
    async fn wait_for_approval(&self, manifest_path: &Path) -> Result<()>;
}

/// Never pauses. Used when `--review` wasn't requested and by the
/// conform-only path, which never reaches the gate at all.
pub struct NoReviewGate;

#[async_trait::async_trait]
impl ReviewGate for NoReviewGate {
    async fn wait_for_approval(&self, _manifest_path: &Path) -> Result<()> {
        Ok(())
    }
}
