//! CineCut CLI — headless trailer generation from a feature film and
//! subtitle track.
//!
//! Usage:
//!     cinecut run film.mkv --subtitle film.srt --vibe action_thriller
//!     cinecut resume film.mkv --subtitle film.srt --vibe drama
//!     cinecut conform film.mkv --manifest ./film_cinecut_work/TRAILER_MANIFEST.json
//!     cinecut vibes --json
//!     cinecut inspect-manifest ./film_cinecut_work/TRAILER_MANIFEST.json

mod audio;
mod collaborators;
mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{info, warn};

use cinecut_core::config::RunConfig;
use cinecut_core::error::exit_code_for;
use cinecut_core::gpu::{FixedVramProbe, GpuSerializer, VramProbe};
use cinecut_core::manifest;
use cinecut_core::vibe;

use collaborators::{
    FfmpegFiltergraphRunner, FfmpegTranscoder, FileSubtitleSource, HttpModelRuntime, NullMusicApi,
};
use pipeline::Collaborators;

#[derive(Parser)]
#[command(
    name = "cinecut",
    version,
    about = "CineCut — generate a vibe-driven trailer from a film and its subtitle track",
    long_about = "Analyzes a feature film's dialogue, visual content, and pacing to \
                  assemble a narratively-structured, music-synced trailer, driven by \
                  a chosen vibe profile and resumable from a per-source checkpoint."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on a source film
    Run {
        /// Source film file (.mkv, .avi, .mp4)
        source: PathBuf,

        /// Subtitle file (.srt or .ass)
        #[arg(long)]
        subtitle: PathBuf,

        /// Vibe profile key (see `cinecut vibes`)
        #[arg(long)]
        vibe: String,

        /// Work directory for checkpoints/caches/intermediates
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Stop after assembly and leave the manifest for manual review
        #[arg(long)]
        review: bool,

        /// Vision model runtime base URL
        #[arg(long, default_value_t = default_vision_url())]
        vision_model_url: String,

        /// Text model runtime base URL; omit to use heuristic structural analysis
        #[arg(long)]
        text_model: Option<String>,
    },

    /// Resume a previously interrupted run from its on-disk checkpoint
    Resume {
        /// Source film file, same as the original run
        source: PathBuf,

        /// Subtitle file, same as the original run
        #[arg(long)]
        subtitle: PathBuf,

        /// Vibe profile key, same as the original run
        #[arg(long)]
        vibe: String,

        #[arg(long)]
        work_dir: Option<PathBuf>,

        #[arg(long)]
        review: bool,

        #[arg(long, default_value_t = default_vision_url())]
        vision_model_url: String,

        #[arg(long)]
        text_model: Option<String>,
    },

    /// Render only the final cut from an already-assembled manifest
    Conform {
        /// Source film file the manifest's clips reference
        source: PathBuf,

        /// Path to a TRAILER_MANIFEST.json produced by a prior `run`/`resume`
        #[arg(long)]
        manifest: PathBuf,

        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// List the frozen vibe profile registry
    Vibes {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and pretty-print a trailer manifest without running the pipeline
    InspectManifest {
        /// Path to a TRAILER_MANIFEST.json
        path: PathBuf,
    },
}

fn default_vision_url() -> String {
    format!("http://127.0.0.1:{}", cinecut_core::config::DEFAULT_VISION_PORT)
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    // SAFETY: called before any threads are spawned, at program start.
    unsafe {
        std::env::set_var("RUST_LOG", format!("cinecut={level},cinecut_core={level}"));
    }
    env_logger::init();

    let result = run_command(cli.command);
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn run_command(command: Commands) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    match command {
        Commands::Run { source, subtitle, vibe, work_dir, review, vision_model_url, text_model } => {
            runtime.block_on(cmd_run(source, subtitle, vibe, work_dir, review, vision_model_url, text_model))
        }
        Commands::Resume { source, subtitle, vibe, work_dir, review, vision_model_url, text_model } => {
            runtime.block_on(cmd_run(source, subtitle, vibe, work_dir, review, vision_model_url, text_model))
        }
        Commands::Conform { source, manifest: manifest_path, work_dir } => {
            runtime.block_on(cmd_conform(source, manifest_path, work_dir))
        }
        Commands::Vibes { json } => cmd_vibes(json),
        Commands::InspectManifest { path } => cmd_inspect_manifest(path),
    }
}

fn validate_source(source: &PathBuf) -> anyhow::Result<()> {
    if !source.exists() {
        anyhow::bail!(cinecut_core::CineCutError::input_with_path(source.clone(), "source file does not exist"));
    }
    let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    if !matches!(ext.as_str(), "mkv" | "avi" | "mp4") {
        anyhow::bail!(cinecut_core::CineCutError::input_with_path(
            source.clone(),
            format!("unsupported source extension {ext:?}, expected mkv/avi/mp4")
        ));
    }
    Ok(())
}

fn validate_subtitle(subtitle: &PathBuf) -> anyhow::Result<()> {
    if !subtitle.exists() {
        anyhow::bail!(cinecut_core::CineCutError::input_with_path(subtitle.clone(), "subtitle file does not exist"));
    }
    let ext = subtitle.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    if !matches!(ext.as_str(), "srt" | "ass") {
        anyhow::bail!(cinecut_core::CineCutError::input_with_path(
            subtitle.clone(),
            format!("unsupported subtitle extension {ext:?}, expected srt/ass")
        ));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    source: PathBuf,
    subtitle: PathBuf,
    vibe_key: String,
    work_dir: Option<PathBuf>,
    review: bool,
    vision_model_url: String,
    text_model: Option<String>,
) -> anyhow::Result<()> {
    validate_source(&source)?;
    validate_subtitle(&subtitle)?;
    vibe::profile(&vibe_key).map_err(|e| cinecut_core::CineCutError::input(e.to_string()))?;

    let work_dir = work_dir.unwrap_or_else(|| RunConfig::default_work_dir(&source));

    let config = RunConfig {
        source_path: source,
        subtitle_path: subtitle,
        vibe_key,
        work_dir,
        vision_model_url,
        text_model_url: text_model.clone(),
        review,
        resume_manifest_path: None,
        heuristic_structural_only: text_model.is_none(),
    };

    let collaborators = build_collaborators(&config)?;

    let outcome = tokio::select! {
        result = pipeline::run(config, collaborators) => result,
        _ = graceful_abort_on_signal() => Err(cinecut_core::CineCutError::UserAbort.into()),
    };

    let output_path = outcome?;
    info!("trailer written to {}", output_path.display());
    println!("{}", output_path.display());
    Ok(())
}

async fn cmd_conform(source: PathBuf, manifest_path: PathBuf, work_dir: Option<PathBuf>) -> anyhow::Result<()> {
    validate_source(&source)?;
    if !manifest_path.exists() {
        anyhow::bail!(cinecut_core::CineCutError::input_with_path(manifest_path, "manifest file does not exist"));
    }

    let doc = manifest::load(&manifest_path)?;
    let work_dir = work_dir.unwrap_or_else(|| RunConfig::default_work_dir(&source));

    let config = RunConfig {
        source_path: source,
        subtitle_path: PathBuf::new(),
        vibe_key: doc.vibe_key.clone(),
        work_dir,
        resume_manifest_path: Some(manifest_path.clone()),
        ..RunConfig::default()
    };

    let collaborators = build_collaborators(&config)?;
    let output_path = pipeline::conform_only(config, manifest_path, collaborators).await?;
    info!("trailer written to {}", output_path.display());
    println!("{}", output_path.display());
    Ok(())
}

fn cmd_vibes(json: bool) -> anyhow::Result<()> {
    let keys = vibe::all_keys();
    if json {
        let entries: Vec<_> = keys
            .iter()
            .filter_map(|k| vibe::profile(k).ok())
            .map(|p| {
                serde_json::json!({
                    "key": p.key,
                    "target_clip_count": {"min": p.target_clip_count.min, "max": p.target_clip_count.max},
                    "primary_transition": p.primary_transition,
                    "music_tag_set": p.music_tag_set,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for key in keys {
            println!("{key}");
        }
    }
    Ok(())
}

fn cmd_inspect_manifest(path: PathBuf) -> anyhow::Result<()> {
    let doc = manifest::load(&path)?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

/// Shells `nvidia-smi` synchronously for free VRAM, MiB. Absence of
/// telemetry must not block the vision/text model stages outright (§4.E
/// degrades gracefully rather than refusing to run headless).
struct NvidiaSmiVramProbe;

impl VramProbe for NvidiaSmiVramProbe {
    fn query_vram_free_mib(&self) -> u64 {
        let output = std::process::Command::new("nvidia-smi")
            .args(["--query-gpu=memory.free", "--format=csv,noheader,nounits"])
            .output();

        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .and_then(|line| line.trim().parse::<u64>().ok())
                .unwrap_or_else(|| {
                    warn!("nvidia-smi output unparsable, assuming no VRAM pressure");
                    u64::MAX
                }),
            _ => {
                warn!("nvidia-smi unavailable, assuming no VRAM pressure");
                u64::MAX
            }
        }
    }
}

fn build_collaborators(config: &RunConfig) -> anyhow::Result<Collaborators> {
    let vision_model = Arc::new(HttpModelRuntime::new(config.vision_model_url.clone()));
    let text_model = config
        .text_model_url
        .as_ref()
        .map(|url| Arc::new(HttpModelRuntime::new(url.clone())) as Arc<dyn cinecut_core::collaborators::ModelRuntime>);

    let probe: Box<dyn VramProbe> =
        if which_nvidia_smi() { Box::new(NvidiaSmiVramProbe) } else { Box::new(FixedVramProbe(u64::MAX)) };

    Ok(Collaborators {
        transcoder: Arc::new(FfmpegTranscoder),
        vision_model,
        text_model,
        subtitle_source: Arc::new(FileSubtitleSource),
        filtergraph: Arc::new(FfmpegFiltergraphRunner),
        music_api: Arc::new(NullMusicApi),
        gpu: Arc::new(GpuSerializer::new(probe)),
    })
}

fn which_nvidia_smi() -> bool {
    std::process::Command::new("nvidia-smi")
        .arg("--list-gpus")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Resolves once a termination signal is received, after the graceful
/// window used by long-running ffmpeg children to wind down (§4.E, §5).
async fn graceful_abort_on_signal() {
    if wait_for_shutdown_signal().await.is_ok() {
        tokio::time::sleep(std::time::Duration::from_secs(cinecut_core::config::SHUTDOWN_SIGTERM_WAIT_S)).await;
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
