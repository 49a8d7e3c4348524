//! Stage wiring: turns the trait-object collaborators and the core crate's
//! pure stage functions into the closures `orchestrator::run_pipeline`
//! expects, plus the conform-stage video/audio rendering that sits outside
//! any collaborator trait (§6: conform shells ffmpeg directly, the same way
//! `collaborators::FfmpegFiltergraphRunner` does for the final mix).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use cinecut_core::assembler;
use cinecut_core::atomic::write_atomic;
use cinecut_core::beats::{self, BeatSignals, HashingEmbedder, ZoneAnchorSentences};
use cinecut_core::checkpoint;
use cinecut_core::collaborators::{
    CompletionRequest, FiltergraphRunner, ModelRuntime, MusicApi, NoReviewGate, SubtitleSource,
    Transcoder,
};
use cinecut_core::config::{work_subdirs, RunConfig};
use cinecut_core::error::CineCutError;
use cinecut_core::gpu::{GpuSerializer, ModelKind};
use cinecut_core::inference_cache;
use cinecut_core::manifest;
use cinecut_core::models::{
    Act, BeatType, ClipEntry, DialogueEvent, KeyframeRecord, KeyframeSource, MusicBed,
    NarrativeZone, RawSignals, SceneDescription, SfxEvent, SourceFingerprint, Stage,
    StructuralAnchors, TrailerManifest, VoClip, MANIFEST_SCHEMA_V2,
};
use cinecut_core::music;
use cinecut_core::orchestrator::{self, Progress, RunReport, StageOutcome};
use cinecut_core::signals::{self, Frame, FrameContext, NoFaceDetector};
use cinecut_core::structural;
use cinecut_core::vibe::{self, Profile};
use cinecut_core::vo_sfx;

use crate::audio;

/// Every out-of-process capability the pipeline needs, gathered in one
/// place so `main.rs` only has to build this once per invocation.
pub struct Collaborators {
    pub transcoder: Arc<dyn Transcoder>,
    pub vision_model: Arc<dyn ModelRuntime>,
    pub text_model: Option<Arc<dyn ModelRuntime>>,
    pub subtitle_source: Arc<dyn SubtitleSource>,
    pub filtergraph: Arc<dyn FiltergraphRunner>,
    pub music_api: Arc<dyn MusicApi>,
    pub gpu: Arc<GpuSerializer>,
}

/// Sampling cadence for the interval-fill keyframe pass, outside any
/// dialogue-dense region (§4.G keyframe selection policy).
const KEYFRAME_INTERVAL_FILL_S: f64 = 3.0;
/// An existing keyframe within this many seconds absorbs a would-be
/// duplicate sample rather than extracting a second frame.
const KEYFRAME_DEDUP_WINDOW_S: f64 = 0.5;
/// Histogram distance above which two adjacent interval samples are judged
/// to straddle a cut, earning an extra SceneChange-tagged keyframe between them.
const SCENE_CHANGE_HISTOGRAM_THRESHOLD: f64 = 0.35;

fn artifact_path(work_dir: &Path, name: &str) -> PathBuf {
    work_dir.join(name)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn manifest_path(work_dir: &Path) -> PathBuf {
    work_dir.join("TRAILER_MANIFEST.json")
}

/// A scene candidate: the join of one keyframe's vision description with its
/// beat/zone classification, persisted between the ZoneMatching and
/// Narrative stages. CLI-local wiring, not a manifest concept (§4.B).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SceneCandidate {
    pts_s: f64,
    frame_path: String,
    beat_type: BeatType,
    narrative_zone: NarrativeZone,
    act: Act,
    money_shot_score: f64,
    visual_content: String,
    subtitle_summary: String,
    dialogue_excerpt: Option<String>,
}

fn decode_frame(path: &Path) -> Result<Frame> {
    let img = image::open(path).with_context(|| format!("decoding keyframe {}", path.display()))?;
    let rgb = img.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame { width: width as usize, height: height as usize, rgb: rgb.into_raw() })
}

fn profile_for(vibe_key: &str) -> Result<&'static Profile, CineCutError> {
    vibe::profile(vibe_key).map_err(|e| CineCutError::input(e.to_string()))
}

/// Runs the full nine-stage pipeline, honoring any already-complete stages
/// recorded in the on-disk checkpoint. Returns the path to the rendered
/// trailer on success.
pub async fn run(config: RunConfig, collaborators: Collaborators) -> Result<PathBuf> {
    if let Some(manifest_path_arg) = config.resume_manifest_path.clone() {
        return conform_only(config, manifest_path_arg, collaborators).await;
    }

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;

    let profile = profile_for(&config.vibe_key)?;
    let progress = Progress::new(Some(Box::new(|done, total, message| {
        info!("[{done}/{total}] {message}");
    })));

    let collab = Arc::new(collaborators);
    let config_arc = Arc::new(config.clone());

    let review_gate: Box<dyn cinecut_core::collaborators::ReviewGate> =
        if config.review { Box::new(crate::collaborators::StdinReviewGate) } else { Box::new(NoReviewGate) };

    let report: RunReport = orchestrator::run_pipeline(&config, &config.work_dir, &progress, review_gate.as_ref(), {
        let collab = collab.clone();
        let config = config_arc.clone();
        let profile = profile;
        move |stage, checkpoint| {
            let collab = collab.clone();
            let config = config.clone();
            async move { run_stage(stage, checkpoint, &config, profile, &collab).await }
        }
    })
    .await?;

    info!(
        "pipeline finished: {} stages ran, {} skipped, {} inference cache hits",
        report.executed_stages.len(),
        report.skipped_stages.len(),
        report.inference_cache_hit_frames
    );

    Ok(output_path_for(&config))
}

async fn run_stage(
    stage: Stage,
    checkpoint: &mut cinecut_core::models::Checkpoint,
    config: &RunConfig,
    profile: &'static Profile,
    collab: &Collaborators,
) -> Result<StageOutcome> {
    match stage {
        Stage::Proxy => stage_proxy(config, collab).await,
        Stage::Subtitles => stage_subtitles(config, collab).await,
        Stage::StructuralAnalysis => stage_structural_analysis(config, checkpoint, collab).await,
        Stage::Keyframes => stage_keyframes(config, collab).await,
        Stage::Inference => stage_inference(config, checkpoint, collab).await,
        Stage::ZoneMatching => stage_zone_matching(config).await,
        Stage::Narrative => stage_narrative(config, profile).await,
        Stage::Assembly => stage_assembly(config, profile, collab).await,
        Stage::Conform => stage_conform(config, collab).await,
    }
}

/// Conform renders into the checkpoint like every other stage: a crash
/// mid-render must not be mistaken for a finished trailer on resume.
async fn stage_conform(config: &RunConfig, collab: &Collaborators) -> Result<StageOutcome> {
    let doc = manifest::load(&manifest_path(&config.work_dir))?;
    render_conform(config, &doc, collab).await?;
    Ok(StageOutcome::Ran)
}

async fn stage_proxy(config: &RunConfig, collab: &Collaborators) -> Result<StageOutcome> {
    let proxy = collab.transcoder.extract_proxy(&config.source_path, &config.work_dir).await?;
    let probe = collab.transcoder.probe(&config.source_path).await?;
    write_json_atomic(&artifact_path(&config.work_dir, "proxy.json"), &(proxy, probe))?;
    Ok(StageOutcome::Ran)
}

async fn stage_subtitles(config: &RunConfig, collab: &Collaborators) -> Result<StageOutcome> {
    let events = collab.subtitle_source.load(&config.subtitle_path)?;
    write_json_atomic(&artifact_path(&config.work_dir, "dialogue_events.json"), &events)?;
    Ok(StageOutcome::Ran)
}

fn load_probe(work_dir: &Path) -> Result<(PathBuf, cinecut_core::collaborators::ProbeResult)> {
    read_json(&artifact_path(work_dir, "proxy.json"))
        .ok_or_else(|| anyhow::anyhow!("proxy stage artifact missing or unreadable"))
}

fn load_dialogue(work_dir: &Path) -> Vec<DialogueEvent> {
    read_json(&artifact_path(work_dir, "dialogue_events.json")).unwrap_or_default()
}

async fn stage_structural_analysis(
    config: &RunConfig,
    checkpoint: &mut cinecut_core::models::Checkpoint,
    collab: &Collaborators,
) -> Result<StageOutcome> {
    let (_, probe) = load_probe(&config.work_dir)?;
    let events = load_dialogue(&config.work_dir);

    let text_model = if config.heuristic_structural_only { None } else { collab.text_model.clone() };
    let anchors = if let Some(model) = &text_model {
        let _session = collab.gpu.acquire(ModelKind::Text).await?;
        structural::analyze(&events, probe.duration_s, Some(model.as_ref() as &dyn ModelRuntime), true).await?
    } else {
        structural::analyze(&events, probe.duration_s, None, true).await?
    };

    let anchors_path = artifact_path(&config.work_dir, "structural_anchors.json");
    let previous: Option<StructuralAnchors> = read_json(&anchors_path);
    if let Some(prev) = previous {
        let changed = (prev.begin_t - anchors.begin_t).abs() > 0.5
            || (prev.escalation_t - anchors.escalation_t).abs() > 0.5
            || (prev.climax_t - anchors.climax_t).abs() > 0.5;
        if changed {
            info!("structural anchors shifted beyond tolerance, invalidating zone_matching onward");
            orchestrator::notify_anchors_changed(checkpoint);
        }
    }

    write_json_atomic(&anchors_path, &anchors)?;
    Ok(StageOutcome::Ran)
}

fn load_anchors(work_dir: &Path, film_duration_s: f64) -> StructuralAnchors {
    read_json(&artifact_path(work_dir, "structural_anchors.json"))
        .unwrap_or_else(|| StructuralAnchors::heuristic(film_duration_s))
}

async fn stage_keyframes(config: &RunConfig, collab: &Collaborators) -> Result<StageOutcome> {
    let (proxy, probe): (PathBuf, cinecut_core::collaborators::ProbeResult) = load_probe(&config.work_dir)?;
    let events = load_dialogue(&config.work_dir);

    let keyframes_dir = config.work_dir.join(work_subdirs::KEYFRAMES);
    std::fs::create_dir_all(&keyframes_dir)?;

    let mut timestamps: Vec<(f64, KeyframeSource)> = Vec::new();

    let mut t = 0.0;
    while t < probe.duration_s {
        timestamps.push((t, KeyframeSource::IntervalFill));
        t += KEYFRAME_INTERVAL_FILL_S;
    }
    for event in &events {
        timestamps.push((event.midpoint_s(), KeyframeSource::SubtitleMidpoint));
    }
    timestamps.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut deduped: Vec<(f64, KeyframeSource)> = Vec::new();
    for candidate in timestamps {
        if deduped.last().map(|(last, _)| (candidate.0 - last).abs() < KEYFRAME_DEDUP_WINDOW_S).unwrap_or(false) {
            continue;
        }
        deduped.push(candidate);
    }

    let mut records: Vec<KeyframeRecord> = Vec::with_capacity(deduped.len());
    let mut interval_scan: Vec<(f64, String, Vec<f32>)> = Vec::new();

    for (index, (pts_s, source)) in deduped.iter().enumerate() {
        let frame_path = keyframes_dir.join(format!("{index:05}.jpg"));
        collab.transcoder.extract_frame(&proxy, *pts_s, &frame_path).await?;
        let frame_path_str = frame_path.to_string_lossy().to_string();
        records.push(KeyframeRecord { pts_s: *pts_s, frame_path: frame_path_str.clone(), source: *source });

        if matches!(source, KeyframeSource::IntervalFill) {
            if let Ok(decoded) = decode_frame(&frame_path) {
                interval_scan.push((*pts_s, frame_path_str, decoded.histogram()));
            }
        }
    }

    // Scene-change pass: an extra keyframe between adjacent interval samples
    // whose histograms differ sharply enough to suggest a cut (§4.G).
    let mut extra_index = deduped.len();
    for window in interval_scan.windows(2) {
        let (t_a, _, hist_a) = &window[0];
        let (t_b, _, hist_b) = &window[1];
        if signals::histogram_distance(hist_a, hist_b) > SCENE_CHANGE_HISTOGRAM_THRESHOLD {
            let midpoint = (t_a + t_b) / 2.0;
            let frame_path = keyframes_dir.join(format!("{extra_index:05}.jpg"));
            collab.transcoder.extract_frame(&proxy, midpoint, &frame_path).await?;
            records.push(KeyframeRecord {
                pts_s: midpoint,
                frame_path: frame_path.to_string_lossy().to_string(),
                source: KeyframeSource::SceneChange,
            });
            extra_index += 1;
        }
    }

    records.sort_by(|a, b| a.pts_s.partial_cmp(&b.pts_s).unwrap_or(std::cmp::Ordering::Equal));
    write_json_atomic(&artifact_path(&config.work_dir, "keyframes.json"), &records)?;
    Ok(StageOutcome::Ran)
}

fn load_keyframes(work_dir: &Path) -> Vec<KeyframeRecord> {
    read_json(&artifact_path(work_dir, "keyframes.json")).unwrap_or_default()
}

fn parse_scene_description(text: &str) -> Option<SceneDescription> {
    serde_json::from_str(text).ok()
}

async fn stage_inference(
    config: &RunConfig,
    checkpoint: &mut cinecut_core::models::Checkpoint,
    collab: &Collaborators,
) -> Result<StageOutcome> {
    let keyframes = load_keyframes(&config.work_dir);

    let cache_file_existed = inference_cache::exists(&config.source_path, &config.work_dir);
    let cached = inference_cache::load(&config.source_path, &config.work_dir);
    let mut results: HashMap<String, Option<SceneDescription>> = cached.clone().unwrap_or_default();
    if cached.is_none() && cache_file_existed {
        // A cache file is on disk but failed the mtime/size check: the
        // source changed since it was written (§4.C), not a first run.
        orchestrator::notify_inference_cache_miss(checkpoint);
    }

    let missing: Vec<&KeyframeRecord> =
        keyframes.iter().filter(|kf| !results.contains_key(&kf.frame_path)).collect();

    let cache_hit_frames = keyframes.len() - missing.len();

    if !missing.is_empty() {
        let _session = collab.gpu.acquire(ModelKind::Vision).await?;
        for kf in &missing {
            let request = CompletionRequest {
                model: "vision".to_string(),
                prompt: "Describe this frame: visual_content, mood, action, setting.".to_string(),
                json_schema: Some(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "visual_content": {"type": "string"},
                        "mood": {"type": "string"},
                        "action": {"type": "string"},
                        "setting": {"type": "string"},
                    },
                    "required": ["visual_content", "mood", "action", "setting"],
                })),
                image_path: Some(PathBuf::from(&kf.frame_path)),
                temperature: 0.0,
                max_tokens: 256,
                timeout_s: cinecut_core::config::MODEL_CALL_TIMEOUT_S,
            };

            let description = match collab.vision_model.complete(&request).await {
                Ok(response) => parse_scene_description(&response.text),
                Err(e) => {
                    warn!("vision model call failed for {}: {e:#}", kf.frame_path);
                    None
                }
            };
            results.insert(kf.frame_path.clone(), description);
        }
    }

    inference_cache::save_atomic(&results, &config.source_path, &config.work_dir)?;

    if missing.is_empty() && cache_hit_frames > 0 {
        Ok(StageOutcome::RanPartial { cache_hit_frames })
    } else {
        Ok(StageOutcome::Ran)
    }
}

async fn stage_zone_matching(config: &RunConfig) -> Result<StageOutcome> {
    let (_, probe) = load_probe(&config.work_dir)?;
    let dialogue = load_dialogue(&config.work_dir);
    let keyframes = load_keyframes(&config.work_dir);
    let anchors = load_anchors(&config.work_dir, probe.duration_s);
    let scene_cache: HashMap<String, Option<SceneDescription>> =
        inference_cache::load(&config.source_path, &config.work_dir).unwrap_or_default();

    let embedder = HashingEmbedder::default();
    let anchor_sentences = ZoneAnchorSentences::default();

    let mut raw_pool: Vec<RawSignals> = Vec::with_capacity(keyframes.len());
    let mut previous_frame: Option<Frame> = None;

    let mut scene_info: Vec<(Option<&SceneDescription>, String)> = Vec::with_capacity(keyframes.len());

    for kf in &keyframes {
        let desc = scene_cache.get(&kf.frame_path).and_then(|d| d.as_ref());
        let decoded = decode_frame(Path::new(&kf.frame_path)).ok();

        let ctx_frame = decoded.as_ref();
        let raw = if let Some(frame) = ctx_frame {
            let ctx = FrameContext {
                frame,
                previous_frame: previous_frame.as_ref(),
                pts_s: kf.pts_s,
                film_duration_s: probe.duration_s,
                scene_description: desc,
                dialogue: &dialogue,
            };
            signals::extract_raw_signals(&ctx, &NoFaceDetector)
        } else {
            RawSignals {
                motion_magnitude: 0.0,
                visual_contrast: 0.0,
                saturation: 0.0,
                scene_uniqueness: 0.0,
                face_present: false,
                model_confidence: signals::model_confidence(desc),
                subtitle_emotional_weight: signals::subtitle_emotional_weight(kf.pts_s, &dialogue),
                chron_position: (kf.pts_s / probe.duration_s).clamp(0.0, 1.0),
                histogram: Vec::new(),
            }
        };
        raw_pool.push(raw);
        previous_frame = decoded;

        let nearest_dialogue = dialogue
            .iter()
            .min_by(|a, b| {
                (a.midpoint_s() - kf.pts_s).abs().partial_cmp(&(b.midpoint_s() - kf.pts_s).abs()).unwrap_or(std::cmp::Ordering::Equal)
            })
            .filter(|d| (d.midpoint_s() - kf.pts_s).abs() <= 5.0)
            .map(|d| d.plaintext.clone());
        scene_info.push((desc, nearest_dialogue.unwrap_or_default()));
    }

    signals::fill_pool_uniqueness(&mut raw_pool);
    let scored = signals::score_pool(&raw_pool);

    let mut candidates = Vec::with_capacity(keyframes.len());
    for (index, kf) in keyframes.iter().enumerate() {
        let (normalized, money_shot_score) = &scored[index];
        let (desc, dialogue_excerpt) = &scene_info[index];

        let subtitle_emotion = dialogue
            .iter()
            .filter(|d| (d.midpoint_s() - kf.pts_s).abs() <= 5.0)
            .min_by(|a, b| {
                (a.midpoint_s() - kf.pts_s).abs().partial_cmp(&(b.midpoint_s() - kf.pts_s).abs()).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|d| d.emotion);

        let beat_signals = BeatSignals {
            money_shot_score: *money_shot_score,
            subtitle_emotion,
            chron_position: normalized.chron_position,
            face_present: normalized.face_present > 0.5,
        };
        let beat_type = beats::classify_beat(&beat_signals);
        let act = beats::assign_act(beat_type, normalized.chron_position);

        let visual_content = desc.map(|d| d.visual_content.clone()).unwrap_or_default();
        let zone = beats::assign_zone(
            &visual_content,
            normalized.chron_position,
            probe.duration_s,
            &anchors,
            &anchor_sentences,
            Some(&embedder as &dyn cinecut_core::beats::SentenceEmbedder),
        );

        let subtitle_summary = desc
            .map(|d| format!("mood={} action={} setting={}", d.mood, d.action, d.setting))
            .unwrap_or_default();

        candidates.push(SceneCandidate {
            pts_s: kf.pts_s,
            frame_path: kf.frame_path.clone(),
            beat_type,
            narrative_zone: zone,
            act,
            money_shot_score: *money_shot_score,
            visual_content,
            subtitle_summary,
            dialogue_excerpt: if dialogue_excerpt.is_empty() { None } else { Some(dialogue_excerpt.clone()) },
        });
    }

    write_json_atomic(&artifact_path(&config.work_dir, "scene_candidates.json"), &candidates)?;
    Ok(StageOutcome::Ran)
}

fn zone_seed_duration(zone: NarrativeZone, profile: &Profile) -> f64 {
    match zone {
        NarrativeZone::Beginning => profile.act1_avg_cut_s,
        NarrativeZone::Escalation => profile.act2_avg_cut_s,
        NarrativeZone::Climax => profile.act3_avg_cut_s,
    }
}

async fn stage_narrative(config: &RunConfig, profile: &'static Profile) -> Result<StageOutcome> {
    let candidates: Vec<SceneCandidate> =
        read_json(&artifact_path(&config.work_dir, "scene_candidates.json")).unwrap_or_default();
    let (_, probe) = load_probe(&config.work_dir)?;
    let anchors = load_anchors(&config.work_dir, probe.duration_s);

    let clips: Vec<ClipEntry> = candidates
        .iter()
        .map(|c| {
            let duration = zone_seed_duration(c.narrative_zone, profile);
            ClipEntry {
                source_start_s: c.pts_s,
                source_end_s: c.pts_s + duration,
                beat_type: c.beat_type,
                narrative_zone: c.narrative_zone,
                act: c.act,
                emotional_signal: c.money_shot_score,
                transition_in: "cut".to_string(),
                transition_out: profile.primary_transition.to_string(),
                money_shot_score: c.money_shot_score,
                reasoning: format!("{:?} beat in the {:?} zone", c.beat_type, c.narrative_zone),
                dialogue_excerpt: c.dialogue_excerpt.clone(),
                visual_analysis: c.visual_content.clone(),
                subtitle_analysis: c.subtitle_summary.clone(),
                beat_aligned_start_s: None,
            }
        })
        .collect();

    let clips = assembler::order_candidates(clips);
    let fingerprint = SourceFingerprint::from_path(&config.source_path)
        .map_err(|e| CineCutError::input_with_path(config.source_path.clone(), e.to_string()))?;

    let manifest = TrailerManifest {
        schema_version: MANIFEST_SCHEMA_V2.to_string(),
        source: fingerprint,
        vibe_key: config.vibe_key.clone(),
        clips,
        structural_anchors: Some(anchors),
        music_bed: None,
        bpm_grid: None,
        sfx_events: Vec::new(),
        vo_clips: Vec::new(),
    };

    manifest::save_atomic(&manifest_path(&config.work_dir), &manifest)?;
    Ok(StageOutcome::Ran)
}

async fn stage_assembly(config: &RunConfig, profile: &'static Profile, collab: &Collaborators) -> Result<StageOutcome> {
    let mut doc = manifest::load(&manifest_path(&config.work_dir))?;
    let dialogue = load_dialogue(&config.work_dir);

    let mut clips = assembler::apply_pacing_curve(doc.clips, profile);
    clips = assembler::converge_clip_count(clips, profile);
    if clips.len() < profile.target_clip_count.min as usize {
        warn!(
            "assembled {} clips, below the {} target minimum for vibe {}",
            clips.len(),
            profile.target_clip_count.min,
            profile.key
        );
    }

    let music_track_path = music::resolve_music(
        &config.vibe_key,
        profile,
        &RunConfig::music_cache_dir(),
        collab.music_api.as_ref(),
    )
    .await;

    let (music_bed, bpm_grid) = if let Some(path) = &music_track_path {
        match audio::read_wav_mono_f32(path) {
            Ok((samples, sr)) => {
                let grid = music::detect_bpm_grid(&samples, sr, profile);
                let duration_s = samples.len() as f64 / sr.max(1) as f64;
                let bed = MusicBed {
                    track_path: path.to_string_lossy().to_string(),
                    vibe_key: config.vibe_key.clone(),
                    duration_s,
                    duck_floor_db: profile.duck_floor_db,
                    fade_in_s: 1.0,
                    fade_out_s: 1.5,
                };
                (Some(bed), Some(grid))
            }
            Err(e) => {
                warn!("resolved music track unreadable as WAV, continuing without a bed: {e:#}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let output_starts = vo_sfx::output_timeline_boundaries(&clips);
    clips = assembler::apply_beat_grid_snap(&clips, &output_starts[..clips.len()], bpm_grid.as_ref());

    let silence_after = assembler::plan_silence(&clips).map(|marker| marker.after_clip_index);
    let sfx_events: Vec<SfxEvent> = vo_sfx::plan_sfx_events(&clips, silence_after);

    let protagonist = vo_sfx::identify_protagonist(&dialogue);
    let vo_candidates: Vec<vo_sfx::VoCandidate> = dialogue
        .iter()
        .filter(|d| protagonist.as_deref() == d.speaker.as_deref())
        .map(|d| {
            let nearest = clips
                .iter()
                .min_by(|a, b| {
                    (a.source_start_s - d.midpoint_s()).abs().partial_cmp(&(b.source_start_s - d.midpoint_s()).abs()).unwrap_or(std::cmp::Ordering::Equal)
                });
            vo_sfx::VoCandidate {
                event: d,
                act: nearest.map(|c| c.act).unwrap_or(Act::Act2),
                nearest_beat_type: nearest.map(|c| c.beat_type).unwrap_or(BeatType::EscalationBeat),
            }
        })
        .collect();
    let selected_lines = vo_sfx::select_vo_lines(&vo_candidates);

    let vo_clips: Vec<VoClip> = selected_lines
        .iter()
        .enumerate()
        .map(|(i, event)| {
            let insert_at = clips
                .iter()
                .position(|c| c.source_start_s >= event.midpoint_s())
                .unwrap_or(0);
            VoClip {
                source_start_s: event.start_ms as f64 / 1000.0,
                source_end_s: event.end_ms as f64 / 1000.0,
                dialogue_text: event.plaintext.clone(),
                audio_path: config.work_dir.join(work_subdirs::VO).join(format!("line_{i:02}.wav")).to_string_lossy().to_string(),
                insert_at_clip_index: insert_at,
                target_lufs: vo_sfx::VO_TARGET_LUFS,
            }
        })
        .collect();

    doc.clips = clips;
    doc.music_bed = music_bed;
    doc.bpm_grid = bpm_grid;
    doc.sfx_events = sfx_events;
    doc.vo_clips = vo_clips;

    manifest::save_atomic(&manifest_path(&config.work_dir), &doc)?;
    Ok(StageOutcome::Ran)
}

/// The trailer's final output path: `{source_stem}_trailer.mp4` next to the
/// source file.
fn output_path_for(config: &RunConfig) -> PathBuf {
    config
        .source_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(
            "{}_trailer.mp4",
            config.source_path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "output".to_string())
        ))
}

/// Runs conform in isolation against a manifest the caller already trusts
/// to be assembly-complete (§6: `--manifest PATH` skips stages 1-7). Since
/// this path bypasses `orchestrator::run_pipeline` entirely, it marks the
/// checkpoint complete itself.
pub async fn conform_only(config: RunConfig, manifest_path_arg: PathBuf, collaborators: Collaborators) -> Result<PathBuf> {
    std::fs::create_dir_all(&config.work_dir)?;
    let doc = manifest::load(&manifest_path_arg)?;
    let output_path = render_conform(&config, &doc, &collaborators).await?;

    let fingerprint = SourceFingerprint::from_path(&config.source_path)
        .map_err(|e| CineCutError::input_with_path(config.source_path.clone(), e.to_string()))?;
    let mut cp = checkpoint::load(&config.work_dir, &fingerprint)
        .unwrap_or_else(|| cinecut_core::models::Checkpoint::new(fingerprint));
    cp.mark_complete(Stage::Conform);
    checkpoint::save_atomic(&config.work_dir, &cp)?;

    Ok(output_path)
}

fn silence_filler_path(work_dir: &Path) -> PathBuf {
    work_dir.join(work_subdirs::CONFORM_CLIPS).join("silence_filler.mp4")
}

async fn render_video_clips(config: &RunConfig, doc: &TrailerManifest) -> Result<Vec<PathBuf>> {
    let clips_dir = config.work_dir.join(work_subdirs::CONFORM_CLIPS);
    std::fs::create_dir_all(&clips_dir)?;

    let silence_after = assembler::plan_silence(&doc.clips).map(|m| m.after_clip_index);
    let mut rendered = Vec::with_capacity(doc.clips.len() + 1);

    for (index, clip) in doc.clips.iter().enumerate() {
        let out_path = clips_dir.join(format!("clip_{index:04}.mp4"));
        let status = Command::new("ffmpeg")
            .args([
                "-y",
                "-ss",
                &format!("{:.3}", clip.source_start_s),
                "-to",
                &format!("{:.3}", clip.source_end_s),
                "-i",
                config.source_path.to_str().context("source path is not valid UTF-8")?,
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-c:a",
                "aac",
                out_path.to_str().context("clip path is not valid UTF-8")?,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await
            .context("spawning ffmpeg for conform clip render")?;
        if !status.success() {
            anyhow::bail!("ffmpeg exited non-zero rendering conform clip {index}");
        }
        rendered.push(out_path);

        if silence_after == Some(index) {
            let filler = silence_filler_path(&config.work_dir);
            let status = Command::new("ffmpeg")
                .args([
                    "-y",
                    "-f",
                    "lavfi",
                    "-i",
                    "color=c=black:s=1280x720:r=24",
                    "-f",
                    "lavfi",
                    "-i",
                    "anullsrc=r=48000:cl=stereo",
                    "-t",
                    &format!("{:.3}", assembler::SILENCE_DURATION_S),
                    "-c:v",
                    "libx264",
                    "-c:a",
                    "aac",
                    filler.to_str().context("filler path is not valid UTF-8")?,
                ])
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .status()
                .await
                .context("spawning ffmpeg for silence filler render")?;
            if !status.success() {
                anyhow::bail!("ffmpeg exited non-zero rendering the silence filler clip");
            }
            rendered.push(filler);
        }
    }

    // Title card and end button (§4.I): synthetic lavfi segments appended
    // after the assembled clips, never `ClipEntry` objects with fake source
    // timestamps.
    let cards = assembler::plan_title_and_button_cards(&doc.vibe_key.to_uppercase(), "IN THEATERS");
    for (index, spec) in cards.iter().enumerate() {
        rendered.push(render_card_clip(config, spec, index).await?);
    }

    Ok(rendered)
}

/// Escapes text for ffmpeg's `drawtext` filter (colons and single quotes
/// need backslash-escaping inside the filter argument).
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\").replace(':', "\\:").replace('\'', "\\'")
}

/// Renders one title/button card as a black lavfi clip with centered
/// `drawtext` (§4.I: synthesized, not sourced from the film).
async fn render_card_clip(config: &RunConfig, spec: &assembler::CardSpec, index: usize) -> Result<PathBuf> {
    let clips_dir = config.work_dir.join(work_subdirs::CONFORM_CLIPS);
    std::fs::create_dir_all(&clips_dir)?;
    let out_path = clips_dir.join(format!("card_{index:02}.mp4"));

    let drawtext = format!(
        "drawtext=text='{}':fontcolor=white:fontsize=64:x=(w-text_w)/2:y=(h-text_h)/2",
        escape_drawtext(&spec.text)
    );

    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "lavfi",
            "-i",
            &format!("color=c=black:s=1280x720:r=24:d={:.3}", spec.duration_s),
            "-f",
            "lavfi",
            "-i",
            &format!("anullsrc=r=48000:cl=stereo"),
            "-vf",
            &drawtext,
            "-t",
            &format!("{:.3}", spec.duration_s),
            "-c:v",
            "libx264",
            "-c:a",
            "aac",
            out_path.to_str().context("card clip path is not valid UTF-8")?,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status()
        .await
        .context("spawning ffmpeg for title/button card render")?;
    if !status.success() {
        anyhow::bail!("ffmpeg exited non-zero rendering the {:?} card", spec.kind);
    }
    Ok(out_path)
}

async fn concat_clips(work_dir: &Path, clip_paths: &[PathBuf], out_path: &Path) -> Result<()> {
    let list_path = work_dir.join(work_subdirs::CONFORM_CLIPS).join("concat_list.txt");
    let list_body: String = clip_paths
        .iter()
        .map(|p| format!("file '{}'\n", p.display()))
        .collect();
    std::fs::write(&list_path, list_body)?;

    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            list_path.to_str().context("concat list path is not valid UTF-8")?,
            "-c",
            "copy",
            out_path.to_str().context("picture-locked output path is not valid UTF-8")?,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status()
        .await
        .context("spawning ffmpeg concat demuxer")?;
    if !status.success() {
        anyhow::bail!("ffmpeg concat demuxer failed assembling the picture-locked cut");
    }
    Ok(())
}

async fn extract_track_audio(path: &Path, out_wav: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-i",
            path.to_str().context("input path is not valid UTF-8")?,
            "-vn",
            "-ar",
            "48000",
            "-ac",
            "2",
            out_wav.to_str().context("output wav path is not valid UTF-8")?,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status()
        .await
        .context("spawning ffmpeg to extract film audio")?;
    if !status.success() {
        anyhow::bail!("ffmpeg failed extracting film audio from {}", path.display());
    }
    Ok(())
}

async fn build_sfx_track(config: &RunConfig, doc: &TrailerManifest, total_duration_s: f64) -> Result<PathBuf> {
    let mut canvas = audio::silence(total_duration_s);
    for event in &doc.sfx_events {
        let (start_hz, end_hz, duration_s) = match event.tier {
            cinecut_core::models::SfxTier::HardCut => {
                (vo_sfx::HARD_CUT_SWEEP_START_HZ, vo_sfx::HARD_CUT_SWEEP_END_HZ, vo_sfx::HARD_CUT_DURATION_S)
            }
            cinecut_core::models::SfxTier::ActBoundary => (
                vo_sfx::ACT_BOUNDARY_SWEEP_START_HZ,
                vo_sfx::ACT_BOUNDARY_SWEEP_END_HZ,
                vo_sfx::ACT_BOUNDARY_DURATION_S,
            ),
        };
        let tone = audio::synth_sweep(duration_s, start_hz, end_hz);
        audio::overlay(&mut canvas, &tone, event.trigger_time_s);
    }
    let sfx_dir = config.work_dir.join(work_subdirs::SFX);
    std::fs::create_dir_all(&sfx_dir)?;
    let path = sfx_dir.join("sfx_track.wav");
    audio::write_wav(&path, &canvas, 1)?;
    Ok(path)
}

async fn build_vo_track(
    config: &RunConfig,
    doc: &TrailerManifest,
    output_starts: &[f64],
    collab: &Collaborators,
    total_duration_s: f64,
) -> Result<PathBuf> {
    let vo_dir = config.work_dir.join(work_subdirs::VO);
    std::fs::create_dir_all(&vo_dir)?;
    let mut canvas = audio::silence(total_duration_s);

    for vo in &doc.vo_clips {
        let audio_path = PathBuf::from(&vo.audio_path);
        collab
            .transcoder
            .extract_audio_segment(&config.source_path, vo.source_start_s, vo.source_end_s, &audio_path)
            .await?;
        if let Ok((samples, _sr)) = audio::read_wav_mono_f32(&audio_path) {
            let insert_at = output_starts.get(vo.insert_at_clip_index).copied().unwrap_or(0.0);
            audio::overlay(&mut canvas, &samples, insert_at);
        }
    }

    let path = vo_dir.join("vo_track.wav");
    audio::write_wav(&path, &canvas, 1)?;
    Ok(path)
}

async fn render_conform(config: &RunConfig, doc: &TrailerManifest, collab: &Collaborators) -> Result<PathBuf> {
    let profile = profile_for(&doc.vibe_key)?;

    let clip_paths = render_video_clips(config, doc).await?;
    let picture_locked = config.work_dir.join("picture_locked.mp4");
    concat_clips(&config.work_dir, &clip_paths, &picture_locked).await?;

    let film_audio_path = config.work_dir.join("film_audio.wav");
    extract_track_audio(&picture_locked, &film_audio_path).await?;

    let cards = assembler::plan_title_and_button_cards(&doc.vibe_key.to_uppercase(), "IN THEATERS");
    let total_duration_s: f64 = doc.clips.iter().map(|c| c.duration_s()).sum::<f64>()
        + if assembler::plan_silence(&doc.clips).is_some() { assembler::SILENCE_DURATION_S } else { 0.0 }
        + cards.iter().map(|c| c.duration_s).sum::<f64>();

    let output_starts = vo_sfx::output_timeline_boundaries(&doc.clips);
    let sfx_path = build_sfx_track(config, doc, total_duration_s).await?;
    let vo_path = build_vo_track(config, doc, &output_starts, collab, total_duration_s).await?;

    let music_track_path = doc.music_bed.as_ref().map(|bed| PathBuf::from(&bed.track_path));

    let plan = cinecut_core::mixplan::build_mix_plan(
        profile,
        film_audio_path,
        doc.music_bed.as_ref(),
        music_track_path,
        sfx_path,
        vo_path,
        &doc.sfx_events,
        &doc.vo_clips,
    )?;

    let mixed_audio = config.work_dir.join("mixed_audio.wav");
    let input_paths = plan.required_input_paths();
    collab.filtergraph.run(&plan, &input_paths, &mixed_audio).await?;

    let output_path = output_path_for(config);

    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-i",
            picture_locked.to_str().context("picture-locked path is not valid UTF-8")?,
            "-i",
            mixed_audio.to_str().context("mixed audio path is not valid UTF-8")?,
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-c:v",
            "copy",
            "-c:a",
            "aac",
            "-shortest",
            output_path.to_str().context("output path is not valid UTF-8")?,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status()
        .await
        .context("spawning ffmpeg to mux final video and mixed audio")?;
    if !status.success() {
        anyhow::bail!("ffmpeg failed muxing the final trailer");
    }

    Ok(output_path)
}
