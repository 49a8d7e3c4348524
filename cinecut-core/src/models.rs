//! Data models for the CineCut pipeline.
//!
//! Every struct that can touch disk (manifest, checkpoint, inference cache)
//! derives `Serialize`/`Deserialize` so round-tripping is structural, not
//! hand-written.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Analysis proxy frame rate — all keyframe extraction runs against the proxy.
pub const PROXY_FPS: u32 = 24;

/// Analysis sample rate for BPM detection.
pub const MUSIC_ANALYSIS_SR: u32 = 22050;

/// Target total trailer duration, seconds.
pub const TARGET_TOTAL_DURATION_S: f64 = 120.0;

/// Tolerance on the target total duration.
pub const TARGET_DURATION_TOLERANCE_S: f64 = 5.0;

/// Minimum clip duration after any trim.
pub const MIN_CLIP_DURATION_S: f64 = 0.5;

// ---------------------------------------------------------------------------
//  Progress
// ---------------------------------------------------------------------------

/// Progress callback type: (current_step, total_steps, message).
pub type ProgressCallback = Box<dyn Fn(usize, usize, &str) + Send + Sync>;

// ---------------------------------------------------------------------------
//  KeyframeRecord
// ---------------------------------------------------------------------------

/// Source tag describing why a keyframe was extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyframeSource {
    SubtitleMidpoint,
    SceneChange,
    IntervalFill,
}

/// A single extracted frame. Immutable after extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyframeRecord {
    pub pts_s: f64,
    pub frame_path: String,
    pub source: KeyframeSource,
}

// ---------------------------------------------------------------------------
//  DialogueEvent
// ---------------------------------------------------------------------------

/// Coarse emotion label, keyword-derived from dialogue plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Intense,
    Romantic,
    Comedic,
    Negative,
    Positive,
    Neutral,
}

impl EmotionLabel {
    /// Tie-break priority order: lower number wins.
    fn priority(self) -> u8 {
        match self {
            EmotionLabel::Intense => 0,
            EmotionLabel::Romantic => 1,
            EmotionLabel::Comedic => 2,
            EmotionLabel::Negative => 3,
            EmotionLabel::Positive => 4,
            EmotionLabel::Neutral => 5,
        }
    }

    /// Pick the higher-priority label of two candidates.
    pub fn best_of(a: EmotionLabel, b: EmotionLabel) -> EmotionLabel {
        if a.priority() <= b.priority() { a } else { b }
    }

    /// Fixed weight table used by the subtitle_emotional_weight signal.
    pub fn weight(self) -> f64 {
        match self {
            EmotionLabel::Intense => 1.0,
            EmotionLabel::Negative => 0.8,
            EmotionLabel::Romantic => 0.6,
            EmotionLabel::Positive => 0.5,
            EmotionLabel::Comedic => 0.4,
            EmotionLabel::Neutral => 0.2,
        }
    }

    /// Weight for "no nearby dialogue" (not a real label, just the table's 0 entry).
    pub const NONE_WEIGHT: f64 = 0.0;
}

/// A single timed dialogue line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueEvent {
    pub start_ms: u64,
    pub end_ms: u64,
    pub plaintext: String,
    pub speaker: Option<String>,
    pub emotion: EmotionLabel,
}

impl DialogueEvent {
    pub fn midpoint_s(&self) -> f64 {
        (self.start_ms as f64 + self.end_ms as f64) / 2.0 / 1000.0
    }

    pub fn duration_s(&self) -> f64 {
        (self.end_ms.saturating_sub(self.start_ms)) as f64 / 1000.0
    }

    pub fn word_count(&self) -> usize {
        self.plaintext.split_whitespace().count()
    }
}

// ---------------------------------------------------------------------------
//  SceneDescription
// ---------------------------------------------------------------------------

/// Four short text fields produced by the vision model for one keyframe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDescription {
    pub visual_content: String,
    pub mood: String,
    pub action: String,
    pub setting: String,
}

impl SceneDescription {
    /// Fraction of the four fields that are non-empty.
    pub fn completeness(&self) -> f64 {
        let fields = [&self.visual_content, &self.mood, &self.action, &self.setting];
        let filled = fields.iter().filter(|f| !f.trim().is_empty()).count();
        filled as f64 / fields.len() as f64
    }

    /// Normalized total text length over a fixed richness ceiling.
    pub fn richness(&self) -> f64 {
        const CEILING_CHARS: f64 = 400.0;
        let total_len = self.visual_content.len()
            + self.mood.len()
            + self.action.len()
            + self.setting.len();
        (total_len as f64 / CEILING_CHARS).min(1.0)
    }
}

// ---------------------------------------------------------------------------
//  RawSignals / NormalizedSignals
// ---------------------------------------------------------------------------

/// Per-frame numeric signals before pool normalization.
#[derive(Debug, Clone)]
pub struct RawSignals {
    pub motion_magnitude: f64,
    pub visual_contrast: f64,
    pub saturation: f64,
    pub scene_uniqueness: f64,
    pub face_present: bool,
    pub model_confidence: f64,
    pub subtitle_emotional_weight: f64,
    pub chron_position: f64,
    /// Auxiliary per-frame color histogram used only for pool-level
    /// uniqueness computation. Never compared for equality or displayed.
    pub histogram: Vec<f32>,
}

/// Per-frame signals after pool min-max normalization, values in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSignals {
    pub motion_magnitude: f64,
    pub visual_contrast: f64,
    pub saturation: f64,
    pub scene_uniqueness: f64,
    pub face_present: f64,
    pub model_confidence: f64,
    pub subtitle_emotional_weight: f64,
    pub chron_position: f64,
}

/// Fixed money-shot weight vector — sums to 1.0.
pub struct MoneyShotWeights;

impl MoneyShotWeights {
    pub const MOTION: f64 = 0.20;
    pub const CONTRAST: f64 = 0.12;
    pub const UNIQUENESS: f64 = 0.13;
    pub const SUBTITLE_EMOTION: f64 = 0.15;
    pub const FACE: f64 = 0.08;
    pub const MODEL_CONF: f64 = 0.12;
    pub const SATURATION: f64 = 0.10;
    pub const POSITION: f64 = 0.10;
}

impl NormalizedSignals {
    /// Dot product against the fixed money-shot weight vector.
    pub fn money_shot_score(&self) -> f64 {
        self.motion_magnitude * MoneyShotWeights::MOTION
            + self.visual_contrast * MoneyShotWeights::CONTRAST
            + self.scene_uniqueness * MoneyShotWeights::UNIQUENESS
            + self.subtitle_emotional_weight * MoneyShotWeights::SUBTITLE_EMOTION
            + self.face_present * MoneyShotWeights::FACE
            + self.model_confidence * MoneyShotWeights::MODEL_CONF
            + self.saturation * MoneyShotWeights::SATURATION
            + self.chron_position * MoneyShotWeights::POSITION
    }
}

// ---------------------------------------------------------------------------
//  Beat / Zone / Act
// ---------------------------------------------------------------------------

/// Narrative role classification for a clip, rule-priority assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatType {
    Breath,
    Climax,
    MoneyShot,
    CharacterIntroduction,
    IncitingIncident,
    RelationshipBeat,
    EscalationBeat,
}

/// Narrative placement zone, used for non-chronological ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NarrativeZone {
    Beginning,
    Escalation,
    Climax,
}

impl NarrativeZone {
    /// Ordering rank used for the assembler's primary sort key.
    pub fn rank(self) -> u8 {
        match self {
            NarrativeZone::Beginning => 0,
            NarrativeZone::Escalation => 1,
            NarrativeZone::Climax => 2,
        }
    }
}

/// Derived positional label, separate from narrative zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Act {
    Act1,
    Act2,
    Act3,
    Breath,
}

// ---------------------------------------------------------------------------
//  ClipEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipEntry {
    pub source_start_s: f64,
    pub source_end_s: f64,
    pub beat_type: BeatType,
    pub narrative_zone: NarrativeZone,
    pub act: Act,
    pub emotional_signal: f64,
    pub transition_in: String,
    pub transition_out: String,
    pub money_shot_score: f64,
    pub reasoning: String,
    pub dialogue_excerpt: Option<String>,
    pub visual_analysis: String,
    pub subtitle_analysis: String,
    pub beat_aligned_start_s: Option<f64>,
}

impl ClipEntry {
    pub fn duration_s(&self) -> f64 {
        self.source_end_s - self.source_start_s
    }

    /// Immutable copy-with-trimmed-end helper used by pacing-curve enforcement.
    pub fn with_trimmed_end(&self, new_end_s: f64) -> ClipEntry {
        ClipEntry {
            source_end_s: new_end_s,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
//  StructuralAnchors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StructuralAnchors {
    pub begin_t: f64,
    pub escalation_t: f64,
    pub climax_t: f64,
}

impl StructuralAnchors {
    pub fn heuristic(film_duration_s: f64) -> Self {
        Self {
            begin_t: film_duration_s * 0.05,
            escalation_t: film_duration_s * 0.45,
            climax_t: film_duration_s * 0.80,
        }
    }

    pub fn is_valid(&self, film_duration_s: f64) -> bool {
        0.0 <= self.begin_t
            && self.begin_t < self.escalation_t
            && self.escalation_t < self.climax_t
            && self.climax_t <= film_duration_s
    }
}

// ---------------------------------------------------------------------------
//  BpmGrid
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BpmSource {
    Detected,
    VibeDefault,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpmGrid {
    pub detected_bpm: f64,
    pub beat_times_s: Vec<f64>,
    pub downbeat_times_s: Vec<f64>,
    pub source: BpmSource,
}

impl BpmGrid {
    /// Average seconds between consecutive beats.
    pub fn beat_interval_s(&self) -> f64 {
        60.0 / self.detected_bpm.max(1.0)
    }

    /// Nearest beat time to `t`, if any beats exist.
    pub fn nearest_beat(&self, t: f64) -> Option<f64> {
        self.beat_times_s
            .iter()
            .copied()
            .min_by(|a, b| {
                (a - t).abs().partial_cmp(&(b - t).abs()).unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

// ---------------------------------------------------------------------------
//  MusicBed / SfxEvent / VoClip
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicBed {
    pub track_path: String,
    pub vibe_key: String,
    pub duration_s: f64,
    pub duck_floor_db: f64,
    pub fade_in_s: f64,
    pub fade_out_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SfxTier {
    HardCut,
    ActBoundary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SfxEvent {
    pub trigger_time_s: f64,
    pub tier: SfxTier,
    pub synthesized_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoClip {
    pub source_start_s: f64,
    pub source_end_s: f64,
    pub dialogue_text: String,
    pub audio_path: String,
    pub insert_at_clip_index: usize,
    pub target_lufs: f64,
}

// ---------------------------------------------------------------------------
//  TrailerManifest
// ---------------------------------------------------------------------------

/// Source-file fingerprint used to invalidate caches and checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub path: String,
    pub mtime: f64,
    pub size: u64,
}

impl SourceFingerprint {
    pub fn from_path(path: &std::path::Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Ok(Self {
            path: path.to_string_lossy().to_string(),
            mtime,
            size: meta.len(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailerManifest {
    pub schema_version: String,
    pub source: SourceFingerprint,
    pub vibe_key: String,
    pub clips: Vec<ClipEntry>,
    pub structural_anchors: Option<StructuralAnchors>,
    pub music_bed: Option<MusicBed>,
    pub bpm_grid: Option<BpmGrid>,
    #[serde(default)]
    pub sfx_events: Vec<SfxEvent>,
    #[serde(default)]
    pub vo_clips: Vec<VoClip>,
}

pub const MANIFEST_SCHEMA_V1: &str = "1.0";
pub const MANIFEST_SCHEMA_V2: &str = "2.0";

// ---------------------------------------------------------------------------
//  Checkpoint
// ---------------------------------------------------------------------------

/// Exact recognized stage set, in execution order.
pub const STAGE_ORDER: &[Stage] = &[
    Stage::Proxy,
    Stage::Subtitles,
    Stage::StructuralAnalysis,
    Stage::Keyframes,
    Stage::Inference,
    Stage::ZoneMatching,
    Stage::Narrative,
    Stage::Assembly,
    Stage::Conform,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Proxy,
    Subtitles,
    StructuralAnalysis,
    Keyframes,
    Inference,
    ZoneMatching,
    Narrative,
    Assembly,
    Conform,
}

impl Stage {
    pub fn index(self) -> usize {
        STAGE_ORDER.iter().position(|s| *s == self).expect("stage is in STAGE_ORDER")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema: String,
    pub source_fingerprint: SourceFingerprint,
    #[serde(default)]
    pub stages_complete: Vec<Stage>,
    #[serde(default)]
    pub cache_hit: HashMap<Stage, bool>,
}

pub const CHECKPOINT_SCHEMA: &str = "1";

impl Checkpoint {
    pub fn new(source_fingerprint: SourceFingerprint) -> Self {
        Self {
            schema: CHECKPOINT_SCHEMA.to_string(),
            source_fingerprint,
            stages_complete: Vec::new(),
            cache_hit: HashMap::new(),
        }
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.stages_complete.contains(&stage)
    }

    pub fn mark_complete(&mut self, stage: Stage) {
        if !self.is_complete(stage) {
            self.stages_complete.push(stage);
        }
    }

    /// Clears `from_stage` and every stage ordered after it.
    pub fn invalidate_cascade(&mut self, from_stage: Stage) {
        let cutoff = from_stage.index();
        self.stages_complete.retain(|s| s.index() < cutoff);
        self.cache_hit.retain(|s, _| s.index() < cutoff);
    }
}

/// Dialogue-emotion keyword table. Ties broken by [`EmotionLabel::best_of`].
pub fn classify_emotion(text: &str) -> EmotionLabel {
    let lower = text.to_lowercase();

    let tables: &[(EmotionLabel, &[&str])] = &[
        (
            EmotionLabel::Intense,
            &["never", "now", "run", "danger", "die", "kill", "help", "scream", "no!", "god"],
        ),
        (
            EmotionLabel::Romantic,
            &["love", "heart", "kiss", "darling", "forever", "beautiful"],
        ),
        (
            EmotionLabel::Comedic,
            &["haha", "funny", "joke", "lol", "ridiculous", "kidding"],
        ),
        (
            EmotionLabel::Negative,
            &["hate", "afraid", "sorry", "wrong", "fear", "sad", "angry", "can't"],
        ),
        (
            EmotionLabel::Positive,
            &["great", "happy", "yes", "wonderful", "good", "thank"],
        ),
    ];

    let mut best: Option<EmotionLabel> = None;
    for (label, keywords) in tables {
        if keywords.iter().any(|k| lower.contains(k)) {
            best = Some(match best {
                Some(current) => EmotionLabel::best_of(current, *label),
                None => *label,
            });
        }
    }

    best.unwrap_or(EmotionLabel::Neutral)
}

/// Pool min-max normalization with the degenerate-pool fallback of 0.5.
pub fn normalize_pool(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < 1e-12 {
        return vec![0.5; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Normalize a full signal pool, one `NormalizedSignals` per input frame.
pub fn normalize_signal_pool(raw: &[RawSignals]) -> Vec<NormalizedSignals> {
    let motion: Vec<f64> = raw.iter().map(|r| r.motion_magnitude).collect();
    let contrast: Vec<f64> = raw.iter().map(|r| r.visual_contrast).collect();
    let saturation: Vec<f64> = raw.iter().map(|r| r.saturation).collect();
    let uniqueness: Vec<f64> = raw.iter().map(|r| r.scene_uniqueness).collect();
    let face: Vec<f64> = raw.iter().map(|r| if r.face_present { 1.0 } else { 0.0 }).collect();
    let conf: Vec<f64> = raw.iter().map(|r| r.model_confidence).collect();
    let sub_emotion: Vec<f64> = raw.iter().map(|r| r.subtitle_emotional_weight).collect();
    let position: Vec<f64> = raw.iter().map(|r| r.chron_position).collect();

    let motion_n = normalize_pool(&motion);
    let contrast_n = normalize_pool(&contrast);
    let saturation_n = normalize_pool(&saturation);
    let uniqueness_n = normalize_pool(&uniqueness);
    let face_n = normalize_pool(&face);
    let conf_n = normalize_pool(&conf);
    let sub_emotion_n = normalize_pool(&sub_emotion);
    let position_n = normalize_pool(&position);

    (0..raw.len())
        .map(|i| NormalizedSignals {
            motion_magnitude: motion_n[i],
            visual_contrast: contrast_n[i],
            saturation: saturation_n[i],
            scene_uniqueness: uniqueness_n[i],
            face_present: face_n[i],
            model_confidence: conf_n[i],
            subtitle_emotional_weight: sub_emotion_n[i],
            chron_position: position_n[i],
        })
        .collect()
}

/// A unique mapping of frame_path to an optional SceneDescription, as joined
/// from the inference cache.
pub type SceneDescriptionMap = HashMap<String, Option<SceneDescription>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emotion_weight_table() {
        assert_eq!(EmotionLabel::Intense.weight(), 1.0);
        assert_eq!(EmotionLabel::Neutral.weight(), 0.2);
    }

    #[test]
    fn test_emotion_tie_break_priority() {
        assert_eq!(EmotionLabel::best_of(EmotionLabel::Romantic, EmotionLabel::Intense), EmotionLabel::Intense);
        assert_eq!(EmotionLabel::best_of(EmotionLabel::Positive, EmotionLabel::Negative), EmotionLabel::Negative);
        assert_eq!(EmotionLabel::best_of(EmotionLabel::Neutral, EmotionLabel::Comedic), EmotionLabel::Comedic);
    }

    #[test]
    fn test_classify_emotion_multi_match_uses_priority() {
        let label = classify_emotion("I love you but now we must run!");
        assert_eq!(label, EmotionLabel::Intense);
    }

    #[test]
    fn test_classify_emotion_default_neutral() {
        assert_eq!(classify_emotion("The door was closed."), EmotionLabel::Neutral);
    }

    #[test]
    fn test_normalize_pool_degenerate() {
        let values = vec![3.0, 3.0, 3.0];
        let normalized = normalize_pool(&values);
        assert!(normalized.iter().all(|&v| (v - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_normalize_pool_min_max() {
        let values = vec![0.0, 5.0, 10.0];
        let normalized = normalize_pool(&values);
        assert!((normalized[0] - 0.0).abs() < 1e-12);
        assert!((normalized[1] - 0.5).abs() < 1e-12);
        assert!((normalized[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_pool_bounds() {
        let values = vec![1.0, 2.0, 3.5, -4.0, 100.0];
        let normalized = normalize_pool(&values);
        for v in normalized {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_money_shot_weights_sum_to_one() {
        let sum = MoneyShotWeights::MOTION
            + MoneyShotWeights::CONTRAST
            + MoneyShotWeights::UNIQUENESS
            + MoneyShotWeights::SUBTITLE_EMOTION
            + MoneyShotWeights::FACE
            + MoneyShotWeights::MODEL_CONF
            + MoneyShotWeights::SATURATION
            + MoneyShotWeights::POSITION;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zone_rank_ordering() {
        assert!(NarrativeZone::Beginning.rank() < NarrativeZone::Escalation.rank());
        assert!(NarrativeZone::Escalation.rank() < NarrativeZone::Climax.rank());
    }

    #[test]
    fn test_structural_anchors_heuristic() {
        let anchors = StructuralAnchors::heuristic(120.0);
        assert!((anchors.begin_t - 6.0).abs() < 1e-9);
        assert!((anchors.escalation_t - 54.0).abs() < 1e-9);
        assert!((anchors.climax_t - 96.0).abs() < 1e-9);
        assert!(anchors.is_valid(120.0));
    }

    #[test]
    fn test_clip_entry_trim_is_immutable_copy() {
        let clip = ClipEntry {
            source_start_s: 0.0,
            source_end_s: 8.0,
            beat_type: BeatType::EscalationBeat,
            narrative_zone: NarrativeZone::Climax,
            act: Act::Act3,
            emotional_signal: 0.5,
            transition_in: "cut".into(),
            transition_out: "cut".into(),
            money_shot_score: 0.5,
            reasoning: String::new(),
            dialogue_excerpt: None,
            visual_analysis: String::new(),
            subtitle_analysis: String::new(),
            beat_aligned_start_s: None,
        };
        let trimmed = clip.with_trimmed_end(3.0);
        assert_eq!(clip.source_end_s, 8.0, "original must be unchanged");
        assert_eq!(trimmed.source_end_s, 3.0);
        assert!((trimmed.duration_s() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_checkpoint_cascade_invalidation() {
        let fp = SourceFingerprint { path: "x".into(), mtime: 0.0, size: 0 };
        let mut cp = Checkpoint::new(fp);
        for s in STAGE_ORDER {
            cp.mark_complete(*s);
        }
        cp.invalidate_cascade(Stage::ZoneMatching);
        assert!(cp.is_complete(Stage::Keyframes));
        assert!(cp.is_complete(Stage::Inference));
        assert!(!cp.is_complete(Stage::ZoneMatching));
        assert!(!cp.is_complete(Stage::Conform));
    }

    #[test]
    fn test_checkpoint_mark_complete_idempotent() {
        let fp = SourceFingerprint { path: "x".into(), mtime: 0.0, size: 0 };
        let mut cp = Checkpoint::new(fp);
        cp.mark_complete(Stage::Proxy);
        cp.mark_complete(Stage::Proxy);
        assert_eq!(cp.stages_complete.len(), 1);
    }

    #[test]
    fn test_bpm_grid_nearest_beat() {
        let grid = BpmGrid {
            detected_bpm: 120.0,
            beat_times_s: vec![0.0, 0.5, 1.0, 1.5, 2.0],
            downbeat_times_s: vec![0.0, 2.0],
            source: BpmSource::Detected,
        };
        assert_eq!(grid.nearest_beat(1.2), Some(1.0));
        assert!((grid.beat_interval_s() - 0.5).abs() < 1e-9);
    }
}
