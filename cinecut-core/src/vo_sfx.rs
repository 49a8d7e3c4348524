//! VO Selector & SFX Planner (§4.K): protagonist identification, VO line
//! selection, and cut-time SFX event planning.

use std::collections::HashMap;

use crate::models::{Act, BeatType, ClipEntry, DialogueEvent, NarrativeZone, SfxEvent, SfxTier};

/// Target LUFS for extracted VO, slightly hotter than the music bed (§4.K).
pub const VO_TARGET_LUFS: f64 = -16.0;

/// Minimum padded VO clip duration (§4.K).
pub const VO_MIN_DURATION_S: f64 = 0.8;
pub const VO_MAX_DURATION_S: f64 = 8.0;
pub const VO_MIN_WORD_COUNT: usize = 6;

/// hard-cut SFX synthesis parameters (§4.K).
pub const HARD_CUT_DURATION_S: f64 = 0.4;
pub const HARD_CUT_SWEEP_START_HZ: f64 = 800.0;
pub const HARD_CUT_SWEEP_END_HZ: f64 = 200.0;

/// act-boundary SFX synthesis parameters (§4.K).
pub const ACT_BOUNDARY_DURATION_S: f64 = 1.2;
pub const ACT_BOUNDARY_SWEEP_START_HZ: f64 = 400.0;
pub const ACT_BOUNDARY_SWEEP_END_HZ: f64 = 80.0;

/// Counts dialogue lines per speaker and returns the protagonist's name.
/// Ties are broken by earliest appearance (§4.K, §8 item 9).
pub fn identify_protagonist(events: &[DialogueEvent]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: HashMap<&str, usize> = HashMap::new();

    for (index, event) in events.iter().enumerate() {
        if let Some(speaker) = &event.speaker {
            *counts.entry(speaker.as_str()).or_insert(0) += 1;
            first_seen.entry(speaker.as_str()).or_insert(index);
        }
    }

    counts
        .into_iter()
        .max_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| first_seen[b.0].cmp(&first_seen[a.0]))
        })
        .map(|(name, _)| name.to_string())
}

/// A dialogue line candidate paired with the beat_type of its nearest
/// keyframe, used to prefer lines near narratively-strong beats (§4.K).
pub struct VoCandidate<'a> {
    pub event: &'a DialogueEvent,
    pub act: Act,
    pub nearest_beat_type: BeatType,
}

fn is_preferred_beat(beat_type: BeatType) -> bool {
    matches!(
        beat_type,
        BeatType::IncitingIncident | BeatType::EscalationBeat | BeatType::RelationshipBeat
    )
}

fn is_eligible(candidate: &VoCandidate) -> bool {
    candidate.event.word_count() >= VO_MIN_WORD_COUNT
        && candidate.event.duration_s() >= VO_MIN_DURATION_S
        && candidate.event.duration_s() <= VO_MAX_DURATION_S
}

/// Selects up to 3 protagonist lines: at most 1 in Act 1, up to 2 in Act 2,
/// 0 in Act 3 (§4.K).
pub fn select_vo_lines<'a>(candidates: &[VoCandidate<'a>]) -> Vec<&'a DialogueEvent> {
    let mut act1_budget = 1usize;
    let mut act2_budget = 2usize;
    let mut selected = Vec::new();

    let mut eligible: Vec<&VoCandidate> = candidates.iter().filter(|c| is_eligible(c)).collect();
    eligible.sort_by(|a, b| {
        is_preferred_beat(b.nearest_beat_type).cmp(&is_preferred_beat(a.nearest_beat_type))
    });

    for candidate in eligible {
        if selected.len() >= 3 {
            break;
        }
        match candidate.act {
            Act::Act1 if act1_budget > 0 => {
                act1_budget -= 1;
                selected.push(candidate.event);
            }
            Act::Act2 if act2_budget > 0 => {
                act2_budget -= 1;
                selected.push(candidate.event);
            }
            Act::Act3 | Act::Breath => {}
            _ => {}
        }
    }

    selected
}

/// Computes each clip boundary's time on the *output* timeline (cumulative
/// duration up to that clip), not source timestamps (§3 invariant, §4.K).
pub fn output_timeline_boundaries(clips: &[ClipEntry]) -> Vec<f64> {
    let mut boundaries = Vec::with_capacity(clips.len() + 1);
    let mut cursor = 0.0;
    boundaries.push(cursor);
    for clip in clips {
        cursor += clip.duration_s();
        boundaries.push(cursor);
    }
    boundaries
}

/// Plans an SfxEvent at every interior clip boundary (§4.K). `silence_after`
/// names the clip index after which the silence segment was inserted, if
/// any — that boundary always gets `act-boundary` tier.
pub fn plan_sfx_events(clips: &[ClipEntry], silence_after: Option<usize>) -> Vec<SfxEvent> {
    let boundaries = output_timeline_boundaries(clips);
    let mut events = Vec::new();

    for i in 0..clips.len().saturating_sub(1) {
        let trigger_time_s = boundaries[i + 1];
        let crosses_zone = clips[i].narrative_zone != clips[i + 1].narrative_zone;
        let borders_silence = silence_after == Some(i);

        let tier = if crosses_zone || borders_silence { SfxTier::ActBoundary } else { SfxTier::HardCut };

        let synthesized_path = sfx_cache_path(tier);
        events.push(SfxEvent { trigger_time_s, tier, synthesized_path });
    }

    events
}

/// SFX WAVs are cached by (tier, vibe) key (§4.K); the vibe is folded into
/// the caller's cache directory layout, so this only needs the tier.
fn sfx_cache_path(tier: SfxTier) -> String {
    match tier {
        SfxTier::HardCut => "sfx/hard_cut.wav".to_string(),
        SfxTier::ActBoundary => "sfx/act_boundary.wav".to_string(),
    }
}
