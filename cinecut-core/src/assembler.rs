//! Assembler (§4.I): zone-first + score-ranked ordering, pacing-curve trim,
//! beat-grid snap, silence insertion, and clip-count convergence.

use crate::models::{
    BpmGrid, ClipEntry, NarrativeZone, SfxTier, MIN_CLIP_DURATION_S,
};
use crate::vibe::Profile;

/// Multiplier applied to a zone's target average cut duration to get the
/// trim ceiling (§4.I).
const PACING_TRIM_MULTIPLIER: f64 = 1.5;

/// Duration of the synthetic silence segment at the ESCALATION->CLIMAX
/// boundary (§4.I).
pub const SILENCE_DURATION_S: f64 = 3.5;

/// Sorts candidates zone-first, then by descending emotional_signal
/// (money_shot_score), ties broken by earlier source_start_s (§4.I).
pub fn order_candidates(mut candidates: Vec<ClipEntry>) -> Vec<ClipEntry> {
    candidates.sort_by(|a, b| {
        a.narrative_zone
            .rank()
            .cmp(&b.narrative_zone.rank())
            .then(
                b.emotional_signal
                    .partial_cmp(&a.emotional_signal)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.source_start_s.partial_cmp(&b.source_start_s).unwrap_or(std::cmp::Ordering::Equal))
    });
    candidates
}

fn zone_target_cut_s(zone: NarrativeZone, profile: &Profile) -> f64 {
    match zone {
        NarrativeZone::Beginning => profile.act1_avg_cut_s,
        NarrativeZone::Escalation => profile.act2_avg_cut_s,
        NarrativeZone::Climax => profile.act3_avg_cut_s,
    }
}

/// Trims a clip's end to `target * 1.5` if its duration exceeds that
/// ceiling, never below `MIN_CLIP_DURATION_S`. Uses the immutable
/// copy-with-update pattern (§4.I).
pub fn apply_pacing_trim(clip: &ClipEntry, profile: &Profile) -> ClipEntry {
    let target = zone_target_cut_s(clip.narrative_zone, profile);
    let ceiling = target * PACING_TRIM_MULTIPLIER;

    if clip.duration_s() <= ceiling {
        return clip.clone();
    }

    let trimmed_end = (clip.source_start_s + ceiling).max(clip.source_start_s + MIN_CLIP_DURATION_S);
    clip.with_trimmed_end(trimmed_end)
}

pub fn apply_pacing_curve(candidates: Vec<ClipEntry>, profile: &Profile) -> Vec<ClipEntry> {
    candidates.iter().map(|c| apply_pacing_trim(c, profile)).collect()
}

/// Snaps each clip's output-timeline start to the nearest beat if within one
/// beat interval's tolerance (§4.I). `output_starts[i]` is clip `i`'s
/// intended start on the assembled output timeline (cumulative duration up
/// to that clip).
pub fn apply_beat_grid_snap(
    clips: &[ClipEntry],
    output_starts: &[f64],
    bpm_grid: Option<&BpmGrid>,
) -> Vec<ClipEntry> {
    let Some(grid) = bpm_grid else {
        return clips.to_vec();
    };
    let interval = grid.beat_interval_s();

    clips
        .iter()
        .zip(output_starts)
        .map(|(clip, &output_start)| {
            let mut updated = clip.clone();
            if let Some(nearest) = grid.nearest_beat(output_start) {
                if (nearest - output_start).abs() <= interval {
                    updated.beat_aligned_start_s = Some(nearest);
                }
            }
            updated
        })
        .collect()
}

/// Rounds a clip duration expressed in beats per §4.I: durations landing at
/// 1.8 beats round up to 2 beats; below 0.5 beats is disallowed (returns
/// `None`, meaning the clip should be dropped).
pub fn round_beats(duration_s: f64, beat_interval_s: f64) -> Option<f64> {
    if beat_interval_s <= 0.0 {
        return Some(duration_s);
    }
    let beats = duration_s / beat_interval_s;
    if beats < 0.5 {
        return None;
    }
    let rounded_beats = beats.round().max(1.0);
    Some(rounded_beats * beat_interval_s)
}

/// Inserts the single silence segment at the ESCALATION->CLIMAX boundary
/// (§4.I). Returns the index in `clips` immediately after which the
/// silence belongs, or `None` if no such boundary exists.
pub fn find_escalation_to_climax_boundary(clips: &[ClipEntry]) -> Option<usize> {
    clips.windows(2).position(|w| {
        w[0].narrative_zone == NarrativeZone::Escalation && w[1].narrative_zone == NarrativeZone::Climax
    })
}

#[derive(Debug, Clone, Copy)]
pub struct SilenceMarker {
    pub after_clip_index: usize,
    pub duration_s: f64,
    pub tier: SfxTier,
}

/// Produces at most one silence marker per trailer (§4.I).
pub fn plan_silence(clips: &[ClipEntry]) -> Option<SilenceMarker> {
    find_escalation_to_climax_boundary(clips).map(|index| SilenceMarker {
        after_clip_index: index,
        duration_s: SILENCE_DURATION_S,
        tier: SfxTier::ActBoundary,
    })
}

/// Title card and end-button placement on the output timeline (§4.I):
/// neither is a `ClipEntry` with a fake source timestamp — both are
/// synthetic lavfi segments the conform stage appends as `extra_clip_paths`.
pub const TITLE_CARD_AT_S: f64 = 105.0;
pub const TITLE_CARD_DURATION_S: f64 = 3.0;
pub const BUTTON_CARD_AT_S: f64 = 113.0;
pub const BUTTON_CARD_DURATION_S: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Title,
    Button,
}

/// A synthetic title/button segment: text to render over a black card, its
/// approximate output-timeline position, and its duration. Rendering itself
/// (an `ffmpeg` `drawtext` lavfi invocation) is a conform-stage concern.
#[derive(Debug, Clone)]
pub struct CardSpec {
    pub kind: CardKind,
    pub at_s: f64,
    pub duration_s: f64,
    pub text: String,
}

/// Plans the title card (~1:45) and the end button (~1:53) (§4.I). `title`
/// is typically a vibe-derived label; `button` is a short closing line.
pub fn plan_title_and_button_cards(title: &str, button: &str) -> Vec<CardSpec> {
    vec![
        CardSpec { kind: CardKind::Title, at_s: TITLE_CARD_AT_S, duration_s: TITLE_CARD_DURATION_S, text: title.to_string() },
        CardSpec { kind: CardKind::Button, at_s: BUTTON_CARD_AT_S, duration_s: BUTTON_CARD_DURATION_S, text: button.to_string() },
    ]
}

/// Clip-count convergence (§4.I): drops lowest-score clips per zone if
/// over the target range, or signals how many more are needed if under.
pub fn converge_clip_count(mut clips: Vec<ClipEntry>, profile: &Profile) -> Vec<ClipEntry> {
    let target_max = profile.target_clip_count.max as usize;
    let target_min = profile.target_clip_count.min as usize;

    if clips.len() > target_max {
        // Candidates are already ordered zone-first/score-desc; to drop the
        // lowest-score clips first, sort a working copy by ascending score,
        // remove the excess, then restore assembly order.
        let mut indexed: Vec<(usize, f64)> =
            clips.iter().enumerate().map(|(i, c)| (i, c.money_shot_score)).collect();
        indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let drop_count = clips.len() - target_max;
        let drop_indices: std::collections::HashSet<usize> =
            indexed.into_iter().take(drop_count).map(|(i, _)| i).collect();

        let mut kept = Vec::with_capacity(clips.len() - drop_count);
        for (i, clip) in clips.drain(..).enumerate() {
            if !drop_indices.contains(&i) {
                kept.push(clip);
            }
        }
        return kept;
    }

    // Under target_min: the caller is expected to re-add lower-score clips
    // from the original (pre-filter) pool; this function cannot invent new
    // clips, so it returns the list unchanged and lets the orchestrator
    // decide whether to widen the candidate pool.
    let _ = target_min;
    clips
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Act, BeatType};
    use crate::vibe::profile;

    fn clip(zone: NarrativeZone, start: f64, end: f64, score: f64) -> ClipEntry {
        ClipEntry {
            source_start_s: start,
            source_end_s: end,
            beat_type: BeatType::EscalationBeat,
            narrative_zone: zone,
            act: Act::Act2,
            emotional_signal: score,
            transition_in: "cut".into(),
            transition_out: "cut".into(),
            money_shot_score: score,
            reasoning: String::new(),
            dialogue_excerpt: None,
            visual_analysis: String::new(),
            subtitle_analysis: String::new(),
            beat_aligned_start_s: None,
        }
    }

    #[test]
    fn test_order_candidates_zone_first() {
        let candidates = vec![
            clip(NarrativeZone::Climax, 10.0, 12.0, 0.9),
            clip(NarrativeZone::Beginning, 0.0, 2.0, 0.1),
            clip(NarrativeZone::Escalation, 5.0, 7.0, 0.5),
        ];
        let ordered = order_candidates(candidates);
        let ranks: Vec<u8> = ordered.iter().map(|c| c.narrative_zone.rank()).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_order_candidates_score_desc_within_zone() {
        let candidates = vec![
            clip(NarrativeZone::Beginning, 0.0, 2.0, 0.2),
            clip(NarrativeZone::Beginning, 5.0, 7.0, 0.8),
        ];
        let ordered = order_candidates(candidates);
        assert!(ordered[0].money_shot_score >= ordered[1].money_shot_score);
    }

    #[test]
    fn test_pacing_trim_scenario_5() {
        // vibe.act3_avg_cut_s = 2.0, an 8s act3 clip should trim to 3.0s.
        let drama = profile("drama").unwrap();
        let mut custom = drama.clone();
        custom.act3_avg_cut_s = 2.0;

        let original = clip(NarrativeZone::Climax, 0.0, 8.0, 0.5);
        let trimmed = apply_pacing_trim(&original, &custom);

        assert!((trimmed.duration_s() - 3.0).abs() < 1e-9);
        assert_eq!(original.source_end_s, 8.0, "original must be unchanged");
    }

    #[test]
    fn test_pacing_trim_never_below_minimum() {
        let mut p = profile("drama").unwrap().clone();
        p.act1_avg_cut_s = 0.01;
        let original = clip(NarrativeZone::Beginning, 0.0, 5.0, 0.5);
        let trimmed = apply_pacing_trim(&original, &p);
        assert!(trimmed.duration_s() >= MIN_CLIP_DURATION_S - 1e-9);
    }

    #[test]
    fn test_pacing_trim_no_op_under_ceiling() {
        let p = profile("drama").unwrap();
        let original = clip(NarrativeZone::Beginning, 0.0, 1.0, 0.5);
        let trimmed = apply_pacing_trim(&original, p);
        assert_eq!(trimmed.source_end_s, original.source_end_s);
    }

    #[test]
    fn test_silence_only_at_escalation_to_climax_boundary() {
        let clips = vec![
            clip(NarrativeZone::Beginning, 0.0, 2.0, 0.5),
            clip(NarrativeZone::Escalation, 2.0, 4.0, 0.5),
            clip(NarrativeZone::Climax, 4.0, 6.0, 0.5),
        ];
        let marker = plan_silence(&clips).unwrap();
        assert_eq!(marker.after_clip_index, 1);
        assert_eq!(marker.tier, SfxTier::ActBoundary);
        assert!((marker.duration_s - SILENCE_DURATION_S).abs() < 1e-9);
    }

    #[test]
    fn test_no_silence_when_no_boundary() {
        let clips = vec![
            clip(NarrativeZone::Beginning, 0.0, 2.0, 0.5),
            clip(NarrativeZone::Beginning, 2.0, 4.0, 0.5),
        ];
        assert!(plan_silence(&clips).is_none());
    }

    #[test]
    fn test_round_beats_disallows_below_half() {
        assert!(round_beats(0.2, 0.5).is_none());
    }

    #[test]
    fn test_round_beats_rounds_to_nearest() {
        // 1.8 beats at a 0.5s interval = 0.9s duration; rounds to 2 beats = 1.0s.
        let rounded = round_beats(0.9, 0.5).unwrap();
        assert!((rounded - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_title_and_button_cards_are_ordered_and_near_the_tail() {
        let cards = plan_title_and_button_cards("ACTION", "IN THEATERS");
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].kind, CardKind::Title);
        assert_eq!(cards[1].kind, CardKind::Button);
        assert!(cards[0].at_s < cards[1].at_s);
        assert!(cards[1].at_s < 120.0);
    }

    #[test]
    fn test_converge_drops_lowest_score_clips_when_over_target() {
        let p = profile("action").unwrap(); // target_clip_count (28, 42)
        let mut clips: Vec<ClipEntry> = (0..50)
            .map(|i| clip(NarrativeZone::Beginning, i as f64, i as f64 + 1.0, i as f64 / 50.0))
            .collect();
        clips = converge_clip_count(clips, p);
        assert_eq!(clips.len(), p.target_clip_count.max as usize);
        assert!(clips.iter().all(|c| c.money_shot_score >= 8.0 / 50.0));
    }
}
