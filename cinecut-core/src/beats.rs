//! Beat Classifier & Act Assigner (§4.H): rule-priority beat labeling and
//! zone assignment via text-embedding cosine similarity.

use crate::models::{Act, BeatType, EmotionLabel, NarrativeZone, StructuralAnchors};

/// The facts a beat rule needs. Lower-level than `NormalizedSignals` +
/// `SceneDescription` directly so rules stay pure functions over plain data.
#[derive(Debug, Clone, Copy)]
pub struct BeatSignals {
    pub money_shot_score: f64,
    pub subtitle_emotion: Option<EmotionLabel>,
    pub chron_position: f64,
    pub face_present: bool,
}

/// Rule-priority beat classification; the first matching rule wins (§4.H).
/// Expressed as an ordered table of pure predicates, not a class hierarchy
/// (§9 design note).
pub fn classify_beat(signals: &BeatSignals) -> BeatType {
    let emotion = signals.subtitle_emotion;

    // 1. breath
    if signals.money_shot_score <= 0.30
        && matches!(emotion, None | Some(EmotionLabel::Neutral))
    {
        return BeatType::Breath;
    }

    // 2. climax
    if signals.chron_position >= 0.75 && signals.money_shot_score >= 0.70 {
        return BeatType::Climax;
    }

    // 3. money_shot
    if signals.money_shot_score >= 0.85 {
        return BeatType::MoneyShot;
    }

    // 4. character_introduction
    if signals.face_present && signals.chron_position <= 0.25 {
        return BeatType::CharacterIntroduction;
    }

    // 5. inciting_incident
    if matches!(emotion, Some(EmotionLabel::Intense) | Some(EmotionLabel::Negative))
        && (0.15..=0.40).contains(&signals.chron_position)
    {
        return BeatType::IncitingIncident;
    }

    // 6. relationship_beat
    if matches!(emotion, Some(EmotionLabel::Romantic))
        || (signals.face_present && matches!(emotion, Some(EmotionLabel::Positive)))
    {
        return BeatType::RelationshipBeat;
    }

    // 7. escalation_beat (catch-all)
    BeatType::EscalationBeat
}

/// Act assignment (§4.H): `breath` beat always returns act="breath"
/// regardless of chronological position; otherwise chron_position splits
/// the runtime into thirds.
pub fn assign_act(beat_type: BeatType, chron_position: f64) -> Act {
    if beat_type == BeatType::Breath {
        return Act::Breath;
    }
    if chron_position < 0.30 {
        Act::Act1
    } else if chron_position < 0.70 {
        Act::Act2
    } else {
        Act::Act3
    }
}

/// Cosine similarity between two pre-computed embedding vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

/// A CPU-only sentence embedder. In-process library code, not a
/// collaborator trait boundary (§9: "must not share the GPU serializer").
pub trait SentenceEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// A feature-hashing bag-of-words embedder: every lowercased word hashes
/// into one of `dims` buckets, accumulated and L2-normalized. No model
/// weights to load, so it is always available as the zone matcher's
/// default rather than the embedding-unavailable fallback (§4.H) — it only
/// needs to distinguish "begin/escalation/climax"-flavored vocabulary, not
/// produce a general-purpose semantic embedding.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SentenceEmbedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dims];
        for word in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dims;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Per-zone anchor sentences, supplied per vibe or generic defaults (§4.H).
pub struct ZoneAnchorSentences {
    pub beginning: String,
    pub escalation: String,
    pub climax: String,
}

impl Default for ZoneAnchorSentences {
    fn default() -> Self {
        Self {
            beginning: "the story begins, characters and world are introduced".to_string(),
            escalation: "tension rises, conflict deepens, stakes increase".to_string(),
            climax: "the decisive confrontation, the story's peak intensity".to_string(),
        }
    }
}

/// Threshold by which CLIMAX similarity must exceed ESCALATION similarity
/// to override the default ESCALATION preference in the anchor-overlap band
/// (§4.H).
const CLIMAX_OVERRIDE_MARGIN: f64 = 0.15;

/// Zone assignment (§4.H). `embedder: None` downgrades to timestamp-only
/// zoning using anchor ratios (the embedding-unavailable fallback).
pub fn assign_zone(
    visual_content: &str,
    chron_position: f64,
    film_duration_s: f64,
    anchors: &StructuralAnchors,
    anchor_sentences: &ZoneAnchorSentences,
    embedder: Option<&dyn SentenceEmbedder>,
) -> NarrativeZone {
    let begin_frac = anchors.begin_t / film_duration_s;
    let climax_frac = anchors.climax_t / film_duration_s;
    let escalation_frac = anchors.escalation_t / film_duration_s;

    if chron_position < begin_frac {
        return NarrativeZone::Beginning;
    }
    if chron_position > climax_frac {
        return NarrativeZone::Climax;
    }

    let Some(embedder) = embedder else {
        return timestamp_only_zone(chron_position, begin_frac, escalation_frac, climax_frac);
    };

    let embedding = embedder.embed(visual_content);
    let sim_beginning = cosine_similarity(&embedding, &embedder.embed(&anchor_sentences.beginning));
    let sim_escalation = cosine_similarity(&embedding, &embedder.embed(&anchor_sentences.escalation));
    let sim_climax = cosine_similarity(&embedding, &embedder.embed(&anchor_sentences.climax));

    if chron_position >= escalation_frac && chron_position <= climax_frac {
        if sim_climax > sim_escalation + CLIMAX_OVERRIDE_MARGIN {
            return NarrativeZone::Climax;
        }
        return NarrativeZone::Escalation;
    }

    let best = [
        (NarrativeZone::Beginning, sim_beginning),
        (NarrativeZone::Escalation, sim_escalation),
        (NarrativeZone::Climax, sim_climax),
    ];
    best.into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(zone, _)| zone)
        .unwrap_or(NarrativeZone::Escalation)
}

fn timestamp_only_zone(
    chron_position: f64,
    begin_frac: f64,
    escalation_frac: f64,
    climax_frac: f64,
) -> NarrativeZone {
    if chron_position < begin_frac {
        NarrativeZone::Beginning
    } else if chron_position < escalation_frac {
        NarrativeZone::Beginning
    } else if chron_position <= climax_frac {
        NarrativeZone::Escalation
    } else {
        NarrativeZone::Climax
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(
        money_shot_score: f64,
        subtitle_emotion: Option<EmotionLabel>,
        chron_position: f64,
        face_present: bool,
    ) -> BeatSignals {
        BeatSignals { money_shot_score, subtitle_emotion, chron_position, face_present }
    }

    #[test]
    fn test_breath_rule_has_top_priority() {
        // Matches breath (low score, neutral) AND would match money_shot if
        // priority were reversed -- it isn't, since 0.30 < 0.85.
        let s = signals(0.20, Some(EmotionLabel::Neutral), 0.9, true);
        assert_eq!(classify_beat(&s), BeatType::Breath);
    }

    #[test]
    fn test_climax_rule_priority_over_money_shot() {
        // Matches both climax (chron>=0.75, score>=0.70) and money_shot
        // (score>=0.85); climax is rule 2, must win over rule 3.
        let s = signals(0.90, Some(EmotionLabel::Positive), 0.80, false);
        assert_eq!(classify_beat(&s), BeatType::Climax);
    }

    #[test]
    fn test_money_shot_when_climax_conditions_not_met() {
        let s = signals(0.90, Some(EmotionLabel::Positive), 0.40, false);
        assert_eq!(classify_beat(&s), BeatType::MoneyShot);
    }

    #[test]
    fn test_character_introduction() {
        let s = signals(0.5, Some(EmotionLabel::Neutral), 0.1, true);
        assert_eq!(classify_beat(&s), BeatType::CharacterIntroduction);
    }

    #[test]
    fn test_inciting_incident() {
        let s = signals(0.5, Some(EmotionLabel::Intense), 0.20, false);
        assert_eq!(classify_beat(&s), BeatType::IncitingIncident);
    }

    #[test]
    fn test_relationship_beat_romantic() {
        let s = signals(0.5, Some(EmotionLabel::Romantic), 0.5, false);
        assert_eq!(classify_beat(&s), BeatType::RelationshipBeat);
    }

    #[test]
    fn test_relationship_beat_positive_with_face() {
        let s = signals(0.5, Some(EmotionLabel::Positive), 0.5, true);
        assert_eq!(classify_beat(&s), BeatType::RelationshipBeat);
    }

    #[test]
    fn test_escalation_beat_catch_all() {
        let s = signals(0.5, Some(EmotionLabel::Positive), 0.5, false);
        assert_eq!(classify_beat(&s), BeatType::EscalationBeat);
    }

    #[test]
    fn test_breath_act_overrides_position() {
        assert_eq!(assign_act(BeatType::Breath, 0.95), Act::Breath);
    }

    #[test]
    fn test_act_split_by_thirds() {
        assert_eq!(assign_act(BeatType::EscalationBeat, 0.1), Act::Act1);
        assert_eq!(assign_act(BeatType::EscalationBeat, 0.5), Act::Act2);
        assert_eq!(assign_act(BeatType::EscalationBeat, 0.9), Act::Act3);
    }

    #[test]
    fn test_zone_override_before_begin_t() {
        let anchors = StructuralAnchors { begin_t: 6.0, escalation_t: 54.0, climax_t: 96.0 };
        let zone = assign_zone("", 0.01, 120.0, &anchors, &ZoneAnchorSentences::default(), None);
        assert_eq!(zone, NarrativeZone::Beginning);
    }

    #[test]
    fn test_zone_override_after_climax_t() {
        let anchors = StructuralAnchors { begin_t: 6.0, escalation_t: 54.0, climax_t: 96.0 };
        let zone = assign_zone("", 0.99, 120.0, &anchors, &ZoneAnchorSentences::default(), None);
        assert_eq!(zone, NarrativeZone::Climax);
    }

    #[test]
    fn test_timestamp_only_fallback_when_no_embedder() {
        let anchors = StructuralAnchors { begin_t: 6.0, escalation_t: 54.0, climax_t: 96.0 };
        // 60/120 = 0.5, between escalation_t/120=0.45 and climax_t/120=0.80
        let zone = assign_zone("", 0.5, 120.0, &anchors, &ZoneAnchorSentences::default(), None);
        assert_eq!(zone, NarrativeZone::Escalation);
    }
}
