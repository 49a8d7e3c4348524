//! Structural Analyzer (§4.F): chunked text-LLM calls over the subtitle
//! corpus, aggregated into three narrative-anchor timestamps.

use log::{info, warn};
use thiserror::Error;

use crate::collaborators::{CompletionRequest, ModelRuntime};
use crate::models::{DialogueEvent, StructuralAnchors};

/// Chunk size bounds, events per chunk (§4.F).
const CHUNK_MIN: usize = 50;
const CHUNK_MAX: usize = 100;

#[derive(Debug, Error)]
#[error("structural analysis failed: {0}")]
pub struct StructuralAnalysisError(pub String);

#[derive(Debug, Clone, Copy)]
struct ChunkAnchors {
    begin_t: f64,
    escalation_t: f64,
    climax_t: f64,
}

/// Heuristic fallback anchors at 5%, 45%, 80% of film duration (§4.F).
pub fn heuristic_anchors(film_duration_s: f64) -> StructuralAnchors {
    StructuralAnchors::heuristic(film_duration_s)
}

fn chunk_events(events: &[DialogueEvent]) -> Vec<&[DialogueEvent]> {
    if events.is_empty() {
        return Vec::new();
    }
    let chunk_size = CHUNK_MAX.min(events.len()).max(CHUNK_MIN.min(events.len()));
    events.chunks(chunk_size.max(1)).collect()
}

fn window_bounds(chunk: &[DialogueEvent], film_duration_s: f64) -> (f64, f64) {
    let start = chunk.first().map(|e| e.start_ms as f64 / 1000.0).unwrap_or(0.0);
    let end = chunk.last().map(|e| e.end_ms as f64 / 1000.0).unwrap_or(film_duration_s);
    (start, end)
}

fn is_plausible(candidate: &ChunkAnchors, film_duration_s: f64) -> bool {
    let begin_frac = candidate.begin_t / film_duration_s;
    let esc_frac = candidate.escalation_t / film_duration_s;
    let climax_frac = candidate.climax_t / film_duration_s;
    (0.0..=0.30).contains(&begin_frac)
        && (0.25..=0.70).contains(&esc_frac)
        && (0.60..=0.95).contains(&climax_frac)
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Enforces `begin_t < escalation_t < climax_t` by monotonic projection:
/// any violating value is raised to `previous + epsilon` (§4.F).
fn enforce_monotonic(mut anchors: StructuralAnchors) -> StructuralAnchors {
    const EPS: f64 = 0.001;
    if anchors.escalation_t <= anchors.begin_t {
        anchors.escalation_t = anchors.begin_t + EPS;
    }
    if anchors.climax_t <= anchors.escalation_t {
        anchors.climax_t = anchors.escalation_t + EPS;
    }
    anchors
}

/// Parses a completion response's JSON body into three timestamps. Returns
/// `None` on any malformed payload — caller discards the chunk rather than
/// failing the whole analysis.
fn parse_chunk_response(text: &str) -> Option<ChunkAnchors> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    Some(ChunkAnchors {
        begin_t: value.get("begin_t")?.as_f64()?,
        escalation_t: value.get("escalation_t")?.as_f64()?,
        climax_t: value.get("climax_t")?.as_f64()?,
    })
}

/// Runs the full structural analysis: chunk → prompt → aggregate → clamp →
/// monotonic projection. Never fails the pipeline for structural-analysis
/// inability — falls back to heuristic anchors unless `allow_heuristic` is
/// false, in which case a hard protocol error becomes a typed error (§4.F).
pub async fn analyze(
    events: &[DialogueEvent],
    film_duration_s: f64,
    model: Option<&dyn ModelRuntime>,
    allow_heuristic: bool,
) -> Result<StructuralAnchors, StructuralAnalysisError> {
    let Some(model) = model else {
        info!("no text model configured; using heuristic structural anchors");
        return Ok(heuristic_anchors(film_duration_s));
    };

    let chunks = chunk_events(events);
    if chunks.is_empty() {
        info!("no dialogue events; using heuristic structural anchors");
        return Ok(heuristic_anchors(film_duration_s));
    }

    let mut begins = Vec::new();
    let mut escalations = Vec::new();
    let mut climaxes = Vec::new();
    let mut any_protocol_error = false;

    for chunk in &chunks {
        let (window_start, window_end) = window_bounds(chunk, film_duration_s);
        let prompt = format_chunk_prompt(chunk, film_duration_s);
        let request = CompletionRequest {
            model: "text".to_string(),
            prompt,
            json_schema: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "begin_t": {"type": "number"},
                    "escalation_t": {"type": "number"},
                    "climax_t": {"type": "number"},
                },
                "required": ["begin_t", "escalation_t", "climax_t"],
            })),
            image_path: None,
            temperature: 0.0,
            max_tokens: 256,
            timeout_s: crate::config::MODEL_CALL_TIMEOUT_S,
        };

        let response = match model.complete(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("structural analysis chunk call failed: {e}");
                any_protocol_error = true;
                continue;
            }
        };

        let Some(mut candidate) = parse_chunk_response(&response.text) else {
            warn!("structural analysis chunk returned malformed JSON, skipping");
            continue;
        };

        candidate.begin_t = candidate.begin_t.clamp(window_start, window_end);
        candidate.escalation_t = candidate.escalation_t.clamp(window_start, window_end);
        candidate.climax_t = candidate.climax_t.clamp(window_start, window_end);

        if is_plausible(&candidate, film_duration_s) {
            begins.push(candidate.begin_t);
            escalations.push(candidate.escalation_t);
            climaxes.push(candidate.climax_t);
        }
    }

    if begins.is_empty() {
        if any_protocol_error && !allow_heuristic {
            return Err(StructuralAnalysisError(
                "network unreachable and heuristic disabled by configuration".to_string(),
            ));
        }
        info!("no plausible chunk anchors; falling back to heuristic anchors");
        return Ok(heuristic_anchors(film_duration_s));
    }

    let anchors = StructuralAnchors {
        begin_t: median(begins),
        escalation_t: median(escalations),
        climax_t: median(climaxes),
    };

    Ok(enforce_monotonic(anchors))
}

fn format_chunk_prompt(chunk: &[DialogueEvent], film_duration_s: f64) -> String {
    let lines: Vec<String> = chunk
        .iter()
        .map(|e| format!("[{:.1}s] {}", e.midpoint_s(), e.plaintext))
        .collect();
    format!(
        "Film duration: {film_duration_s:.1}s. Given this dialogue excerpt, identify three \
         narrative anchor timestamps (begin_t, escalation_t, climax_t) in seconds:\n{}",
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(start_ms: u64, end_ms: u64, text: &str) -> DialogueEvent {
        DialogueEvent {
            start_ms,
            end_ms,
            plaintext: text.to_string(),
            speaker: None,
            emotion: crate::models::classify_emotion(text),
        }
    }

    #[tokio::test]
    async fn test_no_model_configured_uses_heuristic() {
        let events = vec![event(0, 1000, "hello")];
        let anchors = analyze(&events, 120.0, None, true).await.unwrap();
        assert!((anchors.begin_t - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_events_uses_heuristic() {
        let anchors = analyze(&[], 120.0, None, true).await.unwrap();
        assert!(anchors.is_valid(120.0));
    }

    #[test]
    fn test_enforce_monotonic_projection() {
        let bad = StructuralAnchors { begin_t: 10.0, escalation_t: 8.0, climax_t: 9.0 };
        let fixed = enforce_monotonic(bad);
        assert!(fixed.begin_t < fixed.escalation_t);
        assert!(fixed.escalation_t < fixed.climax_t);
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(vec![1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn test_is_plausible_bounds() {
        let good = ChunkAnchors { begin_t: 6.0, escalation_t: 54.0, climax_t: 96.0 };
        assert!(is_plausible(&good, 120.0));

        let bad = ChunkAnchors { begin_t: 100.0, escalation_t: 110.0, climax_t: 115.0 };
        assert!(!is_plausible(&bad, 120.0));
    }

    #[test]
    fn test_parse_chunk_response_rejects_malformed() {
        assert!(parse_chunk_response("not json").is_none());
        assert!(parse_chunk_response("{\"begin_t\": 1.0}").is_none());
        assert!(parse_chunk_response("{\"begin_t\": 1.0, \"escalation_t\": 2.0, \"climax_t\": 3.0}").is_some());
    }
}
