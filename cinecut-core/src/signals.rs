//! Signal Extractor & Scorer (§4.G): per-frame numeric signals, pool
//! normalization, and the weighted money-shot score.

use crate::models::{
    classify_emotion, normalize_signal_pool, DialogueEvent, EmotionLabel, NormalizedSignals,
    RawSignals, SceneDescription,
};

/// A decoded keyframe as raw 8-bit RGB pixels. The transcoder collaborator
/// produces these from the proxy; this module never touches the codec.
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub rgb: Vec<u8>,
}

impl Frame {
    fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Coarse grayscale view, used by motion/contrast signals.
    fn to_gray(&self) -> Vec<f32> {
        self.rgb
            .chunks_exact(3)
            .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
            .collect()
    }

    /// A coarse 8-bucket-per-channel RGB histogram, normalized to sum 1.0.
    /// Used only for pool-level uniqueness; never compared for equality.
    pub fn histogram(&self) -> Vec<f32> {
        const BUCKETS: usize = 8;
        let mut hist = vec![0.0f32; BUCKETS * 3];
        for p in self.rgb.chunks_exact(3) {
            for (channel, &v) in p.iter().enumerate() {
                let bucket = (v as usize * BUCKETS / 256).min(BUCKETS - 1);
                hist[channel * BUCKETS + bucket] += 1.0;
            }
        }
        let total: f32 = self.pixel_count() as f32;
        if total > 0.0 {
            for v in &mut hist {
                *v /= total;
            }
        }
        hist
    }
}

/// Face presence is delegated to a pre-loaded classifier (§4.G: "loaded
/// once at module init to amortize ~200 ms load cost"). Modeled as a trait
/// so the heavyweight cascade load happens exactly once per process.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> bool;
}

/// A detector that reports no faces. Used when no cascade model file is
/// configured; downstream signals simply treat face_present as false.
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect(&self, _frame: &Frame) -> bool {
        false
    }
}

/// Mean absolute pixel difference against the previous frame (§4.G).
pub fn motion_magnitude(frame: &Frame, previous: Option<&Frame>) -> f64 {
    let Some(previous) = previous else { return 0.0 };
    if previous.rgb.len() != frame.rgb.len() {
        return 0.0;
    }
    let sum: u64 = frame
        .rgb
        .iter()
        .zip(previous.rgb.iter())
        .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs() as u64)
        .sum();
    sum as f64 / frame.rgb.len() as f64
}

/// Variance of a Laplacian convolution over the grayscale frame (§4.G).
pub fn visual_contrast(frame: &Frame) -> f64 {
    if frame.width < 3 || frame.height < 3 {
        return 0.0;
    }
    let gray = frame.to_gray();
    let w = frame.width;
    let mut laplacian = Vec::with_capacity((frame.width - 2) * (frame.height - 2));

    for y in 1..frame.height - 1 {
        for x in 1..w - 1 {
            let center = gray[y * w + x];
            let up = gray[(y - 1) * w + x];
            let down = gray[(y + 1) * w + x];
            let left = gray[y * w + x - 1];
            let right = gray[y * w + x + 1];
            laplacian.push(4.0 * center - up - down - left - right);
        }
    }

    if laplacian.is_empty() {
        return 0.0;
    }
    let mean: f32 = laplacian.iter().sum::<f32>() / laplacian.len() as f32;
    let variance: f32 =
        laplacian.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / laplacian.len() as f32;
    variance as f64
}

/// Mean saturation in HSV space (§4.G).
pub fn saturation(frame: &Frame) -> f64 {
    if frame.pixel_count() == 0 {
        return 0.0;
    }
    let total: f64 = frame
        .rgb
        .chunks_exact(3)
        .map(|p| {
            let (r, g, b) = (p[0] as f64 / 255.0, p[1] as f64 / 255.0, p[2] as f64 / 255.0);
            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            if max <= 0.0 { 0.0 } else { (max - min) / max }
        })
        .sum();
    total / frame.pixel_count() as f64
}

/// Correlation-distance between two coarse histograms, in [0, 1]. Public so
/// the keyframe-selection pass (an external-collaborator concern) can reuse
/// it for scene-change detection instead of re-deriving cosine distance.
pub fn histogram_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 1.0;
    }
    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    1.0 - cosine as f64
}

/// Pool-level scene_uniqueness: for each frame, mean histogram distance
/// against every other frame in the pool (§4.G, O(n^2)).
pub fn scene_uniqueness_pool(histograms: &[Vec<f32>]) -> Vec<f64> {
    let n = histograms.len();
    (0..n)
        .map(|i| {
            if n <= 1 {
                return 0.0;
            }
            let sum: f64 = (0..n)
                .filter(|&j| j != i)
                .map(|j| histogram_distance(&histograms[i], &histograms[j]))
                .sum();
            sum / (n - 1) as f64
        })
        .collect()
}

/// model_confidence = completeness averaged with richness (§4.G).
pub fn model_confidence(desc: Option<&SceneDescription>) -> f64 {
    match desc {
        Some(desc) => (desc.completeness() + desc.richness()) / 2.0,
        None => 0.0,
    }
}

/// subtitle_emotional_weight: nearest DialogueEvent within +/-5s, mapped
/// through the fixed weight table; 0.0 if none is in range (§4.G).
pub fn subtitle_emotional_weight(pts_s: f64, dialogue: &[DialogueEvent]) -> f64 {
    const WINDOW_S: f64 = 5.0;
    dialogue
        .iter()
        .filter(|d| (d.midpoint_s() - pts_s).abs() <= WINDOW_S)
        .min_by(|a, b| {
            (a.midpoint_s() - pts_s)
                .abs()
                .partial_cmp(&(b.midpoint_s() - pts_s).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|d| d.emotion.weight())
        .unwrap_or(EmotionLabel::NONE_WEIGHT)
}

/// One input frame's worth of context needed to build its `RawSignals`.
pub struct FrameContext<'a> {
    pub frame: &'a Frame,
    pub previous_frame: Option<&'a Frame>,
    pub pts_s: f64,
    pub film_duration_s: f64,
    pub scene_description: Option<&'a SceneDescription>,
    pub dialogue: &'a [DialogueEvent],
}

/// Per-frame signal extraction (O(1) each), not including the pool-level
/// scene_uniqueness pass, which is computed afterward across the full pool.
pub fn extract_raw_signals(ctx: &FrameContext, face_detector: &dyn FaceDetector) -> RawSignals {
    RawSignals {
        motion_magnitude: motion_magnitude(ctx.frame, ctx.previous_frame),
        visual_contrast: visual_contrast(ctx.frame),
        saturation: saturation(ctx.frame),
        scene_uniqueness: 0.0, // filled in by the pool pass
        face_present: face_detector.detect(ctx.frame),
        model_confidence: model_confidence(ctx.scene_description),
        subtitle_emotional_weight: subtitle_emotional_weight(ctx.pts_s, ctx.dialogue),
        chron_position: (ctx.pts_s / ctx.film_duration_s).clamp(0.0, 1.0),
        histogram: ctx.frame.histogram(),
    }
}

/// Fills in the pool-level scene_uniqueness signal across an already
/// per-frame-extracted pool.
pub fn fill_pool_uniqueness(pool: &mut [RawSignals]) {
    let histograms: Vec<Vec<f32>> = pool.iter().map(|r| r.histogram.clone()).collect();
    let uniqueness = scene_uniqueness_pool(&histograms);
    for (raw, u) in pool.iter_mut().zip(uniqueness) {
        raw.scene_uniqueness = u;
    }
}

/// Convenience: normalize a pool and attach each frame's money-shot score.
pub fn score_pool(raw: &[RawSignals]) -> Vec<(NormalizedSignals, f64)> {
    normalize_signal_pool(raw)
        .into_iter()
        .map(|n| {
            let score = n.money_shot_score();
            (n, score)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(value: u8, w: usize, h: usize) -> Frame {
        Frame { width: w, height: h, rgb: vec![value; w * h * 3] }
    }

    #[test]
    fn test_motion_magnitude_zero_for_identical_frames() {
        let a = solid_frame(128, 8, 8);
        let b = solid_frame(128, 8, 8);
        assert_eq!(motion_magnitude(&a, Some(&b)), 0.0);
    }

    #[test]
    fn test_motion_magnitude_positive_for_different_frames() {
        let a = solid_frame(0, 8, 8);
        let b = solid_frame(255, 8, 8);
        assert!(motion_magnitude(&a, Some(&b)) > 200.0);
    }

    #[test]
    fn test_motion_magnitude_zero_when_no_previous_frame() {
        let a = solid_frame(100, 8, 8);
        assert_eq!(motion_magnitude(&a, None), 0.0);
    }

    #[test]
    fn test_visual_contrast_zero_on_flat_frame() {
        let a = solid_frame(128, 10, 10);
        assert_eq!(visual_contrast(&a), 0.0);
    }

    #[test]
    fn test_saturation_zero_on_grayscale_frame() {
        let a = solid_frame(128, 4, 4);
        assert_eq!(saturation(&a), 0.0);
    }

    #[test]
    fn test_scene_uniqueness_pool_identical_frames_is_zero() {
        let hist = vec![0.2, 0.3, 0.5];
        let pool = vec![hist.clone(), hist.clone(), hist.clone()];
        let u = scene_uniqueness_pool(&pool);
        assert!(u.iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn test_model_confidence_none_description_is_zero() {
        assert_eq!(model_confidence(None), 0.0);
    }

    #[test]
    fn test_subtitle_emotional_weight_out_of_window_is_none_weight() {
        let dialogue = vec![DialogueEvent {
            start_ms: 100_000,
            end_ms: 101_000,
            plaintext: "run now!".to_string(),
            speaker: None,
            emotion: classify_emotion("run now!"),
        }];
        assert_eq!(subtitle_emotional_weight(0.0, &dialogue), EmotionLabel::NONE_WEIGHT);
    }

    #[test]
    fn test_subtitle_emotional_weight_within_window_uses_nearest() {
        let dialogue = vec![DialogueEvent {
            start_ms: 10_000,
            end_ms: 11_000,
            plaintext: "run now!".to_string(),
            speaker: None,
            emotion: EmotionLabel::Intense,
        }];
        let weight = subtitle_emotional_weight(10.5, &dialogue);
        assert_eq!(weight, EmotionLabel::Intense.weight());
    }

    #[test]
    fn test_score_pool_degenerate_fallback() {
        let raw = vec![
            RawSignals {
                motion_magnitude: 5.0,
                visual_contrast: 5.0,
                saturation: 5.0,
                scene_uniqueness: 5.0,
                face_present: true,
                model_confidence: 5.0,
                subtitle_emotional_weight: 5.0,
                chron_position: 5.0,
                histogram: vec![],
            };
            3
        ];
        let scored = score_pool(&raw);
        for (normalized, _score) in &scored {
            assert_eq!(normalized.motion_magnitude, 0.5);
        }
    }
}
