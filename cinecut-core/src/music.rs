//! BPM / Music Resolver (§4.J): vibe-keyed royalty-free track fetch with a
//! permanent cache, and BPM detection via FFT-based onset autocorrelation
//! seeded from the vibe's default tempo.

use std::path::{Path, PathBuf};

use log::warn;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use sha2::{Digest, Sha256};

use crate::collaborators::MusicApi;
use crate::models::{BpmGrid, BpmSource};
use crate::vibe::Profile;

/// Minimum beats expected in the first 30s for a track to be considered
/// beat-tracked at all (§4.J).
const MIN_BEATS_FIRST_30S: usize = 8;
const EARLY_WINDOW_S: f64 = 30.0;

/// Stable tag-hash used for the permanent music cache filename (§4.J).
pub fn tag_hash(tags: &[String]) -> String {
    let mut sorted = tags.to_vec();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for tag in &sorted {
        hasher.update(tag.as_bytes());
        hasher.update(b"\0");
    }
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes.iter().take(len / 2).map(|b| format!("{b:02x}")).collect()
}

/// Resolves (vibe, tags) to a cached or freshly fetched music file path.
/// Graceful degradation: any failure logs a warning and returns `None`
/// (§4.J) — the pipeline must continue with `music_bed = None`.
pub async fn resolve_music(
    vibe_key: &str,
    profile: &Profile,
    cache_dir: &Path,
    api: &dyn MusicApi,
) -> Option<PathBuf> {
    let hash = tag_hash(&profile.music_tag_set.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    let cached_glob_prefix = format!("{vibe_key}_{hash}");

    if let Ok(entries) = std::fs::read_dir(cache_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&cached_glob_prefix) {
                return Some(entry.path());
            }
        }
    }

    let tags: Vec<String> = profile.music_tag_set.iter().map(|s| s.to_string()).collect();
    match tokio::time::timeout(
        std::time::Duration::from_secs(crate::config::MUSIC_API_TIMEOUT_S),
        api.search_and_fetch(&tags, cache_dir),
    )
    .await
    {
        Ok(Some(path)) => Some(path),
        Ok(None) => {
            warn!("music API returned no candidates for vibe {vibe_key}");
            None
        }
        Err(_) => {
            warn!("music API timed out for vibe {vibe_key}");
            None
        }
    }
}

/// Autocorrelation-based onset/tempo estimate over a mono 22.05kHz signal,
/// reusing FFT-domain cross-correlation machinery the same way the
/// drift-measurement pass convolves two signals in the frequency domain.
fn autocorrelate(samples: &[f32]) -> Vec<f32> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let fft_len = (n * 2).next_power_of_two();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_len);
    let ifft = planner.plan_fft_inverse(fft_len);

    let mut buffer: Vec<Complex<f32>> =
        samples.iter().map(|&s| Complex::new(s, 0.0)).chain(std::iter::repeat(Complex::new(0.0, 0.0))).take(fft_len).collect();
    fft.process(&mut buffer);

    for c in &mut buffer {
        *c = *c * c.conj();
    }
    ifft.process(&mut buffer);

    let scale = 1.0 / fft_len as f32;
    buffer.iter().take(n).map(|c| c.re * scale).collect()
}

/// Finds beat times by locating autocorrelation peaks near the expected
/// beat interval, seeded from `seed_bpm`.
fn detect_beats(samples: &[f32], sample_rate: u32, seed_bpm: f64) -> (f64, Vec<f64>) {
    if samples.is_empty() {
        return (0.0, Vec::new());
    }

    let autocorr = autocorrelate(samples);
    let seed_interval_samples = (60.0 / seed_bpm * sample_rate as f64) as usize;
    let search_radius = (seed_interval_samples / 4).max(1);

    let lag = ((seed_interval_samples.saturating_sub(search_radius))
        ..(seed_interval_samples + search_radius).min(autocorr.len()))
        .max_by(|&a, &b| autocorr[a].partial_cmp(&autocorr[b]).unwrap_or(std::cmp::Ordering::Equal));

    let Some(lag) = lag else {
        return (0.0, Vec::new());
    };
    if lag == 0 {
        return (0.0, Vec::new());
    }

    let tempo = 60.0 * sample_rate as f64 / lag as f64;
    let duration_s = samples.len() as f64 / sample_rate as f64;
    let mut beats = Vec::new();
    let mut t = 0.0;
    let interval_s = lag as f64 / sample_rate as f64;
    while t < duration_s {
        beats.push(t);
        t += interval_s;
    }

    (tempo, beats)
}

fn fixed_interval_grid(default_bpm: f64, duration_s: f64) -> Vec<f64> {
    let interval = 60.0 / default_bpm;
    let mut beats = Vec::new();
    let mut t = 0.0;
    while t < duration_s {
        beats.push(t);
        t += interval;
    }
    beats
}

/// Full BPM detection pipeline with octave correction and vibe-range
/// clamping (§4.J).
pub fn detect_bpm_grid(samples: &[f32], sample_rate: u32, profile: &Profile) -> BpmGrid {
    let duration_s = samples.len() as f64 / sample_rate.max(1) as f64;
    let (mut tempo, mut beats) = detect_beats(samples, sample_rate, profile.default_bpm);

    let beats_in_first_30s = beats.iter().filter(|&&t| t < EARLY_WINDOW_S).count();
    let non_beat_tracked = tempo == 0.0 || beats.is_empty() || beats_in_first_30s < MIN_BEATS_FIRST_30S;

    if non_beat_tracked {
        return BpmGrid {
            detected_bpm: profile.default_bpm,
            beat_times_s: fixed_interval_grid(profile.default_bpm, duration_s),
            downbeat_times_s: Vec::new(),
            source: BpmSource::VibeDefault,
        };
    }

    if !profile.bpm_range.contains(tempo) {
        let halved = tempo / 2.0;
        let doubled = tempo * 2.0;
        let halved_dist = distance_to_range(halved, profile.bpm_range);
        let doubled_dist = distance_to_range(doubled, profile.bpm_range);

        if halved_dist <= doubled_dist && halved_dist < distance_to_range(tempo, profile.bpm_range) {
            tempo = halved;
            beats = beats.iter().step_by(2).copied().collect();
        } else if doubled_dist < distance_to_range(tempo, profile.bpm_range) {
            tempo = doubled;
            beats = interleave_doubled(&beats);
        }
    }

    let clamped_tempo = profile.bpm_range.clamp(tempo);

    let downbeats: Vec<f64> = beats.iter().step_by(4).copied().collect();

    BpmGrid {
        detected_bpm: clamped_tempo,
        beat_times_s: beats,
        downbeat_times_s: downbeats,
        source: BpmSource::Detected,
    }
}

fn distance_to_range(value: f64, range: crate::vibe::BpmRange) -> f64 {
    if value < range.min {
        range.min - value
    } else if value > range.max {
        value - range.max
    } else {
        0.0
    }
}

fn interleave_doubled(beats: &[f64]) -> Vec<f64> {
    let mut doubled = Vec::with_capacity(beats.len() * 2);
    for window in beats.windows(2) {
        doubled.push(window[0]);
        doubled.push((window[0] + window[1]) / 2.0);
    }
    if let Some(&last) = beats.last() {
        doubled.push(last);
    }
    doubled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vibe::profile;

    fn synth_click_track(bpm: f64, sample_rate: u32, duration_s: f64) -> Vec<f32> {
        let interval_samples = (60.0 / bpm * sample_rate as f64) as usize;
        let n = (duration_s * sample_rate as f64) as usize;
        let mut samples = vec![0.0f32; n];
        let mut i = 0;
        while i < n {
            samples[i] = 1.0;
            i += interval_samples.max(1);
        }
        samples
    }

    #[test]
    fn test_tag_hash_is_order_independent() {
        let a = tag_hash(&["action".to_string(), "driving".to_string()]);
        let b = tag_hash(&["driving".to_string(), "action".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tag_hash_differs_for_different_tags() {
        let a = tag_hash(&["action".to_string()]);
        let b = tag_hash(&["horror".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_non_beat_tracked_falls_back_to_fixed_grid() {
        let p = profile("drama").unwrap();
        let silence = vec![0.0f32; 22050 * 5];
        let grid = detect_bpm_grid(&silence, 22050, p);
        assert_eq!(grid.source, BpmSource::VibeDefault);
        assert_eq!(grid.detected_bpm, p.default_bpm);
        assert!(grid.beat_times_s.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_bpm_grid_beats_strictly_increasing_and_nonnegative() {
        let p = profile("action").unwrap();
        let track = synth_click_track(140.0, 22050, 10.0);
        let grid = detect_bpm_grid(&track, 22050, p);
        assert!(grid.beat_times_s.iter().all(|&t| t >= 0.0));
        assert!(grid.beat_times_s.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_clamped_tempo_always_within_vibe_range() {
        let p = profile("action").unwrap();
        let track = synth_click_track(220.0, 22050, 10.0);
        let grid = detect_bpm_grid(&track, 22050, p);
        assert!(p.bpm_range.contains(grid.detected_bpm));
    }

    #[test]
    fn test_scenario_6_bpm_octave_correction_clamps_to_range_edge() {
        // 220 BPM, range [120, 160]: halved = 110 (still below 120),
        // doubled = 440 (further out); halved is closer, then clamp to 120.
        let p = profile("action").unwrap();
        assert_eq!((p.bpm_range.min, p.bpm_range.max), (120.0, 160.0));

        let tempo = 220.0;
        let halved = tempo / 2.0;
        let doubled = tempo * 2.0;
        assert!(distance_to_range(halved, p.bpm_range) < distance_to_range(doubled, p.bpm_range));
        assert!(distance_to_range(halved, p.bpm_range) < distance_to_range(tempo, p.bpm_range));

        let clamped = p.bpm_range.clamp(halved);
        assert_eq!(clamped, 120.0);
    }
}
