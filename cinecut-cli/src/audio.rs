//! PCM WAV helpers for the pre-mix stems: reading a mono analysis track for
//! BPM detection, and writing the synthesized SFX/VO/silence tracks the
//! mix planner expects as single whole-trailer-length files.

use std::path::Path;

use anyhow::{Context, Result};

pub const SAMPLE_RATE_HZ: u32 = 48_000;

/// Reads a WAV file down to mono f32 samples, resampling trivially by
/// averaging channels (no rate conversion — callers that need
/// `MUSIC_ANALYSIS_SR` extract the segment at that rate via ffmpeg first).
pub fn read_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("opening WAV {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => {
            reader.samples::<f32>().collect::<std::result::Result<Vec<_>, _>>()?
        }
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / i32::MAX as f32)
            .collect(),
    };

    if channels <= 1 {
        return Ok((samples, spec.sample_rate));
    }

    let mono: Vec<f32> = samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Writes a mono or stereo f32 track to a 16-bit PCM WAV at 48kHz.
pub fn write_wav(path: &Path, samples: &[f32], channels: u16) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: SAMPLE_RATE_HZ,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating WAV {}", path.display()))?;
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        writer.write_sample((clamped * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Builds a silent buffer of `duration_s` at 48kHz mono, used as the
/// canvas that SFX/VO tracks place their events/lines into.
pub fn silence(duration_s: f64) -> Vec<f32> {
    vec![0.0; (duration_s * SAMPLE_RATE_HZ as f64).round() as usize]
}

/// Overlays `clip` into `canvas` starting at `start_s`, clamping to bounds.
pub fn overlay(canvas: &mut [f32], clip: &[f32], start_s: f64) {
    let start_sample = (start_s * SAMPLE_RATE_HZ as f64).round() as usize;
    for (i, &s) in clip.iter().enumerate() {
        let idx = start_sample + i;
        if idx >= canvas.len() {
            break;
        }
        canvas[idx] += s;
    }
}

/// Synthesizes a linear frequency sweep with a half-cosine envelope — the
/// deterministic SFX tone the planner's tier/duration/frequency parameters
/// describe (§4.K).
pub fn synth_sweep(duration_s: f64, start_hz: f64, end_hz: f64) -> Vec<f32> {
    let n = (duration_s * SAMPLE_RATE_HZ as f64).round() as usize;
    let mut phase = 0.0f64;
    (0..n)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE_HZ as f64;
            let frac = if duration_s > 0.0 { t / duration_s } else { 0.0 };
            let freq = start_hz + (end_hz - start_hz) * frac;
            phase += 2.0 * std::f64::consts::PI * freq / SAMPLE_RATE_HZ as f64;
            let envelope = 0.5 * (1.0 - (std::f64::consts::PI * frac).cos());
            (phase.sin() * envelope) as f32
        })
        .collect()
}
