//! Mix Graph Planner (§4.L): composes four audio stems into a declarative
//! mix plan for the external filtergraph runner. Data, not FFmpeg syntax
//! (§9 design note) — deterministic given identical manifest input.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CineCutError;
use crate::models::{MusicBed, SfxEvent, VoClip};
use crate::vibe::Profile;

/// Every stem is resampled to 48kHz stereo before the mix node (§4.L
/// explicit plan invariant).
pub const MIX_SAMPLE_RATE_HZ: u32 = 48_000;
pub const MIX_CHANNELS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessNormalize {
    pub target_lufs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuckingParams {
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
    pub duck_floor_db: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stem {
    pub name: String,
    pub input_path: PathBuf,
    pub delay_s: f64,
    pub normalize: LoudnessNormalize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixPlan {
    pub sample_rate_hz: u32,
    pub channels: u32,
    pub film_audio: Stem,
    pub music_bed: Option<Stem>,
    pub sfx_track: Stem,
    pub vo_track: Stem,
    pub ducking: Option<DuckingParams>,
    /// `amix` is run with `normalize=0`: `normalize=1` would collapse the
    /// ducking dynamics (§4.L, critical invariant).
    pub final_mix_normalize: u8,
}

impl MixPlan {
    pub fn required_input_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.film_audio.input_path.clone()];
        if let Some(music) = &self.music_bed {
            paths.push(music.input_path.clone());
        }
        paths.push(self.sfx_track.input_path.clone());
        paths.push(self.vo_track.input_path.clone());
        paths
    }
}

fn stem(name: &str, path: PathBuf, delay_s: f64, target_lufs: f64) -> Stem {
    Stem {
        name: name.to_string(),
        input_path: path,
        delay_s,
        normalize: LoudnessNormalize { target_lufs },
    }
}

/// Builds the mix plan described by §4.L. `sfx_track_path` and
/// `vo_track_path` name pre-rendered single-WAV tracks (silence + placed
/// events); this planner does not itself render audio.
pub fn build_mix_plan(
    profile: &Profile,
    film_audio_path: PathBuf,
    music_bed: Option<&MusicBed>,
    music_track_path: Option<PathBuf>,
    sfx_track_path: PathBuf,
    vo_track_path: PathBuf,
    _sfx_events: &[SfxEvent],
    _vo_clips: &[VoClip],
) -> Result<MixPlan, CineCutError> {
    let film_stem = stem("film_audio", film_audio_path, 0.0, profile.audio_lufs_target);
    let sfx_stem = stem("sfx_track", sfx_track_path, 0.0, profile.audio_lufs_target - 3.0);
    let vo_stem = stem("vo_track", vo_track_path, 0.0, -16.0);

    let music_stem = match (music_bed, music_track_path) {
        (Some(_bed), Some(path)) => Some(stem("music_bed", path, 0.0, profile.audio_lufs_target - 6.0)),
        (None, None) => None,
        _ => {
            return Err(CineCutError::mix_plan(
                "music_bed metadata present without a resolved track path, or vice versa",
            ))
        }
    };

    let ducking = music_stem.as_ref().map(|_| DuckingParams {
        threshold_db: -24.0,
        ratio: 4.0,
        attack_ms: 100.0,
        release_ms: 300.0,
        duck_floor_db: music_bed.map(|b| b.duck_floor_db).unwrap_or(profile.duck_floor_db),
    });

    Ok(MixPlan {
        sample_rate_hz: MIX_SAMPLE_RATE_HZ,
        channels: MIX_CHANNELS,
        film_audio: film_stem,
        music_bed: music_stem,
        sfx_track: sfx_stem,
        vo_track: vo_stem,
        ducking,
        final_mix_normalize: 0,
    })
}
