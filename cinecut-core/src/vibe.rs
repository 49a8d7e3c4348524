//! Vibe Profile Registry (§4.A). A frozen lookup table, loaded once at
//! process start; no mutation. All downstream math treats these as
//! parameters, never literals.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown vibe key: {0:?}")]
pub struct UnknownVibeError(pub String);

#[derive(Debug, Clone, Copy)]
pub struct ClipCountRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct BpmRange {
    pub min: f64,
    pub max: f64,
}

impl BpmRange {
    pub fn contains(self, bpm: f64) -> bool {
        bpm >= self.min && bpm <= self.max
    }

    pub fn clamp(self, bpm: f64) -> f64 {
        bpm.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub key: &'static str,
    pub act1_avg_cut_s: f64,
    pub act2_avg_cut_s: f64,
    pub act3_avg_cut_s: f64,
    pub target_clip_count: ClipCountRange,
    pub primary_transition: &'static str,
    pub secondary_transition: &'static str,
    pub audio_lufs_target: f64,
    pub dialogue_ratio_target: f64,
    pub lut_filename: &'static str,
    pub lut_intensity: f64,
    pub default_bpm: f64,
    pub bpm_range: BpmRange,
    pub music_tag_set: &'static [&'static str],
    pub duck_floor_db: f64,
}

macro_rules! profile {
    (
        $key:literal,
        cuts: ($a1:expr, $a2:expr, $a3:expr),
        clip_count: ($cmin:expr, $cmax:expr),
        transitions: ($prim:literal, $sec:literal),
        lufs: $lufs:expr,
        dialogue_ratio: $dr:expr,
        lut: ($lutfile:literal, $lutint:expr),
        bpm: ($default_bpm:expr, $bmin:expr, $bmax:expr),
        tags: [$($tag:literal),* $(,)?],
        duck_floor_db: $duck:expr $(,)?
    ) => {
        Profile {
            key: $key,
            act1_avg_cut_s: $a1,
            act2_avg_cut_s: $a2,
            act3_avg_cut_s: $a3,
            target_clip_count: ClipCountRange { min: $cmin, max: $cmax },
            primary_transition: $prim,
            secondary_transition: $sec,
            audio_lufs_target: $lufs,
            dialogue_ratio_target: $dr,
            lut_filename: $lutfile,
            lut_intensity: $lutint,
            default_bpm: $default_bpm,
            bpm_range: BpmRange { min: $bmin, max: $bmax },
            music_tag_set: &[$($tag),*],
            duck_floor_db: $duck,
        }
    };
}

/// The 18-entry registry (§2.A). Act cut durations and BPM ranges trend
/// faster/louder toward the action/horror end and slower/quieter toward
/// drama/documentary.
const PROFILES: &[Profile] = &[
    profile!("action", cuts: (3.5, 2.2, 1.4), clip_count: (28, 42),
        transitions: ("hard_cut", "whip_pan"), lufs: -14.0, dialogue_ratio: 0.25,
        lut: ("action_teal_orange.cube", 0.8), bpm: (140.0, 120.0, 160.0),
        tags: ["action", "driving", "percussive"], duck_floor_db: -14.0),
    profile!("horror", cuts: (4.5, 3.0, 1.8), clip_count: (22, 34),
        transitions: ("hard_cut", "flash_cut"), lufs: -16.0, dialogue_ratio: 0.15,
        lut: ("horror_desaturated.cube", 0.9), bpm: (70.0, 60.0, 90.0),
        tags: ["horror", "dark", "tension"], duck_floor_db: -18.0),
    profile!("drama", cuts: (6.0, 4.5, 3.0), clip_count: (18, 28),
        transitions: ("crossfade", "hard_cut"), lufs: -18.0, dialogue_ratio: 0.45,
        lut: ("drama_warm.cube", 0.5), bpm: (90.0, 70.0, 110.0),
        tags: ["drama", "emotional", "piano"], duck_floor_db: -16.0),
    profile!("comedy", cuts: (4.0, 3.0, 2.0), clip_count: (24, 36),
        transitions: ("hard_cut", "crossfade"), lufs: -15.0, dialogue_ratio: 0.40,
        lut: ("comedy_bright.cube", 0.4), bpm: (110.0, 95.0, 130.0),
        tags: ["comedy", "upbeat", "playful"], duck_floor_db: -14.0),
    profile!("thriller", cuts: (4.2, 2.8, 1.6), clip_count: (26, 38),
        transitions: ("hard_cut", "whip_pan"), lufs: -15.0, dialogue_ratio: 0.20,
        lut: ("thriller_cool.cube", 0.7), bpm: (118.0, 100.0, 140.0),
        tags: ["thriller", "suspense", "pulse"], duck_floor_db: -15.0),
    profile!("scifi", cuts: (4.8, 3.2, 1.9), clip_count: (24, 36),
        transitions: ("hard_cut", "glitch_cut"), lufs: -14.0, dialogue_ratio: 0.20,
        lut: ("scifi_blue.cube", 0.75), bpm: (128.0, 110.0, 150.0),
        tags: ["scifi", "synth", "epic"], duck_floor_db: -14.0),
    profile!("fantasy", cuts: (5.5, 4.0, 2.4), clip_count: (20, 32),
        transitions: ("crossfade", "hard_cut"), lufs: -16.0, dialogue_ratio: 0.30,
        lut: ("fantasy_gold.cube", 0.6), bpm: (100.0, 85.0, 120.0),
        tags: ["fantasy", "orchestral", "epic"], duck_floor_db: -16.0),
    profile!("romance", cuts: (7.0, 5.0, 3.2), clip_count: (16, 26),
        transitions: ("crossfade", "dissolve"), lufs: -18.0, dialogue_ratio: 0.50,
        lut: ("romance_soft.cube", 0.45), bpm: (85.0, 70.0, 100.0),
        tags: ["romance", "strings", "tender"], duck_floor_db: -18.0),
    profile!("war", cuts: (4.0, 2.6, 1.6), clip_count: (26, 38),
        transitions: ("hard_cut", "whip_pan"), lufs: -14.0, dialogue_ratio: 0.20,
        lut: ("war_desaturated.cube", 0.7), bpm: (100.0, 85.0, 125.0),
        tags: ["war", "percussive", "brass"], duck_floor_db: -14.0),
    profile!("heist", cuts: (4.5, 3.0, 1.8), clip_count: (24, 34),
        transitions: ("hard_cut", "whip_pan"), lufs: -15.0, dialogue_ratio: 0.30,
        lut: ("heist_cool.cube", 0.6), bpm: (124.0, 105.0, 145.0),
        tags: ["heist", "groove", "bass"], duck_floor_db: -15.0),
    profile!("mystery", cuts: (6.0, 4.2, 2.6), clip_count: (18, 28),
        transitions: ("crossfade", "hard_cut"), lufs: -17.0, dialogue_ratio: 0.35,
        lut: ("mystery_cool.cube", 0.55), bpm: (88.0, 75.0, 108.0),
        tags: ["mystery", "moody", "ambient"], duck_floor_db: -17.0),
    profile!("documentary", cuts: (8.0, 6.0, 4.0), clip_count: (14, 22),
        transitions: ("crossfade", "hard_cut"), lufs: -20.0, dialogue_ratio: 0.60,
        lut: ("documentary_natural.cube", 0.2), bpm: (80.0, 65.0, 100.0),
        tags: ["documentary", "neutral", "subtle"], duck_floor_db: -18.0),
    profile!("musical", cuts: (3.0, 2.0, 1.2), clip_count: (28, 44),
        transitions: ("hard_cut", "crossfade"), lufs: -13.0, dialogue_ratio: 0.15,
        lut: ("musical_vivid.cube", 0.6), bpm: (126.0, 110.0, 150.0),
        tags: ["musical", "dance", "vocal"], duck_floor_db: -12.0),
    profile!("crime", cuts: (4.8, 3.2, 2.0), clip_count: (22, 32),
        transitions: ("hard_cut", "crossfade"), lufs: -15.0, dialogue_ratio: 0.35,
        lut: ("crime_cool.cube", 0.65), bpm: (100.0, 85.0, 120.0),
        tags: ["crime", "noir", "bass"], duck_floor_db: -15.0),
    profile!("western", cuts: (6.5, 4.5, 2.8), clip_count: (16, 26),
        transitions: ("crossfade", "hard_cut"), lufs: -16.0, dialogue_ratio: 0.30,
        lut: ("western_sepia.cube", 0.7), bpm: (95.0, 78.0, 115.0),
        tags: ["western", "twang", "dusty"], duck_floor_db: -16.0),
    profile!("animated", cuts: (3.2, 2.2, 1.4), clip_count: (28, 40),
        transitions: ("hard_cut", "whip_pan"), lufs: -13.0, dialogue_ratio: 0.30,
        lut: ("animated_vivid.cube", 0.5), bpm: (120.0, 100.0, 140.0),
        tags: ["animated", "playful", "bright"], duck_floor_db: -13.0),
    profile!("sports", cuts: (3.6, 2.4, 1.4), clip_count: (26, 40),
        transitions: ("hard_cut", "whip_pan"), lufs: -13.0, dialogue_ratio: 0.20,
        lut: ("sports_punchy.cube", 0.7), bpm: (134.0, 115.0, 155.0),
        tags: ["sports", "anthemic", "drive"], duck_floor_db: -13.0),
    profile!("family", cuts: (5.0, 3.6, 2.2), clip_count: (20, 30),
        transitions: ("crossfade", "hard_cut"), lufs: -16.0, dialogue_ratio: 0.40,
        lut: ("family_warm.cube", 0.4), bpm: (108.0, 90.0, 128.0),
        tags: ["family", "warm", "hopeful"], duck_floor_db: -15.0),
];

/// Resolves a vibe key against the frozen registry.
pub fn profile(key: &str) -> Result<&'static Profile, UnknownVibeError> {
    PROFILES
        .iter()
        .find(|p| p.key == key)
        .ok_or_else(|| UnknownVibeError(key.to_string()))
}

pub fn all_keys() -> Vec<&'static str> {
    PROFILES.iter().map(|p| p.key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_eighteen_entries() {
        assert_eq!(PROFILES.len(), 18);
    }

    #[test]
    fn test_keys_are_unique() {
        let mut keys: Vec<&str> = all_keys();
        keys.sort_unstable();
        let mut deduped = keys.clone();
        deduped.dedup();
        assert_eq!(keys.len(), deduped.len());
    }

    #[test]
    fn test_profile_lookup_known_key() {
        let p = profile("action").unwrap();
        assert_eq!(p.key, "action");
        assert!(p.bpm_range.contains(p.default_bpm));
    }

    #[test]
    fn test_profile_lookup_unknown_key_fails() {
        let err = profile("not-a-vibe").unwrap_err();
        assert_eq!(err.0, "not-a-vibe");
    }

    #[test]
    fn test_every_profile_default_bpm_within_its_own_range() {
        for p in PROFILES {
            assert!(
                p.bpm_range.contains(p.default_bpm),
                "{} default_bpm {} outside range {:?}",
                p.key,
                p.default_bpm,
                (p.bpm_range.min, p.bpm_range.max)
            );
        }
    }

    #[test]
    fn test_every_profile_clip_count_range_well_formed() {
        for p in PROFILES {
            assert!(p.target_clip_count.min < p.target_clip_count.max);
        }
    }
}
