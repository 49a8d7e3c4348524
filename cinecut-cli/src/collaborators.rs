//! Real (non-test) implementations of the core's collaborator traits:
//! an ffmpeg/ffprobe subprocess transcoder, a reqwest-backed model runtime,
//! an SRT/ASS subtitle reader, and an ffmpeg filtergraph runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cinecut_core::collaborators::{
    CompletionRequest, CompletionResponse, FiltergraphRunner, ModelRuntime, MusicApi, ProbeResult,
    ReviewGate, SubtitleSource, Transcoder,
};
use cinecut_core::mixplan::MixPlan;
use cinecut_core::models::DialogueEvent;
use tokio::process::Command;

/// Shells out to `ffmpeg`/`ffprobe`, mirroring the subprocess pattern the
/// scene-extraction pipeline uses for keyframe grabbing.
pub struct FfmpegTranscoder;

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn extract_proxy(&self, source: &Path, work_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(work_dir)
            .with_context(|| format!("creating work dir {}", work_dir.display()))?;
        let proxy_path = work_dir.join("proxy_420p_24fps.mp4");

        let status = Command::new("ffmpeg")
            .args([
                "-y",
                "-i",
                source.to_str().context("source path is not valid UTF-8")?,
                "-vf",
                "scale=-2:420,fps=24",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-an",
                proxy_path.to_str().context("work dir path is not valid UTF-8")?,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await
            .context("spawning ffmpeg for proxy extraction")?;

        if !status.success() {
            anyhow::bail!("ffmpeg exited non-zero extracting proxy for {}", source.display());
        }

        Ok(proxy_path)
    }

    async fn extract_frame(&self, proxy: &Path, timestamp_s: f64, out_path: &Path) -> Result<()> {
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let status = Command::new("ffmpeg")
            .args([
                "-y",
                "-ss",
                &format!("{timestamp_s:.3}"),
                "-i",
                proxy.to_str().context("proxy path is not valid UTF-8")?,
                "-frames:v",
                "1",
                "-q:v",
                "2",
                out_path.to_str().context("out path is not valid UTF-8")?,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await
            .context("spawning ffmpeg for frame extraction")?;

        if !status.success() {
            anyhow::bail!("ffmpeg exited non-zero extracting frame at {timestamp_s}s");
        }
        Ok(())
    }

    async fn extract_audio_segment(
        &self,
        source: &Path,
        start_s: f64,
        end_s: f64,
        out_path: &Path,
    ) -> Result<()> {
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let status = Command::new("ffmpeg")
            .args([
                "-y",
                "-ss",
                &format!("{start_s:.3}"),
                "-to",
                &format!("{end_s:.3}"),
                "-i",
                source.to_str().context("source path is not valid UTF-8")?,
                "-vn",
                "-ar",
                "48000",
                "-ac",
                "2",
                out_path.to_str().context("out path is not valid UTF-8")?,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await
            .context("spawning ffmpeg for audio segment extraction")?;

        if !status.success() {
            anyhow::bail!("ffmpeg exited non-zero extracting audio segment [{start_s}, {end_s}]");
        }
        Ok(())
    }

    async fn probe(&self, source: &Path) -> Result<ProbeResult> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                source.to_str().context("source path is not valid UTF-8")?,
            ])
            .output()
            .await
            .context("spawning ffprobe")?;

        if !output.status.success() {
            anyhow::bail!("ffprobe failed for {}", source.display());
        }

        let parsed: serde_json::Value =
            serde_json::from_slice(&output.stdout).context("parsing ffprobe JSON output")?;

        let duration_s: f64 = parsed["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        let video_stream = parsed["streams"]
            .as_array()
            .and_then(|streams| streams.iter().find(|s| s["codec_type"] == "video"));

        let width = video_stream.and_then(|s| s["width"].as_u64()).unwrap_or(0) as u32;
        let height = video_stream.and_then(|s| s["height"].as_u64()).unwrap_or(0) as u32;
        let fps = video_stream
            .and_then(|s| s["r_frame_rate"].as_str())
            .and_then(parse_rational_fps)
            .unwrap_or(0.0);

        Ok(ProbeResult { duration_s, width, height, fps })
    }
}

fn parse_rational_fps(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

/// HTTP completion client against the vision/text model runtime endpoints
/// (§6). One instance per base URL; the orchestrator tears one down before
/// standing up the other.
pub struct HttpModelRuntime {
    client: reqwest::Client,
    base_url: String,
}

impl HttpModelRuntime {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl ModelRuntime for HttpModelRuntime {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .timeout(std::time::Duration::from_secs(request.timeout_s))
            .json(request)
            .send()
            .await
            .with_context(|| format!("calling model runtime at {}", self.base_url))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("model runtime returned an error: {body}");
        }

        response.json::<CompletionResponse>().await.context("parsing model runtime response")
    }
}

/// Reads SRT/ASS subtitle files. Encoding detection falls back through
/// UTF-8 before surfacing `SubtitleError` (§7).
pub struct FileSubtitleSource;

impl SubtitleSource for FileSubtitleSource {
    fn load(&self, subtitle_path: &Path) -> Result<Vec<DialogueEvent>> {
        let bytes = std::fs::read(subtitle_path)
            .with_context(|| format!("reading subtitle file {}", subtitle_path.display()))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| cinecut_core::error::CineCutError::subtitle(subtitle_path.to_path_buf()))?;

        let is_ass = subtitle_path.extension().and_then(|e| e.to_str()) == Some("ass");
        if is_ass {
            parse_ass(&text)
        } else {
            parse_srt(&text)
        }
    }
}

fn parse_srt(text: &str) -> Result<Vec<DialogueEvent>> {
    let mut events = Vec::new();
    for block in text.split("\n\n") {
        let lines: Vec<&str> = block.lines().collect();
        if lines.len() < 3 {
            continue;
        }
        let Some(timing_line) = lines.iter().find(|l| l.contains("-->")) else { continue };
        let Some((start_ms, end_ms)) = parse_srt_timing(timing_line) else { continue };
        let timing_index = lines.iter().position(|l| l == timing_line).unwrap_or(0);
        let plaintext = lines[(timing_index + 1)..].join(" ").trim().to_string();
        if plaintext.is_empty() {
            continue;
        }
        let emotion = cinecut_core::models::classify_emotion(&plaintext);
        events.push(DialogueEvent { start_ms, end_ms, plaintext, speaker: None, emotion });
    }
    Ok(events)
}

fn parse_srt_timing(line: &str) -> Option<(u64, u64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_srt_timestamp(start.trim())?, parse_srt_timestamp(end.trim())?))
}

fn parse_srt_timestamp(s: &str) -> Option<u64> {
    let s = s.replace(',', ".");
    let (hms, millis) = s.split_once('.')?;
    let mut parts = hms.split(':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let sec: u64 = parts.next()?.parse().ok()?;
    let ms: u64 = millis.parse().ok()?;
    Some(h * 3_600_000 + m * 60_000 + sec * 1000 + ms)
}

fn parse_ass(text: &str) -> Result<Vec<DialogueEvent>> {
    let mut events = Vec::new();
    for line in text.lines() {
        if !line.starts_with("Dialogue:") {
            continue;
        }
        let fields: Vec<&str> = line.trim_start_matches("Dialogue:").splitn(10, ',').collect();
        if fields.len() < 10 {
            continue;
        }
        let Some(start_ms) = parse_ass_timestamp(fields[1].trim()) else { continue };
        let Some(end_ms) = parse_ass_timestamp(fields[2].trim()) else { continue };
        let speaker = {
            let name = fields[4].trim();
            if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            }
        };
        let plaintext = fields[9].replace("\\N", " ").trim().to_string();
        if plaintext.is_empty() {
            continue;
        }
        let emotion = cinecut_core::models::classify_emotion(&plaintext);
        events.push(DialogueEvent { start_ms, end_ms, plaintext, speaker, emotion });
    }
    Ok(events)
}

fn parse_ass_timestamp(s: &str) -> Option<u64> {
    let mut parts = s.split(':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let sec_cs: f64 = parts.next()?.parse().ok()?;
    Some(h * 3_600_000 + m * 60_000 + (sec_cs * 1000.0) as u64)
}

/// Builds and runs the final filtergraph via ffmpeg, translating the
/// declarative `MixPlan` into `amix`/`sidechaincompress`/`loudnorm` filters.
pub struct FfmpegFiltergraphRunner;

#[async_trait]
impl FiltergraphRunner for FfmpegFiltergraphRunner {
    async fn run(&self, plan: &MixPlan, input_paths: &[PathBuf], output_path: &Path) -> Result<()> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y");
        for path in input_paths {
            cmd.arg("-i").arg(path);
        }

        let filter = build_filtergraph(plan, input_paths.len());
        cmd.args(["-filter_complex", &filter, "-map", "[mixout]", "-ar", "48000", "-ac", "2"]);
        cmd.arg(output_path);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());

        let status = cmd.status().await.context("spawning ffmpeg filtergraph")?;
        if !status.success() {
            anyhow::bail!("ffmpeg filtergraph run failed for {}", output_path.display());
        }
        Ok(())
    }
}

fn build_filtergraph(plan: &MixPlan, input_count: usize) -> String {
    let mut segments = Vec::new();
    let mut mix_inputs = Vec::new();
    let mut index = 0usize;

    let mut normalize_stem = |label: &str, target_lufs: f64, idx: usize| {
        segments.push(format!("[{idx}:a]loudnorm=I={target_lufs}:TP=-1.5:LRA=11[{label}]"));
        mix_inputs.push(format!("[{label}]"));
    };

    normalize_stem("film", plan.film_audio.normalize.target_lufs, index);
    index += 1;
    if let Some(music) = &plan.music_bed {
        if let Some(ducking) = &plan.ducking {
            segments.push(format!(
                "[{idx}:a][film]sidechaincompress=threshold={th}dB:ratio={ratio}:attack={attack}:release={release}[music_ducked]",
                idx = index,
                th = ducking.threshold_db,
                ratio = ducking.ratio,
                attack = ducking.attack_ms,
                release = ducking.release_ms,
            ));
            segments.push(format!(
                "[music_ducked]loudnorm=I={}:TP=-1.5:LRA=11[music]",
                music.normalize.target_lufs
            ));
        } else {
            normalize_stem("music", music.normalize.target_lufs, index);
        }
        mix_inputs.push("[music]".to_string());
        index += 1;
    }
    normalize_stem("sfx", plan.sfx_track.normalize.target_lufs, index);
    index += 1;
    normalize_stem("vo", plan.vo_track.normalize.target_lufs, index);
    index += 1;
    let _ = input_count;

    segments.push(format!(
        "{}amix=inputs={}:normalize={}[mixout]",
        mix_inputs.join(""),
        mix_inputs.len(),
        plan.final_mix_normalize
    ));

    segments.join(";")
}

/// Placeholder `MusicApi` that never finds a track; a real deployment wires
/// in the operator's royalty-free catalog endpoint. Graceful degradation
/// (§4.J) means the pipeline is fully correct with this collaborator alone.
pub struct NullMusicApi;

#[async_trait]
impl MusicApi for NullMusicApi {
    async fn search_and_fetch(&self, _tags: &[String], _cache_dir: &Path) -> Option<PathBuf> {
        None
    }
}

/// Blocks on a line from stdin. Reading happens on the blocking thread pool
/// since stdin is not cancel-safe against the SIGTERM select in `main.rs`.
pub struct StdinReviewGate;

#[async_trait]
impl ReviewGate for StdinReviewGate {
    async fn wait_for_approval(&self, manifest_path: &Path) -> Result<()> {
        println!(
            "manifest written to {}; review it, then press Enter to continue to conform...",
            manifest_path.display()
        );
        tokio::task::spawn_blocking(|| {
            use std::io::BufRead;
            let stdin = std::io::stdin();
            let mut line = String::new();
            stdin.lock().read_line(&mut line)
        })
        .await
        .context("review-gate stdin reader task panicked")?
        .context("reading approval from stdin")?;
        Ok(())
    }
}
