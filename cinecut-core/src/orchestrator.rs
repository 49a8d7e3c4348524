//! Stage Orchestrator (§4.M): the top-level state machine. Sequences all
//! nine stages with checkpoint guards, cache lookups, cascade invalidation,
//! and GPU-lock acquisition. Single-threaded cooperative execution (§5) —
//! a plain `for stage in STAGE_ORDER` loop, no task spawning for sequencing.

use std::path::PathBuf;

use log::{error, info, warn};

use crate::checkpoint::{self, invalidate_on_anchor_change, invalidate_on_inference_miss};
use crate::collaborators::ReviewGate;
use crate::config::RunConfig;
use crate::error::CineCutError;
use crate::models::{Checkpoint, ProgressCallback, SourceFingerprint, Stage, STAGE_ORDER};

/// Injected progress interface (§6 collaborator: "progress display").
pub struct Progress {
    callback: Option<ProgressCallback>,
    total: usize,
}

impl Progress {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self { callback, total: STAGE_ORDER.len() }
    }

    fn emit(&self, stage_index: usize, message: &str) {
        if let Some(cb) = &self.callback {
            cb(stage_index + 1, self.total, message);
        }
    }
}

/// Orchestrator run outcome: which stages actually executed vs were
/// skipped, for the "cache hit: N frames loaded"-style scenario assertions
/// (§8 scenario 2).
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub executed_stages: Vec<Stage>,
    pub skipped_stages: Vec<Stage>,
    pub inference_cache_hit_frames: usize,
    pub manifest_path: Option<PathBuf>,
}

/// Determines the checkpoint to start from, applying the fingerprint-mismatch
/// cascade rule (§4.C, §4.M: "if source fingerprint mismatches, invalidates
/// all and starts from stage 1").
pub fn load_or_init_checkpoint(work_dir: &std::path::Path, fingerprint: &SourceFingerprint) -> Checkpoint {
    match checkpoint::load(work_dir, fingerprint) {
        Some(existing) => existing,
        None => Checkpoint::new(fingerprint.clone()),
    }
}

/// Stage execution context threaded through the loop body. Each stage
/// function receives exactly what it needs and returns whether it ran or
/// was skipped, so the orchestrator body stays uniform across stages.
pub enum StageOutcome {
    Skipped,
    Ran,
    RanPartial { cache_hit_frames: usize },
}

/// Runs every stage in order, applying checkpoint guards and persisting
/// progress after each stage (§4.M). `run_stage` is injected so callers
/// (and tests) can supply stage bodies without the orchestrator depending
/// on every collaborator concretely.
pub async fn run_pipeline<F, Fut>(
    config: &RunConfig,
    work_dir: &std::path::Path,
    progress: &Progress,
    review_gate: &dyn ReviewGate,
    mut run_stage: F,
) -> anyhow::Result<RunReport>
where
    F: FnMut(Stage, &mut Checkpoint) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<StageOutcome>>,
{
    let fingerprint = SourceFingerprint::from_path(&config.source_path)
        .map_err(|e| CineCutError::input_with_path(config.source_path.clone(), e.to_string()))?;

    let mut checkpoint = load_or_init_checkpoint(work_dir, &fingerprint);
    let mut report = RunReport::default();

    for (index, &stage) in STAGE_ORDER.iter().enumerate() {
        if checkpoint.is_complete(stage) {
            info!("stage {stage:?} already complete, skipping");
            progress.emit(index, &format!("{stage:?}: skipped (checkpoint)"));
            report.skipped_stages.push(stage);
            continue;
        }

        progress.emit(index, &format!("{stage:?}: running"));

        // Stage bodies hold `&mut Checkpoint` so they can call
        // `notify_inference_cache_miss`/`notify_anchors_changed` themselves
        // the moment they detect the triggering condition, rather than the
        // loop having to re-derive it from the stage's return value.
        let outcome = match run_stage(stage, &mut checkpoint).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The checkpoint records only the last fully-completed
                // stage, never the failing one (§4.M).
                error!("stage {stage:?} failed: {e:#}");
                if let Err(save_err) = checkpoint::save_atomic(work_dir, &checkpoint) {
                    warn!("failed to persist checkpoint after stage failure: {save_err}");
                }
                return Err(e);
            }
        };

        match outcome {
            StageOutcome::Skipped => {
                report.skipped_stages.push(stage);
            }
            StageOutcome::Ran => {
                report.executed_stages.push(stage);
                checkpoint.mark_complete(stage);
            }
            StageOutcome::RanPartial { cache_hit_frames } => {
                report.executed_stages.push(stage);
                report.inference_cache_hit_frames = cache_hit_frames;
                checkpoint.mark_complete(stage);
            }
        }

        checkpoint::save_atomic(work_dir, &checkpoint)?;

        // `--review`: pause right after the manifest the operator wants to
        // inspect is complete, before conform renders anything (§6).
        if stage == Stage::Assembly && config.review {
            let manifest_path = work_dir.join("TRAILER_MANIFEST.json");
            info!("review requested, pausing before conform");
            review_gate.wait_for_approval(&manifest_path).await?;
        }
    }

    Ok(report)
}

/// Called by the inference stage body when the cache misses due to changed
/// metadata: clears {narrative, assembly, conform} (§4.C, §4.M).
pub fn notify_inference_cache_miss(checkpoint: &mut Checkpoint) {
    invalidate_on_inference_miss(checkpoint);
}

/// Called by the structural-analysis stage body when anchors differ from a
/// prior run: clears {zone_matching, narrative, assembly, conform} (§4.C).
pub fn notify_anchors_changed(checkpoint: &mut Checkpoint) {
    invalidate_on_anchor_change(checkpoint);
}

/// Manifest schema version mismatch on load is treated as if narrative
/// never ran (§4.M cascade rule).
pub fn notify_manifest_schema_mismatch(checkpoint: &mut Checkpoint) {
    checkpoint.invalidate_cascade(Stage::Narrative);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoReviewGate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn make_config(source_path: PathBuf) -> RunConfig {
        let mut cfg = RunConfig::default();
        cfg.source_path = source_path;
        cfg
    }

    #[tokio::test]
    async fn test_fresh_run_executes_every_stage() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("film.mkv");
        std::fs::write(&source, b"source-bytes").unwrap();
        let work_dir = dir.path().join("work");

        let progress = Progress::new(None);
        let config = make_config(source);

        let report = run_pipeline(&config, &work_dir, &progress, &NoReviewGate, |_stage, _checkpoint| async {
            Ok(StageOutcome::Ran)
        })
        .await
        .unwrap();

        assert_eq!(report.executed_stages.len(), STAGE_ORDER.len());
        assert!(report.skipped_stages.is_empty());
    }

    #[tokio::test]
    async fn test_resume_skips_completed_stages() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("film.mkv");
        std::fs::write(&source, b"source-bytes").unwrap();
        let work_dir = dir.path().join("work");

        let fingerprint = SourceFingerprint::from_path(&source).unwrap();
        let mut checkpoint = Checkpoint::new(fingerprint);
        checkpoint.mark_complete(Stage::Proxy);
        checkpoint.mark_complete(Stage::Subtitles);
        checkpoint.mark_complete(Stage::StructuralAnalysis);
        checkpoint.mark_complete(Stage::Keyframes);
        std::fs::create_dir_all(&work_dir).unwrap();
        checkpoint::save_atomic(&work_dir, &checkpoint).unwrap();

        let progress = Progress::new(None);
        let config = make_config(source);

        let executed_count = Arc::new(AtomicUsize::new(0));
        let executed_count_clone = executed_count.clone();

        let report = run_pipeline(&config, &work_dir, &progress, &NoReviewGate, move |_stage, _checkpoint| {
            let executed_count = executed_count_clone.clone();
            async move {
                executed_count.fetch_add(1, Ordering::SeqCst);
                Ok(StageOutcome::Ran)
            }
        })
        .await
        .unwrap();

        assert_eq!(report.skipped_stages.len(), 4);
        assert_eq!(executed_count.load(Ordering::SeqCst), STAGE_ORDER.len() - 4);
    }

    #[tokio::test]
    async fn test_source_fingerprint_change_restarts_from_stage_one() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("film.mkv");
        std::fs::write(&source, b"original-bytes").unwrap();
        let work_dir = dir.path().join("work");

        let original_fp = SourceFingerprint::from_path(&source).unwrap();
        let mut checkpoint = Checkpoint::new(original_fp);
        for s in STAGE_ORDER {
            checkpoint.mark_complete(*s);
        }
        std::fs::create_dir_all(&work_dir).unwrap();
        checkpoint::save_atomic(&work_dir, &checkpoint).unwrap();

        // Replace the source with different content/size.
        std::fs::write(&source, b"a-very-different-and-longer-payload").unwrap();

        let progress = Progress::new(None);
        let config = make_config(source);

        let report = run_pipeline(&config, &work_dir, &progress, &NoReviewGate, |_stage, _checkpoint| async {
            Ok(StageOutcome::Ran)
        })
        .await
        .unwrap();

        assert_eq!(report.executed_stages.len(), STAGE_ORDER.len());
    }

    struct CountingReviewGate(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl ReviewGate for CountingReviewGate {
        async fn wait_for_approval(&self, _manifest_path: &std::path::Path) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_review_gate_fires_once_after_assembly_when_requested() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("film.mkv");
        std::fs::write(&source, b"source-bytes").unwrap();
        let work_dir = dir.path().join("work");

        let progress = Progress::new(None);
        let mut config = make_config(source);
        config.review = true;

        let gate_calls = Arc::new(AtomicUsize::new(0));
        let gate = CountingReviewGate(gate_calls.clone());

        run_pipeline(&config, &work_dir, &progress, &gate, |_stage, _checkpoint| async {
            Ok(StageOutcome::Ran)
        })
        .await
        .unwrap();

        assert_eq!(gate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_review_gate_not_called_when_review_is_off() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("film.mkv");
        std::fs::write(&source, b"source-bytes").unwrap();
        let work_dir = dir.path().join("work");

        let progress = Progress::new(None);
        let config = make_config(source);
        assert!(!config.review);

        let gate_calls = Arc::new(AtomicUsize::new(0));
        let gate = CountingReviewGate(gate_calls.clone());

        run_pipeline(&config, &work_dir, &progress, &gate, |_stage, _checkpoint| async {
            Ok(StageOutcome::Ran)
        })
        .await
        .unwrap();

        assert_eq!(gate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_mark_failing_stage_complete() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("film.mkv");
        std::fs::write(&source, b"source-bytes").unwrap();
        let work_dir = dir.path().join("work");

        let progress = Progress::new(None);
        let config = make_config(source.clone());

        let result = run_pipeline(&config, &work_dir, &progress, &NoReviewGate, |stage, _checkpoint| async move {
            if stage == Stage::Keyframes {
                anyhow::bail!("simulated inference crash");
            }
            Ok(StageOutcome::Ran)
        })
        .await;

        assert!(result.is_err());

        let fingerprint = SourceFingerprint::from_path(&source).unwrap();
        let checkpoint = checkpoint::load(&work_dir, &fingerprint).unwrap();
        assert!(checkpoint.is_complete(Stage::StructuralAnalysis));
        assert!(!checkpoint.is_complete(Stage::Keyframes));
    }
}
