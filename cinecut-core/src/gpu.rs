//! GPU Serializer (§4.E): process-wide mutual exclusion over GPU-using code
//! paths. The lock is held for the full lifetime of a model session, not
//! per-request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::sleep;

use crate::error::CineCutError;

/// VRAM floor for the vision model, MiB.
pub const VRAM_FLOOR_VISION_MIB: u64 = 6144;
/// VRAM floor for the text model, MiB.
pub const VRAM_FLOOR_TEXT_MIB: u64 = 4096;

/// Poll timeout between model swaps, seconds (§4.E).
pub const VRAM_POLL_TIMEOUT_S: u64 = 15;
/// Minimum floor even if polling reports success quickly (§4.E).
pub const VRAM_POLL_MIN_FLOOR_S: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Vision,
    Text,
}

impl ModelKind {
    pub fn vram_floor_mib(self) -> u64 {
        match self {
            ModelKind::Vision => VRAM_FLOOR_VISION_MIB,
            ModelKind::Text => VRAM_FLOOR_TEXT_MIB,
        }
    }
}

/// Queries free VRAM, in MiB. Production code backs this with an NVML (or
/// equivalent) probe; it is injected so tests can simulate VRAM pressure.
pub trait VramProbe: Send + Sync {
    fn query_vram_free_mib(&self) -> u64;
}

/// A probe that always reports a fixed value — used by tests and as the
/// default when no GPU telemetry is wired up.
pub struct FixedVramProbe(pub u64);

impl VramProbe for FixedVramProbe {
    fn query_vram_free_mib(&self) -> u64 {
        self.0
    }
}

/// Process-wide exclusive GPU access. One instance lives for the process
/// lifetime (§9: "the lock itself is a singleton").
pub struct GpuSerializer {
    lock: Arc<Mutex<()>>,
    probe: Box<dyn VramProbe>,
    last_kind: Mutex<Option<ModelKind>>,
}

/// A held GPU session. Dropping it releases the lock; callers should hold
/// this for "start model → run N inferences → tear down" (§4.E, §9).
pub struct GpuSession {
    _guard: OwnedMutexGuard<()>,
}

impl GpuSerializer {
    pub fn new(probe: Box<dyn VramProbe>) -> Self {
        Self { lock: Arc::new(Mutex::new(())), probe, last_kind: Mutex::new(None) }
    }

    /// Acquires exclusive GPU access for `model`. Checks VRAM *before*
    /// acquiring the lock; fails fast with `VramError` if below the floor
    /// rather than blocking on contention first (§4.E). When swapping to a
    /// different model than the last session held, polls free VRAM first
    /// (§4.E: "between back-to-back model sessions... before the next
    /// acquisition") so driver-side deallocation from the previous session
    /// has a chance to land before the floor check.
    pub async fn acquire(&self, model: ModelKind) -> Result<GpuSession, CineCutError> {
        let swapped = {
            let mut last = self.last_kind.lock().await;
            let swapped = matches!(*last, Some(prev) if prev != model);
            *last = Some(model);
            swapped
        };
        if swapped {
            self.wait_for_vram(model.vram_floor_mib()).await;
        }

        let free_mib = self.probe.query_vram_free_mib();
        let floor = model.vram_floor_mib();
        if free_mib < floor {
            return Err(CineCutError::vram(format!(
                "{free_mib} MiB free, need at least {floor} MiB for {model:?} model"
            )));
        }

        debug!("acquiring GPU serializer for {model:?} model ({free_mib} MiB free)");
        let guard = self.lock.clone().lock_owned().await;
        info!("GPU serializer acquired for {model:?} model");
        Ok(GpuSession { _guard: guard })
    }

    /// Polls free VRAM until it exceeds `threshold_mib` or `VRAM_POLL_TIMEOUT_S`
    /// elapses, then waits an additional `VRAM_POLL_MIN_FLOOR_S` regardless,
    /// to allow driver-side deallocation even if polling succeeds quickly
    /// (§4.E).
    pub async fn wait_for_vram(&self, threshold_mib: u64) {
        let deadline = Instant::now() + Duration::from_secs(VRAM_POLL_TIMEOUT_S);
        loop {
            let free_mib = self.probe.query_vram_free_mib();
            if free_mib >= threshold_mib || Instant::now() >= deadline {
                if free_mib < threshold_mib {
                    warn!(
                        "VRAM poll timed out after {VRAM_POLL_TIMEOUT_S}s: {free_mib} MiB free, wanted {threshold_mib} MiB"
                    );
                }
                break;
            }
            sleep(Duration::from_millis(200)).await;
        }
        sleep(Duration::from_secs(VRAM_POLL_MIN_FLOOR_S)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_fails_fast_below_vram_floor() {
        let serializer = GpuSerializer::new(Box::new(FixedVramProbe(2048)));
        let result = serializer.acquire(ModelKind::Vision).await;
        assert!(matches!(result, Err(CineCutError::VramError { .. })));
    }

    #[tokio::test]
    async fn test_acquire_succeeds_above_floor() {
        let serializer = GpuSerializer::new(Box::new(FixedVramProbe(8192)));
        let session = serializer.acquire(ModelKind::Vision).await;
        assert!(session.is_ok());
    }

    #[tokio::test]
    async fn test_second_acquire_blocks_until_first_session_dropped() {
        let serializer = Arc::new(GpuSerializer::new(Box::new(FixedVramProbe(8192))));

        let first = serializer.acquire(ModelKind::Vision).await.unwrap();
        let serializer2 = serializer.clone();
        let handle = tokio::spawn(async move {
            let _second = serializer2.acquire(ModelKind::Text).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "second acquire must block while first session is held");

        drop(first);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_swapping_model_kind_polls_vram_before_reacquire() {
        let serializer = GpuSerializer::new(Box::new(FixedVramProbe(8192)));
        let first = serializer.acquire(ModelKind::Vision).await.unwrap();
        drop(first);

        let start = Instant::now();
        let _second = serializer.acquire(ModelKind::Text).await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_secs(VRAM_POLL_MIN_FLOOR_S),
            "swapping model kind must wait at least the minimum floor before reacquiring"
        );
    }

    #[tokio::test]
    async fn test_same_model_kind_reacquire_does_not_wait() {
        let serializer = GpuSerializer::new(Box::new(FixedVramProbe(8192)));
        let first = serializer.acquire(ModelKind::Vision).await.unwrap();
        drop(first);

        let start = Instant::now();
        let _second = serializer.acquire(ModelKind::Vision).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1), "same-kind reacquire should not poll VRAM");
    }

    #[test]
    fn test_vram_floor_by_model_kind() {
        assert_eq!(ModelKind::Vision.vram_floor_mib(), 6144);
        assert_eq!(ModelKind::Text.vram_floor_mib(), 4096);
    }
}
