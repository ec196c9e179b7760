use super::slot::{PipelineSnapshot, SnapshotSlot};
use super::{ControlCommand, PipelineStats, Sinks};
use crate::alert::{AlertPolicy, AlertStateMachine};
use crate::capture::{CaptureError, CaptureSource, Frame, FrameSource};
use crate::classifier::{Classification, PoseClassifier};
use crate::geometry::{PostureAssessment, PostureGeometry};
use crate::output::{annotate_frame, VerdictChangeFilter};
use crate::types::{PoseObservation, Verdict};
use chrono::Utc;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Log timing stats every this many frames.
const STATS_INTERVAL: u64 = 30;

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub geometry: PostureGeometry,
    pub min_confidence: f32,
    pub alert_policy: AlertPolicy,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Dispatched(PoseObservation),
    /// No observation this cycle; the previous snapshot stays current.
    Skipped,
    Stopped,
}

#[derive(Default)]
struct CycleTimings {
    frames: u64,
    capture: Duration,
    classify: Duration,
    publish: Duration,
}

impl CycleTimings {
    fn log_if_due(&self) {
        if self.frames == 0 || self.frames % STATS_INTERVAL != 0 {
            return;
        }
        let per_frame = |total: Duration| total.as_secs_f64() * 1000.0 / self.frames as f64;
        let (capture_ms, classify_ms, publish_ms) = (
            per_frame(self.capture),
            per_frame(self.classify),
            per_frame(self.publish),
        );
        let total_ms = capture_ms + classify_ms + publish_ms;
        tracing::info!(
            "Frame {}: capture={:.1}ms, classify={:.1}ms, publish={:.1}ms, total={:.1}ms, fps={:.1}",
            self.frames,
            capture_ms,
            classify_ms,
            publish_ms,
            total_ms,
            if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 }
        );
    }
}

/// Everything one pipeline cycle touches. Owned by the worker thread alone.
///
/// Dropping the worker releases the camera and closes the snapshot slot, so
/// readers are woken however the worker thread ends.
pub struct Worker<C: CaptureSource, K: PoseClassifier> {
    frames: FrameSource<C>,
    classifier: K,
    settings: WorkerSettings,
    alerts: AlertStateMachine,
    persisted: VerdictChangeFilter,
    slot: SnapshotSlot,
    sinks: Sinks,
    stats: Arc<PipelineStats>,
    paused: bool,
    timings: CycleTimings,
}

impl<C: CaptureSource, K: PoseClassifier> Worker<C, K> {
    pub fn new(
        frames: FrameSource<C>,
        classifier: K,
        settings: WorkerSettings,
        slot: SnapshotSlot,
        sinks: Sinks,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            frames,
            classifier,
            alerts: AlertStateMachine::new(settings.alert_policy),
            settings,
            persisted: VerdictChangeFilter::default(),
            slot,
            sinks,
            stats,
            paused: false,
            timings: CycleTimings::default(),
        }
    }

    pub fn open(&mut self) -> Result<(), CaptureError> {
        self.frames.open()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Pause if !self.paused => {
                tracing::info!("Monitoring paused");
                self.alerts.pause();
                self.paused = true;
                self.mark_pause();
            }
            ControlCommand::Resume if self.paused => {
                tracing::info!("Monitoring resumed");
                self.alerts.resume();
                self.persisted.reset();
                self.paused = false;
            }
            _ => {}
        }
    }

    /// read -> classify -> geometry -> publish -> alert -> persist
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let capture_start = Instant::now();
        let frame = match self.frames.read_frame() {
            Ok(frame) => frame,
            Err(CaptureError::Stopped) => return CycleOutcome::Stopped,
            Err(e) => {
                tracing::warn!("Skipping cycle: {}", e);
                return CycleOutcome::Skipped;
            }
        };
        self.timings.capture += capture_start.elapsed();
        PipelineStats::bump(&self.stats.frames_captured);

        let classify_start = Instant::now();
        let classifier = &mut self.classifier;
        let classified = panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(&frame)));
        let classification = match classified {
            Ok(Ok(classification)) => classification,
            Ok(Err(e)) => {
                PipelineStats::bump(&self.stats.classification_failures);
                tracing::warn!("Classification failed for frame {}: {}", frame.sequence, e);
                return CycleOutcome::Skipped;
            }
            Err(payload) => {
                PipelineStats::bump(&self.stats.classification_failures);
                tracing::error!(
                    "Classifier panicked on frame {}: {}",
                    frame.sequence,
                    panic_message(payload.as_ref())
                );
                return CycleOutcome::Skipped;
            }
        };
        self.timings.classify += classify_start.elapsed();

        let publish_start = Instant::now();
        let observation = self.observe(&frame, &classification);
        let annotated_frame = annotate_frame(
            &frame.image,
            classification.landmarks.as_ref(),
            observation.verdict,
        );
        self.slot.publish(PipelineSnapshot {
            observation,
            annotated_frame,
            monitoring_paused: self.paused,
        });
        PipelineStats::bump(&self.stats.snapshots_published);

        self.dispatch(&observation);
        self.timings.publish += publish_start.elapsed();

        self.timings.frames += 1;
        self.timings.log_if_due();

        CycleOutcome::Dispatched(observation)
    }

    /// Release the camera and wake any snapshot readers.
    pub fn shutdown(&mut self) {
        self.frames.close();
        self.slot.close();
    }

    fn observe(&self, frame: &Frame, classification: &Classification) -> PoseObservation {
        let confidence = if classification.confidence.is_finite() {
            classification.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let assessment = if classification.presence && confidence >= self.settings.min_confidence
        {
            self.settings
                .geometry
                .assess(classification.landmarks.as_ref())
        } else {
            PostureAssessment {
                verdict: Verdict::Absent,
                lean_degrees: None,
            }
        };

        PoseObservation {
            timestamp: frame.captured_at,
            instant: frame.instant,
            sequence: frame.sequence,
            presence: classification.presence,
            verdict: assessment.verdict,
            confidence,
            lean_degrees: assessment.lean_degrees,
        }
    }

    /// In-order delivery of every observation to alerting and (deduplicated) persistence.
    fn dispatch(&mut self, observation: &PoseObservation) {
        if self.paused {
            return;
        }
        PipelineStats::bump(&self.stats.observations_dispatched);

        let event = self.alerts.observe(
            observation.verdict,
            observation.instant,
            observation.timestamp,
        );
        if let Some(event) = event {
            if let Some(sink) = &self.sinks.alerts {
                sink.notify(&event);
            }
        }

        if self.persisted.should_record(observation.verdict) {
            if let Some(sink) = &self.sinks.persistence {
                if let Err(e) = sink.record(observation) {
                    tracing::warn!("Failed to persist posture change: {}", e);
                }
            }
        }
    }

    /// Persist where the pause started so history can leave the gap untracked.
    fn mark_pause(&self) {
        let (Some(sink), Some(last)) = (&self.sinks.persistence, self.persisted.last()) else {
            return;
        };
        if let Err(e) = sink.record_pause(Utc::now(), last) {
            tracing::warn!("Failed to persist pause: {}", e);
        }
    }
}

impl<C: CaptureSource, K: PoseClassifier> Drop for Worker<C, K> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
