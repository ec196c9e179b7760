//! The acquisition-and-alerting loop.
//!
//! One dedicated thread owns the camera, the classifier and the alert state.
//! Everything else talks to it through the [`Pipeline`] handle: control
//! commands go in over a channel, snapshots come out through the
//! latest-wins slot, and every observation is pushed in order to the
//! alert and persistence sinks.

mod slot;
mod worker;

pub use slot::{PipelineSnapshot, SnapshotReader, SnapshotSlot};
pub use worker::{CycleOutcome, Worker, WorkerSettings};

use crate::capture::{CameraHealthState, CaptureError, CaptureSource, FrameSource, StatusEmitter};
use crate::classifier::PoseClassifier;
use crate::config::DeskPulseConfig;
use crate::output::{AlertSink, HealthSink, PersistenceSink};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("camera could not be opened: {0}")]
    CameraOpen(#[source] CaptureError),

    #[error("failed to spawn pipeline worker: {0}")]
    Spawn(String),

    #[error("pipeline worker exited during startup")]
    WorkerExited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
}

/// Counters updated by the worker, readable from any thread without locking.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_captured: AtomicU64,
    pub observations_dispatched: AtomicU64,
    pub classification_failures: AtomicU64,
    pub snapshots_published: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub observations_dispatched: u64,
    pub classification_failures: u64,
    pub snapshots_published: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            observations_dispatched: self.observations_dispatched.load(Ordering::Relaxed),
            classification_failures: self.classification_failures.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
        }
    }
}

/// Push targets that must see every observation (or every health change).
#[derive(Clone, Default)]
pub struct Sinks {
    pub persistence: Option<Arc<dyn PersistenceSink>>,
    pub alerts: Option<Arc<dyn AlertSink>>,
    pub health: Option<Arc<dyn HealthSink>>,
}

pub struct PipelineBuilder {
    config: DeskPulseConfig,
    sinks: Sinks,
}

impl PipelineBuilder {
    pub fn new(config: DeskPulseConfig) -> Self {
        Self {
            config,
            sinks: Sinks::default(),
        }
    }

    pub fn persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sinks.persistence = Some(sink);
        self
    }

    pub fn alerts(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.alerts = Some(sink);
        self
    }

    pub fn health(mut self, sink: Arc<dyn HealthSink>) -> Self {
        self.sinks.health = Some(sink);
        self
    }

    /// Open the camera on a new worker thread and start the loop.
    ///
    /// The capture source is built on the worker by `make_capture`, so it does
    /// not need to be `Send`. Returns only after the first `open` attempt:
    /// an unopenable camera fails here, everything later is recovered in place.
    pub fn start<C, F, K>(self, make_capture: F, classifier: K) -> Result<Pipeline, PipelineError>
    where
        C: CaptureSource + 'static,
        F: FnOnce() -> C + Send + 'static,
        K: PoseClassifier + Send + 'static,
    {
        let config = self.config;
        let sinks = self.sinks;

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(PipelineStats::default());
        let emitter = StatusEmitter::new(sinks.health.clone());
        let camera_state = emitter.shared_state();
        let slot = SnapshotSlot::new();
        let reader = slot.reader();
        let (control_tx, control_rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded(1);

        let settings = WorkerSettings {
            geometry: config.posture_geometry(),
            min_confidence: config.posture.min_confidence,
            alert_policy: config.alert_policy(),
        };
        let recovery = config.recovery_policy();
        let frame_interval = config.frame_interval();

        tracing::info!(
            "Starting pipeline at {} fps (lean threshold {}°, alert after {}s, cooldown {}s)",
            config.pipeline.target_fps,
            config.posture.angle_threshold_degrees,
            config.alerts.threshold_seconds,
            config.alerts.cooldown_seconds
        );

        let worker_running = running.clone();
        let worker_stats = stats.clone();
        let handle = thread::Builder::new()
            .name("deskpulse-pipeline".to_string())
            .spawn(move || {
                let _exit = ClearOnExit(worker_running.clone());
                let frames = FrameSource::new(make_capture(), recovery, emitter, worker_running.clone());
                // Dropped on every exit path: releases the camera and closes the slot.
                let mut worker = Worker::new(frames, classifier, settings, slot, sinks, worker_stats);

                let opened = worker.open();
                let failed = opened.is_err();
                let _ = ready_tx.send(opened);
                if failed {
                    return;
                }

                run_loop(&mut worker, &control_rx, &worker_running, frame_interval);
                tracing::info!("Pipeline worker exited");
            })
            .map_err(|e| PipelineError::Spawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Pipeline {
                running,
                paused: AtomicBool::new(false),
                control: control_tx,
                thread_handle: Some(handle),
                reader,
                stats,
                camera_state,
                join_timeout: config.join_timeout(),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(PipelineError::CameraOpen(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(PipelineError::WorkerExited)
            }
        }
    }
}

fn run_loop<C: CaptureSource, K: PoseClassifier>(
    worker: &mut Worker<C, K>,
    control: &Receiver<ControlCommand>,
    running: &AtomicBool,
    frame_interval: Duration,
) {
    tracing::info!("Starting main pipeline loop");

    while running.load(Ordering::Acquire) {
        let loop_start = Instant::now();

        let cycle = panic::catch_unwind(AssertUnwindSafe(|| {
            for command in control.try_iter() {
                worker.apply(command);
            }
            worker.run_cycle()
        }));
        match cycle {
            Ok(CycleOutcome::Stopped) => break,
            Ok(_) => {}
            Err(payload) => tracing::error!(
                "Pipeline cycle panicked, continuing: {}",
                worker::panic_message(payload.as_ref())
            ),
        }

        // Frame rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_interval {
            thread::sleep(frame_interval - elapsed);
        }
    }
}

/// Marks the pipeline as no longer running when the worker thread ends, by
/// return or by unwinding.
struct ClearOnExit(Arc<AtomicBool>);

impl Drop for ClearOnExit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a running pipeline. Dropping it stops the worker.
pub struct Pipeline {
    running: Arc<AtomicBool>,
    paused: AtomicBool,
    control: Sender<ControlCommand>,
    thread_handle: Option<thread::JoinHandle<()>>,
    reader: SnapshotReader,
    stats: Arc<PipelineStats>,
    camera_state: Arc<RwLock<CameraHealthState>>,
    join_timeout: Duration,
}

impl Pipeline {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Suspend alerting and persistence. The camera and live view keep running.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        let _ = self.control.send(ControlCommand::Pause);
    }

    /// Resume monitoring with a fresh bad-posture session.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        let _ = self.control.send(ControlCommand::Resume);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// New reader on the latest-wins snapshot slot.
    pub fn subscribe(&self) -> SnapshotReader {
        self.reader.clone()
    }

    pub fn latest(&self) -> Option<Arc<PipelineSnapshot>> {
        self.reader.latest()
    }

    pub fn camera_state(&self) -> CameraHealthState {
        *self.camera_state.read()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal the worker and wait up to the join timeout for it to finish.
    ///
    /// Returns `true` if the worker exited within the timeout. The worker
    /// releases the camera on its way out. If it does not exit in time we log
    /// and move on, and the camera is NOT force-released: the device handle
    /// lives on the worker thread (it need not be `Send`), so it stays open
    /// until that thread finishes its current step and exits on its own.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.thread_handle.take() else {
            return false;
        };

        tracing::info!("Stopping pipeline...");
        self.running.store(false, Ordering::Release);

        // JoinHandle has no timed join, so wait for it on a helper thread.
        let (done_tx, done_rx) = channel::bounded(1);
        let joiner = thread::Builder::new()
            .name("deskpulse-join".to_string())
            .spawn(move || {
                let _ = done_tx.send(handle.join());
            });
        if let Err(e) = joiner {
            tracing::warn!("Could not wait for pipeline worker: {}", e);
            return false;
        }

        match done_rx.recv_timeout(self.join_timeout) {
            Ok(Ok(())) => {
                tracing::info!("Pipeline stopped cleanly");
                true
            }
            Ok(Err(_)) => {
                tracing::warn!("Pipeline worker panicked during shutdown");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Pipeline worker did not stop within {:?}, proceeding with shutdown",
                    self.join_timeout
                );
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("Join thread disconnected unexpectedly");
                false
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::worker::tests::{RecordingSinks, ScriptedClassifier, Step};
    use super::*;
    use crate::capture::tests::{RecordingHealth, ScriptedCapture};
    use crate::capture::Frame;
    use crate::classifier::{Classification, ClassifierError};
    use parking_lot::Mutex;

    /// Classifier that takes `delay` per frame and records when each call started.
    struct SlowClassifier {
        delay: Duration,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl SlowClassifier {
        fn new(delay: Duration) -> (Self, Arc<Mutex<Vec<Instant>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    delay,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl PoseClassifier for SlowClassifier {
        fn classify(&mut self, _frame: &Frame) -> Result<Classification, ClassifierError> {
            self.calls.lock().push(Instant::now());
            thread::sleep(self.delay);
            Ok(Classification::absent())
        }
    }

    fn fast_config() -> DeskPulseConfig {
        let mut config = DeskPulseConfig::default();
        config.pipeline.target_fps = 60;
        config.recovery.fast_retry_delay_ms = 1;
        config.recovery.slow_retry_interval_ms = 5;
        config
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn start_fails_fast_when_camera_cannot_open() {
        let result = PipelineBuilder::new(fast_config()).start(
            || {
                let mut capture = ScriptedCapture::failing_reads(0);
                capture.fail_open = true;
                capture
            },
            ScriptedClassifier::new([]),
        );

        assert!(matches!(result, Err(PipelineError::CameraOpen(CaptureError::Open(_)))));
    }

    #[test]
    fn loop_survives_a_classification_failure() {
        let sinks = Arc::new(RecordingSinks::default());
        let classifier = ScriptedClassifier::new([Step::Good, Step::Fail, Step::Good]);
        let calls = classifier.calls.clone();

        let mut pipeline = PipelineBuilder::new(fast_config())
            .persistence(sinks.clone())
            .start(|| ScriptedCapture::failing_reads(0), classifier)
            .unwrap();

        wait_for(|| calls.load(Ordering::SeqCst) >= 10);
        pipeline.stop();

        let stats = pipeline.stats();
        let calls = calls.load(Ordering::SeqCst);
        assert_eq!(stats.classification_failures, 1);
        assert_eq!(stats.observations_dispatched, calls - 1);
        assert!(!pipeline.is_running());
    }

    #[test]
    fn loop_survives_a_classifier_panic() {
        let classifier = ScriptedClassifier::new([Step::Good, Step::Good, Step::Panic]);
        let calls = classifier.calls.clone();

        let mut pipeline = PipelineBuilder::new(fast_config())
            .start(|| ScriptedCapture::failing_reads(0), classifier)
            .unwrap();
        let reader = pipeline.subscribe();

        wait_for(|| calls.load(Ordering::SeqCst) >= 10);
        assert!(pipeline.is_running());
        assert!(!reader.is_closed());
        assert!(pipeline.stop());

        let stats = pipeline.stats();
        assert_eq!(stats.classification_failures, 1);
        assert_eq!(stats.observations_dispatched, calls.load(Ordering::SeqCst) - 1);
        assert!(reader.is_closed());
    }

    #[test]
    fn exit_guard_clears_running_when_the_thread_unwinds() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let result = thread::spawn(move || {
            let _exit = ClearOnExit(flag);
            panic!("worker died");
        })
        .join();

        assert!(result.is_err());
        assert!(!running.load(Ordering::Acquire));
    }

    #[test]
    fn stop_gives_up_after_the_join_timeout() {
        let mut config = fast_config();
        config.pipeline.join_timeout_ms = 200;
        let (classifier, calls) = SlowClassifier::new(Duration::from_secs(3));

        let mut pipeline = PipelineBuilder::new(config)
            .start(|| ScriptedCapture::failing_reads(0), classifier)
            .unwrap();
        wait_for(|| !calls.lock().is_empty());

        let started = Instant::now();
        let joined = pipeline.stop();
        let waited = started.elapsed();

        assert!(!joined);
        assert!(waited >= Duration::from_millis(200));
        assert!(waited < Duration::from_secs(1), "stop blocked for {:?}", waited);
        assert!(!pipeline.is_running());
    }

    #[test]
    fn throttle_subtracts_processing_time() {
        let mut config = fast_config();
        config.pipeline.target_fps = 10;
        let (classifier, calls) = SlowClassifier::new(Duration::from_millis(60));

        let mut pipeline = PipelineBuilder::new(config)
            .start(|| ScriptedCapture::failing_reads(0), classifier)
            .unwrap();
        wait_for(|| calls.lock().len() >= 8);
        pipeline.stop();

        let calls = calls.lock();
        // skip the first cycle, which includes startup
        let span = calls[7] - calls[1];
        let per_cycle = span / 6;
        assert!(
            per_cycle >= Duration::from_millis(90) && per_cycle < Duration::from_millis(150),
            "cycle period {:?}",
            per_cycle
        );
    }

    #[test]
    fn transient_camera_failure_is_reported_and_recovered() {
        let health = Arc::new(RecordingHealth::default());

        let mut pipeline = PipelineBuilder::new(fast_config())
            .health(health.clone())
            .start(
                || ScriptedCapture::failing_reads(2),
                ScriptedClassifier::new([]),
            )
            .unwrap();

        wait_for(|| pipeline.stats().snapshots_published >= 3);
        pipeline.stop();

        assert_eq!(
            health.states(),
            vec![
                CameraHealthState::Connected,
                CameraHealthState::Degraded,
                CameraHealthState::Connected,
            ]
        );
        assert_eq!(pipeline.camera_state(), CameraHealthState::Connected);
    }

    #[test]
    fn readers_follow_the_latest_snapshot() {
        let mut pipeline = PipelineBuilder::new(fast_config())
            .start(|| ScriptedCapture::failing_reads(0), ScriptedClassifier::new([]))
            .unwrap();
        let mut reader = pipeline.subscribe();

        let first = reader.next(Duration::from_secs(5)).unwrap();
        let second = reader.next(Duration::from_secs(5)).unwrap();
        pipeline.stop();

        assert!(second.observation.sequence > first.observation.sequence);
        assert!(reader.is_closed());
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let sinks = Arc::new(RecordingSinks::default());
        let mut pipeline = PipelineBuilder::new(fast_config())
            .persistence(sinks.clone())
            .start(|| ScriptedCapture::failing_reads(0), ScriptedClassifier::new([]))
            .unwrap();

        wait_for(|| !sinks.persisted.lock().is_empty());
        pipeline.pause();
        assert!(pipeline.is_paused());
        wait_for(|| pipeline.latest().is_some_and(|s| s.monitoring_paused));

        pipeline.resume();
        wait_for(|| sinks.persisted.lock().len() >= 2);
        pipeline.stop();

        assert!(!pipeline.is_paused());
        assert!(sinks.persisted.lock().iter().all(|o| o.verdict == crate::types::Verdict::Good));
    }
}
