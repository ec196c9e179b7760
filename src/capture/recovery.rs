use super::{CaptureError, CaptureSource, Frame};
use crate::output::HealthSink;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while waiting between retries.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Camera health as seen by downstream health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraHealthState {
    Connected,
    Degraded,
    Disconnected,
}

impl CameraHealthState {
    /// A read failed while streaming. Only a connected camera degrades.
    pub fn on_read_failure(self) -> Self {
        match self {
            Self::Connected => Self::Degraded,
            other => other,
        }
    }

    /// Every fast retry failed.
    pub fn on_fast_retries_exhausted(self) -> Self {
        Self::Disconnected
    }

    /// A frame was read successfully.
    pub fn on_frame(self) -> Self {
        Self::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for CameraHealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraStatusChanged {
    pub previous: CameraHealthState,
    pub state: CameraHealthState,
    pub timestamp: DateTime<Utc>,
}

/// Timing of the two recovery tiers.
///
/// Fast retries absorb routine USB glitches. Once they are exhausted the
/// camera is reported disconnected and the fast tier is re-run after
/// `slow_retry_interval`, indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub fast_retry_attempts: u32,
    pub fast_retry_delay: Duration,
    pub slow_retry_interval: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            fast_retry_attempts: 3,
            fast_retry_delay: Duration::from_secs(1),
            slow_retry_interval: Duration::from_secs(10),
        }
    }
}

/// Publishes camera state: a shared cell for polling readers plus an
/// optional push sink.
#[derive(Clone)]
pub struct StatusEmitter {
    current: Arc<RwLock<CameraHealthState>>,
    sink: Option<Arc<dyn HealthSink>>,
}

impl StatusEmitter {
    pub fn new(sink: Option<Arc<dyn HealthSink>>) -> Self {
        Self {
            current: Arc::new(RwLock::new(CameraHealthState::Disconnected)),
            sink,
        }
    }

    pub fn current(&self) -> CameraHealthState {
        *self.current.read()
    }

    /// Handle for readers that only need the latest state.
    pub fn shared_state(&self) -> Arc<RwLock<CameraHealthState>> {
        Arc::clone(&self.current)
    }

    fn emit(&self, previous: CameraHealthState, state: CameraHealthState) {
        *self.current.write() = state;

        match state {
            CameraHealthState::Connected => tracing::info!("Camera state: {} -> {}", previous, state),
            _ => tracing::warn!("Camera state: {} -> {}", previous, state),
        }

        if let Some(sink) = &self.sink {
            sink.camera_status_changed(&CameraStatusChanged {
                previous,
                state,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Wraps a [`CaptureSource`] with sequence numbering and two-tier recovery.
///
/// `read_frame` never surfaces device errors. It either returns a frame
/// (possibly after recovering the device) or [`CaptureError::Stopped`] once
/// the shared `running` flag is cleared.
pub struct FrameSource<C> {
    source: C,
    policy: RecoveryPolicy,
    emitter: StatusEmitter,
    running: Arc<AtomicBool>,
    state: CameraHealthState,
    sequence: u64,
}

impl<C: CaptureSource> FrameSource<C> {
    pub fn new(
        source: C,
        policy: RecoveryPolicy,
        emitter: StatusEmitter,
        running: Arc<AtomicBool>,
    ) -> Self {
        let state = emitter.current();
        Self {
            source,
            policy,
            emitter,
            running,
            state,
            sequence: 0,
        }
    }

    pub fn state(&self) -> CameraHealthState {
        self.state
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.source.resolution()
    }

    /// Open the device once. Failure here is reported to the caller as-is.
    pub fn open(&mut self) -> Result<(), CaptureError> {
        self.source.open()?;
        self.transition(self.state.on_frame());
        Ok(())
    }

    pub fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.is_running() {
            return Err(CaptureError::Stopped);
        }

        let result = {
            let _span = tracing::debug_span!("capture").entered();
            self.source.capture_frame()
        };

        match result {
            Ok(image) => {
                self.transition(self.state.on_frame());
                Ok(self.stamp(image))
            }
            Err(e) => {
                tracing::warn!("Camera read failed: {}", e);
                self.recover()
            }
        }
    }

    pub fn close(&mut self) {
        self.source.close();
    }

    fn recover(&mut self) -> Result<Frame, CaptureError> {
        self.transition(self.state.on_read_failure());

        loop {
            if let Some(image) = self.fast_retry()? {
                self.transition(self.state.on_frame());
                return Ok(self.stamp(image));
            }

            self.transition(self.state.on_fast_retries_exhausted());
            tracing::warn!(
                "Camera still unavailable after {} retries, next attempt in {:?}",
                self.policy.fast_retry_attempts,
                self.policy.slow_retry_interval
            );
            self.wait(self.policy.slow_retry_interval)?;
        }
    }

    /// One pass of the fast tier: release, wait, reopen, read.
    fn fast_retry(&mut self) -> Result<Option<image::RgbImage>, CaptureError> {
        for attempt in 1..=self.policy.fast_retry_attempts {
            self.source.close();
            self.wait(self.policy.fast_retry_delay)?;

            let result = self
                .source
                .open()
                .and_then(|()| self.source.capture_frame());

            match result {
                Ok(image) => {
                    tracing::info!(
                        "Camera recovered on attempt {}/{}",
                        attempt,
                        self.policy.fast_retry_attempts
                    );
                    return Ok(Some(image));
                }
                Err(e) => tracing::warn!(
                    "Camera retry {}/{} failed: {}",
                    attempt,
                    self.policy.fast_retry_attempts,
                    e
                ),
            }
        }

        Ok(None)
    }

    /// Sleep for `duration`, waking early with `Stopped` if the source is stopped.
    fn wait(&self, duration: Duration) -> Result<(), CaptureError> {
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_running() {
                return Err(CaptureError::Stopped);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
        }
    }

    fn transition(&mut self, next: CameraHealthState) {
        if next != self.state {
            let previous = self.state;
            self.state = next;
            self.emitter.emit(previous, next);
        }
    }

    fn stamp(&mut self, image: image::RgbImage) -> Frame {
        self.sequence += 1;
        Frame {
            image,
            sequence: self.sequence,
            captured_at: Utc::now(),
            instant: Instant::now(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
