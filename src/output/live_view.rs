use super::{encode_jpeg, LiveViewSink};
use crate::pipeline::{PipelineSnapshot, SnapshotReader};
use crate::types::Verdict;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long the forwarder blocks on the slot before rechecking its stop flag.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// What the live-view push channel receives for each forwarded snapshot.
#[derive(Debug, Clone)]
pub struct LiveViewUpdate {
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub verdict: Verdict,
    pub confidence: f32,
    pub monitoring_paused: bool,
    /// JPEG bytes.
    pub annotated_frame: Vec<u8>,
}

impl LiveViewUpdate {
    pub fn from_snapshot(
        snapshot: &PipelineSnapshot,
        jpeg_quality: u8,
    ) -> Result<Self, super::SinkError> {
        Ok(Self {
            timestamp: snapshot.observation.timestamp,
            sequence: snapshot.observation.sequence,
            verdict: snapshot.observation.verdict,
            confidence: snapshot.observation.confidence,
            monitoring_paused: snapshot.monitoring_paused,
            annotated_frame: encode_jpeg(&snapshot.annotated_frame, jpeg_quality)?,
        })
    }
}

/// Keeps the newest annotated frame in a JPEG file for a dashboard to serve.
///
/// Writes go to a sibling temp file first and are renamed into place, so
/// readers never see a half-written image.
pub struct JpegFileSink {
    path: PathBuf,
    staging: PathBuf,
}

impl JpegFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        Self {
            path,
            staging: PathBuf::from(staging),
        }
    }
}

impl LiveViewSink for JpegFileSink {
    fn push(&self, update: &LiveViewUpdate) -> Result<(), super::SinkError> {
        std::fs::write(&self.staging, &update.annotated_frame)?;
        std::fs::rename(&self.staging, &self.path)?;
        Ok(())
    }
}

/// Background reader pushing the newest snapshot to a live-view sink.
pub struct LiveViewForwarder {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<u64>>,
}

impl LiveViewForwarder {
    /// Stop forwarding. Returns how many updates were pushed.
    pub fn stop(mut self) -> u64 {
        self.running.store(false, Ordering::Release);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for LiveViewForwarder {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Spawn a thread that waits on `reader` and pushes each newer snapshot.
///
/// A slow sink never builds a backlog: while it is busy, intermediate
/// snapshots are overwritten in the slot and only the newest is sent next.
/// The thread ends when the pipeline closes the slot or `stop` is called.
pub fn spawn_live_view_forwarder(
    mut reader: SnapshotReader,
    sink: Arc<dyn LiveViewSink>,
    jpeg_quality: u8,
) -> std::io::Result<LiveViewForwarder> {
    let running = Arc::new(AtomicBool::new(true));
    let thread_running = running.clone();

    let handle = thread::Builder::new()
        .name("deskpulse-live-view".to_string())
        .spawn(move || {
            let mut pushed = 0u64;
            while thread_running.load(Ordering::Acquire) {
                let Some(snapshot) = reader.next(POLL_TIMEOUT) else {
                    if reader.is_closed() {
                        break;
                    }
                    continue;
                };

                let result = LiveViewUpdate::from_snapshot(&snapshot, jpeg_quality)
                    .and_then(|update| sink.push(&update));
                match result {
                    Ok(()) => pushed += 1,
                    Err(e) => tracing::warn!("Live view push failed: {}", e),
                }
            }
            tracing::debug!("Live view forwarder exited after {} updates", pushed);
            pushed
        })?;

    Ok(LiveViewForwarder {
        running,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SinkError;
    use crate::pipeline::SnapshotSlot;
    use crate::types::PoseObservation;
    use image::RgbImage;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct SlowSink {
        sequences: Mutex<Vec<u64>>,
    }

    impl LiveViewSink for SlowSink {
        fn push(&self, update: &LiveViewUpdate) -> Result<(), SinkError> {
            assert_eq!(&update.annotated_frame[..2], &[0xFF, 0xD8]);
            self.sequences.lock().push(update.sequence);
            thread::sleep(Duration::from_millis(20));
            Ok(())
        }
    }

    fn snapshot(sequence: u64) -> PipelineSnapshot {
        PipelineSnapshot {
            observation: PoseObservation {
                timestamp: Utc::now(),
                instant: std::time::Instant::now(),
                sequence,
                presence: true,
                verdict: Verdict::Bad,
                confidence: 0.7,
                lean_degrees: Some(25.0),
            },
            annotated_frame: RgbImage::new(8, 8),
            monitoring_paused: false,
        }
    }

    #[test]
    fn slow_sink_only_sees_fresh_snapshots() {
        let slot = SnapshotSlot::new();
        let sink = Arc::new(SlowSink::default());
        let forwarder = spawn_live_view_forwarder(slot.reader(), sink.clone(), 70).unwrap();

        for sequence in 1..=50 {
            slot.publish(snapshot(sequence));
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(100));
        slot.close();
        let pushed = forwarder.stop();

        let seen = sink.sequences.lock().clone();
        assert_eq!(pushed as usize, seen.len());
        assert!(seen.len() < 50, "slow sink should have skipped snapshots");
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&50));
    }

    #[test]
    fn jpeg_file_sink_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.jpg");
        let sink = JpegFileSink::new(&path);

        for sequence in [1, 2] {
            let update = LiveViewUpdate::from_snapshot(&snapshot(sequence), 70).unwrap();
            sink.push(&update).unwrap();
        }

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(!dir.path().join("live.jpg.tmp").exists());
    }

    #[test]
    fn forwarder_exits_when_slot_closes() {
        let slot = SnapshotSlot::new();
        let forwarder =
            spawn_live_view_forwarder(slot.reader(), Arc::new(SlowSink::default()), 70).unwrap();

        slot.close();

        assert_eq!(forwarder.stop(), 0);
    }
}
