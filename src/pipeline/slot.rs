//! Capacity-1 "latest wins" distribution point.
//!
//! The single [`SnapshotSlot`] writer replaces the current snapshot and wakes
//! waiting readers. Readers only ever see the newest value; anything they did
//! not pick up in time is gone. Versions increase strictly with every publish,
//! so a reader never observes an older snapshot after a newer one.

use crate::types::PoseObservation;
use image::RgbImage;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Newest observation plus the frame it was drawn on.
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    pub observation: PoseObservation,
    pub annotated_frame: RgbImage,
    pub monitoring_paused: bool,
}

struct SlotState {
    version: u64,
    current: Option<Arc<PipelineSnapshot>>,
    closed: bool,
}

struct Shared {
    state: Mutex<SlotState>,
    changed: Condvar,
}

/// Write side. Not `Clone`: there is exactly one publisher.
pub struct SnapshotSlot {
    shared: Arc<Shared>,
}

impl Default for SnapshotSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSlot {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SlotState {
                    version: 0,
                    current: None,
                    closed: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Replace the current snapshot. Returns its version.
    pub fn publish(&self, snapshot: PipelineSnapshot) -> u64 {
        let snapshot = Arc::new(snapshot);
        let version = {
            let mut state = self.shared.state.lock();
            state.version += 1;
            state.current = Some(snapshot);
            state.version
        };
        self.shared.changed.notify_all();
        version
    }

    /// Wake all readers and tell them nothing newer will arrive.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.changed.notify_all();
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            shared: Arc::clone(&self.shared),
            seen: 0,
        }
    }
}

/// Read side. Cheap to clone; each clone tracks what it has already seen.
#[derive(Clone)]
pub struct SnapshotReader {
    shared: Arc<Shared>,
    seen: u64,
}

impl SnapshotReader {
    /// Non-blocking read of the current snapshot, if any was published yet.
    pub fn latest(&self) -> Option<Arc<PipelineSnapshot>> {
        self.shared.state.lock().current.clone()
    }

    pub fn latest_versioned(&self) -> Option<(u64, Arc<PipelineSnapshot>)> {
        let state = self.shared.state.lock();
        state.current.clone().map(|s| (state.version, s))
    }

    /// Wait up to `timeout` for a snapshot newer than the last one this reader returned.
    ///
    /// Returns `None` on timeout or once the slot is closed with nothing new.
    pub fn next(&mut self, timeout: Duration) -> Option<Arc<PipelineSnapshot>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();

        loop {
            if state.version > self.seen {
                if let Some(snapshot) = state.current.clone() {
                    self.seen = state.version;
                    return Some(snapshot);
                }
            }
            if state.closed {
                return None;
            }
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}
