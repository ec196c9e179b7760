mod annotate;
mod jsonl;
mod live_view;
mod log;

pub use annotate::{annotate_frame, encode_jpeg};
pub use jsonl::{JsonlEventStore, StateChangeRecord};
pub use live_view::{spawn_live_view_forwarder, JpegFileSink, LiveViewForwarder, LiveViewUpdate};
pub use log::{LogHealthReporter, LogNotifier};

use crate::alert::AlertEvent;
use crate::capture::CameraStatusChanged;
use crate::types::{PoseObservation, Verdict};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Encode(String),
}

/// Receives the newest annotated frame at the pipeline rate. Lossy.
pub trait LiveViewSink: Send + Sync {
    fn push(&self, update: &LiveViewUpdate) -> Result<(), SinkError>;
}

/// Receives observations whose verdict differs from the previous recorded one.
pub trait PersistenceSink: Send + Sync {
    fn record(&self, observation: &PoseObservation) -> Result<(), SinkError>;

    /// Monitoring was paused at `at`; `last` is the verdict recorded before it.
    fn record_pause(&self, _at: DateTime<Utc>, _last: Verdict) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Receives alert, reminder and correction events.
pub trait AlertSink: Send + Sync {
    fn notify(&self, event: &AlertEvent);
}

/// Receives camera health transitions.
pub trait HealthSink: Send + Sync {
    fn camera_status_changed(&self, event: &CameraStatusChanged);
}

/// Passes only verdict transitions through to persistence.
#[derive(Debug, Default)]
pub struct VerdictChangeFilter {
    last: Option<Verdict>,
}

impl VerdictChangeFilter {
    /// True when `verdict` differs from the last one let through.
    pub fn should_record(&mut self, verdict: Verdict) -> bool {
        if self.last == Some(verdict) {
            return false;
        }
        self.last = Some(verdict);
        true
    }

    /// Verdict most recently let through, if any.
    pub fn last(&self) -> Option<Verdict> {
        self.last
    }

    /// Forget the baseline so the next verdict is recorded regardless.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transitions_pass() {
        use Verdict::*;
        let mut filter = VerdictChangeFilter::default();

        let passed: Vec<Verdict> = [Good, Good, Good, Bad, Bad, Absent, Absent, Good]
            .into_iter()
            .filter(|v| filter.should_record(*v))
            .collect();

        assert_eq!(passed, vec![Good, Bad, Absent, Good]);
    }

    #[test]
    fn reset_records_next_verdict() {
        let mut filter = VerdictChangeFilter::default();

        assert!(filter.should_record(Verdict::Bad));
        filter.reset();

        assert!(filter.should_record(Verdict::Bad));
        assert!(!filter.should_record(Verdict::Bad));
    }
}
