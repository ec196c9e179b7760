use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Classified posture state for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Good,
    Bad,
    Absent,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Good => "good",
            Verdict::Bad => "bad",
            Verdict::Absent => "absent",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified frame. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoseObservation {
    /// Wall-clock capture time, for records and event payloads.
    pub timestamp: DateTime<Utc>,
    /// Monotonic capture time, for measuring durations.
    #[serde(skip)]
    pub instant: Instant,
    pub sequence: u64,
    pub presence: bool,
    pub verdict: Verdict,
    /// 0.0-1.0
    pub confidence: f32,
    /// Lean from vertical in degrees, when the geometry was usable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lean_degrees: Option<f32>,
}
