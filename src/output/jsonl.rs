use super::{PersistenceSink, SinkError};
use crate::types::{PoseObservation, Verdict};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One persisted posture transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeRecord {
    pub timestamp: DateTime<Utc>,
    pub verdict: Verdict,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lean_degrees: Option<f32>,
    /// Monitoring was paused here. Time until the next record is untracked and
    /// `verdict` repeats the last one recorded before the pause.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,
}

impl From<&PoseObservation> for StateChangeRecord {
    fn from(observation: &PoseObservation) -> Self {
        Self {
            timestamp: observation.timestamp,
            verdict: observation.verdict,
            confidence: observation.confidence,
            lean_degrees: observation.lean_degrees,
            paused: false,
        }
    }
}

/// Append-only JSON-lines log of posture transitions.
pub struct JsonlEventStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::options().create(true).append(true).open(&path)?;
        tracing::info!("Recording posture changes to {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back. Lines that fail to parse are skipped with a warning.
    pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<StateChangeRecord>, SinkError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut records = Vec::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    "Skipping malformed record at {}:{}: {}",
                    path.as_ref().display(),
                    number + 1,
                    e
                ),
            }
        }

        Ok(records)
    }

    fn append(&self, record: &StateChangeRecord) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(record).map_err(|e| SinkError::Encode(e.to_string()))?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

impl PersistenceSink for JsonlEventStore {
    fn record(&self, observation: &PoseObservation) -> Result<(), SinkError> {
        self.append(&StateChangeRecord::from(observation))
    }

    fn record_pause(&self, at: DateTime<Utc>, last: Verdict) -> Result<(), SinkError> {
        self.append(&StateChangeRecord {
            timestamp: at,
            verdict: last,
            confidence: 0.0,
            lean_degrees: None,
            paused: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(verdict: Verdict, seconds: i64) -> PoseObservation {
        PoseObservation {
            timestamp: DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap(),
            instant: std::time::Instant::now(),
            sequence: seconds as u64,
            presence: verdict != Verdict::Absent,
            verdict,
            confidence: 0.8,
            lean_degrees: None,
        }
    }

    #[test]
    fn records_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("events.jsonl");
        let store = JsonlEventStore::open(&path).unwrap();

        store.record(&observation(Verdict::Good, 0)).unwrap();
        store.record(&observation(Verdict::Bad, 30)).unwrap();

        let records = JsonlEventStore::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].verdict, Verdict::Bad);
        assert_eq!(records[1].timestamp, observation(Verdict::Bad, 30).timestamp);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        JsonlEventStore::open(&path)
            .unwrap()
            .record(&observation(Verdict::Good, 0))
            .unwrap();
        JsonlEventStore::open(&path)
            .unwrap()
            .record(&observation(Verdict::Absent, 5))
            .unwrap();

        assert_eq!(JsonlEventStore::read_records(&path).unwrap().len(), 2);
    }

    #[test]
    fn pause_marker_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = JsonlEventStore::open(&path).unwrap();

        store.record(&observation(Verdict::Bad, 0)).unwrap();
        store
            .record_pause(observation(Verdict::Bad, 60).timestamp, Verdict::Bad)
            .unwrap();

        let records = JsonlEventStore::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].paused);
        assert!(records[1].paused);
        assert_eq!(records[1].verdict, Verdict::Bad);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.matches("\"paused\"").count(), 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(
            &path,
            "not json\n{\"timestamp\":\"2024-01-01T00:00:00Z\",\"verdict\":\"good\",\"confidence\":0.9}\n",
        )
        .unwrap();

        let records = JsonlEventStore::read_records(&path).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].verdict, Verdict::Good);
    }
}
