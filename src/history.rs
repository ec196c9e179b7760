//! Trend statistics from persisted posture transitions.
//!
//! Each record's verdict holds until the next record (or `end` for the last
//! one). Records are expected in timestamp order, as the pipeline writes them.
//! Time after a pause marker is not attributed to any verdict.

use crate::output::StateChangeRecord;
use crate::types::Verdict;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PostureSummary {
    pub good_seconds: i64,
    pub bad_seconds: i64,
    pub absent_seconds: i64,
    /// Number of transitions into `bad`. A pause in between does not split a session.
    pub bad_sessions: u32,
}

impl PostureSummary {
    /// Share of tracked (good + bad) time spent in good posture, 0-100.
    pub fn posture_score(&self) -> Option<f64> {
        let tracked = self.good_seconds + self.bad_seconds;
        (tracked > 0).then(|| self.good_seconds as f64 / tracked as f64 * 100.0)
    }

    fn add(&mut self, verdict: Verdict, seconds: i64) {
        match verdict {
            Verdict::Good => self.good_seconds += seconds,
            Verdict::Bad => self.bad_seconds += seconds,
            Verdict::Absent => self.absent_seconds += seconds,
        }
    }
}

/// Totals across all records.
pub fn summarize(records: &[StateChangeRecord], end: DateTime<Utc>) -> PostureSummary {
    let mut summary = PostureSummary::default();
    for (record, until) in spans(records, end) {
        summary.add(record.verdict, (until - record.timestamp).num_seconds());
    }
    summary.bad_sessions = bad_session_starts(records).count() as u32;
    summary
}

/// Totals per UTC day. Spans crossing midnight are split between days.
pub fn daily_summaries(
    records: &[StateChangeRecord],
    end: DateTime<Utc>,
) -> BTreeMap<NaiveDate, PostureSummary> {
    let mut days: BTreeMap<NaiveDate, PostureSummary> = BTreeMap::new();

    for record in bad_session_starts(records) {
        days.entry(record.timestamp.date_naive()).or_default().bad_sessions += 1;
    }

    for (record, until) in spans(records, end) {
        let mut cursor = record.timestamp;
        while cursor < until {
            let day = cursor.date_naive();
            let next_midnight = day
                .succ_opt()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
                .unwrap_or(until);
            let segment_end = next_midnight.min(until);

            days.entry(day)
                .or_default()
                .add(record.verdict, (segment_end - cursor).num_seconds());
            cursor = segment_end;
        }
    }

    days
}

/// Pair each tracked record with the time its verdict stopped applying.
/// Pause markers and zero-length spans are left out.
fn spans(
    records: &[StateChangeRecord],
    end: DateTime<Utc>,
) -> impl Iterator<Item = (&StateChangeRecord, DateTime<Utc>)> {
    records.iter().enumerate().filter_map(move |(i, record)| {
        if record.paused {
            return None;
        }
        let until = records.get(i + 1).map_or(end, |next| next.timestamp);
        (until - record.timestamp > Duration::zero()).then_some((record, until))
    })
}

/// Records that start a bad-posture session, whatever their span length.
fn bad_session_starts(records: &[StateChangeRecord]) -> impl Iterator<Item = &StateChangeRecord> {
    let mut previous = None;
    records.iter().filter(|r| !r.paused).filter(move |record| {
        let starts = record.verdict == Verdict::Bad && previous != Some(Verdict::Bad);
        previous = Some(record.verdict);
        starts
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(verdict: Verdict, time: DateTime<Utc>) -> StateChangeRecord {
        StateChangeRecord {
            timestamp: time,
            verdict,
            confidence: 0.9,
            lean_degrees: None,
            paused: false,
        }
    }

    fn pause(last: Verdict, time: DateTime<Utc>) -> StateChangeRecord {
        StateChangeRecord {
            paused: true,
            ..record(last, time)
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn durations_follow_transitions() {
        let records = vec![
            record(Verdict::Good, at(9, 0)),
            record(Verdict::Bad, at(9, 30)),
            record(Verdict::Absent, at(9, 40)),
            record(Verdict::Good, at(10, 0)),
        ];

        let summary = summarize(&records, at(10, 20));

        assert_eq!(summary.good_seconds, 50 * 60);
        assert_eq!(summary.bad_seconds, 10 * 60);
        assert_eq!(summary.absent_seconds, 20 * 60);
        assert_eq!(summary.bad_sessions, 1);
        let score = summary.posture_score().unwrap();
        assert!((score - 83.333).abs() < 0.01);
    }

    #[test]
    fn no_tracked_time_has_no_score() {
        let records = vec![record(Verdict::Absent, at(9, 0))];

        let summary = summarize(&records, at(9, 5));

        assert_eq!(summary.posture_score(), None);
        assert_eq!(summarize(&[], at(9, 0)), PostureSummary::default());
    }

    #[test]
    fn spans_are_split_at_midnight() {
        let records = vec![record(Verdict::Bad, at(23, 30))];
        let end = Utc.with_ymd_and_hms(2024, 3, 2, 0, 15, 0).unwrap();

        let days = daily_summaries(&records, end);

        let first = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let second = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(days[&first].bad_seconds, 30 * 60);
        assert_eq!(days[&first].bad_sessions, 1);
        assert_eq!(days[&second].bad_seconds, 15 * 60);
        assert_eq!(days[&second].bad_sessions, 0);
    }

    #[test]
    fn transition_into_bad_counts_even_without_elapsed_time() {
        let records = vec![
            record(Verdict::Good, at(9, 0)),
            record(Verdict::Bad, at(9, 10)),
        ];

        let summary = summarize(&records, at(9, 10));

        assert_eq!(summary.bad_sessions, 1);
        assert_eq!(summary.bad_seconds, 0);
        assert_eq!(daily_summaries(&records, at(9, 10)).values().next().unwrap().bad_sessions, 1);
    }

    #[test]
    fn paused_time_is_untracked_and_keeps_the_session() {
        let records = vec![
            record(Verdict::Bad, at(9, 0)),
            pause(Verdict::Bad, at(9, 10)),
            record(Verdict::Bad, at(9, 40)),
            record(Verdict::Good, at(9, 50)),
        ];

        let summary = summarize(&records, at(10, 0));

        assert_eq!(summary.bad_seconds, 20 * 60);
        assert_eq!(summary.good_seconds, 10 * 60);
        assert_eq!(summary.absent_seconds, 0);
        assert_eq!(summary.bad_sessions, 1);
    }

    #[test]
    fn end_before_last_record_is_ignored() {
        let records = vec![record(Verdict::Good, at(9, 0))];

        assert_eq!(summarize(&records, at(8, 0)).good_seconds, 0);
    }
}
