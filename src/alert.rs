//! Debounced bad-posture alerting.
//!
//! ```text
//! Idle --bad--> Tracking --bad, elapsed >= threshold--> Alerting --bad, cooldown expired--> Alerting
//!   ^              |                                        |
//!   +--good/absent-+----------good/absent (correction)------+
//! ```
//!
//! Pausing forces `Idle` without a correction event; observations are ignored
//! until `resume`.
//!
//! Durations come from the monotonic clock. The wall-clock time only stamps
//! emitted events, so an NTP step never shortens or stretches a session.

use crate::types::Verdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Idle,
    Tracking {
        started_at: Instant,
    },
    Alerting {
        started_at: Instant,
        last_alert_at: Instant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Bad posture has lasted for the full threshold.
    Alert,
    /// Bad posture continues after a cooldown window.
    Reminder,
    /// Posture was corrected after an alert.
    Correction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    /// Length of the bad-posture session so far.
    pub duration_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub threshold: Duration,
    pub cooldown: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(600),
            cooldown: Duration::from_secs(300),
        }
    }
}

pub struct AlertStateMachine {
    policy: AlertPolicy,
    state: AlertState,
    paused: bool,
}

impl AlertStateMachine {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            state: AlertState::Idle,
            paused: false,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Feed one verdict. `now` drives the timers; `timestamp` is copied into any event.
    pub fn observe(
        &mut self,
        verdict: Verdict,
        now: Instant,
        timestamp: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        if self.paused {
            return None;
        }

        let (next, event) = transition(self.state, verdict, now, &self.policy);
        let event = event.map(|(kind, duration)| AlertEvent {
            kind,
            duration_seconds: duration.as_secs(),
            timestamp,
        });
        self.state = next;

        if let Some(event) = &event {
            tracing::info!(
                "Posture {:?} after {}s of bad posture",
                event.kind,
                event.duration_seconds
            );
        }
        event
    }

    /// Drop any in-progress session silently and ignore observations until resumed.
    pub fn pause(&mut self) {
        if !matches!(self.state, AlertState::Idle) {
            tracing::debug!("Discarding bad-posture session on pause");
        }
        self.state = AlertState::Idle;
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.state = AlertState::Idle;
        self.paused = false;
    }
}

fn transition(
    state: AlertState,
    verdict: Verdict,
    now: Instant,
    policy: &AlertPolicy,
) -> (AlertState, Option<(AlertKind, Duration)>) {
    match (state, verdict) {
        (AlertState::Idle, Verdict::Bad) => (AlertState::Tracking { started_at: now }, None),
        (AlertState::Idle, _) => (AlertState::Idle, None),

        (AlertState::Tracking { started_at }, Verdict::Bad) => {
            let bad_for = now.saturating_duration_since(started_at);
            if bad_for >= policy.threshold {
                (
                    AlertState::Alerting {
                        started_at,
                        last_alert_at: now,
                    },
                    Some((AlertKind::Alert, bad_for)),
                )
            } else {
                (state, None)
            }
        }
        (AlertState::Tracking { .. }, _) => (AlertState::Idle, None),

        (
            AlertState::Alerting {
                started_at,
                last_alert_at,
            },
            Verdict::Bad,
        ) => {
            if now.saturating_duration_since(last_alert_at) >= policy.cooldown {
                (
                    AlertState::Alerting {
                        started_at,
                        last_alert_at: now,
                    },
                    Some((
                        AlertKind::Reminder,
                        now.saturating_duration_since(started_at),
                    )),
                )
            } else {
                (state, None)
            }
        }
        (AlertState::Alerting { started_at, .. }, _) => (
            AlertState::Idle,
            Some((
                AlertKind::Correction,
                now.saturating_duration_since(started_at),
            )),
        ),
    }
}
