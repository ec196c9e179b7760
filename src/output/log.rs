use super::{AlertSink, HealthSink};
use crate::alert::{AlertEvent, AlertKind};
use crate::capture::{CameraHealthState, CameraStatusChanged};

/// Notifier that writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl AlertSink for LogNotifier {
    fn notify(&self, event: &AlertEvent) {
        let minutes = event.duration_seconds / 60;
        match event.kind {
            AlertKind::Alert => tracing::warn!(
                "Bad posture for {} minutes, time to sit up straight",
                minutes
            ),
            AlertKind::Reminder => tracing::warn!("Still slouching after {} minutes", minutes),
            AlertKind::Correction => {
                tracing::info!("Posture corrected after {} minutes", minutes)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct LogHealthReporter;

impl HealthSink for LogHealthReporter {
    fn camera_status_changed(&self, event: &CameraStatusChanged) {
        match event.state {
            CameraHealthState::Disconnected => tracing::error!(
                "Camera disconnected at {}, retrying in the background",
                event.timestamp
            ),
            state => tracing::info!("Camera health: {}", state),
        }
    }
}
