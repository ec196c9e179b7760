use crate::alert::AlertPolicy;
use crate::capture::RecoveryPolicy;
use crate::geometry::PostureGeometry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub target_fps: u32,
    /// Upper bound on how long `stop` waits for the worker.
    pub join_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 10,
            join_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureConfig {
    pub angle_threshold_degrees: f32,
    pub min_confidence: f32,
    pub min_landmark_visibility: f32,
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            angle_threshold_degrees: 15.0,
            min_confidence: 0.5,
            min_landmark_visibility: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub threshold_seconds: u64,
    pub cooldown_seconds: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold_seconds: 600,
            cooldown_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub fast_retry_attempts: u32,
    pub fast_retry_delay_ms: u64,
    pub slow_retry_interval_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            fast_retry_attempts: 3,
            fast_retry_delay_ms: 1000,
            slow_retry_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub event_log: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            event_log: PathBuf::from("data/posture_events.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// ONNX pose landmark model. Without one the binary cannot classify.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveViewConfig {
    pub jpeg_quality: u8,
    /// File kept up to date with the newest annotated frame.
    pub jpeg_path: Option<PathBuf>,
}

impl Default for LiveViewConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            jpeg_path: None,
        }
    }
}

/// Startup configuration. Read once; the pipeline never sees changes after `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskPulseConfig {
    pub camera: CameraConfig,
    pub pipeline: PipelineConfig,
    pub posture: PostureConfig,
    pub alerts: AlertConfig,
    pub recovery: RecoveryConfig,
    pub storage: StorageConfig,
    pub model: ModelConfig,
    pub live_view: LiveViewConfig,
}

impl DeskPulseConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if !(1..=60).contains(&self.pipeline.target_fps) {
            errors.push(format!(
                "pipeline.target_fps = {} must be between 1 and 60",
                self.pipeline.target_fps
            ));
        }
        if self.pipeline.join_timeout_ms == 0 {
            errors.push("pipeline.join_timeout_ms must be greater than 0".to_string());
        }

        let angle = self.posture.angle_threshold_degrees;
        if !(angle > 0.0 && angle < 90.0) {
            errors.push(format!(
                "posture.angle_threshold_degrees = {} must be between 0 and 90",
                angle
            ));
        }
        for (field, value) in [
            ("posture.min_confidence", self.posture.min_confidence),
            (
                "posture.min_landmark_visibility",
                self.posture.min_landmark_visibility,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{} = {} must be between 0.0 and 1.0", field, value));
            }
        }

        if self.alerts.threshold_seconds == 0 {
            errors.push("alerts.threshold_seconds must be greater than 0".to_string());
        }
        if self.alerts.cooldown_seconds == 0 {
            errors.push("alerts.cooldown_seconds must be greater than 0".to_string());
        }

        if self.recovery.fast_retry_attempts == 0 {
            errors.push("recovery.fast_retry_attempts must be at least 1".to_string());
        }

        if !(1..=100).contains(&self.live_view.jpeg_quality) {
            errors.push(format!(
                "live_view.jpeg_quality = {} must be between 1 and 100",
                self.live_view.jpeg_quality
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.pipeline.target_fps.max(1) as f64)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.join_timeout_ms)
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            fast_retry_attempts: self.recovery.fast_retry_attempts,
            fast_retry_delay: Duration::from_millis(self.recovery.fast_retry_delay_ms),
            slow_retry_interval: Duration::from_millis(self.recovery.slow_retry_interval_ms),
        }
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            threshold: Duration::from_secs(self.alerts.threshold_seconds),
            cooldown: Duration::from_secs(self.alerts.cooldown_seconds),
        }
    }

    pub fn posture_geometry(&self) -> PostureGeometry {
        PostureGeometry::new(
            self.posture.angle_threshold_degrees,
            self.posture.min_landmark_visibility,
        )
    }
}
