//! Webcam posture monitoring.
//!
//! Frames are captured at a throttled rate, run through a pose landmark
//! model, reduced to a good/bad/absent verdict from the torso lean angle and
//! fed to an alert state machine that nags after sustained slouching.

pub mod alert;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod geometry;
pub mod history;
pub mod output;
pub mod pipeline;
pub mod types;

pub use alert::{AlertEvent, AlertKind, AlertPolicy, AlertStateMachine};
pub use capture::{CameraHealthState, CaptureError, CaptureSource, Frame};
pub use classifier::{Classification, ClassifierError, PoseClassifier};
pub use config::{ConfigError, DeskPulseConfig};
pub use geometry::PostureGeometry;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError};
pub use types::{PoseObservation, Verdict};
