mod recovery;
#[cfg(feature = "camera")]
mod webcam;

pub use recovery::{
    CameraHealthState, CameraStatusChanged, FrameSource, RecoveryPolicy, StatusEmitter,
};
#[cfg(feature = "camera")]
pub use webcam::WebcamCapture;

#[cfg(test)]
pub(crate) use recovery::tests;

use chrono::{DateTime, Utc};
use image::RgbImage;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("failed to open camera: {0}")]
    Open(String),

    #[error("failed to read frame: {0}")]
    Read(String),

    #[error("frame source stopped")]
    Stopped,
}

/// A single captured image, owned by the frame source until handed to the classifier.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Monotonic per-source sequence number, starting at 1.
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub instant: Instant,
}

/// Trait for camera devices
///
/// Implementations only talk to the hardware. Retry and health tracking
/// live in [`FrameSource`], which wraps any `CaptureSource`.
pub trait CaptureSource {
    /// Acquire the device and start streaming
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<RgbImage, CaptureError>;

    /// Release the device. Must be safe to call on an already closed source.
    fn close(&mut self);

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}

impl<C: CaptureSource + ?Sized> CaptureSource for Box<C> {
    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn capture_frame(&mut self) -> Result<RgbImage, CaptureError> {
        (**self).capture_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn resolution(&self) -> (u32, u32) {
        (**self).resolution()
    }
}
