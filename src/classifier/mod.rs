#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
mod preprocess;

#[cfg(feature = "onnx")]
pub use onnx::OnnxPoseClassifier;
#[cfg(feature = "onnx")]
pub use preprocess::Preprocessor;

use crate::capture::Frame;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("failed to load pose model: {0}")]
    ModelLoad(String),

    #[error("pose inference failed: {0}")]
    Inference(String),

    #[error("malformed pose model output: {0}")]
    MalformedOutput(String),
}

/// A single body keypoint in normalized image coordinates (0.0-1.0, y grows downwards).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// 0.0-1.0
    pub visibility: f32,
}

/// Keypoints the posture geometry depends on, by BlazePose index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPoint {
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftHip = 23,
    RightHip = 24,
}

/// Full landmark output of one classification, in the 33-point BlazePose order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub const BLAZEPOSE_POINTS: usize = 33;

    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn get(&self, point: BodyPoint) -> Option<&Landmark> {
        self.points.get(point as usize)
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// What the pose model reports for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub presence: bool,
    pub landmarks: Option<LandmarkSet>,
    /// 0.0-1.0
    pub confidence: f32,
}

impl Classification {
    pub fn absent() -> Self {
        Self {
            presence: false,
            landmarks: None,
            confidence: 0.0,
        }
    }
}

/// Trait for pose models
/// Allows swapping the landmark backend without touching the pipeline.
///
/// A missing or low-confidence detection is a valid result, not an error.
/// `Err` means no observation could be produced for this frame at all.
pub trait PoseClassifier {
    fn classify(&mut self, frame: &Frame) -> Result<Classification, ClassifierError>;
}

impl<P: PoseClassifier + ?Sized> PoseClassifier for Box<P> {
    fn classify(&mut self, frame: &Frame) -> Result<Classification, ClassifierError> {
        (**self).classify(frame)
    }
}

/// Create the default pose classifier (ONNX BlazePose landmark model)
#[cfg(feature = "onnx")]
pub fn create_default_model(
    model_path: &str,
) -> Result<Box<dyn PoseClassifier + Send>, ClassifierError> {
    let model = OnnxPoseClassifier::new(model_path)?;
    Ok(Box::new(model))
}
