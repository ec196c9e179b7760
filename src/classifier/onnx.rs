use super::preprocess::Preprocessor;
use super::{BodyPoint, Classification, ClassifierError, Landmark, LandmarkSet, PoseClassifier};
use crate::capture::Frame;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// Values per landmark in the BlazePose landmark head: x, y, z, visibility, presence.
const LANDMARK_STRIDE: usize = 5;

/// BlazePose GHUM landmark model
///
/// Output 0 holds landmarks in input-pixel coordinates with visibility logits.
/// Output 1, when present, is the pose-presence probability.
pub struct OnnxPoseClassifier {
    session: Session,
    preprocessor: Preprocessor,
}

impl OnnxPoseClassifier {
    /// Create a classifier from an ONNX file
    ///
    /// # Default Configuration
    /// - Input: 256x256 NHWC, normalized to [0, 1]
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self, ClassifierError> {
        let path = model_path.as_ref();

        tracing::info!("Loading pose model from {}", path.display());

        let load = || -> ort::Result<Session> {
            Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(2)?
                .commit_from_file(path)
        };
        let session =
            load().map_err(|e| ClassifierError::ModelLoad(format!("{}: {e}", path.display())))?;

        tracing::info!("Pose model loaded");

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(256, 256),
        })
    }
}

impl PoseClassifier for OnnxPoseClassifier {
    fn classify(&mut self, frame: &Frame) -> Result<Classification, ClassifierError> {
        let _span = tracing::debug_span!("classify", sequence = frame.sequence).entered();

        let input_tensor = self.preprocessor.preprocess(&frame.image)?;
        let input = TensorRef::from_array_view(&input_tensor)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        if outputs.len() == 0 {
            return Err(ClassifierError::MalformedOutput("model produced no outputs".to_string()));
        }

        let raw: Vec<f32> = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| ClassifierError::MalformedOutput(e.to_string()))?
            .iter()
            .copied()
            .collect();

        let presence_score = if outputs.len() > 1 {
            outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|score| score.iter().next().copied())
        } else {
            None
        };

        decode(&raw, presence_score, self.preprocessor.input_size())
    }
}

/// Turn a raw landmark head into a [`Classification`].
fn decode(
    raw: &[f32],
    presence_score: Option<f32>,
    (input_width, input_height): (u32, u32),
) -> Result<Classification, ClassifierError> {
    let needed = LandmarkSet::BLAZEPOSE_POINTS * LANDMARK_STRIDE;
    if raw.len() < needed {
        return Err(ClassifierError::MalformedOutput(format!(
            "expected at least {} landmark values, got {}",
            needed,
            raw.len()
        )));
    }

    let points: Vec<Landmark> = raw[..needed]
        .chunks_exact(LANDMARK_STRIDE)
        .map(|v| Landmark {
            x: v[0] / input_width as f32,
            y: v[1] / input_height as f32,
            z: v[2] / input_width as f32,
            visibility: sigmoid(v[3]),
        })
        .collect();
    let landmarks = LandmarkSet::new(points);

    let confidence = match presence_score {
        Some(score) if score.is_finite() => score.clamp(0.0, 1.0),
        _ => torso_visibility(&landmarks),
    };

    Ok(Classification {
        presence: confidence > 0.0,
        landmarks: Some(landmarks),
        confidence,
    })
}

fn torso_visibility(landmarks: &LandmarkSet) -> f32 {
    let torso = [
        BodyPoint::LeftShoulder,
        BodyPoint::RightShoulder,
        BodyPoint::LeftHip,
        BodyPoint::RightHip,
    ];
    let sum: f32 = torso
        .iter()
        .filter_map(|p| landmarks.get(*p))
        .map(|l| l.visibility)
        .sum();
    sum / torso.len() as f32
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
