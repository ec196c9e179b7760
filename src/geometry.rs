//! Posture verdict from torso landmarks.
//!
//! The torso line runs from the hip midpoint to the shoulder midpoint. Its
//! angle from vertical, `atan2(dx, dy)`, is compared against a configurable
//! threshold: within it (inclusive) is `good`, beyond it is `bad`. Anything
//! that prevents computing a finite angle is `absent`.

use crate::classifier::{BodyPoint, Landmark, LandmarkSet};
use crate::types::Verdict;

pub const DEFAULT_ANGLE_THRESHOLD_DEGREES: f32 = 15.0;
pub const DEFAULT_MIN_VISIBILITY: f32 = 0.5;

/// Result of assessing one landmark set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostureAssessment {
    pub verdict: Verdict,
    pub lean_degrees: Option<f32>,
}

impl PostureAssessment {
    fn absent() -> Self {
        Self {
            verdict: Verdict::Absent,
            lean_degrees: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostureGeometry {
    threshold_degrees: f32,
    min_visibility: f32,
}

impl Default for PostureGeometry {
    fn default() -> Self {
        Self::new(DEFAULT_ANGLE_THRESHOLD_DEGREES, DEFAULT_MIN_VISIBILITY)
    }
}

impl PostureGeometry {
    pub fn new(threshold_degrees: f32, min_visibility: f32) -> Self {
        Self {
            threshold_degrees,
            min_visibility,
        }
    }

    pub fn threshold_degrees(&self) -> f32 {
        self.threshold_degrees
    }

    pub fn classify_posture(&self, landmarks: Option<&LandmarkSet>) -> Verdict {
        self.assess(landmarks).verdict
    }

    pub fn assess(&self, landmarks: Option<&LandmarkSet>) -> PostureAssessment {
        let Some(landmarks) = landmarks else {
            return PostureAssessment::absent();
        };

        let torso = (
            self.usable(landmarks, BodyPoint::LeftShoulder),
            self.usable(landmarks, BodyPoint::RightShoulder),
            self.usable(landmarks, BodyPoint::LeftHip),
            self.usable(landmarks, BodyPoint::RightHip),
        );
        // Any missing torso point means no verdict, even if its pair is visible.
        let (Some(ls), Some(rs), Some(lh), Some(rh)) = torso else {
            return PostureAssessment::absent();
        };

        match lean_angle(midpoint(ls, rs), midpoint(lh, rh)) {
            Some(angle) => PostureAssessment {
                verdict: self.verdict_for_angle(angle),
                lean_degrees: Some(angle),
            },
            None => PostureAssessment::absent(),
        }
    }

    /// Threshold is inclusive: a lean of exactly `threshold_degrees` is good.
    pub fn verdict_for_angle(&self, angle_degrees: f32) -> Verdict {
        if !angle_degrees.is_finite() {
            Verdict::Absent
        } else if angle_degrees.abs() <= self.threshold_degrees {
            Verdict::Good
        } else {
            Verdict::Bad
        }
    }

    fn usable<'a>(&self, landmarks: &'a LandmarkSet, point: BodyPoint) -> Option<&'a Landmark> {
        landmarks.get(point).filter(|l| {
            l.x.is_finite()
                && l.y.is_finite()
                && l.visibility.is_finite()
                && l.visibility >= self.min_visibility
        })
    }
}

fn midpoint(a: &Landmark, b: &Landmark) -> (f64, f64) {
    (
        (a.x as f64 + b.x as f64) / 2.0,
        (a.y as f64 + b.y as f64) / 2.0,
    )
}

/// Signed lean from vertical in degrees, positive towards +x.
///
/// Image y grows downwards, so `dy` is measured hip-to-shoulder upwards.
/// Returns `None` for coincident midpoints or non-finite input.
pub fn lean_angle(shoulder_mid: (f64, f64), hip_mid: (f64, f64)) -> Option<f32> {
    let dx = shoulder_mid.0 - hip_mid.0;
    let dy = hip_mid.1 - shoulder_mid.1;

    if !dx.is_finite() || !dy.is_finite() {
        return None;
    }
    if dx.hypot(dy) <= f64::EPSILON {
        return None;
    }

    let angle = dx.atan2(dy).to_degrees() as f32;
    angle.is_finite().then_some(angle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn point(x: f32, y: f32) -> Landmark {
        Landmark {
            x,
            y,
            z: 0.0,
            visibility: 0.9,
        }
    }

    /// Landmark set with shoulders centred at `shoulder_x` and hips at x = 0.5.
    pub(crate) fn torso(shoulder_x: f32) -> LandmarkSet {
        let mut points = vec![point(0.5, 0.5); LandmarkSet::BLAZEPOSE_POINTS];
        points[BodyPoint::LeftShoulder as usize] = point(shoulder_x + 0.1, 0.3);
        points[BodyPoint::RightShoulder as usize] = point(shoulder_x - 0.1, 0.3);
        points[BodyPoint::LeftHip as usize] = point(0.6, 0.7);
        points[BodyPoint::RightHip as usize] = point(0.4, 0.7);
        LandmarkSet::new(points)
    }

    #[test]
    fn upright_torso_is_good() {
        let geometry = PostureGeometry::default();
        let assessment = geometry.assess(Some(&torso(0.5)));

        assert_eq!(assessment.verdict, Verdict::Good);
        assert!(assessment.lean_degrees.unwrap().abs() < 1e-3);
    }

    #[test]
    fn leaning_torso_is_bad() {
        let geometry = PostureGeometry::default();
        // dx = 0.2, dy = 0.4 -> ~26.6 degrees
        let assessment = geometry.assess(Some(&torso(0.7)));

        assert_eq!(assessment.verdict, Verdict::Bad);
        assert!((assessment.lean_degrees.unwrap() - 26.565).abs() < 0.01);
    }

    #[test]
    fn lean_direction_does_not_matter() {
        let geometry = PostureGeometry::default();
        assert_eq!(geometry.classify_posture(Some(&torso(0.3))), Verdict::Bad);
    }

    #[test]
    fn threshold_is_inclusive() {
        let geometry = PostureGeometry::new(15.0, 0.5);

        assert_eq!(geometry.verdict_for_angle(15.0), Verdict::Good);
        assert_eq!(geometry.verdict_for_angle(-15.0), Verdict::Good);
        assert_eq!(geometry.verdict_for_angle(15.001), Verdict::Bad);
    }

    #[test]
    fn threshold_is_configurable() {
        let strict = PostureGeometry::new(5.0, 0.5);
        let relaxed = PostureGeometry::new(30.0, 0.5);
        let lean = torso(0.6); // ~14 degrees

        assert_eq!(strict.classify_posture(Some(&lean)), Verdict::Bad);
        assert_eq!(relaxed.classify_posture(Some(&lean)), Verdict::Good);
    }

    #[test]
    fn missing_landmarks_are_absent() {
        let geometry = PostureGeometry::default();

        assert_eq!(geometry.classify_posture(None), Verdict::Absent);
        assert_eq!(
            geometry.classify_posture(Some(&LandmarkSet::default())),
            Verdict::Absent
        );
    }

    #[test]
    fn one_hidden_shoulder_is_absent() {
        let geometry = PostureGeometry::default();
        let mut points = torso(0.5).points().to_vec();
        points[BodyPoint::RightShoulder as usize].visibility = 0.1;

        assert_eq!(
            geometry.classify_posture(Some(&LandmarkSet::new(points))),
            Verdict::Absent
        );
    }

    #[test]
    fn degenerate_geometry_is_absent() {
        let geometry = PostureGeometry::default();
        let points = vec![point(0.5, 0.5); LandmarkSet::BLAZEPOSE_POINTS];

        assert_eq!(
            geometry.classify_posture(Some(&LandmarkSet::new(points))),
            Verdict::Absent
        );
    }

    #[test]
    fn nan_coordinates_are_absent() {
        let geometry = PostureGeometry::default();
        let mut points = torso(0.5).points().to_vec();
        points[BodyPoint::LeftHip as usize].x = f32::NAN;

        assert_eq!(
            geometry.classify_posture(Some(&LandmarkSet::new(points))),
            Verdict::Absent
        );
        assert_eq!(geometry.verdict_for_angle(f32::NAN), Verdict::Absent);
    }
}
