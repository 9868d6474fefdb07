//! Motion analysis records.
//!
//! These are the outputs of the motion subsystem and are serialized as-is
//! for downstream enhancement consumers.

use serde::{Deserialize, Serialize};

/// Displacement of one block between two frames.
///
/// `magnitude` and `angle` are always derived from `dx`/`dy`; construct
/// through [`MotionVector::new`] to keep them consistent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionVector {
    /// Block origin (top-left) in frame A pixels.
    pub x: u32,
    pub y: u32,
    /// Displacement from frame A to frame B.
    pub dx: f64,
    pub dy: f64,
    pub magnitude: f64,
    /// Direction in radians, `atan2(dy, dx)`.
    pub angle: f64,
}

impl MotionVector {
    pub fn new(x: u32, y: u32, dx: f64, dy: f64) -> Self {
        Self {
            x,
            y,
            dx,
            dy,
            magnitude: dx.hypot(dy),
            angle: dy.atan2(dx),
        }
    }

    /// The zero vector at the origin.
    pub fn zero() -> Self {
        Self::new(0, 0, 0.0, 0.0)
    }

    /// Component-wise mean of `vectors`, anchored at the origin. Zero for
    /// an empty slice.
    pub fn mean(vectors: &[MotionVector]) -> Self {
        if vectors.is_empty() {
            return Self::zero();
        }
        let n = vectors.len() as f64;
        let (sx, sy) = vectors
            .iter()
            .fold((0.0, 0.0), |(sx, sy), v| (sx + v.dx, sy + v.dy));
        Self::new(0, 0, sx / n, sy / n)
    }
}

/// Verdict of the shake classifier for one set of vectors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ShakeClassification {
    pub is_shake: bool,
    /// `[0.0, 1.0]`
    pub shake_intensity: f64,
    /// `[0.0, 1.0]`, grows with the number of vectors.
    pub confidence: f64,
}

/// Sparse optical flow at one point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowEstimate {
    pub x: u32,
    pub y: u32,
    pub dx: f64,
    pub dy: f64,
    /// `[0.0, 1.0]`; low for textureless windows.
    pub confidence: f64,
}

/// Full analysis of one frame pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionAnalysis {
    pub vectors: Vec<MotionVector>,
    pub average: MotionVector,
    pub is_shake: bool,
    pub shake_intensity: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flow: Vec<FlowEstimate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_vector_derives_magnitude_and_angle() {
        let v = MotionVector::new(16, 32, 3.0, 4.0);
        assert!((v.magnitude - 5.0).abs() < 1e-12);
        assert!((v.angle - (4.0f64).atan2(3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_mean_of_empty_is_zero() {
        let m = MotionVector::mean(&[]);
        assert_eq!(m, MotionVector::zero());
    }

    #[test]
    fn test_mean_is_anchored_at_origin() {
        let m = MotionVector::mean(&[
            MotionVector::new(0, 0, 2.0, 0.0),
            MotionVector::new(16, 0, 4.0, 2.0),
        ]);
        assert_eq!((m.x, m.y), (0, 0));
        assert!((m.dx - 3.0).abs() < 1e-12);
        assert!((m.dy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_analysis_omits_empty_flow_in_json() {
        let analysis = MotionAnalysis {
            vectors: vec![],
            average: MotionVector::zero(),
            is_shake: false,
            shake_intensity: 0.0,
            confidence: 0.0,
            flow: vec![],
        };
        let json = serde_json::to_string(&analysis).unwrap();
        assert!(!json.contains("flow"));
        assert!(json.contains("\"is_shake\":false"));
    }

    proptest! {
        #[test]
        fn prop_magnitude_law(dx in -64.0f64..64.0, dy in -64.0f64..64.0) {
            let v = MotionVector::new(0, 0, dx, dy);
            prop_assert!((v.magnitude - (dx * dx + dy * dy).sqrt()).abs() < 1e-9);
            prop_assert!(v.magnitude >= 0.0);
            prop_assert!(v.angle >= -std::f64::consts::PI && v.angle <= std::f64::consts::PI);
        }
    }
}
