//! Camera shake classification.
//!
//! Shake shows up as many small vectors pointing in unrelated directions.
//! A pan or a scroll is the opposite: vectors agree on a direction, however
//! large they are. The classifier therefore keys on direction dispersion
//! and only accepts moderate magnitudes.

use castkit_media_model::{MotionVector, ShakeClassification};

/// Thresholds for the shake classifier.
#[derive(Debug, Clone)]
pub struct ShakeConfig {
    /// Mean magnitude (pixels) below which the scene counts as static.
    pub min_motion: f64,

    /// Mean magnitude (pixels) above which motion is too large to be shake.
    pub max_shake_magnitude: f64,

    /// Minimum direction dispersion for shake, in `[0, 1]`.
    pub min_dispersion: f64,

    /// Mean magnitude (pixels) at which intensity stops scaling up.
    pub intensity_reference: f64,

    /// Vector count controlling how fast confidence saturates.
    pub confidence_scale: f64,
}

impl Default for ShakeConfig {
    fn default() -> Self {
        Self {
            min_motion: 0.5,
            max_shake_magnitude: 12.0,
            min_dispersion: 0.5,
            intensity_reference: 4.0,
            confidence_scale: 24.0,
        }
    }
}

/// Summary statistics of a vector set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorStats {
    pub mean_magnitude: f64,
    /// Resultant length over mean magnitude, `[0, 1]`.
    pub coherence: f64,
    /// Coefficient of variation of magnitudes, capped at 1.
    pub spread: f64,
}

impl VectorStats {
    pub fn of(vectors: &[MotionVector]) -> Option<Self> {
        if vectors.is_empty() {
            return None;
        }
        let n = vectors.len() as f64;
        let mean = MotionVector::mean(vectors);
        let mean_magnitude = vectors.iter().map(|v| v.magnitude).sum::<f64>() / n;

        if mean_magnitude <= f64::EPSILON {
            return Some(Self {
                mean_magnitude: 0.0,
                coherence: 1.0,
                spread: 0.0,
            });
        }

        let variance = vectors
            .iter()
            .map(|v| (v.magnitude - mean_magnitude).powi(2))
            .sum::<f64>()
            / n;

        Some(Self {
            mean_magnitude,
            coherence: (mean.magnitude / mean_magnitude).clamp(0.0, 1.0),
            spread: (variance.sqrt() / mean_magnitude).min(1.0),
        })
    }

    pub fn dispersion(&self) -> f64 {
        1.0 - self.coherence
    }
}

pub struct ShakeClassifier {
    config: ShakeConfig,
}

impl ShakeClassifier {
    pub fn new(config: ShakeConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShakeConfig::default())
    }

    /// Classify a set of motion vectors. An empty set is never shake and
    /// carries zero intensity and zero confidence.
    pub fn classify(&self, vectors: &[MotionVector]) -> ShakeClassification {
        let Some(stats) = VectorStats::of(vectors) else {
            return ShakeClassification::default();
        };

        let dispersion = stats.dispersion();
        let in_range = stats.mean_magnitude >= self.config.min_motion
            && stats.mean_magnitude <= self.config.max_shake_magnitude;
        let is_shake = dispersion >= self.config.min_dispersion && in_range;

        let scale = (stats.mean_magnitude / self.config.intensity_reference).min(1.0);
        let shake_intensity = ((0.7 * dispersion + 0.3 * stats.spread) * scale).clamp(0.0, 1.0);

        ShakeClassification {
            is_shake,
            shake_intensity,
            confidence: self.confidence(vectors.len()),
        }
    }

    /// Confidence for a vector count: `1 - exp(-n / scale)`.
    pub fn confidence(&self, count: usize) -> f64 {
        1.0 - (-(count as f64) / self.config.confidence_scale).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compass(magnitude: f64) -> Vec<MotionVector> {
        (0..8)
            .map(|i| {
                let theta = i as f64 * std::f64::consts::FRAC_PI_4;
                MotionVector::new(
                    i * 16,
                    0,
                    magnitude * theta.cos(),
                    magnitude * theta.sin(),
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_is_exact_zero() {
        let c = ShakeClassifier::with_defaults().classify(&[]);
        assert!(!c.is_shake);
        assert_eq!(c.shake_intensity, 0.0);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_dispersed_small_vectors_are_shake() {
        let c = ShakeClassifier::with_defaults().classify(&compass(2.0));
        assert!(c.is_shake);
        assert!((c.shake_intensity - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_coherent_large_motion_is_not_shake() {
        let vectors: Vec<_> = (0..20)
            .map(|i| MotionVector::new(i * 16, 0, 20.0, 0.0))
            .collect();
        let c = ShakeClassifier::with_defaults().classify(&vectors);
        assert!(!c.is_shake);
        assert!(c.shake_intensity < 0.01);
    }

    #[test]
    fn test_coherent_small_motion_is_not_shake() {
        let vectors: Vec<_> = (0..20)
            .map(|i| MotionVector::new(i * 16, 0, 0.0, 2.0))
            .collect();
        assert!(!ShakeClassifier::with_defaults().classify(&vectors).is_shake);
    }

    #[test]
    fn test_dispersed_but_huge_is_not_shake() {
        let c = ShakeClassifier::with_defaults().classify(&compass(30.0));
        assert!(!c.is_shake);
    }

    #[test]
    fn test_static_scene_is_not_shake() {
        let vectors: Vec<_> = (0..10).map(|i| MotionVector::new(i, 0, 0.0, 0.0)).collect();
        let c = ShakeClassifier::with_defaults().classify(&vectors);
        assert!(!c.is_shake);
        assert_eq!(c.shake_intensity, 0.0);
    }

    #[test]
    fn test_confidence_grows_with_count() {
        let classifier = ShakeClassifier::with_defaults();
        assert!(classifier.confidence(100) > classifier.confidence(1));
        assert!(classifier.confidence(1000) < 1.0 + 1e-12);
        assert_eq!(classifier.confidence(0), 0.0);
    }
}
