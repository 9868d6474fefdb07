//! Frame-pair motion analysis.
//!
//! Ties the block matcher, shake classifier, and optional sparse optical
//! flow together into one [`MotionAnalysis`] record per frame pair.

use castkit_common::config::MotionDefaults;
use castkit_media_model::{MotionAnalysis, MotionVector, PixelBuffer};
use tracing::debug;

use crate::block_match::{BlockMatchConfig, MotionVectorEstimator};
use crate::error::{MotionError, MotionResult};
use crate::luma::luma_plane;
use crate::optical_flow::OpticalFlowEstimator;
use crate::shake::ShakeClassifier;

/// Knobs for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Block edge length for block matching.
    pub block_size: usize,

    /// Minimum classifier intensity for a pair to be flagged as shake.
    pub shake_threshold: f64,

    /// Block matching search radius in pixels.
    pub search_radius: usize,

    /// Number of sparse optical flow points (0 disables flow).
    pub flow_points: usize,

    /// Half-size of the optical flow window.
    pub flow_window_radius: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self::from(&MotionDefaults::default())
    }
}

impl From<&MotionDefaults> for AnalyzerOptions {
    fn from(defaults: &MotionDefaults) -> Self {
        Self {
            block_size: defaults.block_size,
            shake_threshold: defaults.shake_threshold,
            search_radius: defaults.search_radius,
            flow_points: 0,
            flow_window_radius: defaults.flow_window_radius,
        }
    }
}

pub struct MotionAnalyzer {
    options: AnalyzerOptions,
    matcher: MotionVectorEstimator,
    flow: OpticalFlowEstimator,
    classifier: ShakeClassifier,
}

impl MotionAnalyzer {
    pub fn new(options: AnalyzerOptions) -> Self {
        let matcher = MotionVectorEstimator::new(BlockMatchConfig {
            search_radius: options.search_radius,
            ..BlockMatchConfig::default()
        });
        Self {
            options,
            matcher,
            flow: OpticalFlowEstimator::with_defaults(),
            classifier: ShakeClassifier::with_defaults(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AnalyzerOptions::default())
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    /// Analyze the motion from frame `a` to frame `b`.
    pub fn analyze(&self, a: &PixelBuffer, b: &PixelBuffer) -> MotionResult<MotionAnalysis> {
        MotionError::check_dimensions(a.dimensions(), b.dimensions())?;
        if self.options.block_size == 0 {
            return Err(MotionError::InvalidBlockSize(0));
        }

        let (la, lb) = (luma_plane(a), luma_plane(b));
        let vectors = self.matcher.estimate_planes(&la, &lb, self.options.block_size);
        let average = MotionVector::mean(&vectors);
        let verdict = self.classifier.classify(&vectors);
        let is_shake = verdict.is_shake && verdict.shake_intensity >= self.options.shake_threshold;

        let flow = flow_grid(a.width(), a.height(), self.options.flow_points)
            .into_iter()
            .map(|(x, y)| {
                self.flow
                    .estimate_planes(&la, &lb, x, y, self.options.flow_window_radius)
            })
            .collect();

        debug!(
            vectors = vectors.len(),
            avg_dx = average.dx,
            avg_dy = average.dy,
            intensity = verdict.shake_intensity,
            is_shake,
            "Analyzed frame pair"
        );

        Ok(MotionAnalysis {
            vectors,
            average,
            is_shake,
            shake_intensity: verdict.shake_intensity,
            confidence: verdict.confidence,
            flow,
        })
    }

    /// Analyze every consecutive pair of `frames`. Fewer than two frames
    /// yields an empty list.
    pub fn analyze_sequence(&self, frames: &[PixelBuffer]) -> MotionResult<Vec<MotionAnalysis>> {
        frames
            .windows(2)
            .map(|pair| self.analyze(&pair[0], &pair[1]))
            .collect()
    }
}

/// `count` interior points spread evenly over a `width x height` frame,
/// row by row.
pub fn flow_grid(width: u32, height: u32, count: usize) -> Vec<(u32, u32)> {
    if count == 0 || width == 0 || height == 0 {
        return vec![];
    }
    let cols = (count as f64).sqrt().ceil() as u64;
    let rows = (count as u64).div_ceil(cols);
    let mut points = Vec::with_capacity(count);
    for r in 0..rows {
        for c in 0..cols {
            if points.len() == count {
                return points;
            }
            let x = (c + 1) * width as u64 / (cols + 1);
            let y = (r + 1) * height as u64 / (rows + 1);
            points.push((x as u32, y as u32));
        }
    }
    points
}
