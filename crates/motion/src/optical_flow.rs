//! Sparse Lucas-Kanade optical flow.
//!
//! A single Lucas-Kanade step per point: spatial gradients by central
//! differences averaged over both frames, temporal gradient `B - A`, and the
//! 2x2 normal equations over a square window. Good for small displacements
//! (a pixel or two); larger motion is the block matcher's job.

use castkit_media_model::{FlowEstimate, PixelBuffer};
use ndarray::Array2;

use crate::error::{MotionError, MotionResult};
use crate::luma::luma_plane;

/// Configuration for the flow estimator.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Per-pixel eigenvalue at which confidence reaches 0.5.
    pub confidence_scale: f64,

    /// Per-pixel eigenvalue below which a window is treated as rank
    /// deficient.
    pub min_eigenvalue: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            confidence_scale: 25.0,
            min_eigenvalue: 1e-6,
        }
    }
}

/// Structure tensor and mismatch sums over one window.
#[derive(Debug, Default)]
struct WindowSums {
    xx: f64,
    xy: f64,
    yy: f64,
    xt: f64,
    yt: f64,
    count: usize,
}

pub struct OpticalFlowEstimator {
    config: FlowConfig,
}

impl OpticalFlowEstimator {
    pub fn new(config: FlowConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(FlowConfig::default())
    }

    /// Flow at `(x, y)` using a `(2r+1)²` window. Points and windows are
    /// clamped to the frame interior.
    pub fn estimate(
        &self,
        a: &PixelBuffer,
        b: &PixelBuffer,
        x: u32,
        y: u32,
        window_radius: usize,
    ) -> MotionResult<FlowEstimate> {
        MotionError::check_dimensions(a.dimensions(), b.dimensions())?;
        Ok(self.estimate_planes(&luma_plane(a), &luma_plane(b), x, y, window_radius))
    }

    /// Flow at each of `points`.
    pub fn estimate_points(
        &self,
        a: &PixelBuffer,
        b: &PixelBuffer,
        points: &[(u32, u32)],
        window_radius: usize,
    ) -> MotionResult<Vec<FlowEstimate>> {
        MotionError::check_dimensions(a.dimensions(), b.dimensions())?;
        let (la, lb) = (luma_plane(a), luma_plane(b));
        Ok(points
            .iter()
            .map(|&(x, y)| self.estimate_planes(&la, &lb, x, y, window_radius))
            .collect())
    }

    pub(crate) fn estimate_planes(
        &self,
        a: &Array2<f32>,
        b: &Array2<f32>,
        x: u32,
        y: u32,
        window_radius: usize,
    ) -> FlowEstimate {
        let still = FlowEstimate {
            x,
            y,
            dx: 0.0,
            dy: 0.0,
            confidence: 0.0,
        };

        let (rows, cols) = a.dim();
        // Central differences need one pixel of margin on every side.
        if rows < 3 || cols < 3 {
            return still;
        }
        let cx = (x as usize).clamp(1, cols - 2);
        let cy = (y as usize).clamp(1, rows - 2);
        let col_range = cx.saturating_sub(window_radius).max(1)..=(cx + window_radius).min(cols - 2);
        let row_range = cy.saturating_sub(window_radius).max(1)..=(cy + window_radius).min(rows - 2);

        let mut sums = WindowSums::default();
        for r in row_range {
            for c in col_range.clone() {
                let ix = 0.25
                    * ((a[[r, c + 1]] - a[[r, c - 1]]) + (b[[r, c + 1]] - b[[r, c - 1]])) as f64;
                let iy = 0.25
                    * ((a[[r + 1, c]] - a[[r - 1, c]]) + (b[[r + 1, c]] - b[[r - 1, c]])) as f64;
                let it = (b[[r, c]] - a[[r, c]]) as f64;
                sums.xx += ix * ix;
                sums.xy += ix * iy;
                sums.yy += iy * iy;
                sums.xt += ix * it;
                sums.yt += iy * it;
                sums.count += 1;
            }
        }

        let n = sums.count.max(1) as f64;
        let trace = sums.xx + sums.yy;
        let gap = ((sums.xx - sums.yy).powi(2) + 4.0 * sums.xy * sums.xy).sqrt();
        let lambda_min = ((trace - gap) / 2.0).max(0.0) / n;

        if lambda_min < self.config.min_eigenvalue {
            return still;
        }

        let det = sums.xx * sums.yy - sums.xy * sums.xy;
        let dx = (-sums.yy * sums.xt + sums.xy * sums.yt) / det;
        let dy = (sums.xy * sums.xt - sums.xx * sums.yt) / det;

        FlowEstimate {
            x,
            y,
            dx,
            dy,
            confidence: lambda_min / (lambda_min + self.config.confidence_scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castkit_media_model::Rgba;

    fn checkerboard(size: u32, cell: u32) -> PixelBuffer {
        PixelBuffer::from_fn(size, size, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgba::BLACK
            } else {
                Rgba::WHITE
            }
        })
    }

    /// Smooth texture whose shifted copy is exactly representable.
    fn smooth(size: u32, shift_x: f64) -> PixelBuffer {
        PixelBuffer::from_fn(size, size, |x, y| {
            let fx = x as f64 - shift_x;
            let v = 128.0 + 60.0 * (fx * 0.3).sin() + 60.0 * (y as f64 * 0.25).cos();
            let v = v.round().clamp(0.0, 255.0) as u8;
            Rgba::opaque(v, v, v)
        })
    }

    #[test]
    fn test_uniform_gray_has_low_confidence() {
        let est = OpticalFlowEstimator::with_defaults();
        let gray = PixelBuffer::filled(32, 32, Rgba::opaque(128, 128, 128));
        let flow = est.estimate(&gray, &gray, 16, 16, 7).unwrap();
        assert!(flow.confidence < 0.5);
        assert_eq!((flow.dx, flow.dy), (0.0, 0.0));
    }

    #[test]
    fn test_checkerboard_scores_higher_than_uniform() {
        let est = OpticalFlowEstimator::with_defaults();
        let board = checkerboard(32, 4);
        let gray = PixelBuffer::filled(32, 32, Rgba::opaque(128, 128, 128));
        let textured = est.estimate(&board, &board, 16, 16, 7).unwrap();
        let flat = est.estimate(&gray, &gray, 16, 16, 7).unwrap();
        assert!(textured.confidence > flat.confidence);
        assert!(textured.confidence > 0.5);
    }

    #[test]
    fn test_recovers_small_horizontal_shift() {
        let est = OpticalFlowEstimator::with_defaults();
        let a = smooth(48, 0.0);
        let b = smooth(48, 1.0);
        let flow = est.estimate(&a, &b, 24, 24, 7).unwrap();
        assert!((flow.dx - 1.0).abs() < 0.35, "dx = {}", flow.dx);
        assert!(flow.dy.abs() < 0.35, "dy = {}", flow.dy);
    }

    #[test]
    fn test_point_at_edge_is_clamped() {
        let est = OpticalFlowEstimator::with_defaults();
        let board = checkerboard(16, 2);
        let flow = est.estimate(&board, &board, 0, 500, 3).unwrap();
        assert_eq!((flow.x, flow.y), (0, 500));
        assert!(flow.dx.abs() < 1e-9);
    }

    #[test]
    fn test_tiny_frame_is_still() {
        let est = OpticalFlowEstimator::with_defaults();
        let f = PixelBuffer::filled(2, 2, Rgba::WHITE);
        let flow = est.estimate(&f, &f, 0, 0, 3).unwrap();
        assert_eq!(flow.confidence, 0.0);
    }

    #[test]
    fn test_estimate_points_keeps_order() {
        let est = OpticalFlowEstimator::with_defaults();
        let board = checkerboard(32, 4);
        let flows = est
            .estimate_points(&board, &board, &[(4, 4), (20, 10)], 3)
            .unwrap();
        assert_eq!(flows.len(), 2);
        assert_eq!((flows[1].x, flows[1].y), (20, 10));
    }
}
