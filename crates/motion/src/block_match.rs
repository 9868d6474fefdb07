//! Block-matching motion estimation.
//!
//! # Algorithm
//!
//! 1. Convert both frames to BT.601 luma planes.
//! 2. Tile frame A with non-overlapping `block_size` squares. Partial blocks
//!    at the right and bottom edges are skipped.
//! 3. For each block, try every displacement within `±search_radius` in
//!    frame B. Candidates that fall outside frame B are skipped.
//! 4. Cost is the mean absolute luma difference plus
//!    `displacement_penalty * |d|`, so flat or ambiguous regions settle on
//!    the smallest displacement.

use castkit_media_model::{MotionVector, PixelBuffer};
use ndarray::{s, Array2, ArrayView2, Zip};

use crate::error::{MotionError, MotionResult};
use crate::luma::luma_plane;

/// Configuration for the block matcher.
#[derive(Debug, Clone)]
pub struct BlockMatchConfig {
    /// Maximum displacement tried along each axis, in pixels.
    pub search_radius: usize,

    /// Cost added per pixel of displacement length.
    pub displacement_penalty: f32,
}

impl Default for BlockMatchConfig {
    fn default() -> Self {
        Self {
            search_radius: 8,
            displacement_penalty: 0.01,
        }
    }
}

/// Exhaustive-search block matcher.
pub struct MotionVectorEstimator {
    config: BlockMatchConfig,
}

impl MotionVectorEstimator {
    pub fn new(config: BlockMatchConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(BlockMatchConfig::default())
    }

    pub fn config(&self) -> &BlockMatchConfig {
        &self.config
    }

    /// One motion vector per full block of frame A, in row-major block
    /// order. Empty when the frames are smaller than one block.
    pub fn estimate(
        &self,
        a: &PixelBuffer,
        b: &PixelBuffer,
        block_size: usize,
    ) -> MotionResult<Vec<MotionVector>> {
        MotionError::check_dimensions(a.dimensions(), b.dimensions())?;
        if block_size == 0 {
            return Err(MotionError::InvalidBlockSize(block_size));
        }
        Ok(self.estimate_planes(&luma_plane(a), &luma_plane(b), block_size))
    }

    /// Same as [`estimate`](Self::estimate) on precomputed luma planes of
    /// identical shape with a non-zero block size.
    pub(crate) fn estimate_planes(
        &self,
        a: &Array2<f32>,
        b: &Array2<f32>,
        block_size: usize,
    ) -> Vec<MotionVector> {
        let (rows, cols) = a.dim();
        if rows < block_size || cols < block_size {
            return vec![];
        }

        let mut vectors = Vec::with_capacity((rows / block_size) * (cols / block_size));
        for by in (0..=rows - block_size).step_by(block_size) {
            for bx in (0..=cols - block_size).step_by(block_size) {
                let block = a.slice(s![by..by + block_size, bx..bx + block_size]);
                let (dx, dy) = self.search(&block, b, bx, by, block_size);
                vectors.push(MotionVector::new(bx as u32, by as u32, dx as f64, dy as f64));
            }
        }
        vectors
    }

    fn search(
        &self,
        block: &ArrayView2<f32>,
        reference: &Array2<f32>,
        bx: usize,
        by: usize,
        block_size: usize,
    ) -> (i64, i64) {
        let (rows, cols) = reference.dim();
        let radius = self.config.search_radius as i64;
        let area = (block_size * block_size) as f32;

        let mut best = (0i64, 0i64);
        let mut best_cost = f32::INFINITY;

        for dy in -radius..=radius {
            let ty = by as i64 + dy;
            if ty < 0 || ty as usize + block_size > rows {
                continue;
            }
            for dx in -radius..=radius {
                let tx = bx as i64 + dx;
                if tx < 0 || tx as usize + block_size > cols {
                    continue;
                }
                let (tx, ty) = (tx as usize, ty as usize);
                let candidate = reference.slice(s![ty..ty + block_size, tx..tx + block_size]);
                let penalty = self.config.displacement_penalty * ((dx * dx + dy * dy) as f32).sqrt();
                let cost = sad(block, &candidate) / area + penalty;
                if cost < best_cost {
                    best_cost = cost;
                    best = (dx, dy);
                }
            }
        }
        best
    }
}

/// Sum of absolute differences between two equally shaped blocks.
pub fn sad(a: &ArrayView2<f32>, b: &ArrayView2<f32>) -> f32 {
    let mut sum = 0.0f32;
    Zip::from(a).and(b).for_each(|&x, &y| {
        sum += (x - y).abs();
    });
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use castkit_media_model::Rgba;

    fn textured(width: u32, height: u32, seed: u32) -> PixelBuffer {
        PixelBuffer::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(73) ^ y.wrapping_mul(151) ^ seed).wrapping_mul(2654435761) >> 24;
            Rgba::opaque(v as u8, v as u8, v as u8)
        })
    }

    #[test]
    fn test_sad_of_identical_blocks_is_zero() {
        let block = Array2::from_elem((4, 4), 0.5f32);
        assert_eq!(sad(&block.view(), &block.view()), 0.0);
    }

    #[test]
    fn test_sad_counts_every_pixel() {
        let a = Array2::ones((4, 4));
        let b = Array2::zeros((4, 4));
        assert_eq!(sad(&a.view(), &b.view()), 16.0);
    }

    #[test]
    fn test_rejects_mismatched_frames() {
        let est = MotionVectorEstimator::with_defaults();
        let err = est
            .estimate(&textured(32, 32, 1), &textured(32, 16, 1), 16)
            .unwrap_err();
        assert!(matches!(err, MotionError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_rejects_zero_block_size() {
        let est = MotionVectorEstimator::with_defaults();
        let frame = textured(32, 32, 1);
        assert_eq!(
            est.estimate(&frame, &frame, 0).unwrap_err(),
            MotionError::InvalidBlockSize(0)
        );
    }

    #[test]
    fn test_only_full_blocks_are_matched() {
        let est = MotionVectorEstimator::with_defaults();
        let frame = textured(40, 20, 3);
        let vectors = est.estimate(&frame, &frame, 16).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!((vectors[1].x, vectors[1].y), (16, 0));
    }

    #[test]
    fn test_frame_smaller_than_block_yields_nothing() {
        let est = MotionVectorEstimator::with_defaults();
        let frame = textured(8, 8, 3);
        assert!(est.estimate(&frame, &frame, 16).unwrap().is_empty());
    }

    #[test]
    fn test_uniform_frames_prefer_zero_displacement() {
        let est = MotionVectorEstimator::with_defaults();
        let frame = PixelBuffer::filled(48, 48, Rgba::opaque(128, 128, 128));
        for v in est.estimate(&frame, &frame, 16).unwrap() {
            assert_eq!(v.magnitude, 0.0);
        }
    }

    #[test]
    fn test_detects_diagonal_shift() {
        let est = MotionVectorEstimator::with_defaults();
        let a = textured(64, 64, 9);
        let b = PixelBuffer::from_fn(64, 64, |x, y| {
            // Frame B shows frame A moved by (+2, +3).
            a.pixel(x.wrapping_sub(2), y.wrapping_sub(3))
                .unwrap_or(Rgba::BLACK)
        });
        let vectors = est.estimate(&a, &b, 16).unwrap();
        // Interior block away from the black borders.
        let v = vectors
            .iter()
            .find(|v| v.x == 16 && v.y == 16)
            .copied()
            .unwrap();
        assert_eq!((v.dx, v.dy), (2.0, 3.0));
    }
}
