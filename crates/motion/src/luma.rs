//! RGBA to luma conversion.

use castkit_media_model::{PixelBuffer, CHANNELS};
use ndarray::Array2;

/// BT.601 luma of every pixel, indexed `[[row, col]]`, on a 0..255 scale.
/// Alpha is ignored.
pub fn luma_plane(frame: &PixelBuffer) -> Array2<f32> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let bytes = frame.as_bytes();
    Array2::from_shape_fn((height, width), |(row, col)| {
        let i = (row * width + col) * CHANNELS;
        0.299 * bytes[i] as f32 + 0.587 * bytes[i + 1] as f32 + 0.114 * bytes[i + 2] as f32
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use castkit_media_model::Rgba;

    #[test]
    fn test_shape_is_rows_by_cols() {
        let plane = luma_plane(&PixelBuffer::filled(5, 3, Rgba::BLACK));
        assert_eq!(plane.dim(), (3, 5));
    }

    #[test]
    fn test_bt601_weights() {
        let mut frame = PixelBuffer::filled(2, 1, Rgba::WHITE);
        frame.put_pixel(1, 0, Rgba::opaque(255, 0, 0));
        let plane = luma_plane(&frame);
        assert!((plane[[0, 0]] - 255.0).abs() < 0.01);
        assert!((plane[[0, 1]] - 76.245).abs() < 0.01);
    }
}
