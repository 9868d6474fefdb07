//! RGBA frame buffers and colors.
//!
//! A [`PixelBuffer`] is the unit of exchange between pipeline stages. It is
//! moved, never shared: a stage that needs to keep a frame after handing it
//! on must clone it explicitly.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Bytes per RGBA pixel.
pub const CHANNELS: usize = 4;

/// An 8-bit straight-alpha RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);
    pub const BLACK: Rgba = Rgba::new(0, 0, 0, 255);
    pub const WHITE: Rgba = Rgba::new(255, 255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    /// Parse `#rrggbb` or `#rrggbbaa` (leading `#` optional).
    pub fn from_hex(hex: &str) -> Result<Self, PixelError> {
        let digits = hex.trim().trim_start_matches('#');
        if !digits.is_ascii() || (digits.len() != 6 && digits.len() != 8) {
            return Err(PixelError::InvalidColor(hex.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| PixelError::InvalidColor(hex.to_string()))
        };
        let a = if digits.len() == 8 { channel(6)? } else { 255 };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?, a))
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array(px: [u8; 4]) -> Self {
        Self::new(px[0], px[1], px[2], px[3])
    }

    /// Linear interpolation between two colors, `t` in `[0, 1]`.
    pub fn lerp(a: Rgba, b: Rgba, t: f64) -> Rgba {
        let t = t.clamp(0.0, 1.0);
        let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
        Rgba::new(mix(a.r, b.r), mix(a.g, b.g), mix(a.b, b.b), mix(a.a, b.a))
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}

/// Errors raised while constructing or loading pixel data.
#[derive(Debug, thiserror::Error)]
pub enum PixelError {
    #[error("Buffer length {actual} does not match {width}x{height} RGBA ({expected} bytes)")]
    LengthMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid color: {0}")]
    InvalidColor(String),

    #[error("Failed to load image {path}: {message}")]
    Image { path: String, message: String },
}

/// A width/height-tagged flat array of row-major RGBA8 samples.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// Wrap raw RGBA bytes, validating the length.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, PixelError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(PixelError::LengthMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A buffer filled with one color.
    pub fn filled(width: u32, height: u32, color: Rgba) -> Self {
        let px = color.to_array();
        let count = width as usize * height as usize;
        let mut data = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            data.extend_from_slice(&px);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// A fully transparent buffer.
    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * CHANNELS],
        }
    }

    /// Build a buffer by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Rgba) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y).to_array());
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Decode an image file (PNG, JPEG, ...) into RGBA.
    pub fn from_image_file(path: impl AsRef<Path>) -> Result<Self, PixelError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| PixelError::Image {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::from_rgba_image(image.into_rgba8()))
    }

    /// Take ownership of an `image` RGBA buffer.
    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    /// Convert into an `image` RGBA buffer (for saving snapshots).
    pub fn into_rgba_image(self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Byte offset of pixel `(x, y)`. Caller guarantees bounds.
    #[inline]
    pub fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }

    /// Pixel at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some(Rgba::new(
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ))
    }

    /// Overwrite pixel `(x, y)`; out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgba) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.offset(x, y);
        self.data[i..i + CHANNELS].copy_from_slice(&color.to_array());
    }

    /// Fill every pixel with one color.
    pub fn fill(&mut self, color: Rgba) {
        let px = color.to_array();
        for chunk in self.data.chunks_exact_mut(CHANNELS) {
            chunk.copy_from_slice(&px);
        }
    }

    /// Box-filter downsample by an integer factor. Trailing rows/columns
    /// that do not fill a whole box are dropped.
    pub fn downsample(&self, factor: u32) -> PixelBuffer {
        if factor <= 1 {
            return self.clone();
        }
        let out_w = self.width / factor;
        let out_h = self.height / factor;
        let area = factor * factor;
        let mut out = PixelBuffer::transparent(out_w, out_h);
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut acc = [0u32; 4];
                for dy in 0..factor {
                    for dx in 0..factor {
                        let i = self.offset(ox * factor + dx, oy * factor + dy);
                        for (c, slot) in acc.iter_mut().enumerate() {
                            *slot += self.data[i + c] as u32;
                        }
                    }
                }
                let o = out.offset(ox, oy);
                for c in 0..CHANNELS {
                    out.data[o + c] = ((acc[c] + area / 2) / area) as u8;
                }
            }
        }
        out
    }
}
