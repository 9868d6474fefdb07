//! Pixel-space rectangles and scaling policies.
//!
//! Unlike normalized editor coordinates, all values here are output-canvas
//! pixels with `(0, 0)` at the top-left corner.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Rectangle covering a whole `width x height` canvas.
    pub fn canvas(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f64, height as f64)
    }

    /// Right edge.
    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    /// Bottom edge.
    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    /// The center point of this rectangle.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// True when the rectangle has no drawable area.
    pub fn is_empty(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }

    /// Check if a point lies inside the rectangle (edges inclusive).
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.right() && py >= self.y && py <= self.bottom()
    }

    /// Shrink by `amount` on every side. Never produces negative sizes.
    pub fn inset(&self, amount: f64) -> Rect {
        let w = (self.w - 2.0 * amount).max(0.0);
        let h = (self.h - 2.0 * amount).max(0.0);
        Rect::new(self.x + amount, self.y + amount, w, h)
    }

    /// Move the rectangle so it lies inside `bounds` where possible.
    pub fn clamp_within(&self, bounds: &Rect) -> Rect {
        let x = self.x.min(bounds.right() - self.w).max(bounds.x);
        let y = self.y.min(bounds.bottom() - self.h).max(bounds.y);
        Rect::new(x, y, self.w, self.h)
    }

    /// Largest centered square inside this rectangle.
    pub fn centered_square(&self) -> Rect {
        let side = self.w.min(self.h);
        let (cx, cy) = self.center();
        Rect::new(cx - side / 2.0, cy - side / 2.0, side, side)
    }

    /// Pixel bounds `(x0, y0, x1, y1)` touched by this rectangle, clamped to
    /// a `width x height` canvas. `x1`/`y1` are exclusive.
    pub fn pixel_bounds(&self, width: u32, height: u32, margin: f64) -> (u32, u32, u32, u32) {
        let clamp = |v: f64, max: u32| v.clamp(0.0, max as f64) as u32;
        (
            clamp((self.x - margin).floor(), width),
            clamp((self.y - margin).floor(), height),
            clamp((self.right() + margin).ceil(), width),
            clamp((self.bottom() + margin).ceil(), height),
        )
    }
}

/// How a source image is mapped onto a destination rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScalePolicy {
    /// Scale both axes independently to fill the destination exactly.
    #[default]
    Stretch,
    /// Preserve aspect ratio, fit entirely inside (letterbox/pillarbox).
    Contain,
    /// Preserve aspect ratio, fill the destination and crop the excess.
    Cover,
}

/// Mapping between a destination rectangle and the source region sampled
/// into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Where pixels land on the canvas.
    pub dest: Rect,
    /// Which part of the source image is sampled, in source pixels.
    pub src: Rect,
}

impl Placement {
    /// Compute the placement of a `src_w x src_h` image into `dest`.
    pub fn fit(dest: Rect, src_w: u32, src_h: u32, policy: ScalePolicy) -> Placement {
        let full_src = Rect::canvas(src_w, src_h);
        if src_w == 0 || src_h == 0 || dest.is_empty() {
            return Placement {
                dest,
                src: full_src,
            };
        }

        let src_aspect = src_w as f64 / src_h as f64;
        let dest_aspect = dest.w / dest.h;

        match policy {
            ScalePolicy::Stretch => Placement {
                dest,
                src: full_src,
            },
            ScalePolicy::Contain => {
                let (w, h) = if src_aspect > dest_aspect {
                    (dest.w, dest.w / src_aspect)
                } else {
                    (dest.h * src_aspect, dest.h)
                };
                let (cx, cy) = dest.center();
                Placement {
                    dest: Rect::new(cx - w / 2.0, cy - h / 2.0, w, h),
                    src: full_src,
                }
            }
            ScalePolicy::Cover => {
                let (sw, sh) = if src_aspect > dest_aspect {
                    (src_h as f64 * dest_aspect, src_h as f64)
                } else {
                    (src_w as f64, src_w as f64 / dest_aspect)
                };
                let (cx, cy) = full_src.center();
                Placement {
                    dest,
                    src: Rect::new(cx - sw / 2.0, cy - sh / 2.0, sw, sh),
                }
            }
        }
    }
}
