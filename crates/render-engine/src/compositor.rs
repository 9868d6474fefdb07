//! Frame compositor: background, primary source, and webcam overlay.
//!
//! Every output frame is built from scratch in a fixed order:
//!
//! 1. Clear the canvas to transparent.
//! 2. Paint the background over the whole canvas.
//! 3. Paint the drop shadow under the padded primary rectangle.
//! 4. Draw the primary source clipped to a rounded rectangle.
//! 5. Draw the secondary source clipped to the overlay shape, then stroke
//!    its border outside the clip.
//!
//! Shape edges use one pixel of signed-distance coverage. Pixel centers sit
//! at `+0.5`, so axis-aligned edges on integer coordinates are exact.

use castkit_media_model::{
    Background, LayoutSpec, OverlayShape, PixelBuffer, Placement, Rect, Rgba, CHANNELS,
};

/// A clip region described by its signed distance function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Clip {
    RoundedRect { rect: Rect, radius: f64 },
    Circle { cx: f64, cy: f64, radius: f64 },
}

impl Clip {
    /// Signed distance from `(px, py)` to the boundary; negative inside.
    pub fn signed_distance(&self, px: f64, py: f64) -> f64 {
        match *self {
            Clip::RoundedRect { rect, radius } => {
                let (cx, cy) = rect.center();
                let (hw, hh) = (rect.w / 2.0, rect.h / 2.0);
                let r = radius.clamp(0.0, hw.min(hh));
                let qx = (px - cx).abs() - hw + r;
                let qy = (py - cy).abs() - hh + r;
                let outside = qx.max(0.0).hypot(qy.max(0.0));
                outside + qx.max(qy).min(0.0) - r
            }
            Clip::Circle { cx, cy, radius } => (px - cx).hypot(py - cy) - radius,
        }
    }

    /// Fraction of the pixel centered at `(px, py)` inside the clip.
    pub fn coverage(&self, px: f64, py: f64) -> f64 {
        (0.5 - self.signed_distance(px, py)).clamp(0.0, 1.0)
    }

    /// Rectangle whose points all have full coverage. May be empty.
    pub fn interior(&self) -> Rect {
        match *self {
            Clip::RoundedRect { rect, radius } => {
                let r = radius.clamp(0.0, (rect.w / 2.0).min(rect.h / 2.0));
                rect.inset(r.max(0.5))
            }
            Clip::Circle { cx, cy, radius } => {
                let half = (radius - 0.5).max(0.0) / std::f64::consts::SQRT_2;
                Rect::new(cx - half, cy - half, half * 2.0, half * 2.0)
            }
        }
    }

    /// Axis-aligned bounds of the clip.
    pub fn bounds(&self) -> Rect {
        match *self {
            Clip::RoundedRect { rect, .. } => rect,
            Clip::Circle { cx, cy, radius } => {
                Rect::new(cx - radius, cy - radius, radius * 2.0, radius * 2.0)
            }
        }
    }
}

/// Per-job compositor with a one-frame hold buffer.
///
/// The compositor keeps its own copy of the last frame it produced so the
/// capture loop can bridge a single failed sample without re-reading the
/// encoder's (already moved) input.
#[derive(Debug, Default)]
pub struct FrameCompositor {
    last: Option<(f64, PixelBuffer)>,
    held: bool,
}

impl FrameCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Composite one output frame. Inputs are never modified.
    pub fn compose(
        &mut self,
        timestamp: f64,
        primary: &PixelBuffer,
        secondary: Option<&PixelBuffer>,
        layout: &LayoutSpec,
        canvas: (u32, u32),
    ) -> PixelBuffer {
        let frame = compose_frame(primary, secondary, layout, canvas);
        self.last = Some((timestamp, frame.clone()));
        self.held = false;
        frame
    }

    /// Repeat the last composited frame for a failed sample at `timestamp`.
    ///
    /// Returns `None` before any frame was composited, or when the previous
    /// call was also a hold. A successful [`compose`](Self::compose) makes a
    /// hold available again.
    pub fn hold(&mut self, timestamp: f64) -> Option<PixelBuffer> {
        if self.held {
            tracing::debug!(timestamp, "Hold budget exhausted");
            return None;
        }
        let (held_from, frame) = self.last.as_ref()?;
        tracing::debug!(timestamp, held_from, "Holding last composited frame");
        self.held = true;
        Some(frame.clone())
    }

    /// Whether a composited frame is available for holding.
    pub fn has_frame(&self) -> bool {
        self.last.is_some()
    }
}

/// Stateless composite of one frame.
pub fn compose_frame(
    primary: &PixelBuffer,
    secondary: Option<&PixelBuffer>,
    layout: &LayoutSpec,
    (width, height): (u32, u32),
) -> PixelBuffer {
    let mut canvas = PixelBuffer::transparent(width, height);
    paint_background(&mut canvas, &layout.background);

    let primary_rect = Rect::canvas(width, height).inset(layout.padding_px(width));
    if !primary_rect.is_empty() && !primary.is_empty() {
        let placement = Placement::fit(
            primary_rect,
            primary.width(),
            primary.height(),
            layout.primary_fit,
        );
        let clip = Clip::RoundedRect {
            rect: placement.dest,
            radius: layout.corner_radius,
        };
        if layout.shadow_intensity > 0.0 {
            paint_shadow(&mut canvas, placement.dest, layout.corner_radius, layout.shadow_intensity);
        }
        draw_image(&mut canvas, primary, &placement, &clip);
    }

    if let Some(secondary) = secondary.filter(|s| !s.is_empty()) {
        let overlay = &layout.overlay;
        if overlay.visible && overlay.width > 0.0 && overlay.height > 0.0 {
            let canvas_rect = Rect::canvas(width, height);
            let area = Rect::new(
                overlay.x_percent / 100.0 * width as f64,
                overlay.y_percent / 100.0 * height as f64,
                overlay.width,
                overlay.height,
            )
            .clamp_within(&canvas_rect);

            let clip = match overlay.shape {
                OverlayShape::Rectangle => Clip::RoundedRect {
                    rect: area,
                    radius: overlay.corner_radius,
                },
                OverlayShape::Square => Clip::RoundedRect {
                    rect: area.centered_square(),
                    radius: 0.0,
                },
                OverlayShape::Circle => {
                    let (cx, cy) = area.center();
                    Clip::Circle {
                        cx,
                        cy,
                        radius: area.w.min(area.h) / 2.0,
                    }
                }
            };

            let placement = Placement::fit(
                clip.bounds(),
                secondary.width(),
                secondary.height(),
                overlay.fit,
            );
            draw_image(&mut canvas, secondary, &placement, &clip);
            if overlay.border_width > 0.0 {
                stroke_outside(&mut canvas, &clip, overlay.border_width, overlay.border_color);
            }
        }
    }

    canvas
}

/// Fill the whole canvas with the background.
pub fn paint_background(canvas: &mut PixelBuffer, background: &Background) {
    let (width, height) = canvas.dimensions();
    match background {
        Background::None => {}
        Background::Solid(color) => canvas.fill(*color),
        Background::LinearGradient {
            from,
            to,
            angle_degrees,
        } => {
            // CSS convention: 0deg points up, 90deg points right.
            let theta = angle_degrees.to_radians();
            let (dir_x, dir_y) = (theta.sin(), -theta.cos());
            let (w, h) = (width as f64, height as f64);
            let length = (w * dir_x).abs() + (h * dir_y).abs();
            for y in 0..height {
                for x in 0..width {
                    let px = x as f64 + 0.5 - w / 2.0;
                    let py = y as f64 + 0.5 - h / 2.0;
                    let t = if length > 0.0 {
                        (px * dir_x + py * dir_y) / length + 0.5
                    } else {
                        0.0
                    };
                    canvas.put_pixel(x, y, Rgba::lerp(*from, *to, t));
                }
            }
        }
        Background::Image(image) => {
            if image.is_empty() {
                return;
            }
            let placement = Placement {
                dest: Rect::canvas(width, height),
                src: Rect::canvas(image.width(), image.height()),
            };
            for y in 0..height {
                for x in 0..width {
                    let (u, v) = source_coords(&placement, x as f64 + 0.5, y as f64 + 0.5);
                    canvas.put_pixel(x, y, sample_bilinear(image, u, v));
                }
            }
        }
    }
}

/// Soft shadow offset below `rect`.
fn paint_shadow(canvas: &mut PixelBuffer, rect: Rect, radius: f64, intensity: f64) {
    let intensity = intensity.clamp(0.0, 1.0);
    let blur = 6.0 + 18.0 * intensity;
    let offset = 4.0 + 8.0 * intensity;
    let max_alpha = 0.6 * intensity;
    let shadow = Clip::RoundedRect {
        rect: Rect::new(rect.x, rect.y + offset, rect.w, rect.h),
        radius,
    };

    let (width, height) = canvas.dimensions();
    let (x0, y0, x1, y1) = shadow.bounds().pixel_bounds(width, height, blur);
    for y in y0..y1 {
        for x in x0..x1 {
            let sd = shadow.signed_distance(x as f64 + 0.5, y as f64 + 0.5);
            let coverage = (0.5 - sd / blur).clamp(0.0, 1.0);
            if coverage > 0.0 {
                blend_pixel(canvas, x, y, Rgba::BLACK, coverage * max_alpha);
            }
        }
    }
}

/// Draw `image` through `placement`, masked by `clip`.
fn draw_image(canvas: &mut PixelBuffer, image: &PixelBuffer, placement: &Placement, clip: &Clip) {
    let dest_clip = Clip::RoundedRect {
        rect: placement.dest,
        radius: 0.0,
    };
    let solid = clip.interior();
    let dest_solid = dest_clip.interior();
    let any_solid = !solid.is_empty() && !dest_solid.is_empty();
    let (width, height) = canvas.dimensions();
    let (x0, y0, x1, y1) = clip.bounds().pixel_bounds(width, height, 1.0);
    for y in y0..y1 {
        for x in x0..x1 {
            let (cx, cy) = (x as f64 + 0.5, y as f64 + 0.5);
            let coverage = if any_solid && solid.contains(cx, cy) && dest_solid.contains(cx, cy) {
                1.0
            } else {
                clip.coverage(cx, cy).min(dest_clip.coverage(cx, cy))
            };
            if coverage <= 0.0 {
                continue;
            }
            let (u, v) = source_coords(placement, cx, cy);
            let color = sample_bilinear(image, u, v);
            blend_pixel(canvas, x, y, color, coverage * color.a as f64 / 255.0);
        }
    }
}

/// Stroke a band `width` pixels wide just outside the clip boundary.
fn stroke_outside(canvas: &mut PixelBuffer, clip: &Clip, width: f64, color: Rgba) {
    let (cw, ch) = canvas.dimensions();
    let (x0, y0, x1, y1) = clip.bounds().pixel_bounds(cw, ch, width + 1.0);
    let alpha = color.a as f64 / 255.0;
    for y in y0..y1 {
        for x in x0..x1 {
            let sd = clip.signed_distance(x as f64 + 0.5, y as f64 + 0.5);
            let outer = (0.5 - (sd - width)).clamp(0.0, 1.0);
            let inner = (0.5 - sd).clamp(0.0, 1.0);
            let coverage = outer - inner;
            if coverage > 0.0 {
                blend_pixel(canvas, x, y, color, coverage * alpha);
            }
        }
    }
}

/// Map a canvas pixel center into source pixel coordinates.
fn source_coords(placement: &Placement, cx: f64, cy: f64) -> (f64, f64) {
    let (dest, src) = (placement.dest, placement.src);
    let u = src.x + (cx - dest.x) * src.w / dest.w - 0.5;
    let v = src.y + (cy - dest.y) * src.h / dest.h - 0.5;
    (u, v)
}

/// Bilinear sample with clamp-to-edge addressing.
pub fn sample_bilinear(image: &PixelBuffer, u: f64, v: f64) -> Rgba {
    let max_x = (image.width() - 1) as f64;
    let max_y = (image.height() - 1) as f64;
    let u = u.clamp(0.0, max_x);
    let v = v.clamp(0.0, max_y);
    let (x0, y0) = (u.floor() as u32, v.floor() as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let (fx, fy) = (u - x0 as f64, v - y0 as f64);

    let data = image.as_bytes();
    let (i00, i10) = (image.offset(x0, y0), image.offset(x1, y0));
    let (i01, i11) = (image.offset(x0, y1), image.offset(x1, y1));
    let mut out = [0u8; CHANNELS];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = data[i00 + c] as f64 * (1.0 - fx) + data[i10 + c] as f64 * fx;
        let bottom = data[i01 + c] as f64 * (1.0 - fx) + data[i11 + c] as f64 * fx;
        *slot = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba::from_array(out)
}

/// Straight-alpha source-over of `color` at opacity `alpha` onto one pixel.
fn blend_pixel(canvas: &mut PixelBuffer, x: u32, y: u32, color: Rgba, alpha: f64) {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let i = canvas.offset(x, y);
    let px = &mut canvas.as_bytes_mut()[i..i + CHANNELS];
    if alpha >= 1.0 {
        px.copy_from_slice(&color.to_array());
        return;
    }
    let dst_a = px[3] as f64 / 255.0;
    let out_a = alpha + dst_a * (1.0 - alpha);
    if out_a <= 0.0 {
        px.copy_from_slice(&[0; CHANNELS]);
        return;
    }
    let src = color.to_array();
    for c in 0..3 {
        let value = (src[c] as f64 * alpha + px[c] as f64 * dst_a * (1.0 - alpha)) / out_a;
        px[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    px[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use castkit_media_model::ScalePolicy;

    const BG: Rgba = Rgba::opaque(10, 20, 30);

    fn solid_layout(padding_percent: f64) -> LayoutSpec {
        LayoutSpec {
            background: Background::Solid(BG),
            padding_percent,
            corner_radius: 0.0,
            shadow_intensity: 0.0,
            ..LayoutSpec::full_bleed()
        }
    }

    #[test]
    fn test_border_shows_solid_background() {
        let primary = PixelBuffer::filled(80, 80, Rgba::WHITE);
        let frame = compose_frame(&primary, None, &solid_layout(10.0), (100, 100));
        // Padding is 10px on every side.
        assert_eq!(frame.pixel(0, 0), Some(BG));
        assert_eq!(frame.pixel(9, 50), Some(BG));
        assert_eq!(frame.pixel(90, 50), Some(BG));
        assert_eq!(frame.pixel(10, 10), Some(Rgba::WHITE));
        assert_eq!(frame.pixel(89, 89), Some(Rgba::WHITE));
    }

    #[test]
    fn test_full_canvas_primary_hides_background() {
        let primary = PixelBuffer::from_fn(64, 48, |x, y| Rgba::opaque(x as u8, y as u8, 200));
        let frame = compose_frame(&primary, None, &solid_layout(0.0), (64, 48));
        assert_eq!(frame, primary);
    }

    #[test]
    fn test_stretch_fills_padded_rect() {
        let primary = PixelBuffer::filled(16, 9, Rgba::WHITE);
        let frame = compose_frame(&primary, None, &solid_layout(0.0), (40, 40));
        // A square canvas with a wide source is not letterboxed.
        assert_eq!(frame.pixel(20, 0), Some(Rgba::WHITE));
        assert_eq!(frame.pixel(20, 39), Some(Rgba::WHITE));
    }

    #[test]
    fn test_contain_letterboxes_when_requested() {
        let primary = PixelBuffer::filled(40, 20, Rgba::WHITE);
        let layout = LayoutSpec {
            primary_fit: ScalePolicy::Contain,
            ..solid_layout(0.0)
        };
        let frame = compose_frame(&primary, None, &layout, (40, 40));
        assert_eq!(frame.pixel(20, 2), Some(BG));
        assert_eq!(frame.pixel(20, 20), Some(Rgba::WHITE));
    }

    #[test]
    fn test_no_background_leaves_padding_transparent() {
        let primary = PixelBuffer::filled(8, 8, Rgba::WHITE);
        let layout = LayoutSpec {
            background: Background::None,
            ..solid_layout(10.0)
        };
        let frame = compose_frame(&primary, None, &layout, (100, 100));
        assert_eq!(frame.pixel(0, 0), Some(Rgba::TRANSPARENT));
    }

    #[test]
    fn test_rounded_corners_reveal_background() {
        let primary = PixelBuffer::filled(100, 100, Rgba::WHITE);
        let layout = LayoutSpec {
            corner_radius: 20.0,
            ..solid_layout(0.0)
        };
        let frame = compose_frame(&primary, None, &layout, (100, 100));
        assert_eq!(frame.pixel(0, 0), Some(BG));
        assert_eq!(frame.pixel(50, 0), Some(Rgba::WHITE));
        assert_eq!(frame.pixel(50, 50), Some(Rgba::WHITE));
    }

    #[test]
    fn test_gradient_runs_along_angle() {
        let mut canvas = PixelBuffer::transparent(100, 10);
        paint_background(
            &mut canvas,
            &Background::LinearGradient {
                from: Rgba::BLACK,
                to: Rgba::WHITE,
                angle_degrees: 90.0,
            },
        );
        let left = canvas.pixel(0, 5).unwrap();
        let right = canvas.pixel(99, 5).unwrap();
        assert!(left.r < 5);
        assert!(right.r > 250);
        assert_eq!(canvas.pixel(50, 0), canvas.pixel(50, 9));
    }

    #[test]
    fn test_image_background_is_stretched() {
        let image = PixelBuffer::filled(2, 2, Rgba::opaque(1, 2, 3));
        let mut canvas = PixelBuffer::transparent(50, 30);
        paint_background(&mut canvas, &Background::Image(image));
        assert_eq!(canvas.pixel(49, 29), Some(Rgba::opaque(1, 2, 3)));
    }

    #[test]
    fn test_shadow_darkens_below_primary() {
        let primary = PixelBuffer::filled(60, 60, Rgba::WHITE);
        let layout = LayoutSpec {
            background: Background::Solid(Rgba::WHITE),
            shadow_intensity: 1.0,
            ..solid_layout(20.0)
        };
        let frame = compose_frame(&primary, None, &layout, (100, 100));
        let below = frame.pixel(50, 82).unwrap();
        assert!(below.r < 255);
        // Far corner is untouched.
        assert_eq!(frame.pixel(0, 0), Some(Rgba::WHITE));
    }

    #[test]
    fn test_circle_overlay_with_border() {
        let primary = PixelBuffer::filled(100, 100, Rgba::BLACK);
        let webcam = PixelBuffer::filled(40, 40, Rgba::opaque(0, 255, 0));
        let mut layout = solid_layout(0.0);
        layout.overlay.visible = true;
        layout.overlay.shape = OverlayShape::Circle;
        layout.overlay.x_percent = 50.0;
        layout.overlay.y_percent = 50.0;
        layout.overlay.width = 40.0;
        layout.overlay.height = 40.0;
        layout.overlay.border_width = 3.0;
        layout.overlay.border_color = Rgba::opaque(255, 0, 0);

        let frame = compose_frame(&primary, Some(&webcam), &layout, (100, 100));
        // Center of the circle shows the webcam.
        assert_eq!(frame.pixel(70, 70), Some(Rgba::opaque(0, 255, 0)));
        // Box corner lies outside the circle.
        assert_eq!(frame.pixel(51, 51), Some(Rgba::BLACK));
        // Just outside the circle's right edge is the border.
        assert_eq!(frame.pixel(91, 70), Some(Rgba::opaque(255, 0, 0)));
    }

    #[test]
    fn test_overlay_is_clamped_into_canvas() {
        let primary = PixelBuffer::filled(50, 50, Rgba::BLACK);
        let webcam = PixelBuffer::filled(10, 10, Rgba::WHITE);
        let mut layout = solid_layout(0.0);
        layout.overlay.visible = true;
        layout.overlay.shape = OverlayShape::Rectangle;
        layout.overlay.corner_radius = 0.0;
        layout.overlay.border_width = 0.0;
        layout.overlay.x_percent = 95.0;
        layout.overlay.y_percent = 95.0;
        layout.overlay.width = 10.0;
        layout.overlay.height = 10.0;

        let frame = compose_frame(&primary, Some(&webcam), &layout, (50, 50));
        assert_eq!(frame.pixel(49, 49), Some(Rgba::WHITE));
        assert_eq!(frame.pixel(40, 40), Some(Rgba::WHITE));
        assert_eq!(frame.pixel(39, 39), Some(Rgba::BLACK));
    }

    #[test]
    fn test_hidden_overlay_is_not_drawn() {
        let primary = PixelBuffer::filled(50, 50, Rgba::BLACK);
        let webcam = PixelBuffer::filled(10, 10, Rgba::WHITE);
        let frame = compose_frame(&primary, Some(&webcam), &solid_layout(0.0), (50, 50));
        assert_eq!(frame, primary);
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let primary = PixelBuffer::filled(20, 20, Rgba::WHITE);
        let before = primary.clone();
        let mut compositor = FrameCompositor::new();
        let _ = compositor.compose(0.0, &primary, None, &LayoutSpec::default(), (40, 40));
        assert_eq!(primary, before);
    }

    #[test]
    fn test_hold_budget_is_one_frame() {
        let primary = PixelBuffer::filled(4, 4, Rgba::WHITE);
        let mut compositor = FrameCompositor::new();
        assert!(compositor.hold(0.0).is_none());

        let frame = compositor.compose(0.0, &primary, None, &LayoutSpec::full_bleed(), (4, 4));
        assert_eq!(compositor.hold(0.033), Some(frame.clone()));
        assert!(compositor.hold(0.066).is_none());

        compositor.compose(0.1, &primary, None, &LayoutSpec::full_bleed(), (4, 4));
        assert!(compositor.hold(0.133).is_some());
    }

    #[test]
    fn test_square_edges_are_exact() {
        let clip = Clip::RoundedRect {
            rect: Rect::new(2.0, 2.0, 4.0, 4.0),
            radius: 0.0,
        };
        assert_eq!(clip.coverage(2.5, 2.5), 1.0);
        assert_eq!(clip.coverage(1.5, 2.5), 0.0);
        assert_eq!(clip.coverage(5.5, 5.5), 1.0);
        assert_eq!(clip.coverage(6.5, 5.5), 0.0);
    }

    #[test]
    fn test_interior_is_fully_covered() {
        let clips = [
            Clip::RoundedRect {
                rect: Rect::new(1.0, 2.0, 30.0, 18.0),
                radius: 6.0,
            },
            Clip::RoundedRect {
                rect: Rect::new(0.0, 0.0, 9.0, 5.0),
                radius: 0.0,
            },
            Clip::Circle {
                cx: 12.0,
                cy: 9.0,
                radius: 7.5,
            },
        ];
        for clip in clips {
            let interior = clip.interior();
            assert!(!interior.is_empty());
            for y in 0..40 {
                for x in 0..40 {
                    let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
                    if interior.contains(px, py) {
                        assert!(clip.coverage(px, py) >= 1.0 - 1e-9, "{clip:?} at {px},{py}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_tiny_circle_has_no_interior() {
        let clip = Clip::Circle {
            cx: 1.0,
            cy: 1.0,
            radius: 0.25,
        };
        assert!(clip.interior().is_empty());
    }
}
