//! Layout and styling applied to every composited frame of a job.
//!
//! A [`LayoutSpec`] is resolved once per export and is immutable for the
//! duration of that job.

use serde::{Deserialize, Serialize};

use crate::geometry::ScalePolicy;
use crate::pixel::{PixelBuffer, Rgba};

/// Complete layout for one export job.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutSpec {
    /// What is painted behind the primary source.
    pub background: Background,

    /// Padding around the primary source as a percentage of canvas width,
    /// applied on all four sides.
    pub padding_percent: f64,

    /// Corner radius of the primary source in canvas pixels.
    pub corner_radius: f64,

    /// Drop shadow strength under the primary source, `[0.0, 1.0]`.
    pub shadow_intensity: f64,

    /// How the primary source is mapped into its padded rectangle.
    pub primary_fit: ScalePolicy,

    /// Secondary (webcam) overlay styling.
    pub overlay: OverlaySpec,
}

/// Background fill of the canvas.
#[derive(Debug, Clone, PartialEq)]
pub enum Background {
    /// Leave the canvas transparent.
    None,
    /// Single solid color.
    Solid(Rgba),
    /// Two-stop linear gradient. `angle_degrees` follows CSS conventions:
    /// 0 points up, 90 points right.
    LinearGradient {
        from: Rgba,
        to: Rgba,
        angle_degrees: f64,
    },
    /// Image stretched over the whole canvas.
    Image(PixelBuffer),
}

/// Clip shape of the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayShape {
    /// Rounded rectangle using `corner_radius`.
    #[default]
    Rectangle,
    /// Largest centered square of the overlay box.
    Square,
    /// Circle of radius `min(width, height) / 2`.
    Circle,
}

/// Secondary-source overlay placement and styling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySpec {
    /// Whether the overlay is drawn when a secondary sample exists.
    pub visible: bool,

    /// Clip shape.
    pub shape: OverlayShape,

    /// Left edge as a percentage of canvas width.
    pub x_percent: f64,

    /// Top edge as a percentage of canvas height.
    pub y_percent: f64,

    /// Overlay box width in canvas pixels.
    pub width: f64,

    /// Overlay box height in canvas pixels.
    pub height: f64,

    /// Corner radius for the rectangle shape.
    pub corner_radius: f64,

    /// Border stroke width in canvas pixels (0 disables the border).
    pub border_width: f64,

    /// Border stroke color.
    pub border_color: Rgba,

    /// How the secondary source is mapped into the overlay box.
    pub fit: ScalePolicy,
}

impl Default for OverlaySpec {
    fn default() -> Self {
        Self {
            visible: true,
            shape: OverlayShape::Circle,
            x_percent: 80.0,
            y_percent: 72.0,
            width: 200.0,
            height: 200.0,
            corner_radius: 16.0,
            border_width: 4.0,
            border_color: Rgba::WHITE,
            fit: ScalePolicy::Cover,
        }
    }
}

impl Default for LayoutSpec {
    fn default() -> Self {
        Self {
            background: Background::Solid(Rgba::opaque(0x1a, 0x1a, 0x1a)),
            padding_percent: 5.0,
            corner_radius: 12.0,
            shadow_intensity: 0.5,
            primary_fit: ScalePolicy::Stretch,
            overlay: OverlaySpec::default(),
        }
    }
}

impl LayoutSpec {
    /// A layout that draws the primary source edge to edge with nothing
    /// else: no padding, rounding, shadow, or overlay.
    pub fn full_bleed() -> Self {
        Self {
            background: Background::None,
            padding_percent: 0.0,
            corner_radius: 0.0,
            shadow_intensity: 0.0,
            primary_fit: ScalePolicy::Stretch,
            overlay: OverlaySpec {
                visible: false,
                ..OverlaySpec::default()
            },
        }
    }

    /// Padding in canvas pixels for a canvas of the given width.
    pub fn padding_px(&self, canvas_width: u32) -> f64 {
        (self.padding_percent.max(0.0) / 100.0) * canvas_width as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_is_percentage_of_width() {
        let layout = LayoutSpec {
            padding_percent: 10.0,
            ..LayoutSpec::default()
        };
        assert!((layout.padding_px(1920) - 192.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_padding_is_ignored() {
        let layout = LayoutSpec {
            padding_percent: -3.0,
            ..LayoutSpec::default()
        };
        assert_eq!(layout.padding_px(1000), 0.0);
    }

    #[test]
    fn test_primary_defaults_to_stretch() {
        assert_eq!(LayoutSpec::default().primary_fit, ScalePolicy::Stretch);
        assert_eq!(LayoutSpec::full_bleed().primary_fit, ScalePolicy::Stretch);
    }

    #[test]
    fn test_overlay_spec_deserializes_with_defaults() {
        let spec: OverlaySpec =
            serde_json::from_str(r#"{"shape":"square","border_width":2.0}"#).unwrap();
        assert_eq!(spec.shape, OverlayShape::Square);
        assert!(spec.visible);
        assert!((spec.border_width - 2.0).abs() < 1e-9);
        assert_eq!(spec.fit, ScalePolicy::Cover);
    }
}
