//! Export requests and resolved export settings.
//!
//! An [`ExportRequest`] is the loosely-typed shape an editor sends when the
//! user presses "export". [`ExportRequest::into_settings`] validates it and
//! resolves presets into concrete [`ExportSettings`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::geometry::ScalePolicy;
use crate::layout::{Background, LayoutSpec, OverlayShape, OverlaySpec};
use crate::pixel::{PixelBuffer, PixelError, Rgba};

/// Output container/codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// MPEG-4 with H.264 video.
    Mp4,
    /// WebM with VP9 video.
    Webm,
}

impl Container {
    pub fn mime_type(self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
            Container::Webm => "video/webm",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mp4" => Some(Container::Mp4),
            "webm" => Some(Container::Webm),
            _ => None,
        }
    }
}

/// Quality tier, mapped to a target video bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    Medium,
    Low,
}

impl Quality {
    /// Target video bitrate in kbps.
    pub fn bitrate_kbps(self) -> u32 {
        match self {
            Quality::High => 8000,
            Quality::Medium => 5000,
            Quality::Low => 2500,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Quality::High),
            "medium" => Some(Quality::Medium),
            "low" => Some(Quality::Low),
            _ => None,
        }
    }
}

/// Named output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionPreset {
    #[serde(rename = "4k")]
    Uhd4k,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "480p")]
    Sd480,
    #[serde(rename = "original")]
    Original,
}

impl ResolutionPreset {
    pub fn target(self) -> TargetResolution {
        match self {
            ResolutionPreset::Uhd4k => TargetResolution::Explicit {
                width: 3840,
                height: 2160,
            },
            ResolutionPreset::Hd1080 => TargetResolution::Explicit {
                width: 1920,
                height: 1080,
            },
            ResolutionPreset::Hd720 => TargetResolution::Explicit {
                width: 1280,
                height: 720,
            },
            ResolutionPreset::Sd480 => TargetResolution::Explicit {
                width: 854,
                height: 480,
            },
            ResolutionPreset::Original => TargetResolution::Source,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "4k" | "2160p" => Some(ResolutionPreset::Uhd4k),
            "1080p" => Some(ResolutionPreset::Hd1080),
            "720p" => Some(ResolutionPreset::Hd720),
            "480p" => Some(ResolutionPreset::Sd480),
            "original" | "source" => Some(ResolutionPreset::Original),
            _ => None,
        }
    }
}

/// Canvas size of the exported video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetResolution {
    /// Fixed output size.
    Explicit { width: u32, height: u32 },
    /// Use the primary source's native size.
    Source,
}

impl TargetResolution {
    /// Resolve against the primary source's native size. Dimensions are
    /// rounded down to even numbers as required by 4:2:0 encoders.
    pub fn resolve(self, source_width: u32, source_height: u32) -> (u32, u32) {
        let (w, h) = match self {
            TargetResolution::Explicit { width, height } => (width, height),
            TargetResolution::Source => (source_width, source_height),
        };
        ((w & !1).max(2), (h & !1).max(2))
    }
}

/// Webcam overlay settings as sent by an editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebcamSettings {
    pub visible: bool,
    pub shape: OverlayShape,
    /// Top-left position in percent of the canvas.
    pub position: PercentPosition,
    /// Absolute size in canvas pixels.
    pub size: PixelSize,
    pub corner_radius: f64,
    pub border_width: f64,
    pub border_color: String,
}

/// Position expressed as percentages of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentPosition {
    pub x: f64,
    pub y: f64,
}

/// Size in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: f64,
    pub height: f64,
}

impl Default for WebcamSettings {
    fn default() -> Self {
        let overlay = OverlaySpec::default();
        Self {
            visible: overlay.visible,
            shape: overlay.shape,
            position: PercentPosition {
                x: overlay.x_percent,
                y: overlay.y_percent,
            },
            size: PixelSize {
                width: overlay.width,
                height: overlay.height,
            },
            corner_radius: overlay.corner_radius,
            border_width: overlay.border_width,
            border_color: "#ffffff".to_string(),
        }
    }
}

/// Background kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundKind {
    #[default]
    Solid,
    Gradient,
    Image,
    None,
}

/// Background and canvas framing settings as sent by an editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackgroundSettings {
    #[serde(rename = "type")]
    pub kind: BackgroundKind,
    pub color: String,
    pub gradient_from: String,
    pub gradient_to: String,
    pub gradient_angle: f64,
    pub image_path: Option<PathBuf>,
    /// Padding in percent of canvas width.
    pub padding: f64,
    pub corner_radius: f64,
    pub shadow_intensity: f64,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            kind: BackgroundKind::Solid,
            color: "#1a1a1a".to_string(),
            gradient_from: "#4f46e5".to_string(),
            gradient_to: "#ec4899".to_string(),
            gradient_angle: 135.0,
            image_path: None,
            padding: 5.0,
            corner_radius: 12.0,
            shadow_intensity: 0.5,
        }
    }
}

/// Export request as sent by an editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub resolution: ResolutionPreset,
    pub fps: u32,
    pub quality: Quality,
    pub format: Container,
    #[serde(default)]
    pub include_webcam: bool,
    #[serde(default)]
    pub webcam_settings: WebcamSettings,
    #[serde(default)]
    pub background_settings: BackgroundSettings,
}

/// Fully resolved, validated export settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub resolution: TargetResolution,
    pub fps: u32,
    pub quality: Quality,
    pub bitrate_kbps: u32,
    /// Container the caller wants delivered.
    pub container: Container,
    /// Whether the secondary (webcam) source is composited.
    pub include_secondary: bool,
    pub layout: LayoutSpec,
}

/// Errors raised while validating an export request.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid frame rate: {0} (must be between 1 and 240)")]
    InvalidFps(u32),

    #[error("Background image requested but no image path was given")]
    MissingBackgroundImage,

    #[error(transparent)]
    Pixel(#[from] PixelError),
}

impl ExportRequest {
    /// Validate and resolve into concrete settings. Loads the background
    /// image from disk when one is requested.
    pub fn into_settings(self) -> Result<ExportSettings, JobError> {
        if self.fps == 0 || self.fps > 240 {
            return Err(JobError::InvalidFps(self.fps));
        }

        let bg = &self.background_settings;
        let background = match bg.kind {
            BackgroundKind::None => Background::None,
            BackgroundKind::Solid => Background::Solid(Rgba::from_hex(&bg.color)?),
            BackgroundKind::Gradient => Background::LinearGradient {
                from: Rgba::from_hex(&bg.gradient_from)?,
                to: Rgba::from_hex(&bg.gradient_to)?,
                angle_degrees: bg.gradient_angle,
            },
            BackgroundKind::Image => {
                let path = bg
                    .image_path
                    .as_ref()
                    .ok_or(JobError::MissingBackgroundImage)?;
                Background::Image(PixelBuffer::from_image_file(path)?)
            }
        };

        let cam = &self.webcam_settings;
        let overlay = OverlaySpec {
            visible: cam.visible,
            shape: cam.shape,
            x_percent: cam.position.x,
            y_percent: cam.position.y,
            width: cam.size.width.max(0.0),
            height: cam.size.height.max(0.0),
            corner_radius: cam.corner_radius.max(0.0),
            border_width: cam.border_width.max(0.0),
            border_color: Rgba::from_hex(&cam.border_color)?,
            fit: ScalePolicy::Cover,
        };

        let layout = LayoutSpec {
            background,
            padding_percent: bg.padding.clamp(0.0, 50.0),
            corner_radius: bg.corner_radius.max(0.0),
            shadow_intensity: bg.shadow_intensity.clamp(0.0, 1.0),
            primary_fit: ScalePolicy::Stretch,
            overlay,
        };

        Ok(ExportSettings {
            resolution: self.resolution.target(),
            fps: self.fps,
            quality: self.quality,
            bitrate_kbps: self.quality.bitrate_kbps(),
            container: self.format,
            include_secondary: self.include_webcam,
            layout,
        })
    }
}
