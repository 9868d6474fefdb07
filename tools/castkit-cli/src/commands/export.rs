//! Export a recording to video.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use castkit_common::config::AppConfig;
use castkit_media_model::{
    BackgroundKind, BackgroundSettings, Container, ExportRequest, Quality, ResolutionPreset,
    WebcamSettings,
};
use castkit_render_engine::{
    CaptureEncoder, CaptureOptions, ExportJob, ExportOutcome, ExportProgress, ExportStage,
    FfmpegEncoder, FfmpegSource, FfmpegTranscoder, MediaSource, ProgressCallback,
};

pub struct ExportArgs {
    pub primary: PathBuf,
    pub webcam: Option<PathBuf>,
    pub request: Option<PathBuf>,
    pub resolution: Option<String>,
    pub fps: Option<u32>,
    pub quality: Option<String>,
    pub format: Option<String>,
    pub background: Option<String>,
    pub padding: Option<f64>,
    pub output: Option<PathBuf>,
}

pub async fn run(config: &AppConfig, args: ExportArgs) -> anyhow::Result<()> {
    println!("Exporting: {}", args.primary.display());

    let request = build_request(config, &args)?;
    let settings = request
        .into_settings()
        .context("Invalid export request")?;

    let primary: Box<dyn MediaSource> = Box::new(FfmpegSource::new(&args.primary, settings.fps));
    let secondary: Option<Box<dyn MediaSource>> = match &args.webcam {
        Some(path) => Some(Box::new(FfmpegSource::new(path, settings.fps))),
        None => None,
    };

    println!("  Format: {:?}", settings.container);
    println!("  Frame rate: {} fps", settings.fps);
    println!("  Quality: {:?} ({} kbps)", settings.quality, settings.bitrate_kbps);
    if let Some(webcam) = &args.webcam {
        println!("  Webcam: {}", webcam.display());
    }

    let job = ExportJob {
        primary,
        secondary,
        settings,
        known_duration_secs: None,
    };

    let capture = CaptureEncoder::new(
        Box::new(FfmpegEncoder::new()),
        Box::new(FfmpegTranscoder::probed()),
    )
    .with_options(CaptureOptions::from(&config.export));

    let handle = capture.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let progress_cb: ProgressCallback = Box::new(print_progress);

    match capture.run(job, Some(progress_cb)).await {
        Ok(ExportOutcome::Completed(output)) => {
            let path = output_path(&args.primary, args.output.as_deref(), output.container);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, &output.bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;

            println!("\nExport complete: {}", path.display());
            println!(
                "  {} frames, {:.2}s, {}x{}, {} ({} bytes)",
                output.frames_submitted,
                output.duration_secs,
                output.width,
                output.height,
                output.mime_type,
                output.bytes.len()
            );
            if output.fallback_used {
                println!(
                    "  Note: requested container was unavailable, delivered {} instead",
                    output.container.extension()
                );
            }
            Ok(())
        }
        Ok(ExportOutcome::Cancelled) => {
            println!("\nExport cancelled");
            Ok(())
        }
        Err(e) => {
            println!("\nExport failed: {e}");
            Err(e.into())
        }
    }
}

/// Start from the request file (or config defaults) and apply flag overrides.
fn build_request(config: &AppConfig, args: &ExportArgs) -> anyhow::Result<ExportRequest> {
    let mut request = match &args.request {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => ExportRequest {
            resolution: ResolutionPreset::Original,
            fps: config.export.fps,
            quality: Quality::parse(&config.export.quality).unwrap_or(Quality::High),
            format: Container::parse(&config.export.format).unwrap_or(Container::Mp4),
            include_webcam: false,
            webcam_settings: WebcamSettings::default(),
            background_settings: BackgroundSettings::default(),
        },
    };

    if let Some(resolution) = &args.resolution {
        request.resolution = ResolutionPreset::parse(resolution).ok_or_else(|| {
            anyhow::anyhow!("Unknown resolution: {resolution}. Use: 4k, 1080p, 720p, 480p, original")
        })?;
    }
    if let Some(fps) = args.fps {
        request.fps = fps;
    }
    if let Some(quality) = &args.quality {
        request.quality = Quality::parse(quality)
            .ok_or_else(|| anyhow::anyhow!("Unknown quality: {quality}. Use: high, medium, low"))?;
    }
    if let Some(format) = &args.format {
        request.format = Container::parse(format)
            .ok_or_else(|| anyhow::anyhow!("Unknown format: {format}. Use: mp4, webm"))?;
    }
    if let Some(color) = &args.background {
        request.background_settings.kind = BackgroundKind::Solid;
        request.background_settings.color = color.clone();
    }
    if let Some(padding) = args.padding {
        request.background_settings.padding = padding;
    }
    if args.webcam.is_some() {
        request.include_webcam = true;
    }

    Ok(request)
}

/// Requested path with the delivered container's extension, or
/// `<primary stem>-export.<ext>` next to the primary.
fn output_path(primary: &Path, requested: Option<&Path>, container: Container) -> PathBuf {
    match requested {
        Some(path) => path.with_extension(container.extension()),
        None => {
            let stem = primary
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "castkit".to_string());
            primary.with_file_name(format!("{stem}-export.{}", container.extension()))
        }
    }
}

fn print_progress(p: ExportProgress) {
    match (p.stage, p.transcode_progress) {
        (ExportStage::Transcoding, Some(t)) => print!(
            "\r  Progress: {:.1}% (transcoding {:.0}%)          ",
            p.progress * 100.0,
            t * 100.0
        ),
        _ => print!(
            "\r  Progress: {:.1}% ({}/{} frames, {:?})  ",
            p.progress * 100.0,
            p.frames_submitted,
            p.total_frames,
            p.stage
        ),
    }
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ExportArgs {
        ExportArgs {
            primary: PathBuf::from("/tmp/rec/screen.webm"),
            webcam: None,
            request: None,
            resolution: None,
            fps: None,
            quality: None,
            format: None,
            background: None,
            padding: None,
            output: None,
        }
    }

    #[test]
    fn test_defaults_come_from_config() {
        let mut config = AppConfig::default();
        config.export.fps = 24;
        config.export.format = "webm".to_string();
        let request = build_request(&config, &args()).unwrap();
        assert_eq!(request.fps, 24);
        assert_eq!(request.format, Container::Webm);
        assert_eq!(request.resolution, ResolutionPreset::Original);
        assert!(!request.include_webcam);
    }

    #[test]
    fn test_flags_override_defaults() {
        let mut a = args();
        a.webcam = Some(PathBuf::from("cam.webm"));
        a.resolution = Some("720p".into());
        a.quality = Some("low".into());
        a.background = Some("#102030".into());
        a.padding = Some(10.0);
        let request = build_request(&AppConfig::default(), &a).unwrap();
        assert_eq!(request.resolution, ResolutionPreset::Hd720);
        assert_eq!(request.quality, Quality::Low);
        assert!(request.include_webcam);
        assert_eq!(request.background_settings.kind, BackgroundKind::Solid);
        assert_eq!(request.background_settings.color, "#102030");
        assert!((request.background_settings.padding - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut a = args();
        a.format = Some("gif".into());
        assert!(build_request(&AppConfig::default(), &a).is_err());
    }

    #[test]
    fn test_output_extension_follows_delivered_container() {
        let primary = Path::new("/tmp/rec/screen.webm");
        assert_eq!(
            output_path(primary, Some(Path::new("out/final.mp4")), Container::Webm),
            PathBuf::from("out/final.webm")
        );
        assert_eq!(
            output_path(primary, None, Container::Mp4),
            PathBuf::from("/tmp/rec/screen-export.mp4")
        );
    }
}
