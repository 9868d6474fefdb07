//! Castkit CLI: export recordings and analyze camera motion.
//!
//! Usage:
//!   castkit export <PRIMARY> [OPTIONS]   Composite and encode a recording
//!   castkit motion <VIDEO> [OPTIONS]     Print per-frame-pair motion analysis
//!   castkit check                        Check ffmpeg/ffprobe availability

use std::path::PathBuf;

use castkit_common::config::AppConfig;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "castkit",
    about = "Export screen recordings and analyze camera motion",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/castkit/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Composite a recording onto a styled canvas and encode it
    Export {
        /// Primary (screen) video
        primary: PathBuf,

        /// Secondary (webcam) video composited as an overlay
        #[arg(long)]
        webcam: Option<PathBuf>,

        /// Export request JSON as sent by an editor
        #[arg(long)]
        request: Option<PathBuf>,

        /// Output resolution: 4k|1080p|720p|480p|original
        #[arg(long)]
        resolution: Option<String>,

        /// Output frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Quality tier: high|medium|low
        #[arg(long)]
        quality: Option<String>,

        /// Container: mp4|webm
        #[arg(long)]
        format: Option<String>,

        /// Solid background color (#rrggbb)
        #[arg(long)]
        background: Option<String>,

        /// Padding around the primary source, percent of canvas width
        #[arg(long)]
        padding: Option<f64>,

        /// Output file path (extension follows the delivered container)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyze motion between consecutive frames of a video
    Motion {
        /// Video to analyze
        video: PathBuf,

        /// Decode rate in frames per second
        #[arg(long, default_value = "10")]
        fps: u32,

        /// Block edge length for block matching
        #[arg(long)]
        block_size: Option<usize>,

        /// Minimum intensity for a frame pair to count as shake
        #[arg(long)]
        shake_threshold: Option<f64>,

        /// Integer box-filter downsample factor applied before analysis
        #[arg(long, default_value = "2")]
        downsample: u32,

        /// Stop after this many frames
        #[arg(long)]
        limit: Option<usize>,

        /// Sparse optical flow points per frame pair (0 disables flow)
        #[arg(long, default_value = "0")]
        flow_points: usize,
    },

    /// Check ffmpeg/ffprobe availability and transcoding support
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    castkit_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Export {
            primary,
            webcam,
            request,
            resolution,
            fps,
            quality,
            format,
            background,
            padding,
            output,
        } => {
            commands::export::run(
                &config,
                commands::export::ExportArgs {
                    primary,
                    webcam,
                    request,
                    resolution,
                    fps,
                    quality,
                    format,
                    background,
                    padding,
                    output,
                },
            )
            .await
        }
        Commands::Motion {
            video,
            fps,
            block_size,
            shake_threshold,
            downsample,
            limit,
            flow_points,
        } => commands::motion::run(
            &config,
            commands::motion::MotionArgs {
                video,
                fps,
                block_size,
                shake_threshold,
                downsample,
                limit,
                flow_points,
            },
        ),
        Commands::Check => commands::check::run(),
    }
}
