//! Check system capabilities.

use castkit_render_engine::ffmpeg::command_exists;
use castkit_render_engine::{ContainerTranscoder, FfmpegTranscoder};

pub fn run() -> anyhow::Result<()> {
    println!("Castkit System Check");
    println!("{}", "=".repeat(50));

    let ffmpeg = command_exists("ffmpeg");
    let ffprobe = command_exists("ffprobe");
    report("ffmpeg", ffmpeg, "decoding and encoding");
    report("ffprobe", ffprobe, "reading source duration and size");

    let transcoder = FfmpegTranscoder::probed();
    println!();
    if transcoder.is_supported() {
        println!("[OK] Container transcoding: webm -> mp4 available");
    } else {
        println!("[WARN] Container transcoding unavailable, exports are delivered as webm");
    }

    println!();
    if ffmpeg && ffprobe {
        println!("All required tools are available. Castkit is ready.");
    } else {
        println!("Some required tools are missing. Install ffmpeg (which ships ffprobe).");
    }

    Ok(())
}

fn report(tool: &str, available: bool, purpose: &str) {
    if available {
        println!("[OK] {tool}: found ({purpose})");
    } else {
        println!("[MISSING] {tool}: not found on PATH ({purpose})");
    }
}
