//! Analyze camera motion between consecutive frames.

use std::path::PathBuf;

use anyhow::Context;
use castkit_common::config::AppConfig;
use castkit_media_model::{MotionAnalysis, PixelBuffer};
use castkit_motion::{AnalyzerOptions, MotionAnalyzer};
use castkit_render_engine::{FfmpegSource, MediaSource, SourceSample};

pub struct MotionArgs {
    pub video: PathBuf,
    pub fps: u32,
    pub block_size: Option<usize>,
    pub shake_threshold: Option<f64>,
    pub downsample: u32,
    pub limit: Option<usize>,
    pub flow_points: usize,
}

/// Running totals over all analyzed pairs.
#[derive(Debug, Default)]
struct Summary {
    pairs: usize,
    shake_pairs: usize,
    magnitude_sum: f64,
    peak_intensity: f64,
}

impl Summary {
    fn add(&mut self, analysis: &MotionAnalysis) {
        self.pairs += 1;
        if analysis.is_shake {
            self.shake_pairs += 1;
        }
        self.magnitude_sum += analysis.average.magnitude;
        self.peak_intensity = self.peak_intensity.max(analysis.shake_intensity);
    }

    fn mean_magnitude(&self) -> f64 {
        if self.pairs == 0 {
            0.0
        } else {
            self.magnitude_sum / self.pairs as f64
        }
    }
}

pub fn run(config: &AppConfig, args: MotionArgs) -> anyhow::Result<()> {
    if args.fps == 0 {
        anyhow::bail!("--fps must be at least 1");
    }

    let mut options = AnalyzerOptions::from(&config.motion);
    if let Some(block_size) = args.block_size {
        options.block_size = block_size;
    }
    if let Some(threshold) = args.shake_threshold {
        options.shake_threshold = threshold;
    }
    options.flow_points = args.flow_points;
    let analyzer = MotionAnalyzer::new(options);

    let mut source = FfmpegSource::new(&args.video, args.fps);
    let info = source
        .open()
        .with_context(|| format!("Failed to open {}", args.video.display()))?;
    tracing::info!(
        width = info.width,
        height = info.height,
        downsample = args.downsample,
        "Analyzing motion"
    );

    let mut summary = Summary::default();
    let mut previous: Option<PixelBuffer> = None;
    let mut frame_index = 0usize;

    loop {
        if args.limit.is_some_and(|limit| frame_index >= limit) {
            break;
        }
        let at = frame_index as f64 / args.fps as f64;
        let frame = match source.sample(at)? {
            SourceSample::Frame(frame) => frame.downsample(args.downsample),
            SourceSample::EndOfStream => break,
        };

        if let Some(prev) = &previous {
            let analysis = analyzer.analyze(prev, &frame)?;
            summary.add(&analysis);
            println!("{}", serde_json::to_string(&analysis)?);
        }
        previous = Some(frame);
        frame_index += 1;
    }
    source.release();

    eprintln!(
        "Analyzed {} frame pairs from {} frames: {} shake, mean motion {:.2}px, peak intensity {:.2}",
        summary.pairs,
        frame_index,
        summary.shake_pairs,
        summary.mean_magnitude(),
        summary.peak_intensity
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use castkit_media_model::MotionVector;

    fn analysis(dx: f64, is_shake: bool, intensity: f64) -> MotionAnalysis {
        MotionAnalysis {
            vectors: vec![],
            average: MotionVector::new(0, 0, dx, 0.0),
            is_shake,
            shake_intensity: intensity,
            confidence: 0.5,
            flow: vec![],
        }
    }

    #[test]
    fn test_summary_accumulates() {
        let mut summary = Summary::default();
        summary.add(&analysis(2.0, false, 0.1));
        summary.add(&analysis(4.0, true, 0.6));
        assert_eq!(summary.pairs, 2);
        assert_eq!(summary.shake_pairs, 1);
        assert!((summary.mean_magnitude() - 3.0).abs() < 1e-9);
        assert!((summary.peak_intensity - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary_has_zero_mean() {
        assert_eq!(Summary::default().mean_magnitude(), 0.0);
    }
}
