//! Capture/encode pipeline.
//!
//! A [`CaptureEncoder`] drives one export job from start to finish:
//!
//! ```text
//! Initializing ──► Sampling ──► Finalizing ──► Completed
//!       │              │             │
//!       └──────────────┴─────────────┴──► Failed | Cancelled
//! ```
//!
//! Sampling runs on a fixed `1/fps` tick. On each tick the sources are
//! sampled at the newest frame boundary, composited, and handed to the
//! encoder. When a tick arrives late the boundaries in between are skipped;
//! the encoder places each frame by its timestamp, so the output keeps its
//! length. All per-job state (sources, compositor, encoder) lives in the
//! job itself.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use castkit_common::clock::{expected_frame_count, ExportClock, FrameCadence};
use castkit_common::config::ExportDefaults;
use castkit_common::CastkitError;
use castkit_media_model::{Container, ExportSettings, PixelBuffer};
use serde::Serialize;
use tokio::runtime::RuntimeFlavor;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::compositor::FrameCompositor;
use crate::encoder::{EncoderParams, FrameEncoder};
use crate::source::{MediaSource, SourceInfo, SourceSample};
use crate::transcode::{transcode_with_fallback, ContainerTranscoder};

/// Progress callback for export jobs.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

/// Export progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportProgress {
    /// Overall progress `[0.0, 1.0]`, never decreasing.
    pub progress: f64,

    /// Frames handed to the encoder so far.
    pub frames_submitted: u64,

    /// Frames expected for the resolved duration.
    pub total_frames: u64,

    /// Current stage.
    pub stage: ExportStage,

    /// Container transcoding progress `[0.0, 1.0]` while transcoding.
    pub transcode_progress: Option<f64>,
}

/// Stages reported through progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Preparing,
    Sampling,
    Finalizing,
    Transcoding,
    Complete,
    Failed,
}

/// Lifecycle state of a job, observable through an [`ExportHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    Initializing,
    Sampling,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExportState::Completed | ExportState::Failed | ExportState::Cancelled
        )
    }
}

#[derive(Debug)]
struct HandleInner {
    cancelled: AtomicBool,
    state: Mutex<ExportState>,
}

/// Shared view of a running job: current state and cancellation.
#[derive(Debug, Clone)]
pub struct ExportHandle {
    inner: Arc<HandleInner>,
}

impl Default for ExportHandle {
    fn default() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(ExportState::Initializing),
            }),
        }
    }
}

impl ExportHandle {
    /// Request cancellation. Observed within one frame tick.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ExportState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ExportState) {
        let mut guard = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *guard != state {
            debug!(from = ?*guard, to = ?state, "Export state transition");
            *guard = state;
        }
    }
}

/// Fatal export failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Encoding failed: {0}")]
    EncodingError(String),

    #[error("Invalid export job: {0}")]
    InvalidJob(String),
}

impl From<ExportError> for CastkitError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::SourceUnavailable(_) => CastkitError::source(err.to_string()),
            ExportError::EncodingError(_) => CastkitError::encode(err.to_string()),
            ExportError::InvalidJob(_) => CastkitError::config(err.to_string()),
        }
    }
}

/// The delivered artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedOutput {
    pub bytes: Vec<u8>,
    pub container: Container,
    pub mime_type: &'static str,
    /// True when the requested container could not be produced.
    pub fallback_used: bool,
    pub frames_submitted: u64,
    /// Media time of the encoded timeline. Shorter than the planned duration
    /// when sampling stopped early.
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

/// How a job ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Completed(EncodedOutput),
    Cancelled,
}

/// Inputs for one export.
pub struct ExportJob {
    pub primary: Box<dyn MediaSource>,
    pub secondary: Option<Box<dyn MediaSource>>,
    pub settings: ExportSettings,
    /// Duration known from elsewhere (for example the recorder), used when
    /// the primary source carries no usable duration.
    pub known_duration_secs: Option<f64>,
}

/// Tunables for the sampling loop.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Extra time past the resolved duration before sampling is cut off.
    pub safety_margin_secs: f64,

    /// Bytes per second assumed when estimating duration from payload size.
    pub bytes_per_second_estimate: u64,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::from(&ExportDefaults::default())
    }
}

impl From<&ExportDefaults> for CaptureOptions {
    fn from(defaults: &ExportDefaults) -> Self {
        Self {
            safety_margin_secs: defaults.safety_margin_secs,
            bytes_per_second_estimate: defaults.bytes_per_second_estimate,
        }
    }
}

/// Pick the export duration: native, then externally known, then estimated
/// from payload size.
pub fn resolve_duration(
    info: &SourceInfo,
    known_duration_secs: Option<f64>,
    bytes_per_second_estimate: u64,
) -> Result<f64, ExportError> {
    let usable = |d: f64| d.is_finite() && d > 0.0;
    if usable(info.duration_secs) {
        return Ok(info.duration_secs);
    }
    if let Some(known) = known_duration_secs.filter(|d| usable(*d)) {
        debug!(known, "Using externally known duration");
        return Ok(known);
    }
    if info.payload_bytes > 0 && bytes_per_second_estimate > 0 {
        let estimate = info.payload_bytes as f64 / bytes_per_second_estimate as f64;
        warn!(
            payload_bytes = info.payload_bytes,
            estimate, "No duration metadata, estimating from payload size"
        );
        return Ok(estimate);
    }
    Err(ExportError::SourceUnavailable(
        "source duration could not be determined".into(),
    ))
}

/// Emits progress that never decreases and never exceeds 1.
struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last: Cell<f64>,
}

impl ProgressReporter {
    fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last: Cell::new(0.0),
        }
    }

    fn report(
        &self,
        fraction: f64,
        frames_submitted: u64,
        total_frames: u64,
        stage: ExportStage,
        transcode_progress: Option<f64>,
    ) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction };
        let progress = fraction.clamp(self.last.get(), 1.0);
        self.last.set(progress);
        if let Some(cb) = &self.callback {
            cb(ExportProgress {
                progress,
                frames_submitted,
                total_frames,
                stage,
                transcode_progress: transcode_progress.map(|p| p.clamp(0.0, 1.0)),
            });
        }
    }

    fn current(&self) -> f64 {
        self.last.get()
    }
}

/// Drives one export job.
pub struct CaptureEncoder {
    encoder: Box<dyn FrameEncoder>,
    transcoder: Box<dyn ContainerTranscoder>,
    options: CaptureOptions,
    handle: ExportHandle,
}

/// Everything opened during initialization.
struct Prepared {
    duration_secs: f64,
    total_frames: u64,
    canvas: (u32, u32),
}

/// Frame boundaries reached by the sampling loop.
#[derive(Debug, Default)]
struct Sampled {
    frames_submitted: u64,
    /// One past the last boundary that was submitted.
    boundaries_covered: u64,
    boundaries_skipped: u64,
}

impl Sampled {
    /// Media time on the encoder's timeline, capped at the planned duration.
    fn covered_secs(&self, fps: u32, planned_secs: f64) -> f64 {
        (self.boundaries_covered as f64 / fps.max(1) as f64).min(planned_secs)
    }
}

/// Compositing state carried across frames.
#[derive(Default)]
struct FrameState {
    compositor: FrameCompositor,
    last_secondary: Option<PixelBuffer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStep {
    Submitted,
    SourceEnded,
}

/// Sample, composite, and submit the frame at `timestamp`.
fn produce_frame(
    encoder: &mut dyn FrameEncoder,
    job: &mut ExportJob,
    state: &mut FrameState,
    use_secondary: bool,
    canvas: (u32, u32),
    timestamp: f64,
) -> Result<FrameStep, ExportError> {
    let primary = match job.primary.sample(timestamp) {
        Ok(SourceSample::Frame(frame)) => Some(frame),
        Ok(SourceSample::EndOfStream) => return Ok(FrameStep::SourceEnded),
        Err(err) => {
            warn!(timestamp, error = %err, "Primary sample failed");
            None
        }
    };

    if use_secondary {
        if let Some(secondary) = job.secondary.as_mut() {
            match secondary.sample(timestamp) {
                Ok(SourceSample::Frame(frame)) => state.last_secondary = Some(frame),
                Ok(SourceSample::EndOfStream) => state.last_secondary = None,
                Err(err) => {
                    debug!(timestamp, error = %err, "Secondary sample failed, reusing last")
                }
            }
        }
    }

    let frame = match primary {
        Some(primary) => state.compositor.compose(
            timestamp,
            &primary,
            state.last_secondary.as_ref(),
            &job.settings.layout,
            canvas,
        ),
        None => state.compositor.hold(timestamp).ok_or_else(|| {
            ExportError::SourceUnavailable(format!(
                "primary source failed repeatedly at {timestamp:.3}s"
            ))
        })?,
    };

    encoder
        .submit(frame, timestamp)
        .map_err(|e| ExportError::EncodingError(e.to_string()))?;
    Ok(FrameStep::Submitted)
}

/// Run blocking per-frame work. On a multi-threaded runtime the worker is
/// handed off first so other tasks keep running.
fn run_blocking<T>(work: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

impl CaptureEncoder {
    pub fn new(encoder: Box<dyn FrameEncoder>, transcoder: Box<dyn ContainerTranscoder>) -> Self {
        Self {
            encoder,
            transcoder,
            options: CaptureOptions::default(),
            handle: ExportHandle::default(),
        }
    }

    pub fn with_options(mut self, options: CaptureOptions) -> Self {
        self.options = options;
        self
    }

    /// Handle for observing state and cancelling from elsewhere.
    pub fn handle(&self) -> ExportHandle {
        self.handle.clone()
    }

    /// Run the job to completion, cancellation, or failure.
    pub async fn run(
        mut self,
        mut job: ExportJob,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ExportOutcome, ExportError> {
        let mut reporter = ProgressReporter::new(on_progress);
        let clock = ExportClock::start();
        info!(
            started_at = clock.epoch_wall(),
            fps = job.settings.fps,
            container = ?job.settings.container,
            include_secondary = job.settings.include_secondary,
            "Starting export"
        );

        self.handle.set_state(ExportState::Initializing);
        reporter.report(0.0, 0, 0, ExportStage::Preparing, None);

        let prepared = match self.prepare(&mut job) {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.fail(&mut job, &reporter, 0, 0, err)),
        };

        let result = self.sample(&mut job, &prepared, &mut reporter).await;
        let sampled = match result {
            Ok(Some(sampled)) => sampled,
            Ok(None) => return Ok(self.cancelled(&mut job)),
            Err(err) => {
                return Err(self.fail(&mut job, &reporter, 0, prepared.total_frames, err));
            }
        };

        let output = self.finalize(&mut job, &prepared, &sampled, &reporter);
        match output {
            Ok(output) => {
                info!(
                    frames = output.frames_submitted,
                    bytes = output.bytes.len(),
                    container = ?output.container,
                    fallback_used = output.fallback_used,
                    elapsed_secs = clock.elapsed_secs(),
                    "Export complete"
                );
                Ok(ExportOutcome::Completed(output))
            }
            Err(err) => Err(self.fail(
                &mut job,
                &reporter,
                sampled.frames_submitted,
                prepared.total_frames,
                err,
            )),
        }
    }

    fn prepare(&mut self, job: &mut ExportJob) -> Result<Prepared, ExportError> {
        if job.settings.fps == 0 {
            return Err(ExportError::InvalidJob("frame rate must be at least 1".into()));
        }

        let primary = job
            .primary
            .open()
            .map_err(|e| ExportError::SourceUnavailable(e.to_string()))?;

        if job.settings.include_secondary {
            match job.secondary.as_mut() {
                Some(secondary) => {
                    secondary
                        .open()
                        .map_err(|e| ExportError::SourceUnavailable(e.to_string()))?;
                }
                None => warn!("Secondary source requested but none was supplied"),
            }
        }

        let duration_secs = resolve_duration(
            &primary,
            job.known_duration_secs,
            self.options.bytes_per_second_estimate,
        )?;
        let total_frames = expected_frame_count(duration_secs, job.settings.fps);
        if total_frames == 0 {
            return Err(ExportError::InvalidJob("export would contain no frames".into()));
        }
        let canvas = job.settings.resolution.resolve(primary.width, primary.height);

        self.encoder
            .begin(EncoderParams {
                width: canvas.0,
                height: canvas.1,
                fps: job.settings.fps,
                bitrate_kbps: job.settings.bitrate_kbps,
            })
            .map_err(|e| ExportError::EncodingError(e.to_string()))?;

        info!(
            source = job.primary.name(),
            duration_secs,
            total_frames,
            width = canvas.0,
            height = canvas.1,
            "Export plan ready"
        );

        Ok(Prepared {
            duration_secs,
            total_frames,
            canvas,
        })
    }

    /// Returns what was covered, or `None` when cancelled.
    async fn sample(
        &mut self,
        job: &mut ExportJob,
        prepared: &Prepared,
        reporter: &mut ProgressReporter,
    ) -> Result<Option<Sampled>, ExportError> {
        self.handle.set_state(ExportState::Sampling);

        let mut cadence = FrameCadence::new(job.settings.fps);
        let mut ticker = tokio::time::interval(cadence.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline = Duration::try_from_secs_f64(
            prepared.duration_secs + self.options.safety_margin_secs.max(0.0),
        )
        .unwrap_or(Duration::MAX);
        let use_secondary = job.settings.include_secondary && job.settings.layout.overlay.visible;
        let mut frame_state = FrameState::default();
        let mut sampled = Sampled::default();
        let started = Instant::now();

        loop {
            ticker.tick().await;

            if self.handle.is_cancelled() {
                info!(frames_submitted = sampled.frames_submitted, "Export cancelled");
                return Ok(None);
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                warn!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    duration_secs = prepared.duration_secs,
                    "Safety margin exceeded, stopping sampling"
                );
                break;
            }

            let Some(boundary) = cadence.advance(elapsed) else {
                continue;
            };
            if boundary >= prepared.total_frames {
                break;
            }
            if boundary > sampled.boundaries_covered {
                let skipped = boundary - sampled.boundaries_covered;
                sampled.boundaries_skipped += skipped;
                debug!(boundary, skipped, "Sampling fell behind, encoder repeats the last frame");
            }
            let timestamp = cadence.timestamp_secs(boundary);

            let encoder = self.encoder.as_mut();
            let step = run_blocking(|| {
                produce_frame(
                    encoder,
                    job,
                    &mut frame_state,
                    use_secondary,
                    prepared.canvas,
                    timestamp,
                )
            })?;
            if step == FrameStep::SourceEnded {
                info!(timestamp, "Primary source ended");
                break;
            }
            sampled.frames_submitted += 1;
            sampled.boundaries_covered = boundary + 1;

            reporter.report(
                sampled.boundaries_covered as f64 / prepared.total_frames as f64,
                sampled.frames_submitted,
                prepared.total_frames,
                ExportStage::Sampling,
                None,
            );
        }

        if sampled.frames_submitted == 0 {
            return Err(ExportError::SourceUnavailable(
                "primary source produced no frames".into(),
            ));
        }
        if sampled.boundaries_skipped > 0 {
            warn!(
                frames_submitted = sampled.frames_submitted,
                boundaries_skipped = sampled.boundaries_skipped,
                "Sampling could not keep up with the frame rate"
            );
        }
        Ok(Some(sampled))
    }

    fn finalize(
        &mut self,
        job: &mut ExportJob,
        prepared: &Prepared,
        sampled: &Sampled,
        reporter: &ProgressReporter,
    ) -> Result<EncodedOutput, ExportError> {
        let frames_submitted = sampled.frames_submitted;
        self.handle.set_state(ExportState::Finalizing);
        reporter.report(
            reporter.current(),
            frames_submitted,
            prepared.total_frames,
            ExportStage::Finalizing,
            None,
        );

        let bytes = self
            .encoder
            .finish()
            .map_err(|e| ExportError::EncodingError(e.to_string()))?;
        release_sources(job);

        let native = self.encoder.native_container();
        let requested = job.settings.container;
        let progress_before = reporter.current();
        let outcome = transcode_with_fallback(
            self.transcoder.as_mut(),
            bytes,
            native,
            requested,
            &|p| {
                reporter.report(
                    progress_before,
                    frames_submitted,
                    prepared.total_frames,
                    ExportStage::Transcoding,
                    Some(p),
                )
            },
        );

        reporter.report(
            1.0,
            frames_submitted,
            prepared.total_frames,
            ExportStage::Complete,
            None,
        );
        self.handle.set_state(ExportState::Completed);

        Ok(EncodedOutput {
            mime_type: outcome.container.mime_type(),
            container: outcome.container,
            bytes: outcome.bytes,
            fallback_used: outcome.fallback_used,
            frames_submitted,
            duration_secs: sampled.covered_secs(job.settings.fps, prepared.duration_secs),
            width: prepared.canvas.0,
            height: prepared.canvas.1,
        })
    }

    fn cancelled(&mut self, job: &mut ExportJob) -> ExportOutcome {
        self.encoder.abort();
        release_sources(job);
        self.handle.set_state(ExportState::Cancelled);
        ExportOutcome::Cancelled
    }

    fn fail(
        &mut self,
        job: &mut ExportJob,
        reporter: &ProgressReporter,
        frames_submitted: u64,
        total_frames: u64,
        err: ExportError,
    ) -> ExportError {
        warn!(error = %err, "Export failed");
        self.encoder.abort();
        release_sources(job);
        self.handle.set_state(ExportState::Failed);
        reporter.report(
            reporter.current(),
            frames_submitted,
            total_frames,
            ExportStage::Failed,
            None,
        );
        err
    }
}

fn release_sources(job: &mut ExportJob) {
    job.primary.release();
    if let Some(secondary) = job.secondary.as_mut() {
        secondary.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(duration_secs: f64, payload_bytes: u64) -> SourceInfo {
        SourceInfo {
            duration_secs,
            width: 64,
            height: 36,
            payload_bytes,
        }
    }

    #[test]
    fn test_native_duration_wins() {
        assert_eq!(resolve_duration(&info(12.0, 0), Some(3.0), 250_000), Ok(12.0));
    }

    #[test]
    fn test_known_duration_when_native_missing() {
        assert_eq!(resolve_duration(&info(f64::NAN, 0), Some(3.0), 250_000), Ok(3.0));
        assert_eq!(
            resolve_duration(&info(f64::INFINITY, 0), Some(4.0), 250_000),
            Ok(4.0)
        );
    }

    #[test]
    fn test_size_heuristic_as_last_resort() {
        assert_eq!(
            resolve_duration(&info(0.0, 1_000_000), None, 250_000),
            Ok(4.0)
        );
    }

    #[test]
    fn test_unknown_duration_is_unavailable() {
        assert!(matches!(
            resolve_duration(&info(f64::NAN, 0), Some(-1.0), 250_000),
            Err(ExportError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn test_reporter_is_monotonic_and_clamped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback =
            Box::new(move |p: ExportProgress| sink.lock().unwrap().push(p.progress));
        let reporter = ProgressReporter::new(Some(callback));
        reporter.report(0.5, 1, 2, ExportStage::Sampling, None);
        reporter.report(0.25, 1, 2, ExportStage::Sampling, None);
        reporter.report(1.7, 2, 2, ExportStage::Sampling, None);
        reporter.report(f64::NAN, 2, 2, ExportStage::Sampling, None);
        assert_eq!(*seen.lock().unwrap(), vec![0.5, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_covered_duration_follows_last_boundary() {
        let sampled = Sampled {
            frames_submitted: 4,
            boundaries_covered: 15,
            boundaries_skipped: 11,
        };
        assert!((sampled.covered_secs(30, 2.0) - 0.5).abs() < 1e-9);
        assert_eq!(sampled.covered_secs(10, 1.0), 1.0);
    }

    #[test]
    fn test_run_blocking_outside_runtime_runs_inline() {
        assert_eq!(run_blocking(|| 7), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_blocking_on_worker_thread() {
        let value = run_blocking(|| {
            std::thread::sleep(Duration::from_millis(5));
            11
        });
        assert_eq!(value, 11);
    }

    #[tokio::test]
    async fn test_run_blocking_on_current_thread_runtime() {
        assert_eq!(run_blocking(|| 3), 3);
    }

    #[test]
    fn test_handle_tracks_cancellation_and_state() {
        let handle = ExportHandle::default();
        let other = handle.clone();
        assert_eq!(handle.state(), ExportState::Initializing);
        other.cancel();
        assert!(handle.is_cancelled());
        other.set_state(ExportState::Cancelled);
        assert!(handle.state().is_terminal());
    }
}
