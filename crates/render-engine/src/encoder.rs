//! Frame encoders.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use castkit_common::CastkitError;
use castkit_media_model::{Container, PixelBuffer};

use crate::ffmpeg::{drain_stderr, join_stderr, kill_and_reap, TempFile};

/// Parameters fixed for the lifetime of one encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Encoder was not started")]
    NotStarted,

    #[error("Frame is {actual_width}x{actual_height}, encoder expects {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Encoder process failed: {0}")]
    Process(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<EncodeError> for CastkitError {
    fn from(err: EncodeError) -> Self {
        CastkitError::encode(err.to_string())
    }
}

/// Consumes composited frames and produces an encoded byte stream.
///
/// Output runs at a constant `fps`. A frame stamped `t` occupies output slot
/// `round(t * fps)`; slots skipped between two submissions hold the earlier
/// frame, so a late producer never shortens the timeline.
pub trait FrameEncoder: Send {
    /// Container the encoder writes without any re-muxing.
    fn native_container(&self) -> Container;

    fn begin(&mut self, params: EncoderParams) -> Result<(), EncodeError>;

    /// Encode one frame. Timestamps are strictly increasing.
    fn submit(&mut self, frame: PixelBuffer, timestamp_secs: f64) -> Result<(), EncodeError>;

    /// Flush and return the encoded bytes.
    fn finish(&mut self) -> Result<Vec<u8>, EncodeError>;

    /// Discard everything. Safe to call in any state.
    fn abort(&mut self);
}

/// Maps frame timestamps onto constant-rate output slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTimeline {
    fps: u32,
    next_slot: u64,
}

impl FrameTimeline {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            next_slot: 0,
        }
    }

    /// Output slot nearest to `timestamp_secs`.
    pub fn slot(&self, timestamp_secs: f64) -> u64 {
        (timestamp_secs * self.fps as f64).round().max(0.0) as u64
    }

    /// Claim the slot for a frame at `timestamp_secs`.
    ///
    /// Returns how many earlier slots were skipped and must be filled before
    /// this frame, or `None` when the slot is already written.
    pub fn place(&mut self, timestamp_secs: f64) -> Option<u64> {
        let slot = self.slot(timestamp_secs);
        if slot < self.next_slot {
            return None;
        }
        let gap = slot - self.next_slot;
        self.next_slot = slot + 1;
        Some(gap)
    }

    /// Slots written so far, repeats included.
    pub fn slots_written(&self) -> u64 {
        self.next_slot
    }

    /// Media time covered by the written slots.
    pub fn covered_secs(&self) -> f64 {
        self.next_slot as f64 / self.fps as f64
    }
}

struct EncodeSession {
    params: EncoderParams,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    output: TempFile,
    timeline: FrameTimeline,
    last_frame: Option<Vec<u8>>,
    frames: u64,
}

/// VP9/WebM encoder fed raw RGBA over an `ffmpeg` stdin pipe.
#[derive(Default)]
pub struct FfmpegEncoder {
    session: Option<EncodeSession>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn codec_args(params: &EncoderParams) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-b:v".to_string(),
            format!("{}k", params.bitrate_kbps.max(250)),
            "-deadline".to_string(),
            "realtime".to_string(),
            "-cpu-used".to_string(),
            "8".to_string(),
            "-row-mt".to_string(),
            "1".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn native_container(&self) -> Container {
        Container::Webm
    }

    fn begin(&mut self, params: EncoderParams) -> Result<(), EncodeError> {
        self.abort();

        let output = TempFile::new("castkit-encode", Container::Webm.extension());
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgba"])
            .args(["-s", &format!("{}x{}", params.width, params.height)])
            .args(["-r", &params.fps.to_string()])
            .args(["-i", "pipe:0", "-an"])
            .args(Self::codec_args(&params))
            .arg(output.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| EncodeError::Process(format!("failed to start ffmpeg: {e}")))?;
        let stdin = child.stdin.take();
        let stderr_task = child.stderr.take().map(drain_stderr);

        tracing::info!(
            pid = child.id(),
            width = params.width,
            height = params.height,
            fps = params.fps,
            bitrate_kbps = params.bitrate_kbps,
            "ffmpeg encoder started"
        );

        self.session = Some(EncodeSession {
            params,
            child,
            stdin,
            stderr_task,
            output,
            timeline: FrameTimeline::new(params.fps),
            last_frame: None,
            frames: 0,
        });
        Ok(())
    }

    fn submit(&mut self, frame: PixelBuffer, timestamp_secs: f64) -> Result<(), EncodeError> {
        let session = self.session.as_mut().ok_or(EncodeError::NotStarted)?;
        let params = session.params;
        if frame.dimensions() != (params.width, params.height) {
            return Err(EncodeError::FrameSize {
                width: params.width,
                height: params.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        let stdin = session.stdin.as_mut().ok_or(EncodeError::NotStarted)?;
        let Some(gap) = session.timeline.place(timestamp_secs) else {
            tracing::debug!(timestamp_secs, "Dropping frame for an already written slot");
            return Ok(());
        };

        if gap > 0 {
            tracing::debug!(timestamp_secs, repeated = gap, "Filling skipped frame slots");
            let fill = session.last_frame.as_deref().unwrap_or(frame.as_bytes());
            for _ in 0..gap {
                stdin.write_all(fill)?;
            }
        }
        stdin.write_all(frame.as_bytes())?;
        session.frames += 1;
        session.last_frame = Some(frame.into_bytes());
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<u8>, EncodeError> {
        let mut session = self.session.take().ok_or(EncodeError::NotStarted)?;
        // Closing stdin signals end of input.
        drop(session.stdin.take());

        let status = session.child.wait()?;
        let stderr = join_stderr(session.stderr_task.take());
        if !status.success() {
            return Err(EncodeError::Process(format!(
                "ffmpeg exited with {status}: {}",
                stderr.trim()
            )));
        }

        let bytes = std::fs::read(session.output.path())?;
        tracing::info!(
            frames = session.frames,
            slots = session.timeline.slots_written(),
            bytes = bytes.len(),
            "ffmpeg encoder finished"
        );
        Ok(bytes)
    }

    fn abort(&mut self) {
        if let Some(mut session) = self.session.take() {
            drop(session.stdin.take());
            let _ = kill_and_reap(&mut session.child, session.stderr_task.take());
            tracing::debug!(frames = session.frames, "ffmpeg encoder aborted");
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}
