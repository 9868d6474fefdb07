//! Media sources: anything that can be sampled for a frame at a timestamp.

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use castkit_common::CastkitError;
use castkit_media_model::{PixelBuffer, CHANNELS};

use crate::ffmpeg::{drain_stderr, kill_and_reap, probe_duration_secs, probe_video_dimensions};

/// Static facts about an opened source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    /// Native duration. May be `NaN`, infinite, or zero when the container
    /// carries no usable duration.
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    /// Size of the underlying payload in bytes (0 if unknown).
    pub payload_bytes: u64,
}

/// Result of sampling a source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSample {
    Frame(PixelBuffer),
    EndOfStream,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Failed to open {path}: {message}")]
    Open { path: String, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for CastkitError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Io(io) => CastkitError::Io(io),
            other => CastkitError::source(other.to_string()),
        }
    }
}

/// A time-addressable video source.
///
/// Calls to [`sample`](MediaSource::sample) use non-decreasing timestamps.
pub trait MediaSource: Send {
    /// Prepare the source and report its properties.
    fn open(&mut self) -> Result<SourceInfo, MediaError>;

    /// The latest frame at or before `at_secs`.
    fn sample(&mut self, at_secs: f64) -> Result<SourceSample, MediaError>;

    /// Release decoder resources. Safe to call more than once.
    fn release(&mut self);

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Running `ffmpeg` decoder streaming raw RGBA frames.
struct DecodeStream {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
    frame_len: usize,
}

impl DecodeStream {
    /// Read one whole frame. `None` at end of stream; a truncated trailing
    /// frame is discarded.
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, MediaError> {
        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => {
                    if filled > 0 {
                        tracing::warn!(bytes = filled, "Discarding truncated trailing frame");
                    }
                    return Ok(None);
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Some(buf))
    }

    fn shutdown(mut self) {
        let stderr = kill_and_reap(&mut self.child, self.stderr_task.take());
        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim(), "ffmpeg decoder stderr");
        }
    }
}

/// Video file decoded through an `ffmpeg` child process.
///
/// Frames are decoded at a fixed `decode_fps`; frame `k` covers
/// `[k / decode_fps, (k + 1) / decode_fps)`.
pub struct FfmpegSource {
    path: PathBuf,
    name: String,
    decode_fps: u32,
    info: Option<SourceInfo>,
    stream: Option<DecodeStream>,
    decoded: u64,
    pending: Option<(f64, PixelBuffer)>,
    current: Option<(f64, PixelBuffer)>,
    exhausted: bool,
}

impl FfmpegSource {
    pub fn new(path: impl Into<PathBuf>, decode_fps: u32) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            decode_fps: decode_fps.max(1),
            info: None,
            stream: None,
            decoded: 0,
            pending: None,
            current: None,
            exhausted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_error(&self, message: impl Into<String>) -> MediaError {
        MediaError::Open {
            path: self.path.display().to_string(),
            message: message.into(),
        }
    }

    fn spawn_decoder(&self, info: &SourceInfo) -> Result<DecodeStream, MediaError> {
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(&self.path)
            .args([
                "-an",
                "-vf",
                &format!("fps={}", self.decode_fps),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.open_error(format!("failed to start ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.open_error("failed to capture ffmpeg stdout"))?;
        let stderr_task = child.stderr.take().map(drain_stderr);

        tracing::debug!(pid = child.id(), source = %self.name, "ffmpeg decoder started");

        Ok(DecodeStream {
            child,
            stdout,
            stderr_task,
            frame_len: info.width as usize * info.height as usize * CHANNELS,
        })
    }
}

impl MediaSource for FfmpegSource {
    fn open(&mut self) -> Result<SourceInfo, MediaError> {
        let metadata = std::fs::metadata(&self.path).map_err(|e| self.open_error(e.to_string()))?;
        let (width, height) = probe_video_dimensions(&self.path)
            .ok_or_else(|| self.open_error("ffprobe found no video stream"))?;
        let duration_secs = probe_duration_secs(&self.path).unwrap_or(f64::NAN);

        let info = SourceInfo {
            duration_secs,
            width,
            height,
            payload_bytes: metadata.len(),
        };
        self.stream = Some(self.spawn_decoder(&info)?);
        self.info = Some(info);
        self.decoded = 0;
        self.pending = None;
        self.current = None;
        self.exhausted = false;

        tracing::info!(
            source = %self.name,
            width,
            height,
            duration_secs,
            payload_bytes = info.payload_bytes,
            "Opened video source"
        );
        Ok(info)
    }

    fn sample(&mut self, at_secs: f64) -> Result<SourceSample, MediaError> {
        let (width, height) = match &self.info {
            Some(info) => (info.width, info.height),
            None => return Err(MediaError::Decode("source was not opened".into())),
        };
        let frame_secs = 1.0 / self.decode_fps as f64;

        loop {
            if self.pending.is_none() && !self.exhausted {
                let Some(stream) = self.stream.as_mut() else {
                    return Err(MediaError::Decode("decoder was released".into()));
                };
                match stream.read_frame()? {
                    Some(bytes) => {
                        let frame = PixelBuffer::new(width, height, bytes)
                            .map_err(|e| MediaError::Decode(e.to_string()))?;
                        let ts = self.decoded as f64 / self.decode_fps as f64;
                        self.decoded += 1;
                        self.pending = Some((ts, frame));
                    }
                    None => self.exhausted = true,
                }
            }
            let due = matches!(&self.pending, Some((ts, _)) if *ts <= at_secs);
            if !due {
                break;
            }
            self.current = self.pending.take();
        }

        if self.exhausted && self.pending.is_none() {
            let past_end = match &self.current {
                Some((ts, _)) => at_secs >= ts + frame_secs,
                None => true,
            };
            if past_end {
                return Ok(SourceSample::EndOfStream);
            }
        }

        match &self.current {
            Some((_, frame)) => Ok(SourceSample::Frame(frame.clone())),
            None => Err(MediaError::Decode(format!(
                "no frame decoded at or before {at_secs:.3}s"
            ))),
        }
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
            tracing::debug!(source = %self.name, frames = self.decoded, "Released video source");
        }
        self.pending = None;
        self.current = None;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// A still image shown for a fixed duration.
pub struct StillImageSource {
    path: PathBuf,
    name: String,
    duration_secs: f64,
    frame: Option<PixelBuffer>,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>, duration_secs: f64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            duration_secs,
            frame: None,
        }
    }
}

impl MediaSource for StillImageSource {
    fn open(&mut self) -> Result<SourceInfo, MediaError> {
        let frame = PixelBuffer::from_image_file(&self.path).map_err(|e| MediaError::Open {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        let payload_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let info = SourceInfo {
            duration_secs: self.duration_secs,
            width: frame.width(),
            height: frame.height(),
            payload_bytes,
        };
        self.frame = Some(frame);
        Ok(info)
    }

    fn sample(&mut self, at_secs: f64) -> Result<SourceSample, MediaError> {
        if self.duration_secs.is_finite() && at_secs >= self.duration_secs {
            return Ok(SourceSample::EndOfStream);
        }
        self.frame
            .clone()
            .map(SourceSample::Frame)
            .ok_or_else(|| MediaError::Decode("source was not opened".into()))
    }

    fn release(&mut self) {
        self.frame = None;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castkit_media_model::Rgba;

    fn write_png(name: &str, buf: PixelBuffer) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.png", std::process::id()));
        buf.into_rgba_image().unwrap().save(&path).unwrap();
        path
    }

    #[test]
    fn test_still_image_holds_for_duration() {
        let path = write_png("castkit-still", PixelBuffer::filled(6, 4, Rgba::WHITE));
        let mut source = StillImageSource::new(&path, 2.0);
        let info = source.open().unwrap();
        assert_eq!((info.width, info.height), (6, 4));
        assert!(info.payload_bytes > 0);

        assert!(matches!(source.sample(0.0).unwrap(), SourceSample::Frame(_)));
        assert!(matches!(source.sample(1.9).unwrap(), SourceSample::Frame(_)));
        assert_eq!(source.sample(2.0).unwrap(), SourceSample::EndOfStream);

        source.release();
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_still_image_missing_file_fails_to_open() {
        let mut source = StillImageSource::new("/nonexistent/castkit.png", 1.0);
        assert!(matches!(source.open(), Err(MediaError::Open { .. })));
    }

    #[test]
    fn test_unopened_still_image_cannot_sample() {
        let mut source = StillImageSource::new("unused.png", 1.0);
        assert!(matches!(source.sample(0.0), Err(MediaError::Decode(_))));
    }

    #[test]
    fn test_missing_video_fails_to_open() {
        let mut source = FfmpegSource::new("/nonexistent/castkit.webm", 30);
        assert!(matches!(source.open(), Err(MediaError::Open { .. })));
        assert!(matches!(source.sample(0.0), Err(MediaError::Decode(_))));
        assert_eq!(source.name(), "castkit.webm");
    }

    #[test]
    fn test_media_error_maps_to_source_error() {
        let err: CastkitError = MediaError::Decode("bad".into()).into();
        assert!(matches!(err, CastkitError::Source { .. }));
    }
}
