//! Container transcoding with graceful fallback.
//!
//! The encoder writes its native container. When the caller asked for a
//! different one, the bytes are re-muxed here. Transcoding is best effort:
//! if it is unavailable or fails, the native bytes are delivered instead and
//! the outcome says so.

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

use castkit_common::CastkitError;
use castkit_media_model::Container;

use crate::ffmpeg::{
    command_exists, drain_stderr, join_stderr, kill_and_reap, probe_duration_secs, ProgressState,
    TempFile,
};

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Transcoding {from:?} to {to:?} is not supported on this system")]
    Unsupported { from: Container, to: Container },

    #[error("Transcoding failed: {0}")]
    Failed(String),
}

impl From<TranscodeError> for CastkitError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::Unsupported { .. } => CastkitError::unsupported(err.to_string()),
            TranscodeError::Failed(_) => CastkitError::encode(err.to_string()),
        }
    }
}

/// Re-muxes encoded video between containers.
pub trait ContainerTranscoder: Send {
    /// Whether transcoding can run at all on this system.
    fn is_supported(&self) -> bool;

    /// Convert `bytes` from one container to another, reporting progress in
    /// `[0, 1]`.
    fn transcode(
        &mut self,
        bytes: &[u8],
        from: Container,
        to: Container,
        on_progress: &dyn Fn(f64),
    ) -> Result<Vec<u8>, TranscodeError>;
}

/// What was actually delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutcome {
    pub bytes: Vec<u8>,
    pub container: Container,
    /// True when `to` was requested but `from` was delivered.
    pub fallback_used: bool,
}

/// Transcode if needed and possible; otherwise hand back the input.
/// Never fails.
pub fn transcode_with_fallback(
    transcoder: &mut dyn ContainerTranscoder,
    bytes: Vec<u8>,
    from: Container,
    to: Container,
    on_progress: &dyn Fn(f64),
) -> TranscodeOutcome {
    if from == to {
        return TranscodeOutcome {
            bytes,
            container: from,
            fallback_used: false,
        };
    }

    if !transcoder.is_supported() {
        tracing::warn!(
            requested = ?to,
            delivered = ?from,
            "Container transcoding unavailable, delivering native container"
        );
        return TranscodeOutcome {
            bytes,
            container: from,
            fallback_used: true,
        };
    }

    match transcoder.transcode(&bytes, from, to, on_progress) {
        Ok(converted) => TranscodeOutcome {
            bytes: converted,
            container: to,
            fallback_used: false,
        },
        Err(err) => {
            tracing::warn!(
                error = %err,
                requested = ?to,
                delivered = ?from,
                "Container transcoding failed, delivering native container"
            );
            TranscodeOutcome {
                bytes,
                container: from,
                fallback_used: true,
            }
        }
    }
}

/// Transcoder backed by the `ffmpeg` binary.
#[derive(Debug, Default)]
pub struct FfmpegTranscoder {
    available: Option<bool>,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe once and remember the answer.
    pub fn probed() -> Self {
        Self {
            available: Some(command_exists("ffmpeg")),
        }
    }

    fn codec_args(to: Container) -> &'static [&'static str] {
        match to {
            Container::Mp4 => &[
                "-c:v",
                "libx264",
                "-preset",
                "medium",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-movflags",
                "+faststart",
            ],
            Container::Webm => &["-c:v", "libvpx-vp9", "-c:a", "libopus"],
        }
    }
}

impl ContainerTranscoder for FfmpegTranscoder {
    fn is_supported(&self) -> bool {
        self.available.unwrap_or_else(|| command_exists("ffmpeg"))
    }

    fn transcode(
        &mut self,
        bytes: &[u8],
        from: Container,
        to: Container,
        on_progress: &dyn Fn(f64),
    ) -> Result<Vec<u8>, TranscodeError> {
        if !self.is_supported() {
            return Err(TranscodeError::Unsupported { from, to });
        }

        let input = TempFile::new("castkit-transcode-in", from.extension());
        let output = TempFile::new("castkit-transcode-out", to.extension());
        std::fs::write(input.path(), bytes)
            .map_err(|e| TranscodeError::Failed(format!("failed to write input: {e}")))?;
        let duration_secs = probe_duration_secs(input.path()).unwrap_or(f64::NAN);

        let mut child = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-nostats", "-i"])
            .arg(input.path())
            .args(Self::codec_args(to))
            .args(["-progress", "pipe:1"])
            .arg(output.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TranscodeError::Failed(format!("failed to start ffmpeg: {e}")))?;

        tracing::info!(pid = child.id(), from = ?from, to = ?to, "ffmpeg transcode started");

        let stderr_task = child.stderr.take().map(drain_stderr);
        let read = match child.stdout.take() {
            Some(stdout) => read_progress(BufReader::new(stdout), duration_secs, on_progress),
            None => Ok(()),
        };
        if let Err(err) = read {
            let stderr = kill_and_reap(&mut child, stderr_task);
            return Err(TranscodeError::Failed(format!(
                "failed to read ffmpeg progress: {err}: {}",
                stderr.trim()
            )));
        }

        let status = match child.wait() {
            Ok(status) => status,
            Err(err) => {
                let _ = kill_and_reap(&mut child, stderr_task);
                return Err(TranscodeError::Failed(format!("failed to wait on ffmpeg: {err}")));
            }
        };
        let stderr = join_stderr(stderr_task);
        if !status.success() {
            return Err(TranscodeError::Failed(format!(
                "ffmpeg exited with {status}: {}",
                stderr.trim()
            )));
        }

        std::fs::read(output.path())
            .map_err(|e| TranscodeError::Failed(format!("failed to read output: {e}")))
    }
}

/// Forward `-progress` reports as fractions of `duration_secs`.
fn read_progress(
    reader: impl BufRead,
    duration_secs: f64,
    on_progress: &dyn Fn(f64),
) -> std::io::Result<()> {
    let mut state = ProgressState::default();
    for line in reader.lines() {
        let line = line?;
        if let Some((key, value)) = line.trim().split_once('=') {
            state.update(key, value);
            if key == "progress" {
                on_progress(state.fraction(duration_secs));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Scripted {
        supported: bool,
        fail: bool,
        calls: usize,
    }

    impl ContainerTranscoder for Scripted {
        fn is_supported(&self) -> bool {
            self.supported
        }

        fn transcode(
            &mut self,
            bytes: &[u8],
            from: Container,
            to: Container,
            on_progress: &dyn Fn(f64),
        ) -> Result<Vec<u8>, TranscodeError> {
            self.calls += 1;
            if !self.supported {
                return Err(TranscodeError::Unsupported { from, to });
            }
            if self.fail {
                return Err(TranscodeError::Failed("boom".into()));
            }
            on_progress(1.0);
            let mut out = bytes.to_vec();
            out.extend_from_slice(b"-mp4");
            Ok(out)
        }
    }

    fn scripted(supported: bool, fail: bool) -> Scripted {
        Scripted {
            supported,
            fail,
            calls: 0,
        }
    }

    #[test]
    fn test_same_container_is_passthrough() {
        let mut t = scripted(true, false);
        let out = transcode_with_fallback(&mut t, b"abc".to_vec(), Container::Webm, Container::Webm, &|_| {});
        assert_eq!(out.bytes, b"abc");
        assert!(!out.fallback_used);
        assert_eq!(t.calls, 0);
    }

    #[test]
    fn test_unsupported_falls_back_without_calling() {
        let mut t = scripted(false, false);
        let out = transcode_with_fallback(&mut t, b"abc".to_vec(), Container::Webm, Container::Mp4, &|_| {});
        assert_eq!(out.container, Container::Webm);
        assert!(out.fallback_used);
        assert_eq!(out.bytes, b"abc");
        assert_eq!(t.calls, 0);
    }

    #[test]
    fn test_failure_falls_back_to_original_bytes() {
        let mut t = scripted(true, true);
        let out = transcode_with_fallback(&mut t, b"abc".to_vec(), Container::Webm, Container::Mp4, &|_| {});
        assert_eq!(out.container, Container::Webm);
        assert!(out.fallback_used);
        assert_eq!(out.bytes, b"abc");
    }

    #[test]
    fn test_success_delivers_requested_container() {
        let mut t = scripted(true, false);
        let last = Cell::new(0.0);
        let out = transcode_with_fallback(
            &mut t,
            b"abc".to_vec(),
            Container::Webm,
            Container::Mp4,
            &|p| last.set(p),
        );
        assert_eq!(out.container, Container::Mp4);
        assert!(!out.fallback_used);
        assert_eq!(out.bytes, b"abc-mp4");
        assert_eq!(last.get(), 1.0);
    }

    #[test]
    fn test_probed_answer_is_cached() {
        let t = FfmpegTranscoder {
            available: Some(false),
        };
        assert!(!t.is_supported());
    }

    #[test]
    fn test_read_progress_reports_each_block() {
        let reports = std::cell::RefCell::new(Vec::new());
        let input = b"out_time_us=1000000\nprogress=continue\nout_time_us=2000000\nprogress=end\n";
        read_progress(&input[..], 4.0, &|p| reports.borrow_mut().push(p)).unwrap();
        assert_eq!(reports.into_inner(), vec![0.25, 1.0]);
    }

    #[test]
    fn test_read_progress_surfaces_unreadable_output() {
        let reports = std::cell::RefCell::new(Vec::new());
        let input = b"out_time_us=1000000\nprogress=continue\n\xff\xfe\nprogress=end\n";
        let err = read_progress(&input[..], 4.0, &|p| reports.borrow_mut().push(p)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert_eq!(reports.into_inner(), vec![0.25]);
    }

    #[test]
    fn test_codec_args_per_container() {
        assert!(FfmpegTranscoder::codec_args(Container::Mp4).contains(&"libx264"));
        assert!(FfmpegTranscoder::codec_args(Container::Webm).contains(&"libvpx-vp9"));
    }
}
