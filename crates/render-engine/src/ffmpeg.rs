//! Shared helpers for driving the `ffmpeg`/`ffprobe` command-line tools.

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

/// Check whether `binary` resolves on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Width and height of the first video stream.
pub fn probe_video_dimensions(path: &Path) -> Option<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0:s=x",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    parse_dimensions(raw.lines().next()?)
}

/// Container duration in seconds. `None` when ffprobe fails; `NaN` when the
/// container reports no usable duration (common for live-recorded WebM).
pub fn probe_duration_secs(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    Some(parse_duration(raw.lines().next().unwrap_or_default()))
}

fn parse_dimensions(line: &str) -> Option<(u32, u32)> {
    let (w, h) = line.trim().split_once('x')?;
    let width = w.parse::<u32>().ok()?;
    let height = h.parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

fn parse_duration(line: &str) -> f64 {
    line.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Accumulates `key=value` lines from `ffmpeg -progress pipe:1`.
#[derive(Debug, Default)]
pub(crate) struct ProgressState {
    pub out_time_secs: f64,
    pub complete: bool,
}

impl ProgressState {
    pub fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both names.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    /// Fraction of `duration_secs` processed, `[0, 1]`.
    pub fn fraction(&self, duration_secs: f64) -> f64 {
        if self.complete {
            return 1.0;
        }
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / duration_secs).clamp(0.0, 1.0)
    }
}

/// Drain a child's stderr on a thread so the child never blocks on a full
/// pipe. Join to get the captured text.
pub(crate) fn drain_stderr(stderr: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    })
}

pub(crate) fn join_stderr(task: Option<JoinHandle<String>>) -> String {
    task.and_then(|t| t.join().ok())
        .unwrap_or_else(|| "<failed to join stderr reader>".to_string())
}

/// Kill a child that is being abandoned, reap it, and collect its stderr.
pub(crate) fn kill_and_reap(child: &mut Child, stderr_task: Option<JoinHandle<String>>) -> String {
    let _ = child.kill();
    let _ = child.wait();
    join_stderr(stderr_task)
}

/// A temp file path that is removed on drop.
#[derive(Debug)]
pub(crate) struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn new(prefix: &str, extension: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Utc::now().timestamp_micros();
        let name = format!("{prefix}-{}-{stamp}-{n}.{extension}", std::process::id());
        Self {
            path: std::env::temp_dir().join(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(err) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %err, "Failed to remove temp file");
            }
        }
    }
}
