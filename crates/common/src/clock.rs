//! Clock and cadence utilities for export jobs.
//!
//! Export jobs produce frames on a fixed cadence derived from the target
//! frame rate. This module provides:
//! - A job clock anchored to a monotonic epoch with a wall-clock label
//! - A frame cadence gate that converts elapsed time into frame boundaries

use std::time::{Duration, Instant};

/// A job clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment the export job started).
#[derive(Debug, Clone)]
pub struct ExportClock {
    /// The instant the job started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl ExportClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the job started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at job start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Convert an elapsed nanosecond value to seconds.
    pub fn ns_to_secs(ns: u64) -> f64 {
        ns as f64 / 1_000_000_000.0
    }

    /// Convert seconds to nanoseconds.
    pub fn secs_to_ns(secs: f64) -> u64 {
        (secs * 1_000_000_000.0) as u64
    }
}

/// Fixed-rate frame boundary gate.
///
/// Boundary `k` lies at `k / fps` seconds. [`FrameCadence::advance`] reports
/// at most one boundary per call, and only when a boundary newer than the
/// last reported one has been crossed, so callers can never emit frames
/// faster than the target rate no matter how often they poll.
#[derive(Debug)]
pub struct FrameCadence {
    fps: u32,
    last_boundary: Option<u64>,
}

impl FrameCadence {
    /// Create a cadence for the given frame rate (clamped to at least 1).
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            last_boundary: None,
        }
    }

    /// Poll interval that lands on or just after every boundary.
    ///
    /// Rounded up to the next nanosecond so that integer tick multiples
    /// never fall short of a boundary.
    pub fn interval(&self) -> Duration {
        let fps = self.fps as u64;
        Duration::from_nanos(1_000_000_000u64.div_ceil(fps))
    }

    /// Frame rate this cadence targets.
    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Index of the boundary most recently crossed at `elapsed`.
    pub fn boundary_at(&self, elapsed: Duration) -> u64 {
        let ns = elapsed.as_nanos();
        (ns * self.fps as u128 / 1_000_000_000u128) as u64
    }

    /// Returns the newest crossed boundary if it has not been reported yet.
    /// The first call always reports.
    pub fn advance(&mut self, elapsed: Duration) -> Option<u64> {
        let boundary = self.boundary_at(elapsed);
        match self.last_boundary {
            Some(last) if boundary <= last => None,
            _ => {
                self.last_boundary = Some(boundary);
                Some(boundary)
            }
        }
    }

    /// Timestamp in seconds of a boundary index.
    pub fn timestamp_secs(&self, boundary: u64) -> f64 {
        boundary as f64 / self.fps as f64
    }
}

/// Number of frames needed to cover `duration_secs` at `fps`.
pub fn expected_frame_count(duration_secs: f64, fps: u32) -> u64 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 0;
    }
    // Guard against 10.000000001 * 30 rounding up to an extra frame.
    let exact = duration_secs * fps.max(1) as f64;
    (exact - 1e-9).ceil().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = ExportClock::start();
        assert!(clock.elapsed_secs() < 1.0);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_ns_to_secs_conversion() {
        assert!((ExportClock::ns_to_secs(1_500_000_000) - 1.5).abs() < 1e-9);
        assert_eq!(ExportClock::secs_to_ns(2.0), 2_000_000_000);
    }

    #[test]
    fn test_cadence_first_call_reports_zero() {
        let mut cadence = FrameCadence::new(30);
        assert_eq!(cadence.advance(Duration::ZERO), Some(0));
        assert_eq!(cadence.advance(Duration::from_millis(10)), None);
        assert_eq!(cadence.advance(Duration::from_millis(34)), Some(1));
    }

    #[test]
    fn test_cadence_never_faster_than_fps() {
        let mut cadence = FrameCadence::new(30);
        let mut reported = 0;
        // Poll every millisecond for one second.
        for ms in 0..1000 {
            if cadence.advance(Duration::from_millis(ms)).is_some() {
                reported += 1;
            }
        }
        assert_eq!(reported, 30);
    }

    #[test]
    fn test_cadence_interval_multiples_hit_every_boundary() {
        let cadence = FrameCadence::new(30);
        let interval = cadence.interval();
        for k in 0..600u32 {
            assert_eq!(cadence.boundary_at(interval * k), k as u64);
        }
    }

    #[test]
    fn test_cadence_skips_to_newest_boundary_when_late() {
        let mut cadence = FrameCadence::new(10);
        assert_eq!(cadence.advance(Duration::ZERO), Some(0));
        assert_eq!(cadence.advance(Duration::from_millis(350)), Some(3));
    }

    #[test]
    fn test_expected_frame_count() {
        assert_eq!(expected_frame_count(10.0, 30), 300);
        assert_eq!(expected_frame_count(0.5, 30), 15);
        assert_eq!(expected_frame_count(1.01, 30), 31);
        assert_eq!(expected_frame_count(0.0, 30), 0);
        assert_eq!(expected_frame_count(f64::NAN, 30), 0);
    }
}
