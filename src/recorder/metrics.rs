//! Frame accounting for the video loop

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot published with every `Recording` status event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStats {
    /// Whole seconds since the loop started
    pub elapsed_secs: u64,
    /// Frames per second over the last report window, rounded to two decimals
    pub fps: f64,
    /// Output frames so far, duplicates included
    pub frames_written: u64,
    pub frame_skips: u64,
    /// `frame_skips / frames_written` in percent, 0 while nothing was written
    pub skip_percent: u32,
}

/// Counters owned by the video loop
#[derive(Debug)]
pub(crate) struct Metrics {
    frames_written: u64,
    frame_skips: u64,
    started_at: Duration,
    last_report_at: Duration,
    last_report_frames: u64,
    interval: Duration,
}

impl Metrics {
    pub(crate) fn new(started_at: Duration, interval: Duration) -> Self {
        Self {
            frames_written: 0,
            frame_skips: 0,
            started_at,
            last_report_at: started_at,
            last_report_frames: 0,
            interval,
        }
    }

    pub(crate) fn record_frame(&mut self, duplicated: bool) {
        self.frames_written += 1;
        if duplicated {
            self.frame_skips += 1;
        }
    }

    pub(crate) fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub(crate) fn frame_skips(&self) -> u64 {
        self.frame_skips
    }

    /// Returns a snapshot once per report interval and starts a new window
    pub(crate) fn report_due(&mut self, now: Duration) -> Option<RecordingStats> {
        let window = now.saturating_sub(self.last_report_at);
        if window < self.interval || window.is_zero() {
            return None;
        }

        let frames = self.frames_written - self.last_report_frames;
        let fps = round2(frames as f64 / window.as_secs_f64());
        self.last_report_at = now;
        self.last_report_frames = self.frames_written;

        Some(RecordingStats {
            elapsed_secs: now.saturating_sub(self.started_at).as_secs_f64().round() as u64,
            fps,
            frames_written: self.frames_written,
            frame_skips: self.frame_skips,
            skip_percent: skip_percent(self.frame_skips, self.frames_written),
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn skip_percent(frame_skips: u64, frames_written: u64) -> u32 {
    if frames_written == 0 {
        return 0;
    }
    ((frame_skips as f64 / frames_written as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_report_before_interval() {
        let mut metrics = Metrics::new(Duration::ZERO, Duration::from_secs(1));
        metrics.record_frame(false);
        assert!(metrics.report_due(Duration::from_millis(999)).is_none());
    }

    #[test]
    fn test_report_window_fps() {
        let mut metrics = Metrics::new(Duration::ZERO, Duration::from_secs(1));
        for _ in 0..30 {
            metrics.record_frame(false);
        }
        let stats = metrics.report_due(Duration::from_secs(1)).unwrap();
        assert_eq!(stats.fps, 30.0);
        assert_eq!(stats.frames_written, 30);
        assert_eq!(stats.elapsed_secs, 1);

        // Second window only counts its own frames
        for _ in 0..15 {
            metrics.record_frame(true);
        }
        let stats = metrics.report_due(Duration::from_secs(2)).unwrap();
        assert_eq!(stats.fps, 15.0);
        assert_eq!(stats.frames_written, 45);
        assert_eq!(stats.frame_skips, 15);
        assert_eq!(stats.skip_percent, 33);
    }

    #[test]
    fn test_fps_is_rounded_for_display() {
        let mut metrics = Metrics::new(Duration::ZERO, Duration::from_secs(1));
        for _ in 0..10 {
            metrics.record_frame(false);
        }
        let stats = metrics.report_due(Duration::from_millis(3000)).unwrap();
        assert_eq!(stats.fps, 3.33);
    }

    #[test]
    fn test_skip_percent_with_nothing_written() {
        assert_eq!(skip_percent(0, 0), 0);
        assert_eq!(skip_percent(1, 4), 25);
    }
}
