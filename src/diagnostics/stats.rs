use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::stream::frame::{monotonic_ns, SharedFrame};
use crate::stream::hub::{FrameSink, SinkError};

/// Width of the sliding window used for the frame rate.
pub const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Collects throughput statistics for a frame stream.
pub struct FrameStats {
    frame_count: u64,
    total_bytes: u64,
    start_time: Instant,
    /// Arrival times inside the current window, oldest first.
    arrivals: VecDeque<Instant>,
    window: Duration,
    latency_ns: u64,
}

/// Snapshot of frame statistics for serialisation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub fps: f64,
    pub frame_count: u64,
    pub bandwidth_bps: u64,
    pub latency_ms: f64,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::with_window(FPS_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            frame_count: 0,
            total_bytes: 0,
            start_time: Instant::now(),
            arrivals: VecDeque::new(),
            window,
            latency_ns: 0,
        }
    }

    /// Record a delivered frame of `bytes` captured at `captured_at_ns`
    /// on the process monotonic clock.
    pub fn record_frame(&mut self, bytes: usize, captured_at_ns: u64) {
        self.record_frame_at(bytes, captured_at_ns, Instant::now(), monotonic_ns());
    }

    fn record_frame_at(&mut self, bytes: usize, captured_at_ns: u64, now: Instant, now_ns: u64) {
        self.frame_count += 1;
        self.total_bytes += bytes as u64;
        self.latency_ns = now_ns.saturating_sub(captured_at_ns);

        self.arrivals.push_back(now);
        while let Some(&oldest) = self.arrivals.front() {
            if now.duration_since(oldest) > self.window {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second over the sliding window.
    ///
    /// Until a full window has elapsed the rate is frames over elapsed time.
    pub fn fps(&self) -> f64 {
        self.fps_at(Instant::now())
    }

    fn fps_at(&self, now: Instant) -> f64 {
        let elapsed = now.duration_since(self.start_time);
        if elapsed < self.window {
            let secs = elapsed.as_secs_f64();
            if secs < 0.001 {
                return 0.0;
            }
            return self.frame_count as f64 / secs;
        }
        let recent = self
            .arrivals
            .iter()
            .filter(|&&t| now.duration_since(t) <= self.window)
            .count();
        recent as f64 / self.window.as_secs_f64()
    }

    /// Latest capture-to-delivery latency in milliseconds.
    pub fn latency_ms(&self) -> f64 {
        self.latency_ns as f64 / 1_000_000.0
    }

    /// Average bandwidth in bytes per second since start or last reset.
    pub fn bandwidth_bps(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0;
        }
        (self.total_bytes as f64 / elapsed) as u64
    }

    /// Reset all counters.
    pub fn reset(&mut self) {
        *self = Self::with_window(self.window);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fps: self.fps(),
            frame_count: self.frame_count,
            bandwidth_bps: self.bandwidth_bps(),
            latency_ms: self.latency_ms(),
        }
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame-rate counter that sits on a hub like any other consumer.
pub struct FpsCounter {
    label: String,
    stats: Mutex<FrameStats>,
}

impl FpsCounter {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stats: Mutex::new(FrameStats::new()),
        }
    }

    pub fn fps(&self) -> f64 {
        self.stats.lock().fps()
    }

    pub fn frame_count(&self) -> u64 {
        self.stats.lock().frame_count()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.lock().snapshot()
    }

    pub fn reset(&self) {
        self.stats.lock().reset();
    }
}

impl FrameSink for FpsCounter {
    fn deliver(&self, frame: &SharedFrame) -> Result<(), SinkError> {
        self.stats.lock().record_frame(frame.len(), frame.captured_at_ns);
        Ok(())
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::frame::FrameEnvelope;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn initialises_with_zero_values() {
        let stats = FrameStats::new();
        assert_eq!(stats.frame_count(), 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.latency_ms(), 0.0);
    }

    #[test]
    fn record_frame_increments_frame_count() {
        let mut stats = FrameStats::new();
        stats.record_frame(1000, monotonic_ns());
        stats.record_frame(1000, monotonic_ns());
        assert_eq!(stats.frame_count(), 2);
        assert_eq!(stats.total_bytes, 2000);
    }

    #[test]
    fn fps_during_first_window_uses_elapsed_time() {
        let mut stats = FrameStats::new();
        for _ in 0..30 {
            stats.record_frame(1000, 0);
        }
        thread::sleep(Duration::from_millis(100));
        let fps = stats.fps();
        assert!(fps > 0.0, "fps should be positive, got {fps}");
    }

    #[test]
    fn fps_after_first_window_counts_recent_arrivals_only() {
        let window = Duration::from_secs(1);
        let mut stats = FrameStats::with_window(window);
        let start = stats.start_time;

        // 10 frames early on, then 5 frames in the last second.
        for i in 0..10 {
            stats.record_frame_at(10, 0, start + Duration::from_millis(i * 10), 0);
        }
        for i in 0..5 {
            stats.record_frame_at(10, 0, start + Duration::from_millis(2_000 + i * 100), 0);
        }

        let fps = stats.fps_at(start + Duration::from_millis(2_500));
        assert_eq!(fps, 5.0);
        assert_eq!(stats.arrivals.len(), 5);
    }

    #[test]
    fn fps_drops_to_zero_when_frames_stop() {
        let mut stats = FrameStats::with_window(Duration::from_secs(1));
        let start = stats.start_time;
        stats.record_frame_at(10, 0, start + Duration::from_millis(100), 0);
        assert_eq!(stats.fps_at(start + Duration::from_secs(5)), 0.0);
    }

    #[test]
    fn latency_is_capture_to_delivery_time() {
        let mut stats = FrameStats::new();
        stats.record_frame_at(10, 1_000_000, Instant::now(), 3_500_000);
        assert_eq!(stats.latency_ms(), 2.5);
    }

    #[test]
    fn latency_clamps_future_timestamps_to_zero() {
        let mut stats = FrameStats::new();
        stats.record_frame_at(10, 5_000, Instant::now(), 1_000);
        assert_eq!(stats.latency_ms(), 0.0);
    }

    #[test]
    fn bandwidth_bps_tracks_bytes() {
        let mut stats = FrameStats::new();
        stats.record_frame(10_000, 0);
        thread::sleep(Duration::from_millis(50));
        let bps = stats.bandwidth_bps();
        assert!(bps > 0, "bandwidth should be positive, got {bps}");
    }

    #[test]
    fn reset_clears_all_counters() {
        let mut stats = FrameStats::new();
        stats.record_frame(1000, 0);
        stats.reset();
        assert_eq!(stats.frame_count(), 0);
        assert_eq!(stats.total_bytes, 0);
        assert!(stats.arrivals.is_empty());
    }

    #[test]
    fn snapshot_serialises_to_camelcase() {
        let mut stats = FrameStats::new();
        stats.record_frame(5000, 0);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert!(json["fps"].is_number());
        assert_eq!(json["frameCount"], 1);
        assert!(json["bandwidthBps"].is_number());
        assert!(json["latencyMs"].is_number());
    }

    #[test]
    fn fps_counter_records_delivered_frames() {
        let counter = FpsCounter::new("fps");
        let frame = Arc::new(FrameEnvelope {
            data: vec![0; 12],
            width: 2,
            height: 2,
            channels: 3,
            captured_at_ns: monotonic_ns(),
        });
        for _ in 0..3 {
            counter.deliver(&frame).unwrap();
        }
        assert_eq!(counter.frame_count(), 3);
        assert_eq!(counter.snapshot().frame_count, 3);
        assert_eq!(counter.label(), "fps");

        counter.reset();
        assert_eq!(counter.frame_count(), 0);
    }
}
