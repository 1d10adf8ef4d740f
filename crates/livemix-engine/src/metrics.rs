//! Dispatch counters and periodic reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::info;

use livemix_types::MixerStats;

/// Counts what the mixer loops deliver.
pub struct MixerMetrics {
    start_time: RwLock<Option<Instant>>,
    video_dispatched: AtomicU64,
    audio_dispatched: AtomicU64,
    screen_rendered: AtomicU64,
    ticks_skipped: AtomicU64,
    unrecognized: AtomicU64,
    last_report_time: RwLock<Instant>,
    last_video_count: AtomicU64,
}

impl MixerMetrics {
    /// Create an idle collector.
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            video_dispatched: AtomicU64::new(0),
            audio_dispatched: AtomicU64::new(0),
            screen_rendered: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            unrecognized: AtomicU64::new(0),
            last_report_time: RwLock::new(Instant::now()),
            last_video_count: AtomicU64::new(0),
        }
    }

    /// Start measuring uptime.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
        self.last_video_count
            .store(self.video_dispatched.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    /// Stop measuring uptime.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    /// Record a mixed video buffer delivered to the outputs.
    pub fn record_video_dispatched(&self) {
        self.video_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a mixed audio buffer delivered to the outputs.
    pub fn record_audio_dispatched(&self) {
        self.audio_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a composite rendered by the screen.
    pub fn record_screen_rendered(&self) {
        self.screen_rendered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a display tick that produced no composite.
    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an appended buffer dropped for its medium or layout.
    pub fn record_unrecognized(&self) {
        self.unrecognized.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters. Drops are owned by the capture units and passed
    /// in.
    pub fn snapshot(&self, video_frames_dropped: u64, audio_buffers_dropped: u64) -> MixerStats {
        let uptime_seconds = self
            .start_time
            .read()
            .map(|start| start.elapsed().as_secs())
            .unwrap_or(0);

        MixerStats {
            video_buffers_dispatched: self.video_dispatched.load(Ordering::Relaxed),
            audio_buffers_dispatched: self.audio_dispatched.load(Ordering::Relaxed),
            screen_frames_rendered: self.screen_rendered.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            unrecognized_buffers: self.unrecognized.load(Ordering::Relaxed),
            video_frames_dropped,
            audio_buffers_dropped,
            uptime_seconds,
        }
    }

    /// Video buffers per second since the last report.
    pub fn video_fps(&self) -> f32 {
        let elapsed = self.last_report_time.read().elapsed().as_secs_f32();
        let current = self.video_dispatched.load(Ordering::Relaxed);
        let last = self.last_video_count.load(Ordering::Relaxed);

        if elapsed > 0.0 {
            current.saturating_sub(last) as f32 / elapsed
        } else {
            0.0
        }
    }

    /// Log the counters at info level and start a new reporting window.
    pub fn report(&self, video_frames_dropped: u64, audio_buffers_dropped: u64) {
        let stats = self.snapshot(video_frames_dropped, audio_buffers_dropped);
        info!(
            "Mixer stats: fps={:.1}, video={}, audio={}, rendered={}, skipped={}, dropped={}/{}, uptime={}s",
            self.video_fps(),
            stats.video_buffers_dispatched,
            stats.audio_buffers_dispatched,
            stats.screen_frames_rendered,
            stats.ticks_skipped,
            stats.video_frames_dropped,
            stats.audio_buffers_dropped,
            stats.uptime_seconds
        );
        self.mark_reported();
    }

    fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
        self.last_video_count
            .store(self.video_dispatched.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

impl Default for MixerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_in_snapshot() {
        let metrics = MixerMetrics::new();
        metrics.record_video_dispatched();
        metrics.record_video_dispatched();
        metrics.record_audio_dispatched();
        metrics.record_tick_skipped();
        metrics.record_unrecognized();

        let stats = metrics.snapshot(3, 2);
        assert_eq!(stats.video_buffers_dispatched, 2);
        assert_eq!(stats.audio_buffers_dispatched, 1);
        assert_eq!(stats.ticks_skipped, 1);
        assert_eq!(stats.unrecognized_buffers, 1);
        assert_eq!(stats.video_frames_dropped, 3);
        assert_eq!(stats.audio_buffers_dropped, 2);
    }

    #[test]
    fn test_uptime_only_while_started() {
        let metrics = MixerMetrics::new();
        assert_eq!(metrics.snapshot(0, 0).uptime_seconds, 0);

        metrics.start();
        metrics.stop();
        assert_eq!(metrics.snapshot(0, 0).uptime_seconds, 0);
    }

    #[test]
    fn test_report_resets_fps_window() {
        let metrics = MixerMetrics::new();
        metrics.start();
        metrics.record_video_dispatched();
        metrics.report(0, 0);

        assert_eq!(metrics.video_fps(), 0.0);
    }
}
