//! Offscreen compositing surface.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use livemix_capture::TrackFrame;
use livemix_types::{SampleBuffer, TrackId, VideoMixerSettings};

use crate::composite::{CompositeStrategy, LayeredComposite};

/// Duration stamped on composites whose main buffer has none, and the
/// minimum step between consecutive composite timestamps.
pub const MIN_FRAME_DURATION: Duration = Duration::from_millis(1);

struct ScreenState {
    tracks: BTreeMap<TrackId, SampleBuffer>,
    received: BTreeMap<TrackId, Instant>,
    /// Oldest epoch still accepted per track.
    retired: BTreeMap<TrackId, u64>,
    settings: Arc<VideoMixerSettings>,
    last_pts: Option<Duration>,
}

/// Caches the latest frame of every video track and renders composites on
/// demand.
pub struct Screen {
    state: Mutex<ScreenState>,
    strategy: Box<dyn CompositeStrategy>,
}

impl Screen {
    /// Create a screen using [`LayeredComposite`].
    pub fn new() -> Self {
        Self::with_strategy(Box::new(LayeredComposite))
    }

    /// Create a screen using a custom compositing strategy.
    pub fn with_strategy(strategy: Box<dyn CompositeStrategy>) -> Self {
        Self {
            state: Mutex::new(ScreenState {
                tracks: BTreeMap::new(),
                received: BTreeMap::new(),
                retired: BTreeMap::new(),
                settings: Arc::new(VideoMixerSettings::default()),
                last_pts: None,
            }),
            strategy,
        }
    }

    /// Replace the cached frame for the frame's track. Frames from before
    /// the track was last retired are ignored.
    pub fn append(&self, frame: TrackFrame) {
        let TrackFrame {
            track,
            epoch,
            buffer,
        } = frame;
        if buffer.format.video().is_none() {
            trace!(track, "Screen ignoring non-video buffer");
            return;
        }

        let mut state = self.state.lock();
        if state.retired.get(&track).is_some_and(|floor| epoch < *floor) {
            trace!(track, epoch, "Screen ignoring frame from a detached camera");
            return;
        }
        state.tracks.insert(track, buffer);
        state.received.insert(track, Instant::now());
    }

    /// Render a composite for the display tick at `at`.
    ///
    /// Returns `None` until the main track has a frame, or when the main
    /// frame cannot be rendered. The timestamp is the main frame's pts
    /// advanced by the time since it was cached, and always increases.
    pub fn make_sample_buffer(&self, at: Instant) -> Option<SampleBuffer> {
        let mut state = self.state.lock();
        let settings = Arc::clone(&state.settings);
        let main_track = settings.main_track;

        let main = state.tracks.get(&main_track)?;
        let data = self.strategy.composite(main, &state.tracks, &settings)?;

        let cached_at = state.received.get(&main_track).copied().unwrap_or(at);
        let mut pts = main.pts + at.saturating_duration_since(cached_at);
        if let Some(last) = state.last_pts {
            if pts <= last {
                pts = last + MIN_FRAME_DURATION;
            }
        }
        let duration = if main.duration.is_zero() {
            MIN_FRAME_DURATION
        } else {
            main.duration
        };
        let format = main.format.clone();

        state.last_pts = Some(pts);
        Some(SampleBuffer::new(format, data, pts, duration))
    }

    /// Forget the cached frame of a track and refuse frames stamped with
    /// an epoch older than `epoch`.
    pub fn retire_track(&self, track: TrackId, epoch: u64) {
        let mut state = self.state.lock();
        state.tracks.remove(&track);
        state.received.remove(&track);
        let floor = state.retired.entry(track).or_default();
        *floor = (*floor).max(epoch);
    }

    /// Forget every cached frame.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.tracks.clear();
        state.received.clear();
    }

    /// Replace the layout settings.
    pub fn set_settings(&self, settings: VideoMixerSettings) {
        self.state.lock().settings = Arc::new(settings);
    }

    /// Current layout settings.
    pub fn settings(&self) -> Arc<VideoMixerSettings> {
        Arc::clone(&self.state.lock().settings)
    }
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use livemix_types::{AudioFormat, FormatDescription, TrackLayout, VideoFormat};

    use super::*;

    fn frame(width: u32, height: u32, fill: u8, pts_ms: u64) -> SampleBuffer {
        let format = VideoFormat::bgra(width, height);
        SampleBuffer::video(
            format,
            Bytes::from(vec![fill; format.buffer_size()]),
            Duration::from_millis(pts_ms),
            Duration::from_millis(33),
        )
    }

    fn on(track: TrackId, buffer: SampleBuffer) -> TrackFrame {
        TrackFrame {
            track,
            epoch: 0,
            buffer,
        }
    }

    #[test]
    fn test_empty_until_main_track_has_content() {
        let screen = Screen::new();
        assert!(screen.make_sample_buffer(Instant::now()).is_none());

        screen.append(on(1, frame(2, 2, 0, 0)));
        assert!(screen.make_sample_buffer(Instant::now()).is_none());

        screen.append(on(0, frame(4, 4, 0, 0)));
        let out = screen.make_sample_buffer(Instant::now()).unwrap();
        assert_eq!(out.format.video(), Some(VideoFormat::bgra(4, 4)));
    }

    #[test]
    fn test_pts_extrapolated_and_increasing() {
        let screen = Screen::new();
        screen.append(on(0, frame(2, 2, 0, 100)));
        let now = Instant::now();

        let first = screen.make_sample_buffer(now).unwrap();
        assert!(first.pts >= Duration::from_millis(100));

        let later = screen
            .make_sample_buffer(now + Duration::from_millis(40))
            .unwrap();
        assert!(later.pts >= first.pts + Duration::from_millis(40));

        let repeated = screen.make_sample_buffer(now).unwrap();
        assert!(repeated.pts > later.pts);
        assert_eq!(repeated.duration, Duration::from_millis(33));
    }

    #[test]
    fn test_zero_duration_gets_minimum() {
        let screen = Screen::new();
        let mut main = frame(2, 2, 0, 0);
        main.duration = Duration::ZERO;
        screen.append(on(0, main));

        let out = screen.make_sample_buffer(Instant::now()).unwrap();
        assert_eq!(out.duration, MIN_FRAME_DURATION);
    }

    #[test]
    fn test_overlay_drawn_with_layout() {
        let screen = Screen::new();
        let mut settings = VideoMixerSettings::default();
        settings.layouts.insert(1, TrackLayout::new(0, 0, 1, 1));
        screen.set_settings(settings);

        screen.append(on(0, frame(2, 2, 0, 0)));
        screen.append(on(1, frame(1, 1, 255, 0)));

        let out = screen.make_sample_buffer(Instant::now()).unwrap();
        assert_eq!(&out.data[..4], &[255, 255, 255, 255]);
        assert_eq!(&out.data[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_main_track_follows_settings() {
        let screen = Screen::new();
        screen.append(on(0, frame(2, 2, 0, 0)));
        screen.append(on(1, frame(8, 8, 0, 0)));

        screen.set_settings(VideoMixerSettings {
            main_track: 1,
            ..Default::default()
        });

        let out = screen.make_sample_buffer(Instant::now()).unwrap();
        assert_eq!(out.format.video(), Some(VideoFormat::bgra(8, 8)));
    }

    #[test]
    fn test_retired_track_stops_rendering() {
        let screen = Screen::new();
        screen.append(on(0, frame(2, 2, 0, 0)));
        screen.retire_track(0, 1);
        assert!(screen.make_sample_buffer(Instant::now()).is_none());
    }

    #[test]
    fn test_frames_queued_before_retire_are_ignored() {
        let screen = Screen::new();
        let queued = on(0, frame(2, 2, 0, 0));

        screen.retire_track(0, 1);
        screen.append(queued);
        assert!(screen.make_sample_buffer(Instant::now()).is_none());

        screen.append(TrackFrame {
            track: 0,
            epoch: 1,
            buffer: frame(2, 2, 0, 33),
        });
        assert!(screen.make_sample_buffer(Instant::now()).is_some());

        screen.retire_track(0, 0);
        screen.append(on(0, frame(2, 2, 0, 66)));
        assert!(screen.make_sample_buffer(Instant::now()).is_none());
    }

    #[test]
    fn test_audio_not_cached() {
        let screen = Screen::new();
        screen.append(on(
            0,
            SampleBuffer::new(
                FormatDescription::Audio(AudioFormat::default()),
                Bytes::new(),
                Duration::ZERO,
                Duration::ZERO,
            ),
        ));
        assert!(screen.make_sample_buffer(Instant::now()).is_none());
    }
}
