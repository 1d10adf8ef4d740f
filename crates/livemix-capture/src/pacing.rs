//! Frame-rate pacing for the mixed video stream.

use std::time::Duration;

/// Fraction of the frame interval a frame may arrive early and still be
/// emitted. Absorbs capture jitter around the nominal rate.
pub const FRAME_PACING_TOLERANCE: f64 = 0.25;

/// Drops frames that arrive faster than the target frame rate.
///
/// Frames are never held back or duplicated: a frame is either emitted
/// immediately or coalesced away.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    last_emitted: Option<Duration>,
}

impl FramePacer {
    /// Create a pacer for `frame_rate` frames per second. A rate that is
    /// not a positive finite number disables pacing.
    pub fn new(frame_rate: f64) -> Self {
        Self {
            interval: interval_for(frame_rate),
            last_emitted: None,
        }
    }

    /// Change the target rate. The last emitted timestamp is kept.
    pub fn set_frame_rate(&mut self, frame_rate: f64) {
        self.interval = interval_for(frame_rate);
    }

    /// Target frame interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Decide whether the frame at `pts` is emitted.
    pub fn admit(&mut self, pts: Duration) -> bool {
        if let Some(last) = self.last_emitted {
            // A timestamp going backwards means the source restarted.
            if pts >= last {
                let min_gap = self.interval.mul_f64(1.0 - FRAME_PACING_TOLERANCE);
                if pts - last < min_gap {
                    return false;
                }
            }
        }

        self.last_emitted = Some(pts);
        true
    }

    /// Forget the last emitted frame.
    pub fn reset(&mut self) {
        self.last_emitted = None;
    }
}

fn interval_for(frame_rate: f64) -> Duration {
    if frame_rate.is_finite() && frame_rate > 0.0 {
        Duration::from_secs_f64(1.0 / frame_rate)
    } else {
        Duration::ZERO
    }
}
