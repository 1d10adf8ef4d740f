//! Display-refresh clocks that drive offscreen rendering.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::debug;

use livemix_types::DEFAULT_FRAME_RATE;

/// A source of display refresh ticks.
pub trait DisplayClock: Send + Sync {
    /// Subscribe to ticks. Each subscription is an independent stream.
    fn subscribe(&self) -> Receiver<Instant>;

    /// Change the tick rate. Existing subscriptions may keep the old rate;
    /// subscribers re-subscribe when they see [`frame_rate`] change.
    ///
    /// [`frame_rate`]: DisplayClock::frame_rate
    fn set_frame_rate(&self, frame_rate: f64);

    /// Current tick rate in Hz.
    fn frame_rate(&self) -> f64;
}

/// Free-running clock ticking at the frame rate.
pub struct TickClock {
    frame_rate: Mutex<f64>,
}

impl TickClock {
    /// Create a clock ticking `frame_rate` times per second.
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_rate: Mutex::new(frame_rate),
        }
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_RATE)
    }
}

impl DisplayClock for TickClock {
    fn subscribe(&self) -> Receiver<Instant> {
        crossbeam_channel::tick(tick_interval(*self.frame_rate.lock()))
    }

    fn set_frame_rate(&self, frame_rate: f64) {
        let mut current = self.frame_rate.lock();
        if *current != frame_rate {
            debug!(frame_rate, "Display clock rate changed");
            *current = frame_rate;
        }
    }

    fn frame_rate(&self) -> f64 {
        *self.frame_rate.lock()
    }
}

fn tick_interval(frame_rate: f64) -> Duration {
    let rate = if frame_rate.is_finite() && frame_rate > 0.0 {
        frame_rate
    } else {
        DEFAULT_FRAME_RATE
    };
    Duration::from_secs_f64(1.0 / rate)
}

/// Clock ticked explicitly by the host, for example from a vsync callback.
///
/// A subscriber that has not consumed its previous tick misses the next
/// one rather than queueing it.
pub struct ManualClock {
    subscribers: Mutex<Vec<Sender<Instant>>>,
    frame_rate: Mutex<f64>,
}

impl ManualClock {
    /// Create a clock that reports `frame_rate` but only ticks on demand.
    pub fn new(frame_rate: f64) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            frame_rate: Mutex::new(frame_rate),
        }
    }

    /// Deliver a tick stamped now.
    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// Deliver a tick stamped `at`.
    pub fn tick_at(&self, at: Instant) {
        self.subscribers
            .lock()
            .retain(|subscriber| match subscriber.try_send(at) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_RATE)
    }
}

impl DisplayClock for ManualClock {
    fn subscribe(&self) -> Receiver<Instant> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.subscribers.lock().push(tx);
        rx
    }

    fn set_frame_rate(&self, frame_rate: f64) {
        *self.frame_rate.lock() = frame_rate;
    }

    fn frame_rate(&self) -> f64 {
        *self.frame_rate.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_clock_ticks() {
        let clock = TickClock::new(200.0);
        let ticks = clock.subscribe();
        assert!(ticks.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_invalid_rate_falls_back() {
        assert_eq!(tick_interval(0.0), tick_interval(DEFAULT_FRAME_RATE));
        assert_eq!(tick_interval(f64::NAN), tick_interval(DEFAULT_FRAME_RATE));
    }

    #[test]
    fn test_manual_clock_coalesces_unread_ticks() {
        let clock = ManualClock::default();
        let ticks = clock.subscribe();
        let first = Instant::now();

        clock.tick_at(first);
        clock.tick();

        assert_eq!(ticks.try_recv().unwrap(), first);
        assert!(ticks.try_recv().is_err());
    }

    #[test]
    fn test_manual_clock_prunes_dropped_subscribers() {
        let clock = ManualClock::default();
        let kept = clock.subscribe();
        drop(clock.subscribe());

        clock.tick();

        assert_eq!(clock.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
