//! Local monitoring output.

use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use tracing::trace;

use livemix_types::AudioBuffer;

/// A local playback device mixed audio is routed to while monitoring.
pub trait AudioPlayback: Send {
    /// Play a mixed buffer presented at `when`.
    fn play(&mut self, buffer: &AudioBuffer, when: Duration);
}

/// Playback that forwards buffers to a channel, for hosts that drive their
/// own output device.
pub struct ChannelPlayback {
    sender: Sender<(AudioBuffer, Duration)>,
}

impl ChannelPlayback {
    /// Create a playback sink writing to `sender`.
    pub fn new(sender: Sender<(AudioBuffer, Duration)>) -> Self {
        Self { sender }
    }
}

impl AudioPlayback for ChannelPlayback {
    fn play(&mut self, buffer: &AudioBuffer, when: Duration) {
        match self.sender.try_send((buffer.clone(), when)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("Monitor channel full, dropping buffer"),
            Err(TrySendError::Disconnected(_)) => trace!("Monitor channel closed"),
        }
    }
}
