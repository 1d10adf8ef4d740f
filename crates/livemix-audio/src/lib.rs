//! Audio capture unit and multi-track mixing.
//!
//! The [`AudioCaptureUnit`] owns the microphone tracks, mixes them into a
//! single stream anchored on the main track, and optionally routes the
//! result to a local [`AudioPlayback`] for monitoring.

mod error;
mod mixer;
mod playback;
mod unit;

pub use error::AudioError;
pub use mixer::{TrackMixer, MAX_PENDING_BUFFERS};
pub use playback::{AudioPlayback, ChannelPlayback};
pub use unit::AudioCaptureUnit;

/// Channel capacity for mixed audio.
pub const AUDIO_CHANNEL_CAPACITY: usize = 8;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;
