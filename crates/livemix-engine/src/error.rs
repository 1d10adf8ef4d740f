//! Error types for the mixer.

use livemix_audio::AudioError;
use livemix_capture::CaptureError;
use livemix_types::{MediaKind, TrackId};
use thiserror::Error;

/// Errors surfaced by [`Mixer`](crate::Mixer) operations.
#[derive(Debug, Error)]
pub enum MixerError {
    /// The session could not bind the device. The track keeps its previous
    /// binding.
    #[error("Failed to attach {medium} device on track {track}: {source}")]
    AttachFailure {
        track: TrackId,
        medium: MediaKind,
        #[source]
        source: CaptureError,
    },

    /// No device is bound to the track.
    #[error("No {medium} device bound to track {track}")]
    DeviceNotFound { track: TrackId, medium: MediaKind },

    /// The bound device rejected new settings.
    #[error("Failed to configure {medium} device on track {track}: {source}")]
    Device {
        track: TrackId,
        medium: MediaKind,
        #[source]
        source: CaptureError,
    },

    /// A configuration value was rejected.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The capture session failed to start, stop or reconfigure.
    #[error("Capture session error: {0}")]
    Session(#[from] CaptureError),

    /// The audio unit failed.
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// A loop thread could not be spawned.
    #[error("Failed to spawn mixer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl MixerError {
    pub(crate) fn attach(track: TrackId, medium: MediaKind, error: CaptureError) -> Self {
        Self::AttachFailure {
            track,
            medium,
            source: error,
        }
    }

    pub(crate) fn configure(track: TrackId, medium: MediaKind, error: CaptureError) -> Self {
        match error {
            CaptureError::DeviceNotFound(_) => Self::DeviceNotFound { track, medium },
            source => Self::Device {
                track,
                medium,
                source,
            },
        }
    }
}
