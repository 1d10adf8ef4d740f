//! Error types for the audio module.

use livemix_capture::CaptureError;
use livemix_types::{AudioFormat, BufferError, TrackId};
use thiserror::Error;

/// Errors that can occur during audio operations.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Device binding or configuration failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// A track's format differs from the main track's.
    #[error("Audio format mismatch on track {track}: expected {expected:?}, got {actual:?}")]
    FormatMismatch {
        track: TrackId,
        expected: AudioFormat,
        actual: AudioFormat,
    },

    /// A mixed buffer could not be built.
    #[error("Invalid audio buffer: {0}")]
    Buffer(#[from] BufferError),
}
