//! Error types for the capture module.

use livemix_types::{MediaKind, TrackId};
use thiserror::Error;

/// Errors that can occur during capture operations.
///
/// Every variant carries plain data so backends can hand out the same
/// failure more than once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Permission denied for the device.
    #[error("Permission denied for device: {0}")]
    PermissionDenied(String),

    /// The device is in use by another session.
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// The device cannot produce a usable format.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A device of one medium was offered to a track of the other.
    #[error("Device {device} is not a {expected} device")]
    MediumMismatch { device: String, expected: MediaKind },

    /// A second camera was attached while multi-camera capture is off.
    #[error("Multi-camera session is disabled; track {0} cannot be bound")]
    MultiCamDisabled(TrackId),

    /// No device is bound to the track.
    #[error("No device bound to track {0}")]
    DeviceNotFound(TrackId),

    /// Applying device settings failed.
    #[error("Device configuration failed: {0}")]
    Configuration(String),

    /// The underlying session failed.
    #[error("Capture session error: {0}")]
    Session(String),
}
