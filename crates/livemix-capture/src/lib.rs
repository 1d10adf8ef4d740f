//! Capture session, devices and the video capture unit.
//!
//! This crate wraps the platform capture session behind [`SessionBackend`],
//! describes cameras and microphones through [`CaptureDevice`], and owns the
//! video side of the pipeline: per-track cameras, input formats and the
//! passthrough and mixed video streams.

mod device;
mod error;
pub mod mock;
mod pacing;
mod session;
mod video;

pub use device::{CaptureDevice, DeviceConfigurator, DeviceSettings};
pub use error::CaptureError;
pub use pacing::{FramePacer, FRAME_PACING_TOLERANCE};
pub use session::{CaptureSession, SessionBackend};
pub use video::{TrackFrame, VideoCaptureUnit};

/// Channel capacity for video streams.
pub const FRAME_CHANNEL_CAPACITY: usize = 8;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
