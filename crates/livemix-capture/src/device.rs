//! Capture device abstraction.

use std::fmt;

use livemix_types::{FormatDescription, MediaKind, VideoOrientation};

use crate::CaptureResult;

/// Settings a capture device exposes for configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    /// Requested capture frame rate (video only).
    pub frame_rate: Option<f64>,

    /// Torch (flash light) state.
    pub torch_enabled: bool,

    /// Output orientation (video only).
    pub orientation: VideoOrientation,

    /// Optical/digital zoom factor, 1.0 is no zoom.
    pub zoom_factor: f64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            frame_rate: None,
            torch_enabled: false,
            orientation: VideoOrientation::default(),
            zoom_factor: 1.0,
        }
    }
}

/// Caller-supplied configuration run against a device's settings when it
/// is attached.
pub type DeviceConfigurator = Box<dyn FnOnce(&mut DeviceSettings) + Send>;

/// A camera or microphone that can be bound to a track.
///
/// Implemented by the platform layer; the pipeline only reads formats and
/// pushes settings through this trait.
pub trait CaptureDevice: Send + Sync + fmt::Debug {
    /// Stable device identifier.
    fn id(&self) -> &str;

    /// The medium this device captures.
    fn medium(&self) -> MediaKind;

    /// The format the device currently produces, if known.
    fn format(&self) -> Option<FormatDescription>;

    /// Current device settings.
    fn settings(&self) -> DeviceSettings;

    /// Apply new settings.
    fn apply(&self, settings: &DeviceSettings) -> CaptureResult<()>;

    /// Whether the device has a torch.
    fn has_torch(&self) -> bool {
        false
    }
}
