//! Mock session backend and devices for running the pipeline without
//! hardware.
//!
//! These are used by the test suites and by the demo host. The backend
//! records every binding and can be told to reject specific devices.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use livemix_types::{
    AudioFormat, FormatDescription, MediaKind, SessionPreset, TrackId, VideoFormat,
};

use crate::device::{CaptureDevice, DeviceSettings};
use crate::error::CaptureError;
use crate::session::SessionBackend;
use crate::CaptureResult;

/// A synthetic camera or microphone.
#[derive(Debug)]
pub struct MockDevice {
    id: String,
    medium: MediaKind,
    format: FormatDescription,
    has_torch: bool,
    settings: Mutex<DeviceSettings>,
    apply_count: AtomicUsize,
    fail_apply: AtomicBool,
}

impl MockDevice {
    fn new(id: &str, medium: MediaKind, format: FormatDescription) -> Self {
        Self {
            id: id.to_string(),
            medium,
            format,
            has_torch: false,
            settings: Mutex::new(DeviceSettings::default()),
            apply_count: AtomicUsize::new(0),
            fail_apply: AtomicBool::new(false),
        }
    }

    /// A camera producing frames of `format`.
    pub fn camera(id: &str, format: VideoFormat) -> Self {
        Self::new(id, MediaKind::Video, FormatDescription::Video(format))
    }

    /// A microphone producing PCM of `format`.
    pub fn microphone(id: &str, format: AudioFormat) -> Self {
        Self::new(id, MediaKind::Audio, FormatDescription::Audio(format))
    }

    /// Give the device a torch.
    pub fn with_torch(mut self) -> Self {
        self.has_torch = true;
        self
    }

    /// Number of times settings were applied.
    pub fn apply_count(&self) -> usize {
        self.apply_count.load(Ordering::SeqCst)
    }

    /// Make subsequent `apply` calls fail.
    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }
}

impl CaptureDevice for MockDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn medium(&self) -> MediaKind {
        self.medium
    }

    fn format(&self) -> Option<FormatDescription> {
        Some(self.format.clone())
    }

    fn settings(&self) -> DeviceSettings {
        self.settings.lock().clone()
    }

    fn apply(&self, settings: &DeviceSettings) -> CaptureResult<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(CaptureError::Configuration(format!(
                "{} rejected settings",
                self.id
            )));
        }

        *self.settings.lock() = settings.clone();
        self.apply_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_torch(&self) -> bool {
        self.has_torch
    }
}

/// An in-memory session backend.
pub struct MockSessionBackend {
    bindings: Mutex<HashMap<(MediaKind, TrackId), String>>,
    failures: Mutex<HashMap<String, CaptureError>>,
    start_count: AtomicUsize,
    stop_count: AtomicUsize,
    preset_writes: AtomicUsize,
    multi_cam_supported: bool,
}

impl MockSessionBackend {
    /// Create a backend that supports multi-camera capture.
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            start_count: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
            preset_writes: AtomicUsize::new(0),
            multi_cam_supported: true,
        }
    }

    /// Report multi-camera capture as unsupported.
    pub fn without_multi_cam(mut self) -> Self {
        self.multi_cam_supported = false;
        self
    }

    /// Reject every bind of the device with `id`.
    pub fn fail_device(&self, id: &str, error: CaptureError) {
        self.failures.lock().insert(id.to_string(), error);
    }

    /// Stop rejecting the device with `id`.
    pub fn clear_failure(&self, id: &str) {
        self.failures.lock().remove(id);
    }

    /// Id of the device bound to a track.
    pub fn bound_device(&self, medium: MediaKind, track: TrackId) -> Option<String> {
        self.bindings.lock().get(&(medium, track)).cloned()
    }

    /// Number of backend starts.
    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Number of backend stops.
    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }

    /// Number of preset changes that reached the backend.
    pub fn preset_writes(&self) -> usize {
        self.preset_writes.load(Ordering::SeqCst)
    }
}

impl Default for MockSessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for MockSessionBackend {
    fn bind(
        &self,
        medium: MediaKind,
        track: TrackId,
        device: Option<&dyn CaptureDevice>,
    ) -> CaptureResult<()> {
        let mut bindings = self.bindings.lock();
        match device {
            Some(device) => {
                if let Some(error) = self.failures.lock().get(device.id()) {
                    return Err(error.clone());
                }
                bindings.insert((medium, track), device.id().to_string());
            }
            None => {
                bindings.remove(&(medium, track));
            }
        }
        Ok(())
    }

    fn start(&self) -> CaptureResult<()> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> CaptureResult<()> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_preset(&self, _preset: SessionPreset) -> CaptureResult<()> {
        self.preset_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_multi_cam_enabled(&self, _enabled: bool) -> CaptureResult<()> {
        Ok(())
    }

    fn supports_multi_cam(&self) -> bool {
        self.multi_cam_supported
    }
}
