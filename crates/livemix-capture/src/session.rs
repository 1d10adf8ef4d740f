//! Capture session management.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use livemix_types::{MediaKind, SessionPreset, TrackId};

use crate::device::CaptureDevice;
use crate::error::CaptureError;
use crate::CaptureResult;

/// The platform capture session the pipeline binds devices through.
pub trait SessionBackend: Send + Sync {
    /// Bind `device` to `track`, replacing any previous binding. `None`
    /// unbinds the track.
    fn bind(
        &self,
        medium: MediaKind,
        track: TrackId,
        device: Option<&dyn CaptureDevice>,
    ) -> CaptureResult<()>;

    /// Start delivering frames from bound devices.
    fn start(&self) -> CaptureResult<()>;

    /// Stop delivering frames.
    fn stop(&self) -> CaptureResult<()>;

    /// Change the capture quality preset.
    fn set_preset(&self, preset: SessionPreset) -> CaptureResult<()>;

    /// Enable or disable concurrent multi-camera capture.
    fn set_multi_cam_enabled(&self, enabled: bool) -> CaptureResult<()>;

    /// Whether the hardware can run several cameras at once.
    fn supports_multi_cam(&self) -> bool;
}

/// A capture session shared by the audio and video capture units.
///
/// Every reconfiguration of the backend happens inside [`configure`],
/// which holds the session's configuration lock for the duration of the
/// closure.
///
/// [`configure`]: CaptureSession::configure
pub struct CaptureSession {
    backend: Arc<dyn SessionBackend>,
    configuration: Mutex<()>,
    is_running: AtomicBool,
    multi_cam_enabled: AtomicBool,
    preset: Mutex<SessionPreset>,
}

impl CaptureSession {
    /// Create a session over the given backend.
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            configuration: Mutex::new(()),
            is_running: AtomicBool::new(false),
            multi_cam_enabled: AtomicBool::new(false),
            preset: Mutex::new(SessionPreset::default()),
        }
    }

    /// Run `f` with exclusive access to the backend.
    pub fn configure<R>(
        &self,
        f: impl FnOnce(&dyn SessionBackend) -> CaptureResult<R>,
    ) -> CaptureResult<R> {
        let _scope = self.configuration.lock();
        f(self.backend.as_ref())
    }

    /// Start the session. Does nothing if it is already running.
    #[instrument(name = "capture_session_start", skip(self))]
    pub fn start_running(&self) -> CaptureResult<()> {
        let _scope = self.configuration.lock();
        if self.is_running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.backend.start()?;
        self.is_running.store(true, Ordering::SeqCst);
        info!("Capture session started");
        Ok(())
    }

    /// Stop the session. Does nothing if it is not running.
    #[instrument(name = "capture_session_stop", skip(self))]
    pub fn stop_running(&self) -> CaptureResult<()> {
        let _scope = self.configuration.lock();
        if !self.is_running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.backend.stop()?;
        self.is_running.store(false, Ordering::SeqCst);
        info!("Capture session stopped");
        Ok(())
    }

    /// Check if the session is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Change the capture preset.
    pub fn set_preset(&self, preset: SessionPreset) -> CaptureResult<()> {
        let _scope = self.configuration.lock();
        let mut current = self.preset.lock();
        if *current == preset {
            return Ok(());
        }

        self.backend.set_preset(preset)?;
        debug!(?preset, "Session preset changed");
        *current = preset;
        Ok(())
    }

    /// Current capture preset.
    pub fn preset(&self) -> SessionPreset {
        *self.preset.lock()
    }

    /// Enable or disable multi-camera capture.
    pub fn set_multi_cam_enabled(&self, enabled: bool) -> CaptureResult<()> {
        let _scope = self.configuration.lock();
        if self.multi_cam_enabled.load(Ordering::SeqCst) == enabled {
            return Ok(());
        }

        if enabled && !self.backend.supports_multi_cam() {
            warn!("Multi-camera capture requested but not supported");
            return Err(CaptureError::Session(
                "multi-camera capture not supported".to_string(),
            ));
        }

        self.backend.set_multi_cam_enabled(enabled)?;
        self.multi_cam_enabled.store(enabled, Ordering::SeqCst);
        debug!(enabled, "Multi-camera session toggled");
        Ok(())
    }

    /// Check if multi-camera capture is enabled.
    pub fn is_multi_cam_enabled(&self) -> bool {
        self.multi_cam_enabled.load(Ordering::SeqCst)
    }
}
