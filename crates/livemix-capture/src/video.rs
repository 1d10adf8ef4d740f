//! Video capture unit: per-track cameras, input formats and the two video
//! streams consumed by the mixer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use livemix_types::{
    MediaKind, SampleBuffer, TrackId, VideoFormat, VideoMixerMode, VideoMixerSettings,
    VideoOrientation,
};

use crate::device::{CaptureDevice, DeviceConfigurator, DeviceSettings};
use crate::error::CaptureError;
use crate::pacing::FramePacer;
use crate::session::CaptureSession;
use crate::{CaptureResult, FRAME_CHANNEL_CAPACITY};

/// A frame on the passthrough stream.
#[derive(Debug, Clone)]
pub struct TrackFrame {
    pub track: TrackId,

    /// Detach count of the track when the frame was appended.
    pub epoch: u64,

    pub buffer: SampleBuffer,
}

struct VideoUnitState {
    devices: HashMap<TrackId, Arc<dyn CaptureDevice>>,
    input_formats: HashMap<TrackId, VideoFormat>,
    epochs: HashMap<TrackId, u64>,
    settings: Arc<VideoMixerSettings>,
    pacer: FramePacer,
    frame_rate: f64,
    torch_enabled: bool,
    orientation: VideoOrientation,
}

impl VideoUnitState {
    /// Overlay the unit-wide camera settings onto a device's settings.
    fn fill_device_settings(&self, settings: &mut DeviceSettings, is_main: bool, has_torch: bool) {
        settings.frame_rate = Some(self.frame_rate);
        settings.orientation = self.orientation;
        if is_main && has_torch {
            settings.torch_enabled = self.torch_enabled;
        }
    }
}

/// Owns the video tracks and produces the passthrough and mixed streams.
///
/// Every appended frame is forwarded on the passthrough stream as a
/// [`TrackFrame`] for compositing. In [`VideoMixerMode::Passthrough`]
/// main-track frames additionally go out on the mixed stream, paced to the
/// configured frame rate.
pub struct VideoCaptureUnit {
    session: Arc<CaptureSession>,
    state: Mutex<VideoUnitState>,
    passthrough_tx: Sender<TrackFrame>,
    passthrough_rx: Receiver<TrackFrame>,
    output_tx: Sender<SampleBuffer>,
    output_rx: Receiver<SampleBuffer>,
    suspended: AtomicBool,
    dropped_frames: AtomicU64,
}

impl VideoCaptureUnit {
    /// Create a video capture unit bound to `session`.
    pub fn new(session: Arc<CaptureSession>, frame_rate: f64) -> Self {
        let (passthrough_tx, passthrough_rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        let (output_tx, output_rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);

        Self {
            session,
            state: Mutex::new(VideoUnitState {
                devices: HashMap::new(),
                input_formats: HashMap::new(),
                epochs: HashMap::new(),
                settings: Arc::new(VideoMixerSettings::default()),
                pacer: FramePacer::new(frame_rate),
                frame_rate,
                torch_enabled: false,
                orientation: VideoOrientation::default(),
            }),
            passthrough_tx,
            passthrough_rx,
            output_tx,
            output_rx,
            suspended: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Bind a camera to `track`, or unbind it when `device` is `None`.
    ///
    /// On failure the track keeps its previous binding.
    #[instrument(name = "video_attach", skip(self, device, configuration))]
    pub fn attach_camera(
        &self,
        track: TrackId,
        device: Option<Arc<dyn CaptureDevice>>,
        configuration: Option<DeviceConfigurator>,
    ) -> CaptureResult<()> {
        let mut state = self.state.lock();
        let previous = state.devices.get(&track).cloned();

        if let Some(ref device) = device {
            if device.medium() != MediaKind::Video {
                return Err(CaptureError::MediumMismatch {
                    device: device.id().to_string(),
                    expected: MediaKind::Video,
                });
            }
            let other_bound = state.devices.keys().any(|bound| *bound != track);
            if other_bound && !self.session.is_multi_cam_enabled() {
                return Err(CaptureError::MultiCamDisabled(track));
            }
        }

        let is_main = track == state.settings.main_track;
        self.session.configure(|backend| {
            backend.bind(MediaKind::Video, track, device.as_deref())?;

            let Some(ref device) = device else {
                return Ok(());
            };

            let mut settings = device.settings();
            state.fill_device_settings(&mut settings, is_main, device.has_torch());
            if let Some(configure) = configuration {
                configure(&mut settings);
            }

            if let Err(e) = device.apply(&settings) {
                if let Err(restore) = backend.bind(MediaKind::Video, track, previous.as_deref()) {
                    warn!(track, "Failed to restore previous camera binding: {}", restore);
                }
                return Err(e);
            }
            Ok(())
        })?;

        match device {
            Some(device) => {
                match device.format().and_then(|format| format.video()) {
                    Some(format) => {
                        state.input_formats.insert(track, format);
                    }
                    None => {
                        state.input_formats.remove(&track);
                    }
                }
                debug!(track, device = device.id(), "Camera attached");
                state.devices.insert(track, device);
            }
            None => {
                state.devices.remove(&track);
                state.input_formats.remove(&track);
                *state.epochs.entry(track).or_default() += 1;
                debug!(track, "Camera detached");
            }
        }

        if is_main {
            state.pacer.reset();
        }

        Ok(())
    }

    /// Run `f` against the settings of the camera bound to `track` and
    /// apply the result, inside the session's configuration scope.
    pub fn configure(
        &self,
        track: TrackId,
        f: impl FnOnce(&mut DeviceSettings),
    ) -> CaptureResult<()> {
        let state = self.state.lock();
        let device = state
            .devices
            .get(&track)
            .cloned()
            .ok_or(CaptureError::DeviceNotFound(track))?;

        self.session.configure(|_| {
            let mut settings = device.settings();
            f(&mut settings);
            device.apply(&settings)
        })
    }

    /// Unbind every camera. Returns the tracks that were bound.
    pub fn detach_all(&self) -> Vec<TrackId> {
        let mut state = self.state.lock();
        let mut tracks: Vec<TrackId> = state.devices.keys().copied().collect();
        tracks.sort_unstable();

        let result = self.session.configure(|backend| {
            for track in &tracks {
                if let Err(e) = backend.bind(MediaKind::Video, *track, None) {
                    warn!(track, "Failed to unbind camera: {}", e);
                }
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!("Camera detach failed: {}", e);
        }

        for track in &tracks {
            *state.epochs.entry(*track).or_default() += 1;
        }
        state.devices.clear();
        state.input_formats.clear();
        state.pacer.reset();
        debug!(count = tracks.len(), "All cameras detached");
        tracks
    }

    /// Feed a frame captured on `track`.
    pub fn append(&self, track: TrackId, buffer: SampleBuffer) {
        let Some(format) = buffer.format.video() else {
            trace!(track, "Ignoring non-video buffer");
            return;
        };

        if self.suspended.load(Ordering::SeqCst) {
            trace!(track, "Video suspended, dropping frame");
            return;
        }

        // Sends happen under the lock so concurrent appends keep stream order.
        let mut state = self.state.lock();
        if state.input_formats.get(&track) != Some(&format) {
            debug!(track, ?format, "Video input format changed");
            state.input_formats.insert(track, format);
        }

        let epoch = state.epochs.get(&track).copied().unwrap_or(0);
        let settings = Arc::clone(&state.settings);
        let is_main_output =
            settings.mode == VideoMixerMode::Passthrough && track == settings.main_track;
        let emit = is_main_output && state.pacer.admit(buffer.pts);
        if is_main_output && !emit {
            trace!(track, pts = ?buffer.pts, "Frame coalesced by pacing");
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        }

        let output = emit.then(|| buffer.clone());
        self.send(
            &self.passthrough_tx,
            TrackFrame {
                track,
                epoch,
                buffer,
            },
        );
        if let Some(buffer) = output {
            self.send(&self.output_tx, buffer);
        }
    }

    fn send<T>(&self, sender: &Sender<T>, item: T) {
        match sender.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("Video channel full, dropping frame");
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Video channel disconnected");
            }
        }
    }

    /// Replace the mixer settings. Appends in flight finish with the old
    /// settings.
    pub fn set_settings(&self, settings: VideoMixerSettings) {
        let mut state = self.state.lock();
        if state.settings.main_track != settings.main_track {
            state.pacer.reset();
        }
        state.settings = Arc::new(settings);
    }

    /// Current mixer settings.
    pub fn settings(&self) -> Arc<VideoMixerSettings> {
        Arc::clone(&self.state.lock().settings)
    }

    /// Set the target frame rate of the mixed stream and the cameras.
    pub fn set_frame_rate(&self, frame_rate: f64) {
        let mut state = self.state.lock();
        if state.frame_rate == frame_rate {
            return;
        }

        state.frame_rate = frame_rate;
        state.pacer.set_frame_rate(frame_rate);
        let devices: Vec<_> = state.devices.values().cloned().collect();
        self.apply_to_devices(&devices, |settings| settings.frame_rate = Some(frame_rate));
        debug!(frame_rate, "Video frame rate changed");
    }

    /// Current target frame rate.
    pub fn frame_rate(&self) -> f64 {
        self.state.lock().frame_rate
    }

    /// Turn the main camera's torch on or off.
    pub fn set_torch_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        if state.torch_enabled == enabled {
            return;
        }

        state.torch_enabled = enabled;
        let main = state
            .devices
            .get(&state.settings.main_track)
            .filter(|device| device.has_torch())
            .cloned();
        if let Some(device) = main {
            self.apply_to_devices(&[device], |settings| settings.torch_enabled = enabled);
        }
    }

    /// Set the orientation of every camera.
    pub fn set_video_orientation(&self, orientation: VideoOrientation) {
        let mut state = self.state.lock();
        if state.orientation == orientation {
            return;
        }

        state.orientation = orientation;
        let devices: Vec<_> = state.devices.values().cloned().collect();
        self.apply_to_devices(&devices, |settings| settings.orientation = orientation);
    }

    fn apply_to_devices(
        &self,
        devices: &[Arc<dyn CaptureDevice>],
        update: impl Fn(&mut DeviceSettings),
    ) {
        let result = self.session.configure(|_| {
            for device in devices {
                let mut settings = device.settings();
                update(&mut settings);
                if let Err(e) = device.apply(&settings) {
                    warn!(device = device.id(), "Failed to update camera: {}", e);
                }
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!("Camera reconfiguration failed: {}", e);
        }
    }

    /// Suspend or resume frame delivery. Cameras keep running.
    pub fn set_suspended(&self, suspended: bool) {
        let previous = self.suspended.swap(suspended, Ordering::SeqCst);
        if previous == suspended {
            return;
        }

        if suspended {
            info!("Video delivery suspended");
        } else {
            self.state.lock().pacer.reset();
            info!("Video delivery resumed");
        }
    }

    /// Check if frame delivery is suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Last known input format of a track.
    pub fn input_format(&self, track: TrackId) -> Option<VideoFormat> {
        self.state.lock().input_formats.get(&track).copied()
    }

    /// Camera bound to a track.
    pub fn device(&self, track: TrackId) -> Option<Arc<dyn CaptureDevice>> {
        self.state.lock().devices.get(&track).cloned()
    }

    /// Current detach count of a track. Frames stamped with an older epoch
    /// were appended before the track's last detach.
    pub fn track_epoch(&self, track: TrackId) -> u64 {
        self.state.lock().epochs.get(&track).copied().unwrap_or(0)
    }

    /// Raw per-track stream for compositing.
    pub fn passthrough(&self) -> Receiver<TrackFrame> {
        self.passthrough_rx.clone()
    }

    /// Mixed video stream.
    pub fn output(&self) -> Receiver<SampleBuffer> {
        self.output_rx.clone()
    }

    /// Frames dropped by pacing or because a consumer fell behind.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use livemix_types::{AudioFormat, FormatDescription};

    use super::*;
    use crate::mock::{MockDevice, MockSessionBackend};

    fn unit() -> (Arc<MockSessionBackend>, VideoCaptureUnit) {
        let backend = Arc::new(MockSessionBackend::new());
        let session = Arc::new(CaptureSession::new(backend.clone()));
        (backend, VideoCaptureUnit::new(session, 30.0))
    }

    fn frame(format: VideoFormat, pts_ms: u64) -> SampleBuffer {
        SampleBuffer::video(
            format,
            Bytes::from(vec![0u8; format.buffer_size()]),
            Duration::from_millis(pts_ms),
            Duration::from_millis(33),
        )
    }

    #[test]
    fn test_attach_records_format_and_settings() {
        let (backend, unit) = unit();
        let camera = Arc::new(MockDevice::camera("cam0", VideoFormat::bgra(8, 8)));

        unit.attach_camera(
            0,
            Some(camera.clone()),
            Some(Box::new(|settings: &mut DeviceSettings| settings.zoom_factor = 2.0)),
        )
        .unwrap();

        assert_eq!(backend.bound_device(MediaKind::Video, 0).as_deref(), Some("cam0"));
        assert_eq!(unit.input_format(0), Some(VideoFormat::bgra(8, 8)));
        let settings = camera.settings();
        assert_eq!(settings.frame_rate, Some(30.0));
        assert_eq!(settings.zoom_factor, 2.0);
    }

    #[test]
    fn test_failed_attach_keeps_previous_binding() {
        let (backend, unit) = unit();
        let first = Arc::new(MockDevice::camera("cam0", VideoFormat::bgra(8, 8)));
        let second = Arc::new(MockDevice::camera("cam1", VideoFormat::bgra(16, 16)));
        backend.fail_device("cam1", CaptureError::DeviceBusy("cam1".to_string()));

        unit.attach_camera(0, Some(first), None).unwrap();
        let err = unit.attach_camera(0, Some(second), None).unwrap_err();

        assert_eq!(err, CaptureError::DeviceBusy("cam1".to_string()));
        assert_eq!(backend.bound_device(MediaKind::Video, 0).as_deref(), Some("cam0"));
        assert_eq!(unit.input_format(0), Some(VideoFormat::bgra(8, 8)));
    }

    #[test]
    fn test_apply_failure_restores_binding() {
        let (backend, unit) = unit();
        let first = Arc::new(MockDevice::camera("cam0", VideoFormat::bgra(8, 8)));
        let broken = Arc::new(MockDevice::camera("cam1", VideoFormat::bgra(8, 8)));
        broken.set_fail_apply(true);

        unit.attach_camera(0, Some(first), None).unwrap();
        assert!(unit.attach_camera(0, Some(broken), None).is_err());

        assert_eq!(backend.bound_device(MediaKind::Video, 0).as_deref(), Some("cam0"));
        assert_eq!(unit.device(0).map(|d| d.id().to_string()).as_deref(), Some("cam0"));
    }

    #[test]
    fn test_second_camera_requires_multi_cam() {
        let (_backend, unit) = unit();
        let front = Arc::new(MockDevice::camera("front", VideoFormat::bgra(8, 8)));
        let back = Arc::new(MockDevice::camera("back", VideoFormat::bgra(8, 8)));

        unit.attach_camera(0, Some(front), None).unwrap();
        let err = unit.attach_camera(1, Some(back), None).unwrap_err();
        assert_eq!(err, CaptureError::MultiCamDisabled(1));
    }

    #[test]
    fn test_microphone_rejected() {
        let (_backend, unit) = unit();
        let mic = Arc::new(MockDevice::microphone("mic", AudioFormat::default()));

        let err = unit.attach_camera(0, Some(mic), None).unwrap_err();
        assert!(matches!(err, CaptureError::MediumMismatch { .. }));
    }

    #[test]
    fn test_configure_unbound_track() {
        let (_backend, unit) = unit();
        let err = unit.configure(3, |_| {}).unwrap_err();
        assert_eq!(err, CaptureError::DeviceNotFound(3));
    }

    #[test]
    fn test_append_emits_both_streams_for_main_track() {
        let (_backend, unit) = unit();
        let format = VideoFormat::bgra(4, 4);
        let passthrough = unit.passthrough();
        let output = unit.output();

        unit.append(0, frame(format, 0));
        unit.append(1, frame(format, 0));

        let tracks: Vec<_> = passthrough.try_iter().map(|frame| frame.track).collect();
        assert_eq!(tracks, vec![0, 1]);
        assert_eq!(output.try_iter().count(), 1);
        assert_eq!(unit.input_format(1), Some(format));
    }

    #[test]
    fn test_offscreen_mode_has_no_direct_output() {
        let (_backend, unit) = unit();
        unit.set_settings(VideoMixerSettings {
            mode: VideoMixerMode::Offscreen,
            ..Default::default()
        });
        let output = unit.output();

        unit.append(0, frame(VideoFormat::bgra(4, 4), 0));

        assert!(output.try_recv().is_err());
        assert_eq!(unit.passthrough().try_iter().count(), 1);
    }

    #[test]
    fn test_suspended_unit_drops_frames() {
        let (_backend, unit) = unit();
        unit.set_suspended(true);
        unit.append(0, frame(VideoFormat::bgra(4, 4), 0));

        assert!(unit.passthrough().try_recv().is_err());
        assert!(unit.output().try_recv().is_err());

        unit.set_suspended(false);
        unit.append(0, frame(VideoFormat::bgra(4, 4), 33));
        assert_eq!(unit.output().try_iter().count(), 1);
    }

    #[test]
    fn test_audio_buffer_ignored() {
        let (_backend, unit) = unit();
        let audio = SampleBuffer::new(
            FormatDescription::Audio(AudioFormat::default()),
            Bytes::from(vec![0u8; 8]),
            Duration::ZERO,
            Duration::ZERO,
        );

        unit.append(0, audio);
        assert!(unit.passthrough().try_recv().is_err());
    }

    #[test]
    fn test_frame_rate_applied_once() {
        let (_backend, unit) = unit();
        let camera = Arc::new(MockDevice::camera("cam0", VideoFormat::bgra(8, 8)));
        unit.attach_camera(0, Some(camera.clone()), None).unwrap();
        let applied = camera.apply_count();

        unit.set_frame_rate(60.0);
        unit.set_frame_rate(60.0);

        assert_eq!(camera.apply_count(), applied + 1);
        assert_eq!(camera.settings().frame_rate, Some(60.0));
    }

    #[test]
    fn test_torch_only_on_main_camera_with_torch() {
        let (_backend, unit) = unit();
        let camera = Arc::new(MockDevice::camera("cam0", VideoFormat::bgra(8, 8)).with_torch());
        unit.attach_camera(0, Some(camera.clone()), None).unwrap();

        unit.set_torch_enabled(true);
        assert!(camera.settings().torch_enabled);
    }

    #[test]
    fn test_detach_all_unbinds_every_camera() {
        let (backend, unit) = unit();
        unit.session.set_multi_cam_enabled(true).unwrap();
        let front = Arc::new(MockDevice::camera("front", VideoFormat::bgra(8, 8)));
        let back = Arc::new(MockDevice::camera("back", VideoFormat::bgra(8, 8)));
        unit.attach_camera(1, Some(back), None).unwrap();
        unit.attach_camera(0, Some(front), None).unwrap();

        assert_eq!(unit.detach_all(), vec![0, 1]);
        assert_eq!(backend.bound_device(MediaKind::Video, 0), None);
        assert_eq!(backend.bound_device(MediaKind::Video, 1), None);
        assert_eq!(unit.input_format(0), None);
        assert_eq!(unit.track_epoch(1), 1);
        assert!(unit.detach_all().is_empty());
    }

    #[test]
    fn test_detach_advances_epoch() {
        let (_backend, unit) = unit();
        let camera = Arc::new(MockDevice::camera("cam0", VideoFormat::bgra(4, 4)));
        let passthrough = unit.passthrough();

        unit.attach_camera(0, Some(camera), None).unwrap();
        unit.append(0, frame(VideoFormat::bgra(4, 4), 0));
        unit.attach_camera(0, None, None).unwrap();
        unit.append(0, frame(VideoFormat::bgra(4, 4), 33));

        let epochs: Vec<_> = passthrough.try_iter().map(|frame| frame.epoch).collect();
        assert_eq!(epochs, vec![0, 1]);
        assert_eq!(unit.track_epoch(0), 1);
        assert_eq!(unit.track_epoch(5), 0);
    }
}
