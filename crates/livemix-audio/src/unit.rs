//! Audio capture unit.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use livemix_capture::{
    CaptureDevice, CaptureError, CaptureSession, DeviceConfigurator, DeviceSettings,
};
use livemix_types::{AudioBuffer, AudioFormat, AudioMixerSettings, MediaKind, TrackId};

use crate::mixer::TrackMixer;
use crate::playback::AudioPlayback;
use crate::{AudioResult, AUDIO_CHANNEL_CAPACITY};

struct AudioUnitState {
    devices: HashMap<TrackId, Arc<dyn CaptureDevice>>,
    input_formats: HashMap<TrackId, AudioFormat>,
    settings: Arc<AudioMixerSettings>,
    mixer: TrackMixer,
}

/// Owns the microphone tracks and produces the mixed audio stream.
pub struct AudioCaptureUnit {
    session: Arc<CaptureSession>,
    state: Mutex<AudioUnitState>,
    output_tx: Sender<(AudioBuffer, Duration)>,
    output_rx: Receiver<(AudioBuffer, Duration)>,
    monitoring: AtomicBool,
    playback: Mutex<Option<Box<dyn AudioPlayback>>>,
    dropped_buffers: AtomicU64,
}

impl AudioCaptureUnit {
    /// Create an audio capture unit bound to `session`.
    pub fn new(session: Arc<CaptureSession>) -> Self {
        let (output_tx, output_rx) = crossbeam_channel::bounded(AUDIO_CHANNEL_CAPACITY);

        Self {
            session,
            state: Mutex::new(AudioUnitState {
                devices: HashMap::new(),
                input_formats: HashMap::new(),
                settings: Arc::new(AudioMixerSettings::default()),
                mixer: TrackMixer::new(),
            }),
            output_tx,
            output_rx,
            monitoring: AtomicBool::new(false),
            playback: Mutex::new(None),
            dropped_buffers: AtomicU64::new(0),
        }
    }

    /// Bind a microphone to `track`, or unbind it when `device` is `None`.
    ///
    /// On failure the track keeps its previous binding.
    #[instrument(name = "audio_attach", skip(self, device, configuration))]
    pub fn attach_audio(
        &self,
        track: TrackId,
        device: Option<Arc<dyn CaptureDevice>>,
        configuration: Option<DeviceConfigurator>,
    ) -> AudioResult<()> {
        let mut state = self.state.lock();
        let previous = state.devices.get(&track).cloned();

        if let Some(ref device) = device {
            if device.medium() != MediaKind::Audio {
                return Err(CaptureError::MediumMismatch {
                    device: device.id().to_string(),
                    expected: MediaKind::Audio,
                }
                .into());
            }
        }

        self.session.configure(|backend| {
            backend.bind(MediaKind::Audio, track, device.as_deref())?;

            let (Some(device), Some(configure)) = (device.as_ref(), configuration) else {
                return Ok(());
            };

            let mut settings = device.settings();
            configure(&mut settings);
            if let Err(e) = device.apply(&settings) {
                if let Err(restore) = backend.bind(MediaKind::Audio, track, previous.as_deref()) {
                    warn!(track, "Failed to restore previous microphone binding: {}", restore);
                }
                return Err(e);
            }
            Ok(())
        })?;

        match device {
            Some(device) => {
                match device.format().and_then(|format| format.audio()) {
                    Some(format) => {
                        state.input_formats.insert(track, format);
                    }
                    None => {
                        state.input_formats.remove(&track);
                    }
                }
                debug!(track, device = device.id(), "Microphone attached");
                state.devices.insert(track, device);
            }
            None => {
                state.devices.remove(&track);
                state.input_formats.remove(&track);
                state.mixer.remove_track(track);
                debug!(track, "Microphone detached");
            }
        }

        Ok(())
    }

    /// Run `f` against the settings of the microphone bound to `track` and
    /// apply the result, inside the session's configuration scope.
    pub fn configure(
        &self,
        track: TrackId,
        f: impl FnOnce(&mut DeviceSettings),
    ) -> AudioResult<()> {
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
        })?;
        Ok(())
    }

    /// Feed audio captured on `track`, presented at `when`.
    pub fn append(&self, track: TrackId, buffer: AudioBuffer, when: Duration) {
        let mut state = self.state.lock();
        let format = buffer.format();
        if state.input_formats.get(&track) != Some(&format) {
            debug!(track, ?format, "Audio input format changed");
            state.input_formats.insert(track, format);
        }

        // Only bound microphones hold up a round; stray tracks are ignored.
        let settings = Arc::clone(&state.settings);
        let participants: BTreeSet<TrackId> = state
            .devices
            .keys()
            .copied()
            .chain(std::iter::once(settings.main_track))
            .collect();

        let mixed = state
            .mixer
            .push(track, buffer, when, &participants, &settings);
        for (buffer, when) in mixed {
            self.monitor(&buffer, when);
            match self.output_tx.try_send((buffer, when)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!("Mixed audio channel full, dropping buffer");
                    self.dropped_buffers.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("Mixed audio channel disconnected");
                }
            }
        }
    }

    fn monitor(&self, buffer: &AudioBuffer, when: Duration) {
        if !self.monitoring.load(Ordering::SeqCst) {
            return;
        }
        if let Some(playback) = self.playback.lock().as_mut() {
            playback.play(buffer, when);
        }
    }

    /// Replace the mixer settings. Appends in flight finish with the old
    /// settings.
    pub fn set_settings(&self, settings: AudioMixerSettings) {
        let mut state = self.state.lock();
        if state.settings.main_track != settings.main_track {
            state.mixer.clear();
        }
        state.settings = Arc::new(settings);
    }

    /// Current mixer settings.
    pub fn settings(&self) -> Arc<AudioMixerSettings> {
        Arc::clone(&self.state.lock().settings)
    }

    /// Enable or disable mixing of every track instead of the main one.
    pub fn set_multi_track_mixing_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        if state.mixer.is_multi_track() == enabled {
            return;
        }
        state.mixer.set_multi_track(enabled);
        debug!(enabled, "Multi-track audio mixing toggled");
    }

    /// Check if multi-track mixing is enabled.
    pub fn is_multi_track_mixing_enabled(&self) -> bool {
        self.state.lock().mixer.is_multi_track()
    }

    /// Route mixed audio to the local playback device.
    pub fn set_monitoring_enabled(&self, enabled: bool) {
        if self.monitoring.swap(enabled, Ordering::SeqCst) != enabled {
            info!(enabled, "Audio monitoring toggled");
        }
    }

    /// Check if monitoring is enabled.
    pub fn is_monitoring_enabled(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Install or remove the local playback device.
    pub fn set_playback(&self, playback: Option<Box<dyn AudioPlayback>>) {
        *self.playback.lock() = playback;
    }

    /// Last known input format of a track.
    pub fn input_format(&self, track: TrackId) -> Option<AudioFormat> {
        self.state.lock().input_formats.get(&track).copied()
    }

    /// Mixed `(buffer, when)` stream.
    pub fn output(&self) -> Receiver<(AudioBuffer, Duration)> {
        self.output_rx.clone()
    }

    /// Mixed buffers dropped because the consumer fell behind.
    pub fn dropped_buffers(&self) -> u64 {
        self.dropped_buffers.load(Ordering::Relaxed)
    }
}
