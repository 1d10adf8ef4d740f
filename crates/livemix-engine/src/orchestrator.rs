//! Main mixer orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use livemix_audio::{AudioCaptureUnit, AudioError, AudioPlayback};
use livemix_capture::{
    CaptureDevice, CaptureSession, DeviceConfigurator, DeviceSettings, SessionBackend,
    VideoCaptureUnit,
};
use livemix_types::{
    AudioBuffer, AudioMixerSettings, MediaKind, MixerConfig, MixerStats, RunningState,
    SampleBuffer, SessionPreset, TrackId, VideoMixerSettings, VideoOrientation,
};

use crate::clock::{DisplayClock, TickClock};
use crate::error::MixerError;
use crate::metrics::MixerMetrics;
use crate::output::{MixerId, MixerOutput, OutputId, OutputRegistry};
use crate::pipeline::{spawn_loops, Pipeline, RunFlag};
use crate::screen::Screen;
use crate::MixerResult;

/// Loops of the current run and the flag that stops them.
struct Run {
    flag: RunFlag,
    loops: Vec<JoinHandle<()>>,
}

/// Mixes camera and microphone tracks and fans the result out to
/// registered outputs.
///
/// While running, four threads move media through the pipeline: the
/// passthrough loop feeds every video frame to the [`Screen`], the video and
/// audio loops deliver mixed buffers to outputs, and the display loop
/// renders the screen on every clock tick in offscreen mode.
pub struct Mixer {
    pipeline: Arc<Pipeline>,
    session: Arc<CaptureSession>,
    run: Mutex<Option<Run>>,
    background: Mutex<bool>,
}

impl Mixer {
    /// Create a mixer over `backend` with a free-running display clock.
    pub fn new(backend: Arc<dyn SessionBackend>, config: MixerConfig) -> MixerResult<Self> {
        let clock = Arc::new(TickClock::new(config.frame_rate));
        Self::with_clock(backend, config, clock)
    }

    /// Create a mixer driven by a custom display clock.
    pub fn with_clock(
        backend: Arc<dyn SessionBackend>,
        config: MixerConfig,
        clock: Arc<dyn DisplayClock>,
    ) -> MixerResult<Self> {
        validate_frame_rate(config.frame_rate)?;

        let session = Arc::new(CaptureSession::new(backend));
        session.set_preset(config.session_preset)?;
        session.set_multi_cam_enabled(config.multi_cam_session)?;

        let video = Arc::new(VideoCaptureUnit::new(
            Arc::clone(&session),
            config.frame_rate,
        ));
        video.set_settings(config.video.clone());

        let audio = Arc::new(AudioCaptureUnit::new(Arc::clone(&session)));
        audio.set_settings(config.audio);
        audio.set_multi_track_mixing_enabled(config.multi_track_audio_mixing);
        audio.set_monitoring_enabled(config.monitoring);

        let screen = Arc::new(Screen::new());
        screen.set_settings(config.video);

        clock.set_frame_rate(config.frame_rate);

        let pipeline = Arc::new(Pipeline {
            id: MixerId::next(),
            video,
            audio,
            screen,
            outputs: OutputRegistry::new(),
            metrics: MixerMetrics::new(),
            clock,
            running: AtomicBool::new(false),
        });
        debug!(mixer = %pipeline.id, "Mixer created");

        Ok(Self {
            pipeline,
            session,
            run: Mutex::new(None),
            background: Mutex::new(false),
        })
    }

    /// Identifier passed to output callbacks.
    pub fn id(&self) -> MixerId {
        self.pipeline.id
    }

    /// Bind a camera to `track`, rebind it, or unbind it when `device` is
    /// `None`. Blocks until the session has applied the binding.
    pub fn attach_video_device(
        &self,
        track: TrackId,
        device: Option<Arc<dyn CaptureDevice>>,
        configuration: Option<DeviceConfigurator>,
    ) -> MixerResult<()> {
        let detaching = device.is_none();
        self.pipeline
            .video
            .attach_camera(track, device, configuration)
            .map_err(|e| MixerError::attach(track, MediaKind::Video, e))?;

        if detaching {
            let epoch = self.pipeline.video.track_epoch(track);
            self.pipeline.screen.retire_track(track, epoch);
        }
        Ok(())
    }

    /// Bind a microphone to `track`, rebind it, or unbind it when `device`
    /// is `None`.
    pub fn attach_audio_device(
        &self,
        track: TrackId,
        device: Option<Arc<dyn CaptureDevice>>,
        configuration: Option<DeviceConfigurator>,
    ) -> MixerResult<()> {
        self.pipeline
            .audio
            .attach_audio(track, device, configuration)
            .map_err(|e| match e {
                AudioError::Capture(e) => MixerError::attach(track, MediaKind::Audio, e),
                other => MixerError::Audio(other),
            })
    }

    /// Reconfigure the camera bound to `track`.
    pub fn configure_video_device(
        &self,
        track: TrackId,
        f: impl FnOnce(&mut DeviceSettings),
    ) -> MixerResult<()> {
        self.pipeline
            .video
            .configure(track, f)
            .map_err(|e| MixerError::configure(track, MediaKind::Video, e))
    }

    /// Reconfigure the microphone bound to `track`.
    pub fn configure_audio_device(
        &self,
        track: TrackId,
        f: impl FnOnce(&mut DeviceSettings),
    ) -> MixerResult<()> {
        self.pipeline
            .audio
            .configure(track, f)
            .map_err(|e| match e {
                AudioError::Capture(e) => MixerError::configure(track, MediaKind::Audio, e),
                other => MixerError::Audio(other),
            })
    }

    /// Feed a captured buffer, routed by its medium. Buffers of an
    /// unrecognized medium are dropped.
    pub fn append(&self, buffer: &SampleBuffer, track: TrackId) {
        match buffer.medium() {
            Some(MediaKind::Video) => self.pipeline.video.append(track, buffer.clone()),
            Some(MediaKind::Audio) => match buffer.to_audio() {
                Ok(audio) => self.pipeline.audio.append(track, audio, buffer.pts),
                Err(e) => {
                    warn!(track, "Dropping malformed audio buffer: {}", e);
                    self.pipeline.metrics.record_unrecognized();
                }
            },
            None => {
                trace!(track, "Dropping buffer of unrecognized medium");
                self.pipeline.metrics.record_unrecognized();
            }
        }
    }

    /// Feed captured audio presented at `when`.
    pub fn append_audio(&self, buffer: AudioBuffer, when: Duration, track: TrackId) {
        self.pipeline.audio.append(track, buffer, when);
    }

    /// Replace the video mixer settings, including the screen's main track
    /// and layouts.
    pub fn set_video_mixer_settings(&self, settings: VideoMixerSettings) {
        self.pipeline.screen.set_settings(settings.clone());
        self.pipeline.video.set_settings(settings);
    }

    /// Current video mixer settings.
    pub fn video_mixer_settings(&self) -> Arc<VideoMixerSettings> {
        self.pipeline.video.settings()
    }

    /// Replace the audio mixer settings.
    pub fn set_audio_mixer_settings(&self, settings: AudioMixerSettings) {
        self.pipeline.audio.set_settings(settings);
    }

    /// Current audio mixer settings.
    pub fn audio_mixer_settings(&self) -> Arc<AudioMixerSettings> {
        self.pipeline.audio.settings()
    }

    /// Set the video frame rate and display tick rate.
    pub fn set_frame_rate(&self, frame_rate: f64) -> MixerResult<()> {
        validate_frame_rate(frame_rate)?;
        self.pipeline.video.set_frame_rate(frame_rate);
        self.pipeline.clock.set_frame_rate(frame_rate);
        Ok(())
    }

    /// Current video frame rate.
    pub fn frame_rate(&self) -> f64 {
        self.pipeline.video.frame_rate()
    }

    /// Route mixed audio to the local playback sink.
    pub fn set_monitoring_enabled(&self, enabled: bool) {
        self.pipeline.audio.set_monitoring_enabled(enabled);
    }

    /// Whether mixed audio is routed to the local playback sink.
    pub fn is_monitoring_enabled(&self) -> bool {
        self.pipeline.audio.is_monitoring_enabled()
    }

    /// Install or remove the local playback sink used for monitoring.
    pub fn set_audio_playback(&self, playback: Option<Box<dyn AudioPlayback>>) {
        self.pipeline.audio.set_playback(playback);
    }

    /// Mix every microphone track instead of the main track only.
    pub fn set_multi_track_audio_mixing_enabled(&self, enabled: bool) {
        self.pipeline.audio.set_multi_track_mixing_enabled(enabled);
    }

    /// Turn the main camera's torch on or off.
    pub fn set_torch_enabled(&self, enabled: bool) {
        self.pipeline.video.set_torch_enabled(enabled);
    }

    /// Set the orientation of every camera.
    pub fn set_video_orientation(&self, orientation: VideoOrientation) {
        self.pipeline.video.set_video_orientation(orientation);
    }

    /// Allow several cameras to capture at once.
    pub fn set_multi_cam_session_enabled(&self, enabled: bool) -> MixerResult<()> {
        self.session.set_multi_cam_enabled(enabled)?;
        Ok(())
    }

    /// Change the capture quality preset.
    pub fn set_session_preset(&self, preset: SessionPreset) -> MixerResult<()> {
        self.session.set_preset(preset)?;
        Ok(())
    }

    /// Register an output. Registering the same output again returns its
    /// existing id.
    pub fn add_output(&self, output: Arc<dyn MixerOutput>) -> OutputId {
        let id = self.pipeline.outputs.add(output);
        debug!(?id, "Output registered");
        id
    }

    /// Unregister an output. Returns whether it was registered.
    pub fn remove_output(&self, id: OutputId) -> bool {
        let removed = self.pipeline.outputs.remove(id);
        if removed {
            debug!(?id, "Output removed");
        }
        removed
    }

    /// Number of registered outputs.
    pub fn output_count(&self) -> usize {
        self.pipeline.outputs.len()
    }

    /// Start the capture session and the loops. Does nothing if already
    /// running.
    #[instrument(name = "mixer_start", skip(self), fields(mixer = %self.pipeline.id))]
    pub fn start_running(&self) -> MixerResult<()> {
        let mut run = self.run.lock();
        if run.is_some() {
            debug!("Already running, ignoring start");
            return Ok(());
        }

        self.session.start_running()?;
        self.pipeline.drain();
        let flag: RunFlag = Arc::new(AtomicBool::new(true));
        self.pipeline.running.store(true, Ordering::SeqCst);
        self.pipeline.metrics.start();

        match spawn_loops(&self.pipeline, &flag) {
            Ok(loops) => *run = Some(Run { flag, loops }),
            Err(e) => {
                self.pipeline.metrics.stop();
                if let Err(stop) = self.session.stop_running() {
                    warn!("Failed to stop capture session after spawn failure: {}", stop);
                }
                return Err(e.into());
            }
        }

        info!("Mixer started");
        Ok(())
    }

    /// Stop the loops and the capture session. Does nothing if already
    /// stopped.
    ///
    /// Outputs may call back into the mixer, including this method, while
    /// the loops are being joined.
    #[instrument(name = "mixer_stop", skip(self), fields(mixer = %self.pipeline.id))]
    pub fn stop_running(&self) -> MixerResult<()> {
        let (stopped, session_result) = {
            let mut run = self.run.lock();
            let Some(stopped) = run.take() else {
                debug!("Already stopped, ignoring stop");
                return Ok(());
            };
            stopped.flag.store(false, Ordering::SeqCst);
            self.pipeline.running.store(false, Ordering::SeqCst);
            self.pipeline.metrics.stop();
            (stopped, self.session.stop_running())
        };

        let current = thread::current().id();
        for handle in stopped.loops {
            // An output stopping the mixer from its own callback cannot
            // join the loop it runs on.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }

        session_result?;
        info!("Mixer stopped");
        Ok(())
    }

    /// Whether the loops are running.
    pub fn state(&self) -> RunningState {
        RunningState::from_flag(self.pipeline.is_running())
    }

    /// Suspend video delivery and compositing while the host is in the
    /// background. Audio keeps flowing.
    pub fn set_background_mode(&self, background: bool) {
        let mut current = self.background.lock();
        if *current == background {
            return;
        }
        *current = background;

        self.pipeline.video.set_suspended(background);
        if background {
            self.pipeline.screen.clear();
        } else if self.pipeline.is_running() {
            if let Err(e) = self.session.start_running() {
                warn!("Failed to resume capture session: {}", e);
            }
        }
        info!(background, "Background mode changed");
    }

    /// Whether background mode is on.
    pub fn is_background(&self) -> bool {
        *self.background.lock()
    }

    /// Current counters.
    pub fn stats(&self) -> MixerStats {
        self.pipeline.stats()
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        if let Err(e) = self.stop_running() {
            warn!("Failed to stop mixer on drop: {}", e);
        }
    }
}

fn validate_frame_rate(frame_rate: f64) -> MixerResult<()> {
    if frame_rate.is_finite() && frame_rate > 0.0 {
        Ok(())
    } else {
        Err(MixerError::Configuration(format!(
            "frame rate must be positive, got {}",
            frame_rate
        )))
    }
}
