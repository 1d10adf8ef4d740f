//! Synthetic capture driving a mixer end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{debug, info};

use livemix_audio::ChannelPlayback;
use livemix_capture::mock::{MockDevice, MockSessionBackend};
use livemix_capture::DeviceSettings;
use livemix_engine::{Mixer, MixerId, MixerOutput};
use livemix_types::{
    AudioBuffer, AudioFormat, MixerConfig, PixelFormat, SampleBuffer, TrackId, VideoFormat,
};

const CAMERA_FORMAT: VideoFormat = VideoFormat {
    width: 320,
    height: 180,
    pixel_format: PixelFormat::Bgra,
};

/// 10ms of audio per buffer.
const AUDIO_BUFFER_DURATION: Duration = Duration::from_millis(10);

/// Counts what reaches the output side, standing in for an encoder.
#[derive(Default)]
struct CountingOutput {
    video: AtomicU64,
    audio: AtomicU64,
    video_bytes: AtomicU64,
}

impl MixerOutput for CountingOutput {
    fn on_mixed_video(&self, _mixer: MixerId, _track: TrackId, buffer: &SampleBuffer) {
        self.video.fetch_add(1, Ordering::Relaxed);
        self.video_bytes
            .fetch_add(buffer.data.len() as u64, Ordering::Relaxed);
    }

    fn on_mixed_audio(
        &self,
        _mixer: MixerId,
        _track: TrackId,
        _buffer: &AudioBuffer,
        _when: Duration,
    ) {
        self.audio.fetch_add(1, Ordering::Relaxed);
    }
}

/// Run the pipeline for `duration` and return a JSON report.
pub fn run(config: MixerConfig, duration: Duration) -> Result<Value> {
    let frame_rate = config.frame_rate;
    let audio_format = AudioFormat::default();
    let main_video = config.video.main_track;
    let main_audio = config.audio.main_track;

    let backend = Arc::new(MockSessionBackend::new());
    let mixer = Mixer::new(backend, config)?;

    let camera = Arc::new(MockDevice::camera("synthetic-camera", CAMERA_FORMAT));
    mixer.attach_video_device(
        main_video,
        Some(camera),
        Some(Box::new(|settings: &mut DeviceSettings| {
            settings.zoom_factor = 1.0;
        })),
    )?;
    let microphone = Arc::new(MockDevice::microphone("synthetic-mic", audio_format));
    mixer.attach_audio_device(main_audio, Some(microphone), None)?;

    let (monitor_tx, monitor_rx) = crossbeam_channel::bounded(64);
    mixer.set_audio_playback(Some(Box::new(ChannelPlayback::new(monitor_tx))));

    let output = Arc::new(CountingOutput::default());
    mixer.add_output(output.clone());
    mixer.start_running()?;

    let frame_interval = Duration::from_secs_f64(1.0 / frame_rate);
    let frames_per_buffer = (audio_format.sample_rate as u64
        * AUDIO_BUFFER_DURATION.as_millis() as u64
        / 1000) as usize;
    let start = Instant::now();
    let mut next_frame = Duration::ZERO;
    let mut next_audio = Duration::ZERO;
    let mut frames_sent = 0u64;
    let mut audio_sent = 0u64;

    while start.elapsed() < duration {
        let now = start.elapsed();

        if now >= next_frame {
            let shade = (frames_sent % 256) as u8;
            let frame = SampleBuffer::video(
                CAMERA_FORMAT,
                Bytes::from(vec![shade; CAMERA_FORMAT.buffer_size()]),
                now,
                frame_interval,
            );
            mixer.append(&frame, main_video);
            frames_sent += 1;
            next_frame += frame_interval;
        }

        if now >= next_audio {
            let buffer = tone(audio_format, frames_per_buffer, audio_sent)?;
            mixer.append_audio(buffer, now, main_audio);
            audio_sent += 1;
            next_audio += AUDIO_BUFFER_DURATION;
        }

        thread::sleep(Duration::from_millis(1));
    }

    let stats = mixer.stats();
    let state = mixer.state();
    mixer.stop_running()?;
    let monitored = monitor_rx.try_iter().count();
    debug!(monitored, "Monitor buffers received");
    info!(
        frames_sent,
        audio_sent,
        video_delivered = output.video.load(Ordering::Relaxed),
        "Demo finished"
    );

    Ok(json!({
        "mixer": mixer.id().to_string(),
        "state_at_end": state.name(),
        "monitoring": mixer.is_monitoring_enabled(),
        "frames_sent": frames_sent,
        "audio_buffers_sent": audio_sent,
        "video_delivered": output.video.load(Ordering::Relaxed),
        "video_bytes_delivered": output.video_bytes.load(Ordering::Relaxed),
        "audio_delivered": output.audio.load(Ordering::Relaxed),
        "monitored": monitored,
        "stats": stats,
    }))
}

/// A 440Hz sine tone, continuous across buffers.
fn tone(format: AudioFormat, frames: usize, index: u64) -> Result<AudioBuffer> {
    let channels = format.channels as usize;
    let offset = index as usize * frames;
    let step = 2.0 * std::f32::consts::PI * 440.0 / format.sample_rate as f32;

    let mut samples = Vec::with_capacity(frames * channels);
    for frame in 0..frames {
        let value = ((offset + frame) as f32 * step).sin() * 0.2;
        samples.extend(std::iter::repeat(value).take(channels));
    }
    Ok(AudioBuffer::new(format, samples)?)
}
