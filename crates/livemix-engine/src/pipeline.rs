//! State shared between the mixer and its loop threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, trace, warn};

use livemix_audio::AudioCaptureUnit;
use livemix_capture::VideoCaptureUnit;
use livemix_types::{AudioBuffer, MixerStats, SampleBuffer, VideoMixerMode, MIXED_TRACK};

use crate::clock::DisplayClock;
use crate::metrics::MixerMetrics;
use crate::output::{MixerId, OutputRegistry};
use crate::screen::Screen;

/// Longest a loop blocks before rechecking its stop flag.
pub const LOOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How often the display loop logs statistics.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub(crate) struct Pipeline {
    pub(crate) id: MixerId,
    pub(crate) video: Arc<VideoCaptureUnit>,
    pub(crate) audio: Arc<AudioCaptureUnit>,
    pub(crate) screen: Arc<Screen>,
    pub(crate) outputs: OutputRegistry,
    pub(crate) metrics: MixerMetrics,
    pub(crate) clock: Arc<dyn DisplayClock>,
    pub(crate) running: AtomicBool,
}

impl Pipeline {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Discard items queued while the loops were not consuming.
    pub(crate) fn drain(&self) {
        let stale = self.video.passthrough().try_iter().count()
            + self.video.output().try_iter().count()
            + self.audio.output().try_iter().count();
        if stale > 0 {
            debug!(stale, "Discarded stale buffers");
        }
    }

    /// Current counters, including drops owned by the capture units.
    pub(crate) fn stats(&self) -> MixerStats {
        self.metrics
            .snapshot(self.video.dropped_frames(), self.audio.dropped_buffers())
    }

    fn report(&self) {
        self.metrics
            .report(self.video.dropped_frames(), self.audio.dropped_buffers());
    }

    fn dispatch_video(&self, buffer: &SampleBuffer) {
        for (_, output) in self.outputs.snapshot().iter() {
            output.on_mixed_video(self.id, MIXED_TRACK, buffer);
        }
        self.metrics.record_video_dispatched();
    }

    fn dispatch_audio(&self, buffer: &AudioBuffer, when: Duration) {
        for (_, output) in self.outputs.snapshot().iter() {
            output.on_mixed_audio(self.id, MIXED_TRACK, buffer, when);
        }
        self.metrics.record_audio_dispatched();
    }

    fn render(&self, at: Instant) {
        if self.screen.settings().mode != VideoMixerMode::Offscreen {
            return;
        }
        if self.video.is_suspended() {
            self.metrics.record_tick_skipped();
            return;
        }

        match self.screen.make_sample_buffer(at) {
            Some(buffer) => {
                self.metrics.record_screen_rendered();
                self.dispatch_video(&buffer);
            }
            None => {
                trace!("Nothing to composite");
                self.metrics.record_tick_skipped();
            }
        }
    }
}

/// Stop flag owned by one run of the loops.
///
/// Each start hands its loops a fresh flag, so loops of a run that is still
/// being joined never observe a later start.
pub(crate) type RunFlag = Arc<AtomicBool>;

/// Spawn the four loop threads for one run. If any spawn fails the ones
/// already started are stopped and joined.
pub(crate) fn spawn_loops(
    pipeline: &Arc<Pipeline>,
    run: &RunFlag,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    let ticks = pipeline.clock.subscribe();
    let loops: [(&str, Box<dyn FnOnce(Arc<Pipeline>, RunFlag) + Send>); 4] = [
        ("passthrough", Box::new(passthrough_loop)),
        ("video", Box::new(video_output_loop)),
        ("audio", Box::new(audio_output_loop)),
        (
            "display",
            Box::new(move |pipeline: Arc<Pipeline>, run: RunFlag| {
                display_loop(pipeline, run, ticks)
            }),
        ),
    ];

    let mut handles = Vec::with_capacity(loops.len());
    for (name, body) in loops {
        let shared = Arc::clone(pipeline);
        let flag = Arc::clone(run);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", pipeline.id, name))
            .spawn(move || body(shared, flag));

        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                warn!(name, "Failed to spawn loop: {}", e);
                run.store(false, Ordering::SeqCst);
                pipeline.running.store(false, Ordering::SeqCst);
                for handle in handles {
                    let _ = handle.join();
                }
                return Err(e);
            }
        }
    }

    Ok(handles)
}

fn passthrough_loop(pipeline: Arc<Pipeline>, run: RunFlag) {
    debug!("Passthrough loop starting");
    let frames = pipeline.video.passthrough();
    while run.load(Ordering::SeqCst) {
        match frames.recv_timeout(LOOP_POLL_INTERVAL) {
            Ok(frame) => pipeline.screen.append(frame),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Passthrough loop stopped");
}

fn video_output_loop(pipeline: Arc<Pipeline>, run: RunFlag) {
    debug!("Video output loop starting");
    let frames = pipeline.video.output();
    while run.load(Ordering::SeqCst) {
        match frames.recv_timeout(LOOP_POLL_INTERVAL) {
            Ok(buffer) => pipeline.dispatch_video(&buffer),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Video output loop stopped");
}

fn audio_output_loop(pipeline: Arc<Pipeline>, run: RunFlag) {
    debug!("Audio output loop starting");
    let buffers = pipeline.audio.output();
    while run.load(Ordering::SeqCst) {
        match buffers.recv_timeout(LOOP_POLL_INTERVAL) {
            Ok((buffer, when)) => pipeline.dispatch_audio(&buffer, when),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Audio output loop stopped");
}

fn display_loop(pipeline: Arc<Pipeline>, run: RunFlag, mut ticks: Receiver<Instant>) {
    debug!("Display loop starting");
    let mut frame_rate = pipeline.clock.frame_rate();
    let mut last_report = Instant::now();

    while run.load(Ordering::SeqCst) {
        let current = pipeline.clock.frame_rate();
        if current != frame_rate {
            debug!(frame_rate = current, "Resubscribing to display clock");
            frame_rate = current;
            ticks = pipeline.clock.subscribe();
        }

        match ticks.recv_timeout(LOOP_POLL_INTERVAL) {
            Ok(at) => pipeline.render(at),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Display clock disconnected, resubscribing");
                thread::sleep(LOOP_POLL_INTERVAL);
                ticks = pipeline.clock.subscribe();
            }
        }

        // Periodic status logging
        if last_report.elapsed() >= STATS_LOG_INTERVAL {
            pipeline.report();
            last_report = Instant::now();
        }
    }

    info!("Display loop stopped");
}
