//! Per-track PCM mixing.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use tracing::{trace, warn};

use livemix_types::{AudioBuffer, AudioFormat, AudioMixerSettings, TrackId};

use crate::error::AudioError;
use crate::AudioResult;

/// Buffers a track may queue before the mixer stops waiting for the others.
pub const MAX_PENDING_BUFFERS: usize = 4;

struct Pending {
    buffer: AudioBuffer,
    when: Duration,
}

/// Combines per-track audio into one stream anchored on the main track.
///
/// With multi-track mixing disabled only the main track is heard. With it
/// enabled, buffers queue per track and a mix round runs once every
/// participating track has a buffer waiting, or once the main track's
/// backlog exceeds [`MAX_PENDING_BUFFERS`]. A round always emits the main
/// buffer's timestamp and frame count.
pub struct TrackMixer {
    pending: BTreeMap<TrackId, VecDeque<Pending>>,
    multi_track: bool,
}

impl TrackMixer {
    /// Create a mixer with multi-track mixing disabled.
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            multi_track: false,
        }
    }

    /// Enable or disable multi-track mixing. Disabling drops queued audio.
    pub fn set_multi_track(&mut self, enabled: bool) {
        self.multi_track = enabled;
        if !enabled {
            self.pending.clear();
        }
    }

    /// Check if multi-track mixing is enabled.
    pub fn is_multi_track(&self) -> bool {
        self.multi_track
    }

    /// Drop anything queued for a track.
    pub fn remove_track(&mut self, track: TrackId) {
        self.pending.remove(&track);
    }

    /// Drop all queued audio.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Queue a buffer and return every mix round it completes.
    pub fn push(
        &mut self,
        track: TrackId,
        buffer: AudioBuffer,
        when: Duration,
        participants: &BTreeSet<TrackId>,
        settings: &AudioMixerSettings,
    ) -> Vec<(AudioBuffer, Duration)> {
        let main = settings.main_track;

        if !self.multi_track {
            if track != main {
                trace!(track, "Multi-track mixing disabled, ignoring track");
                return Vec::new();
            }
            return match mix(&buffer, &[], settings) {
                Ok(mixed) => vec![(mixed, when)],
                Err(e) => {
                    warn!("Audio mix failed: {}", e);
                    Vec::new()
                }
            };
        }

        if track != main && !participants.contains(&track) {
            trace!(track, "Track is not a mix participant, ignoring buffer");
            return Vec::new();
        }

        let queue = self.pending.entry(track).or_default();
        queue.push_back(Pending { buffer, when });
        if track != main && queue.len() > MAX_PENDING_BUFFERS {
            queue.pop_front();
            trace!(track, "Audio track backlog full, dropping oldest buffer");
        }

        let mut mixed = Vec::new();
        loop {
            let main_backlog = self.pending.get(&main).map_or(0, VecDeque::len);
            if main_backlog == 0 {
                break;
            }

            let all_ready = participants
                .iter()
                .filter(|participant| **participant != main)
                .all(|participant| {
                    self.pending
                        .get(participant)
                        .is_some_and(|queue| !queue.is_empty())
                });
            if !all_ready && main_backlog <= MAX_PENDING_BUFFERS {
                break;
            }

            let Some(head) = self.pending.get_mut(&main).and_then(VecDeque::pop_front) else {
                break;
            };
            let others: Vec<(TrackId, AudioBuffer)> = self
                .pending
                .iter_mut()
                .filter(|(other, _)| **other != main)
                .filter_map(|(other, queue)| queue.pop_front().map(|p| (*other, p.buffer)))
                .collect();

            match mix(&head.buffer, &others, settings) {
                Ok(buffer) => mixed.push((buffer, head.when)),
                Err(e) => warn!("Audio mix failed: {}", e),
            }
        }

        mixed
    }
}

impl Default for TrackMixer {
    fn default() -> Self {
        Self::new()
    }
}

fn mix(
    main: &AudioBuffer,
    others: &[(TrackId, AudioBuffer)],
    settings: &AudioMixerSettings,
) -> AudioResult<AudioBuffer> {
    let format = main.format();
    let mut output = vec![0.0f32; main.samples().len()];

    if !settings.is_muted {
        accumulate(&mut output, settings.main_track, main, format, settings)?;
        for (track, other) in others {
            if let Err(e) = accumulate(&mut output, *track, other, format, settings) {
                warn!(track, "Skipping track in mix: {}", e);
            }
        }
    }

    // Soft clip to prevent harsh clipping
    for sample in output.iter_mut() {
        *sample = soft_clip(*sample);
    }

    Ok(AudioBuffer::new(format, output)?)
}

fn accumulate(
    output: &mut [f32],
    track: TrackId,
    input: &AudioBuffer,
    format: AudioFormat,
    settings: &AudioMixerSettings,
) -> AudioResult<()> {
    if input.format() != format {
        return Err(AudioError::FormatMismatch {
            track,
            expected: format,
            actual: input.format(),
        });
    }

    let gain = settings.track(track).gain();
    for (out, &sample) in output.iter_mut().zip(input.samples()) {
        *out += sample * gain;
    }
    Ok(())
}

/// Level above which samples are compressed towards full scale.
const SOFT_CLIP_KNEE: f32 = 0.9;

/// Soft clipping function to prevent harsh digital clipping.
///
/// Linear up to the knee, then a tanh curve that meets it with the same
/// value and slope and approaches full scale.
fn soft_clip(sample: f32) -> f32 {
    let magnitude = sample.abs();
    if magnitude <= SOFT_CLIP_KNEE {
        return sample;
    }

    let headroom = 1.0 - SOFT_CLIP_KNEE;
    let compressed = SOFT_CLIP_KNEE + headroom * ((magnitude - SOFT_CLIP_KNEE) / headroom).tanh();
    compressed.copysign(sample)
}

#[cfg(test)]
mod tests {
    use livemix_types::AudioTrackSettings;

    use super::*;

    const MONO: AudioFormat = AudioFormat {
        sample_rate: 48000,
        channels: 1,
    };

    fn buffer(value: f32, frames: usize) -> AudioBuffer {
        AudioBuffer::new(MONO, vec![value; frames]).unwrap()
    }

    fn participants(tracks: &[TrackId]) -> BTreeSet<TrackId> {
        tracks.iter().copied().collect()
    }

    #[test]
    fn test_single_track_passes_main_only() {
        let mut mixer = TrackMixer::new();
        let settings = AudioMixerSettings::default();
        let all = participants(&[0, 1]);

        assert!(mixer.push(1, buffer(0.5, 4), Duration::ZERO, &all, &settings).is_empty());
        let out = mixer.push(0, buffer(0.25, 4), Duration::from_millis(10), &all, &settings);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, Duration::from_millis(10));
        assert_eq!(out[0].0.samples(), &[0.25; 4]);
    }

    #[test]
    fn test_multi_track_waits_for_all_participants() {
        let mut mixer = TrackMixer::new();
        mixer.set_multi_track(true);
        let settings = AudioMixerSettings::default();
        let all = participants(&[0, 1]);

        assert!(mixer.push(0, buffer(0.25, 4), Duration::ZERO, &all, &settings).is_empty());
        let out = mixer.push(1, buffer(0.5, 4), Duration::ZERO, &all, &settings);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0.samples(), &[0.75; 4]);
        assert_eq!(out[0].1, Duration::ZERO);
    }

    #[test]
    fn test_output_follows_main_frame_count() {
        let mut mixer = TrackMixer::new();
        mixer.set_multi_track(true);
        let settings = AudioMixerSettings::default();
        let all = participants(&[0, 1]);

        mixer.push(1, buffer(0.5, 8), Duration::ZERO, &all, &settings);
        let out = mixer.push(0, buffer(0.25, 2), Duration::ZERO, &all, &settings);

        assert_eq!(out[0].0.frame_count(), 2);
    }

    #[test]
    fn test_track_gain_and_global_mute() {
        let mut mixer = TrackMixer::new();
        mixer.set_multi_track(true);
        let mut settings = AudioMixerSettings::default();
        settings.tracks.insert(
            1,
            AudioTrackSettings {
                volume: 0.5,
                is_muted: false,
            },
        );
        let all = participants(&[0, 1]);

        mixer.push(0, buffer(0.2, 2), Duration::ZERO, &all, &settings);
        let out = mixer.push(1, buffer(0.4, 2), Duration::ZERO, &all, &settings);
        assert!((out[0].0.samples()[0] - 0.4).abs() < 1e-6);

        settings.is_muted = true;
        mixer.push(0, buffer(0.2, 2), Duration::ZERO, &all, &settings);
        let out = mixer.push(1, buffer(0.4, 2), Duration::ZERO, &all, &settings);
        assert_eq!(out[0].0.samples(), &[0.0; 2]);
    }

    #[test]
    fn test_main_backlog_flushes_without_stalled_track() {
        let mut mixer = TrackMixer::new();
        mixer.set_multi_track(true);
        let settings = AudioMixerSettings::default();
        let all = participants(&[0, 1]);

        let mut emitted = 0;
        for i in 0..=MAX_PENDING_BUFFERS as u64 {
            emitted += mixer
                .push(0, buffer(0.1, 2), Duration::from_millis(i * 10), &all, &settings)
                .len();
        }

        assert_eq!(emitted, 1);
    }

    #[test]
    fn test_mismatched_format_is_skipped() {
        let mut mixer = TrackMixer::new();
        mixer.set_multi_track(true);
        let settings = AudioMixerSettings::default();
        let all = participants(&[0, 1]);
        let stereo = AudioBuffer::new(AudioFormat::new(48000, 2), vec![0.9; 4]).unwrap();

        mixer.push(0, buffer(0.1, 2), Duration::ZERO, &all, &settings);
        let out = mixer.push(1, stereo, Duration::ZERO, &all, &settings);

        assert_eq!(out.len(), 1);
        assert!((out[0].0.samples()[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_non_participant_track_ignored() {
        let mut mixer = TrackMixer::new();
        mixer.set_multi_track(true);
        let settings = AudioMixerSettings::default();
        let main_only = participants(&[0]);

        assert!(mixer.push(7, buffer(0.9, 2), Duration::ZERO, &main_only, &settings).is_empty());
        let out = mixer.push(0, buffer(0.1, 2), Duration::ZERO, &main_only, &settings);

        assert_eq!(out.len(), 1);
        assert!((out[0].0.samples()[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_soft_clip_bounds() {
        assert_eq!(soft_clip(0.5), 0.5);
        assert!(soft_clip(3.0) < 1.0);
        assert!(soft_clip(-3.0) > -1.0);
        assert_eq!(soft_clip(-0.7), -0.7);
    }

    #[test]
    fn test_soft_clip_continuous_and_monotonic() {
        let mut previous = soft_clip(0.0);
        for step in 1..=400 {
            let sample = step as f32 * 0.005;
            let clipped = soft_clip(sample);
            assert!(clipped >= previous, "not monotonic at {}", sample);
            assert!(clipped - previous <= 0.005 + 1e-6, "jump at {}", sample);
            previous = clipped;
        }

        assert!((soft_clip(1.01) - soft_clip(1.0)).abs() < 0.01);
        assert!(soft_clip(1.0) > 0.95);
        assert_eq!(soft_clip(-1.5), -soft_clip(1.5));
    }
}
