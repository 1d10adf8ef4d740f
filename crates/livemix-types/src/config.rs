//! Mixer configuration.

use serde::{Deserialize, Serialize};

use crate::settings::{AudioMixerSettings, VideoMixerSettings};
use crate::types::SessionPreset;

/// Initial configuration applied when a mixer is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Target video frame rate and display tick rate.
    pub frame_rate: f64,

    /// Video mixing settings.
    pub video: VideoMixerSettings,

    /// Audio mixing settings.
    pub audio: AudioMixerSettings,

    /// Mix every attached microphone track instead of the main track only.
    pub multi_track_audio_mixing: bool,

    /// Allow several cameras to capture at once.
    pub multi_cam_session: bool,

    /// Capture quality preset.
    pub session_preset: SessionPreset,

    /// Route mixed audio to local playback.
    pub monitoring: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            frame_rate: crate::DEFAULT_FRAME_RATE,
            video: VideoMixerSettings::default(),
            audio: AudioMixerSettings::default(),
            multi_track_audio_mixing: false,
            multi_cam_session: false,
            session_preset: SessionPreset::default(),
            monitoring: false,
        }
    }
}
