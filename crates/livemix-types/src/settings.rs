//! Mixer settings for the audio and video capture units.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::TrackId;

/// How mixed video output is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoMixerMode {
    /// Main-track frames are forwarded as they arrive.
    #[default]
    Passthrough,

    /// The screen composites all tracks on every display tick.
    Offscreen,
}

/// Placement of a non-main track inside the composite, in main-track pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackLayout {
    /// Left edge. May be negative; the overlay is clipped.
    pub x: i32,

    /// Top edge. May be negative; the overlay is clipped.
    pub y: i32,

    /// Target width the overlay is scaled to.
    pub width: u32,

    /// Target height the overlay is scaled to.
    pub height: u32,

    /// Draw order; lower values are drawn first.
    #[serde(default)]
    pub z_index: i32,
}

impl TrackLayout {
    /// Create a layout at z-index 0.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            z_index: 0,
        }
    }

    /// Set the draw order.
    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }
}

/// Video mixing configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoMixerSettings {
    /// Output mode.
    pub mode: VideoMixerMode,

    /// Track whose geometry and timing anchor the output.
    pub main_track: TrackId,

    /// Placement of non-main tracks when compositing.
    pub layouts: BTreeMap<TrackId, TrackLayout>,
}

impl VideoMixerSettings {
    /// Layout for a track, if one is configured.
    pub fn layout(&self, track: TrackId) -> Option<&TrackLayout> {
        self.layouts.get(&track)
    }
}

/// Per-track audio mix parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioTrackSettings {
    /// Linear gain (0.0 - 1.0).
    pub volume: f32,

    /// Whether this track is silenced in the mix.
    pub is_muted: bool,
}

impl Default for AudioTrackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            is_muted: false,
        }
    }
}

impl AudioTrackSettings {
    /// Effective gain after mute. A non-finite volume is silent.
    pub fn gain(&self) -> f32 {
        if self.is_muted || !self.volume.is_finite() {
            0.0
        } else {
            self.volume.clamp(0.0, 1.0)
        }
    }
}

/// Audio mixing configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioMixerSettings {
    /// Track whose timing anchors the mixed output.
    pub main_track: TrackId,

    /// Silence the mixed output entirely.
    pub is_muted: bool,

    /// Per-track parameters. Tracks without an entry use the defaults.
    pub tracks: BTreeMap<TrackId, AudioTrackSettings>,
}

impl AudioMixerSettings {
    /// Parameters for a track.
    pub fn track(&self, track: TrackId) -> AudioTrackSettings {
        self.tracks.get(&track).copied().unwrap_or_default()
    }
}
