//! Shared types for the livemix pipeline.
//!
//! This crate defines the value types that flow between the capture units,
//! the compositor and the mixer: track identifiers, media formats, sample
//! buffers, mixer settings and the mixer configuration.

mod buffer;
mod config;
mod settings;
mod state;
mod types;

pub use buffer::{AudioBuffer, BufferError, SampleBuffer};
pub use config::MixerConfig;
pub use settings::{
    AudioMixerSettings, AudioTrackSettings, TrackLayout, VideoMixerMode, VideoMixerSettings,
};
pub use state::RunningState;
pub use types::{
    AudioFormat, FormatDescription, MediaKind, MixerStats, PixelFormat, SessionPreset, TrackId,
    VideoFormat, VideoOrientation, MIXED_TRACK,
};

/// Default frame rate for video output and display ticks.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Default audio sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default number of audio channels.
pub const DEFAULT_CHANNELS: u16 = 2;
