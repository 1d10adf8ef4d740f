//! Common types used across the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an input track, scoped per medium.
pub type TrackId = u8;

/// Track id tagging mixed or composited output rather than a single input.
pub const MIXED_TRACK: TrackId = TrackId::MAX;

/// The medium carried by a track or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Audio samples.
    Audio,

    /// Video frames.
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Pixel layout of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit BGRA, 4 bytes per pixel.
    Bgra,

    /// Planar Y followed by interleaved UV, subsampled 2x2.
    Nv12,
}

/// Audio input format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioFormat {
    /// Create a new audio format.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SAMPLE_RATE, crate::DEFAULT_CHANNELS)
    }
}

/// Video input format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Pixel layout.
    pub pixel_format: PixelFormat,
}

impl VideoFormat {
    /// Create a new video format.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    /// Shorthand for a packed BGRA format.
    pub fn bgra(width: u32, height: u32) -> Self {
        Self::new(width, height, PixelFormat::Bgra)
    }

    /// Expected payload size in bytes for a frame of this format.
    pub fn buffer_size(&self) -> usize {
        let pixels = self.width as usize * self.height as usize;
        match self.pixel_format {
            PixelFormat::Bgra => pixels * 4,
            // Y plane (width * height) + UV plane (width * height / 2)
            PixelFormat::Nv12 => pixels + pixels / 2,
        }
    }
}

/// Format descriptor embedded in every sample buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatDescription {
    /// Interleaved f32 PCM audio.
    Audio(AudioFormat),

    /// Raw video frame.
    Video(VideoFormat),

    /// Anything the pipeline does not understand (timed metadata, text, ...).
    Other(String),
}

impl FormatDescription {
    /// Classify the descriptor by medium. `None` for unrecognized media.
    pub fn medium(&self) -> Option<MediaKind> {
        match self {
            Self::Audio(_) => Some(MediaKind::Audio),
            Self::Video(_) => Some(MediaKind::Video),
            Self::Other(_) => None,
        }
    }

    /// The audio format, if this describes audio.
    pub fn audio(&self) -> Option<AudioFormat> {
        match self {
            Self::Audio(format) => Some(*format),
            _ => None,
        }
    }

    /// The video format, if this describes video.
    pub fn video(&self) -> Option<VideoFormat> {
        match self {
            Self::Video(format) => Some(*format),
            _ => None,
        }
    }
}

/// Orientation applied to camera output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoOrientation {
    /// Device upright.
    #[default]
    Portrait,

    /// Device upside down.
    PortraitUpsideDown,

    /// Device rotated with the home side on the right.
    LandscapeRight,

    /// Device rotated with the home side on the left.
    LandscapeLeft,
}

/// Capture quality preset forwarded to the device session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPreset {
    /// Highest quality the device offers.
    #[default]
    High,

    /// Medium quality.
    Medium,

    /// Low quality.
    Low,

    /// 1280x720.
    Hd1280x720,

    /// 1920x1080.
    Hd1920x1080,

    /// 3840x2160.
    Hd4K,
}

/// Snapshot of mixer counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixerStats {
    /// Mixed video buffers delivered to observers.
    pub video_buffers_dispatched: u64,

    /// Mixed audio buffers delivered to observers.
    pub audio_buffers_dispatched: u64,

    /// Composites rendered by the screen.
    pub screen_frames_rendered: u64,

    /// Display ticks that produced no composite.
    pub ticks_skipped: u64,

    /// Appended buffers dropped because their medium was not recognized.
    pub unrecognized_buffers: u64,

    /// Video frames dropped by the capture unit (pacing or full queue).
    pub video_frames_dropped: u64,

    /// Mixed audio buffers dropped because the output queue was full.
    pub audio_buffers_dropped: u64,

    /// Time since the mixer last started running, in seconds.
    pub uptime_seconds: u64,
}
