//! Sample buffer types.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::types::{AudioFormat, FormatDescription, MediaKind, VideoFormat};

const F32_SIZE: usize = std::mem::size_of::<f32>();

/// Errors raised when converting between buffer representations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The buffer does not carry audio.
    #[error("Buffer does not carry audio")]
    NotAudio,

    /// The audio format declares zero channels.
    #[error("Audio format has no channels")]
    NoChannels,

    /// The PCM payload is not a whole number of frames.
    #[error("PCM payload of {len} bytes is not a multiple of the {frame_bytes}-byte frame size")]
    MisalignedPcm { len: usize, frame_bytes: usize },
}

/// An immutable, timestamped chunk of media.
///
/// The payload is reference counted, so cloning a buffer to hand it to
/// several consumers never copies the media.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    /// What the payload contains.
    pub format: FormatDescription,

    /// Raw video bytes, or interleaved little-endian f32 PCM for audio.
    pub data: Bytes,

    /// Presentation timestamp.
    pub pts: Duration,

    /// Duration covered by this buffer.
    pub duration: Duration,
}

impl SampleBuffer {
    /// Create a new sample buffer.
    pub fn new(format: FormatDescription, data: Bytes, pts: Duration, duration: Duration) -> Self {
        Self {
            format,
            data,
            pts,
            duration,
        }
    }

    /// Create a video sample buffer.
    pub fn video(format: VideoFormat, data: Bytes, pts: Duration, duration: Duration) -> Self {
        Self::new(FormatDescription::Video(format), data, pts, duration)
    }

    /// Encode an audio buffer as a sample buffer presented at `pts`.
    pub fn from_audio(buffer: &AudioBuffer, pts: Duration) -> Self {
        let mut data = Vec::with_capacity(buffer.samples().len() * F32_SIZE);
        for sample in buffer.samples() {
            data.extend_from_slice(&sample.to_le_bytes());
        }

        Self::new(
            FormatDescription::Audio(buffer.format()),
            Bytes::from(data),
            pts,
            buffer.duration(),
        )
    }

    /// The medium of this buffer, if recognized.
    pub fn medium(&self) -> Option<MediaKind> {
        self.format.medium()
    }

    /// Check that the payload size matches the declared format.
    pub fn is_valid(&self) -> bool {
        match &self.format {
            FormatDescription::Video(format) => self.data.len() == format.buffer_size(),
            FormatDescription::Audio(format) => {
                format.channels > 0 && self.data.len() % (F32_SIZE * format.channels as usize) == 0
            }
            FormatDescription::Other(_) => true,
        }
    }

    /// Decode the PCM payload of an audio buffer.
    pub fn to_audio(&self) -> Result<AudioBuffer, BufferError> {
        let format = self.format.audio().ok_or(BufferError::NotAudio)?;
        if self.data.len() % F32_SIZE != 0 {
            return Err(BufferError::MisalignedPcm {
                len: self.data.len(),
                frame_bytes: F32_SIZE * format.channels.max(1) as usize,
            });
        }

        let samples: Vec<f32> = self
            .data
            .chunks_exact(F32_SIZE)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();

        AudioBuffer::new(format, samples)
    }
}

/// Interleaved f32 PCM audio, the alternate audio representation.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    format: AudioFormat,
    samples: Arc<[f32]>,
}

impl AudioBuffer {
    /// Create an audio buffer, validating that samples form whole frames.
    pub fn new(format: AudioFormat, samples: impl Into<Arc<[f32]>>) -> Result<Self, BufferError> {
        if format.channels == 0 {
            return Err(BufferError::NoChannels);
        }

        let samples = samples.into();
        let channels = format.channels as usize;
        if samples.len() % channels != 0 {
            return Err(BufferError::MisalignedPcm {
                len: samples.len() * F32_SIZE,
                frame_bytes: channels * F32_SIZE,
            });
        }

        Ok(Self { format, samples })
    }

    /// A buffer of `frames` frames of silence.
    pub fn silence(format: AudioFormat, frames: usize) -> Result<Self, BufferError> {
        Self::new(format, vec![0.0; frames * format.channels as usize])
    }

    /// The audio format.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.format.channels as usize
    }

    /// Duration covered by this buffer.
    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.format.sample_rate as f64)
    }
}
