//! Mixer orchestrator for the livemix pipeline.
//!
//! This crate ties the capture units, the offscreen [`Screen`] and a
//! [`DisplayClock`] together behind [`Mixer`], and dispatches mixed audio
//! and video to registered [`MixerOutput`]s.

mod clock;
mod composite;
mod error;
mod metrics;
mod orchestrator;
mod output;
mod pipeline;
mod screen;

pub use clock::{DisplayClock, ManualClock, TickClock};
pub use composite::{CompositeStrategy, LayeredComposite};
pub use error::MixerError;
pub use metrics::MixerMetrics;
pub use orchestrator::Mixer;
pub use output::{MixerId, MixerOutput, OutputId};
pub use pipeline::LOOP_POLL_INTERVAL;
pub use screen::{Screen, MIN_FRAME_DURATION};

/// Result type for mixer operations.
pub type MixerResult<T> = Result<T, MixerError>;
