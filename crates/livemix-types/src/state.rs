//! Mixer running state.

use serde::{Deserialize, Serialize};

/// Whether the mixer's consumption loops are active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunningState {
    /// Loops are not running; appended media is not dispatched.
    #[default]
    Stopped,

    /// Loops are consuming the capture streams and the display clock.
    Running,
}

impl RunningState {
    /// Build the state from the shared running flag.
    pub fn from_flag(running: bool) -> Self {
        if running {
            Self::Running
        } else {
            Self::Stopped
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Running => "Running",
        }
    }
}
