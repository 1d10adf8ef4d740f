//! Output observers and their registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use livemix_types::{AudioBuffer, SampleBuffer, TrackId};

static NEXT_MIXER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies the mixer a callback comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MixerId(u64);

impl MixerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MIXER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MixerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mixer-{}", self.0)
    }
}

/// Handle returned by [`Mixer::add_output`](crate::Mixer::add_output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u64);

/// A downstream consumer of mixed media, such as an encoder or muxer.
///
/// Callbacks run on the mixer's loop threads, one at a time per stream.
/// Implementations handle their own failures.
pub trait MixerOutput: Send + Sync {
    /// A mixed or composited video buffer is ready.
    fn on_mixed_video(&self, _mixer: MixerId, _track: TrackId, _buffer: &SampleBuffer) {}

    /// A mixed audio buffer presented at `when` is ready.
    fn on_mixed_audio(
        &self,
        _mixer: MixerId,
        _track: TrackId,
        _buffer: &AudioBuffer,
        _when: Duration,
    ) {
    }
}

type Entries = Arc<Vec<(OutputId, Arc<dyn MixerOutput>)>>;

/// Copy-on-write list of registered observers.
///
/// Dispatch iterates a snapshot, so registration never blocks or races
/// with delivery.
pub(crate) struct OutputRegistry {
    entries: Mutex<Entries>,
    next_id: AtomicU64,
}

impl OutputRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `output`. The same observer registered twice keeps its
    /// first id.
    pub(crate) fn add(&self, output: Arc<dyn MixerOutput>) -> OutputId {
        let mut entries = self.entries.lock();
        if let Some((id, _)) = entries
            .iter()
            .find(|(_, existing)| same_output(existing, &output))
        {
            return *id;
        }

        let id = OutputId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut updated = Vec::with_capacity(entries.len() + 1);
        updated.extend(entries.iter().cloned());
        updated.push((id, output));
        *entries = Arc::new(updated);
        id
    }

    /// Unregister by id. Returns whether anything was removed.
    pub(crate) fn remove(&self, id: OutputId) -> bool {
        let mut entries = self.entries.lock();
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }

        let updated = entries
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *entries = Arc::new(updated);
        true
    }

    pub(crate) fn snapshot(&self) -> Entries {
        Arc::clone(&self.entries.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

fn same_output(a: &Arc<dyn MixerOutput>, b: &Arc<dyn MixerOutput>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
