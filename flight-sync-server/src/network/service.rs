//! State Service
//!
//! The only state shared between the tick loop and the peer-serving worker
//! pool: the latest published snapshot and the inbound command queue.
//!
//! Publication is a pointer swap. A reader holds an `Arc` to whichever
//! snapshot was current when it loaded, so it sees either the old or the new
//! snapshot in full, never a mix, and the tick loop never waits on a reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::network::protocol::StateUpdate;
use crate::network::queue::{CommandQueue, Enqueued};
use crate::sim::command::Command;
use crate::sim::snapshot::StateSnapshot;

struct Shared {
    latest: ArcSwapOption<StateUpdate>,
    commands: CommandQueue,
    published: AtomicU64,
}

/// Handle to the publish/subscribe boundary. Cheap to clone.
#[derive(Clone)]
pub struct StateService {
    shared: Arc<Shared>,
}

impl StateService {
    /// Create a service with nothing published yet.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                latest: ArcSwapOption::empty(),
                commands: CommandQueue::new(),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Replace the snapshot visible to peers.
    ///
    /// Takes ownership: the caller hands over its own deep copy.
    pub fn publish(&self, snapshot: StateSnapshot) {
        let update = Arc::new(StateUpdate::new(snapshot));
        self.shared.latest.store(Some(update));
        self.shared.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest published snapshot, if any.
    pub fn latest(&self) -> Option<Arc<StateUpdate>> {
        self.shared.latest.load_full()
    }

    /// Queue a command received from a peer.
    pub fn submit(&self, command: Command) -> Enqueued {
        self.shared.commands.enqueue(command)
    }

    /// Remove all queued peer commands, in arrival order.
    pub fn drain_commands(&self) -> Vec<Command> {
        self.shared.commands.drain()
    }

    /// Stop accepting commands.
    pub fn close(&self) {
        self.shared.commands.close();
    }

    /// Check if the command queue is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.commands.is_closed()
    }

    /// Number of snapshots published so far.
    pub fn publish_count(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }
}

impl Default for StateService {
    fn default() -> Self {
        Self::new()
    }
}
