//! Shutdown Coordination
//!
//! `ShutdownCoordinator` owns the teardown hooks for everything a loop
//! leaves behind (renderer, state server). Exactly one hook set runs,
//! exactly once: graceful after an interrupt or clean completion,
//! ungraceful after a fatal error. If the coordinator is dropped without
//! `run_on_exit` having been called (early return, panic) the ungraceful
//! set runs from `Drop`.
//!
//! `ShutdownSignal` is the process-wide stop request. The interrupt handler
//! triggers it; the loop driver polls it between ticks and async tasks can
//! await it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Which hook set to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal teardown.
    Graceful,
    /// Best-effort teardown after a fatal error.
    Ungraceful,
}

type Hook = Box<dyn FnOnce() + Send>;

/// Runs teardown hooks once on process exit.
#[derive(Default)]
pub struct ShutdownCoordinator {
    graceful: Vec<(&'static str, Hook)>,
    ungraceful: Vec<(&'static str, Hook)>,
    finished: Option<ExitKind>,
}

impl ShutdownCoordinator {
    /// Coordinator with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for normal teardown.
    pub fn register_graceful<F>(&mut self, name: &'static str, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.graceful.push((name, Box::new(hook)));
    }

    /// Register a hook for teardown after a fatal error.
    pub fn register_ungraceful<F>(&mut self, name: &'static str, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.ungraceful.push((name, Box::new(hook)));
    }

    /// Hook set already run, if any.
    pub fn finished(&self) -> Option<ExitKind> {
        self.finished
    }

    /// Run the hooks for `kind` in reverse registration order. Later calls
    /// do nothing.
    pub fn run_on_exit(&mut self, kind: ExitKind) {
        if let Some(done) = self.finished {
            debug!("Shutdown already ran ({:?}), ignoring {:?}", done, kind);
            return;
        }
        self.finished = Some(kind);

        let graceful = std::mem::take(&mut self.graceful);
        let ungraceful = std::mem::take(&mut self.ungraceful);
        let hooks = match kind {
            ExitKind::Graceful => graceful,
            ExitKind::Ungraceful => ungraceful,
        };

        for (name, hook) in hooks.into_iter().rev() {
            match kind {
                ExitKind::Graceful => info!("Shutting down {}", name),
                ExitKind::Ungraceful => warn!("Ungracefully shutting down {}", name),
            }
            hook();
        }
    }
}

impl Drop for ShutdownCoordinator {
    fn drop(&mut self) {
        if self.finished.is_none() {
            self.run_on_exit(ExitKind::Ungraceful);
        }
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("graceful", &self.graceful.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("ungraceful", &self.ungraceful.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("finished", &self.finished)
            .finish()
    }
}

// =============================================================================
// SHUTDOWN SIGNAL
// =============================================================================

/// Cloneable stop request shared by the loop driver and async tasks.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Untriggered signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Check if a stop was requested.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until a stop is requested.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
