//! Runtime Module
//!
//! The control loops and the driver that runs them.
//!
//! ## Module Structure
//!
//! - `scheduler`: Fixed-interval rate limiting
//! - `render`: Renderer boundary and the console renderer
//! - `apply`: Command ordering and application shared by both loops
//! - `lead`: Authoritative loop
//! - `mirror`: Replica loop and its connection modes
//! - `shutdown`: Exit hooks and the stop signal
//!
//! The driver only sees `Tick`. Which loop it holds is fixed once, at
//! startup, by the `ControlLoop` variant.

pub mod apply;
pub mod lead;
pub mod mirror;
pub mod render;
pub mod scheduler;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::network::link::{ConnectivityError, Endpoint, SnapshotSource};
use crate::sim::engine::{EngineError, SimulationEngine};

pub use lead::LeadLoop;
pub use mirror::{ConnectionMode, MirrorLoop};
pub use render::{ConsoleRenderer, Renderer, SharedRenderer};
pub use scheduler::TickScheduler;
pub use shutdown::{ExitKind, ShutdownCoordinator, ShutdownSignal};

// =============================================================================
// TICK
// =============================================================================

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Commands accepted by the engine.
    pub applied: usize,
    /// No-ops filtered out.
    pub skipped: usize,
    /// Commands the engine rejected.
    pub rejected: usize,
    /// Local commands dropped because a mirror was networked.
    pub discarded: usize,
    /// Whether a mirror pulled a fresh snapshot.
    pub fetched: bool,
}

/// Errors that end a loop. Every one of them is fatal.
#[derive(Debug, Error)]
pub enum LoopError {
    /// Engine failure other than a command rejection.
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),

    /// A mirror could not get its first snapshot.
    #[error("initial fetch from {endpoint} failed: {source}")]
    InitialFetch {
        /// Lead endpoint.
        endpoint: Endpoint,
        /// Underlying error.
        #[source]
        source: ConnectivityError,
    },
}

impl LoopError {
    /// True if the failure looks like mismatched message definitions.
    pub fn is_schema_mismatch(&self) -> bool {
        match self {
            LoopError::InitialFetch { source, .. } => source.is_schema_mismatch(),
            LoopError::Engine(_) => false,
        }
    }
}

/// One iteration of a control loop, ending at a safe stopping point.
pub trait Tick {
    /// Run one tick, including its frame wait.
    fn tick(&mut self) -> Result<TickReport, LoopError>;

    /// Short role name for logs.
    fn role(&self) -> &'static str;
}

/// The loop a process runs, chosen once at startup.
pub enum ControlLoop<E, S> {
    /// Owns and serves the authoritative state.
    Lead(LeadLoop<E>),
    /// Follows a remote lead.
    Mirror(MirrorLoop<E, S>),
}

impl<E: SimulationEngine, S: SnapshotSource> Tick for ControlLoop<E, S> {
    fn tick(&mut self) -> Result<TickReport, LoopError> {
        match self {
            ControlLoop::Lead(lead) => lead.tick(),
            ControlLoop::Mirror(mirror) => mirror.tick(),
        }
    }

    fn role(&self) -> &'static str {
        match self {
            ControlLoop::Lead(lead) => lead.role(),
            ControlLoop::Mirror(mirror) => mirror.role(),
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// How a loop ended.
#[derive(Debug)]
pub enum ExitStatus {
    /// Stopped on an interrupt.
    Interrupted {
        /// Ticks completed.
        ticks: u64,
    },
    /// Tick budget reached.
    Completed {
        /// Ticks completed.
        ticks: u64,
    },
    /// A tick failed.
    Fatal {
        /// Ticks completed before the failure.
        ticks: u64,
        /// The failure.
        error: LoopError,
    },
}

impl ExitStatus {
    /// Hook set the coordinator should run.
    pub fn exit_kind(&self) -> ExitKind {
        match self {
            ExitStatus::Fatal { .. } => ExitKind::Ungraceful,
            _ => ExitKind::Graceful,
        }
    }

    /// Process exit code.
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Fatal { .. } => 1,
            _ => 0,
        }
    }
}

/// Tick until the signal fires, the budget runs out, or a tick fails.
///
/// The signal is checked between ticks, so a tick is never cut short.
pub fn drive<T: Tick + ?Sized>(
    control: &mut T,
    signal: &ShutdownSignal,
    max_ticks: Option<u64>,
) -> ExitStatus {
    let role = control.role();
    info!("Starting {} loop", role);

    let mut ticks = 0u64;
    loop {
        if signal.is_triggered() {
            info!(ticks, "Interrupted, stopping {} loop", role);
            return ExitStatus::Interrupted { ticks };
        }
        if max_ticks.is_some_and(|max| ticks >= max) {
            info!(ticks, "Tick budget reached, stopping {} loop", role);
            return ExitStatus::Completed { ticks };
        }

        match control.tick() {
            Ok(report) => {
                ticks += 1;
                if report != TickReport::default() {
                    debug!(tick = ticks, ?report, "Tick");
                }
            }
            Err(error) => {
                error!(ticks, "Fatal error in {} loop: {}", role, error);
                return ExitStatus::Fatal { ticks, error };
            }
        }
    }
}

/// Drive a loop to its end, then run exactly one set of exit hooks.
pub fn run_until_exit<T: Tick + ?Sized>(
    control: &mut T,
    signal: &ShutdownSignal,
    max_ticks: Option<u64>,
    mut coordinator: ShutdownCoordinator,
) -> ExitStatus {
    let status = drive(control, signal, max_ticks);
    coordinator.run_on_exit(status.exit_kind());
    status
}
