//! Simulation Module
//!
//! Everything the control loops hand to or read from the simulation.
//! Single-threaded; owned by whichever loop drives it.
//!
//! ## Module Structure
//!
//! - `command`: Commands and their identifiers (incl. the no-op sentinel)
//! - `snapshot`: Immutable state snapshots and their digests
//! - `engine`: Engine boundary, reference integrator, save files

pub mod command;
pub mod engine;
pub mod snapshot;

// Re-export key types
pub use command::{Command, CommandId};
pub use engine::{EngineError, FlightEngine, SaveFileError, SimulationEngine};
pub use snapshot::{EntityState, SnapshotDigest, StateSnapshot};
