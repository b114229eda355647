//! # Flight Sync Server
//!
//! Lead/mirror synchronization core for a real-time flight simulation.
//!
//! A lead owns the authoritative simulation. Every tick it publishes a
//! snapshot, applies local and network commands in a fixed order, and steps
//! the engine. Mirrors pull snapshots from a lead on their own cadence and
//! can temporarily drive a local copy of the simulation instead.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FLIGHT SYNC SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  sim/            - Single-threaded simulation side           │
//! │  ├── command.rs  - Commands and the no-op sentinel           │
//! │  ├── snapshot.rs - Immutable snapshots and digests           │
//! │  └── engine.rs   - Engine boundary, reference integrator     │
//! │                                                              │
//! │  network/        - Concurrent side                           │
//! │  ├── queue.rs    - Inbound command queue                     │
//! │  ├── service.rs  - Atomic latest snapshot + queue            │
//! │  ├── server.rs   - WebSocket server on its own worker pool   │
//! │  ├── link.rs     - Blocking pull client for mirrors          │
//! │  └── protocol.rs - Message types                             │
//! │                                                              │
//! │  runtime/        - Control loops                             │
//! │  ├── lead.rs     - Authoritative tick                        │
//! │  ├── mirror.rs   - Replica tick, networked/local modes       │
//! │  ├── apply.rs    - Command ordering and application          │
//! │  ├── scheduler.rs- Frame rate limiting                       │
//! │  ├── render.rs   - Renderer boundary, console renderer       │
//! │  └── shutdown.rs - Exit hooks, stop signal                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Threading
//!
//! The tick loop runs on one thread and never waits on a peer. The state
//! server runs on a separate tokio worker pool. The two share only the
//! latest published snapshot (an atomic pointer swap) and the command
//! queue (a short mutex-guarded append/drain).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

use std::time::Duration;

pub mod config;
pub mod diagnostics;
pub mod network;
pub mod runtime;
pub mod sim;

// Re-export commonly used types
pub use config::{Role, SyncConfig};
pub use network::{Endpoint, StateLink, StateService};
pub use runtime::{ControlLoop, LeadLoop, MirrorLoop, Tick};
pub use sim::{Command, FlightEngine, SimulationEngine, StateSnapshot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port a lead serves on, and a mirror connects to, when none is given.
pub const DEFAULT_LEAD_SERVER_PORT: u16 = 28430;

/// Tick loop frame rate (Hz)
pub const FRAME_RATE: u32 = 60;

/// Minimum time between two mirror fetches.
pub const TIME_BETWEEN_NETWORK_UPDATES: Duration = Duration::from_millis(250);
