//! Simulation Engine
//!
//! The engine boundary used by both control loops, plus a small reference
//! integrator (`FlightEngine`) so the binary can run on its own.
//!
//! Engines are not thread-safe. All calls happen from the owning loop's
//! thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::sim::command::{Command, CommandId};
use crate::sim::snapshot::{EntityState, StateSnapshot};

/// Largest accepted time acceleration factor.
pub const MAX_TIME_ACCELERATION: f64 = 100_000.0;

// =============================================================================
// ENGINE BOUNDARY
// =============================================================================

/// The simulation as seen by a control loop.
pub trait SimulationEngine {
    /// Deep copy of the current state.
    fn get_state(&self) -> StateSnapshot;

    /// Replace the current state.
    fn set_state(&mut self, state: StateSnapshot);

    /// Apply one command.
    fn handle_request(&mut self, command: &Command) -> Result<(), EngineError>;

    /// Advance the simulation by one frame.
    fn step(&mut self) -> Result<(), EngineError>;
}

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Command names an entity that does not exist.
    #[error("unknown entity '{entity}' in {command}")]
    UnknownEntity {
        /// Command identifier.
        command: CommandId,
        /// Requested entity.
        entity: String,
    },

    /// Command carries a NaN or infinite argument.
    #[error("non-finite argument in {0}")]
    NonFiniteArgument(CommandId),

    /// Throttle outside `[0, 1]`.
    #[error("throttle {0} outside [0, 1]")]
    ThrottleOutOfRange(f64),

    /// Time acceleration not positive, not finite, or too large.
    #[error("time acceleration {0} outside (0, {MAX_TIME_ACCELERATION}]")]
    InvalidTimeAcceleration(f64),

    /// State became non-finite; continuing would silently diverge.
    #[error("simulation diverged at tick {tick}: entity '{entity}' is not finite")]
    Diverged {
        /// Tick at which divergence was detected.
        tick: u64,
        /// First offending entity.
        entity: String,
    },

    /// Any other engine failure.
    #[error("engine failure: {0}")]
    Internal(String),
}

impl EngineError {
    /// True if only the offending command should be skipped.
    ///
    /// Rejections leave the state untouched. Everything else is fatal.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownEntity { .. }
                | EngineError::NonFiniteArgument(_)
                | EngineError::ThrottleOutOfRange(_)
                | EngineError::InvalidTimeAcceleration(_)
        )
    }
}

// =============================================================================
// SAVE FILES
// =============================================================================

/// Save file errors.
#[derive(Debug, Error)]
pub enum SaveFileError {
    /// File could not be read.
    #[error("failed to read save file {path}: {source}")]
    Read {
        /// Save file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File is not a valid snapshot.
    #[error("failed to parse save file {path}: {source}")]
    Parse {
        /// Save file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Parsed, but the contents cannot be simulated.
    #[error("invalid save file {path}: {reason}")]
    Invalid {
        /// Save file path.
        path: PathBuf,
        /// What is wrong.
        reason: String,
    },
}

/// Load a snapshot from a JSON save file.
pub fn load_save_file(path: &Path) -> Result<StateSnapshot, SaveFileError> {
    let text = fs::read_to_string(path).map_err(|source| SaveFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot: StateSnapshot =
        serde_json::from_str(&text).map_err(|source| SaveFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if let Some(entity) = snapshot.entities.iter().find(|e| !e.is_finite()) {
        return Err(SaveFileError::Invalid {
            path: path.to_path_buf(),
            reason: format!("entity '{}' has non-finite state", entity.name),
        });
    }
    for (i, entity) in snapshot.entities.iter().enumerate() {
        if snapshot.entities[..i].iter().any(|e| e.name == entity.name) {
            return Err(SaveFileError::Invalid {
                path: path.to_path_buf(),
                reason: format!("duplicate entity '{}'", entity.name),
            });
        }
    }

    Ok(snapshot)
}

// =============================================================================
// REFERENCE ENGINE
// =============================================================================

/// Minimal 2-D flight integrator.
///
/// Each step advances one fixed frame scaled by the time acceleration:
/// heading by spin, velocity by throttle along the heading, position by
/// velocity (semi-implicit Euler).
#[derive(Debug, Clone)]
pub struct FlightEngine {
    state: StateSnapshot,
    frame: Duration,
}

impl FlightEngine {
    /// Create an engine from an initial state and a fixed frame length.
    pub fn new(state: StateSnapshot, frame: Duration) -> Self {
        Self { state, frame }
    }

    /// Load an engine from a save file.
    pub fn from_save_file(path: &Path, frame: Duration) -> Result<Self, SaveFileError> {
        Ok(Self::new(load_save_file(path)?, frame))
    }

    /// Fixed frame length.
    pub fn frame(&self) -> Duration {
        self.frame
    }

    fn entity_mut(&mut self, command: CommandId, name: &str) -> Result<&mut EntityState, EngineError> {
        self.state
            .entities
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| EngineError::UnknownEntity {
                command,
                entity: name.to_string(),
            })
    }
}

impl SimulationEngine for FlightEngine {
    fn get_state(&self) -> StateSnapshot {
        self.state.clone()
    }

    fn set_state(&mut self, state: StateSnapshot) {
        self.state = state;
    }

    fn handle_request(&mut self, command: &Command) -> Result<(), EngineError> {
        let id = command.id();
        match command {
            Command::Noop => Ok(()),
            Command::Move { entity, dx, dy } => {
                if !dx.is_finite() || !dy.is_finite() {
                    return Err(EngineError::NonFiniteArgument(id));
                }
                let target = self.entity_mut(id, entity)?;
                target.position[0] += dx;
                target.position[1] += dy;
                Ok(())
            }
            Command::Thrust { entity, throttle } => {
                if !(0.0..=1.0).contains(throttle) {
                    return Err(EngineError::ThrottleOutOfRange(*throttle));
                }
                self.entity_mut(id, entity)?.throttle = *throttle;
                Ok(())
            }
            Command::Rotate { entity, spin } => {
                if !spin.is_finite() {
                    return Err(EngineError::NonFiniteArgument(id));
                }
                self.entity_mut(id, entity)?.spin = *spin;
                Ok(())
            }
            Command::SetTimeAcceleration { factor } => {
                if !factor.is_finite() || *factor <= 0.0 || *factor > MAX_TIME_ACCELERATION {
                    return Err(EngineError::InvalidTimeAcceleration(*factor));
                }
                self.state.time_acceleration = *factor;
                Ok(())
            }
        }
    }

    fn step(&mut self) -> Result<(), EngineError> {
        let dt = self.frame.as_secs_f64() * self.state.time_acceleration;

        for entity in &mut self.state.entities {
            entity.heading += entity.spin * dt;

            let accel = entity.throttle * entity.max_acceleration;
            entity.velocity[0] += accel * entity.heading.cos() * dt;
            entity.velocity[1] += accel * entity.heading.sin() * dt;

            entity.position[0] += entity.velocity[0] * dt;
            entity.position[1] += entity.velocity[1] * dt;
        }

        self.state.tick += 1;
        self.state.sim_time += dt;

        if let Some(entity) = self.state.entities.iter().find(|e| !e.is_finite()) {
            return Err(EngineError::Diverged {
                tick: self.state.tick,
                entity: entity.name.clone(),
            });
        }

        Ok(())
    }
}
