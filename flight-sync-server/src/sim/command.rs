//! Simulation Commands
//!
//! Requests that mutate the simulation. Commands come from two sources,
//! the local input layer and network peers, and are immutable once issued.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// COMMAND IDENTIFIERS
// =============================================================================

/// Identifier of a command, independent of its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandId {
    /// Reserved sentinel. Never forwarded to an engine.
    Noop,
    /// Displace an entity.
    Move,
    /// Set an entity's throttle.
    Thrust,
    /// Set an entity's angular velocity.
    Rotate,
    /// Change the global time acceleration.
    SetTimeAcceleration,
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandId::Noop => "NOOP",
            CommandId::Move => "MOVE",
            CommandId::Thrust => "THRUST",
            CommandId::Rotate => "ROTATE",
            CommandId::SetTimeAcceleration => "TIME_ACC_SET",
        };
        f.write_str(name)
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// A requested mutation of the simulation state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Does nothing. Filtered out before reaching an engine.
    Noop,

    /// Displace an entity by `(dx, dy)` metres.
    Move {
        /// Target entity name.
        entity: String,
        /// X displacement.
        dx: f64,
        /// Y displacement.
        dy: f64,
    },

    /// Set the throttle of an entity, in `[0, 1]`.
    Thrust {
        /// Target entity name.
        entity: String,
        /// Throttle fraction.
        throttle: f64,
    },

    /// Set the angular velocity of an entity (radians per second).
    Rotate {
        /// Target entity name.
        entity: String,
        /// Angular velocity.
        spin: f64,
    },

    /// Set the time acceleration factor.
    SetTimeAcceleration {
        /// Multiplier applied to every step.
        factor: f64,
    },
}

impl Command {
    /// Identifier of this command.
    pub fn id(&self) -> CommandId {
        match self {
            Command::Noop => CommandId::Noop,
            Command::Move { .. } => CommandId::Move,
            Command::Thrust { .. } => CommandId::Thrust,
            Command::Rotate { .. } => CommandId::Rotate,
            Command::SetTimeAcceleration { .. } => CommandId::SetTimeAcceleration,
        }
    }

    /// Check if this is the no-op sentinel.
    #[inline]
    pub fn is_noop(&self) -> bool {
        matches!(self, Command::Noop)
    }

    /// Entity this command targets, if any.
    pub fn entity(&self) -> Option<&str> {
        match self {
            Command::Move { entity, .. }
            | Command::Thrust { entity, .. }
            | Command::Rotate { entity, .. } => Some(entity),
            Command::Noop | Command::SetTimeAcceleration { .. } => None,
        }
    }

    /// Parse a command from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Noop => write!(f, "{}", self.id()),
            Command::Move { entity, dx, dy } => {
                write!(f, "{} {} by ({:.3}, {:.3})", self.id(), entity, dx, dy)
            }
            Command::Thrust { entity, throttle } => {
                write!(f, "{} {} to {:.3}", self.id(), entity, throttle)
            }
            Command::Rotate { entity, spin } => {
                write!(f, "{} {} at {:.3} rad/s", self.id(), entity, spin)
            }
            Command::SetTimeAcceleration { factor } => write!(f, "{} x{}", self.id(), factor),
        }
    }
}
