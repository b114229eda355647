//! State Snapshots
//!
//! An immutable copy of the whole simulation at one tick boundary.
//! Every consumer owns its own copy; nothing is shared mutably between
//! the tick loop and the network service.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Digest output type (256 bits / 32 bytes)
pub type SnapshotDigest = [u8; 32];

/// Domain separator for snapshot digests.
const SNAPSHOT_DOMAIN: &[u8] = b"FLIGHT_SYNC_STATE_V1";

// =============================================================================
// ENTITY STATE
// =============================================================================

/// Kinematic state of one simulated entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Unique entity name.
    pub name: String,
    /// Position, metres.
    pub position: [f64; 2],
    /// Velocity, metres per second.
    pub velocity: [f64; 2],
    /// Heading, radians.
    pub heading: f64,
    /// Angular velocity, radians per second.
    pub spin: f64,
    /// Engine throttle in `[0, 1]`.
    pub throttle: f64,
    /// Acceleration at full throttle, m/s^2.
    pub max_acceleration: f64,
}

impl EntityState {
    /// Create an entity at rest.
    pub fn at_rest(name: impl Into<String>, position: [f64; 2]) -> Self {
        Self {
            name: name.into(),
            position,
            velocity: [0.0, 0.0],
            heading: 0.0,
            spin: 0.0,
            throttle: 0.0,
            max_acceleration: 10.0,
        }
    }

    /// True if every numeric field is finite.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.heading.is_finite()
            && self.spin.is_finite()
            && self.throttle.is_finite()
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Entire simulation state at one tick boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Ticks stepped since the save was loaded.
    pub tick: u64,
    /// Simulated seconds since the save was loaded.
    pub sim_time: f64,
    /// Time acceleration factor.
    pub time_acceleration: f64,
    /// Entities, in save-file order.
    pub entities: Vec<EntityState>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            tick: 0,
            sim_time: 0.0,
            time_acceleration: 1.0,
            entities: Vec::new(),
        }
    }
}

impl StateSnapshot {
    /// Look up an entity by name.
    pub fn entity(&self, name: &str) -> Option<&EntityState> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Deterministic digest of the full snapshot.
    ///
    /// Field order is fixed; floats are hashed by their bit pattern so the
    /// digest only matches a bit-identical copy.
    pub fn digest(&self) -> SnapshotDigest {
        let mut hasher = Sha256::new();
        hasher.update(SNAPSHOT_DOMAIN);
        hasher.update(self.tick.to_le_bytes());
        hasher.update(self.sim_time.to_bits().to_le_bytes());
        hasher.update(self.time_acceleration.to_bits().to_le_bytes());
        hasher.update((self.entities.len() as u32).to_le_bytes());

        for entity in &self.entities {
            hasher.update((entity.name.len() as u32).to_le_bytes());
            hasher.update(entity.name.as_bytes());
            for value in entity.position.iter().chain(entity.velocity.iter()) {
                hasher.update(value.to_bits().to_le_bytes());
            }
            hasher.update(entity.heading.to_bits().to_le_bytes());
            hasher.update(entity.spin.to_bits().to_le_bytes());
            hasher.update(entity.throttle.to_bits().to_le_bytes());
            hasher.update(entity.max_acceleration.to_bits().to_le_bytes());
        }

        hasher.finalize().into()
    }

    /// Short hex prefix of the digest, for logs.
    pub fn short_digest(&self) -> String {
        hex::encode(&self.digest()[..4])
    }
}
