//! Protocol Messages
//!
//! Wire format between mirrors/peers and the lead's state service.
//! Text frames carry JSON for debugging ease, binary frames carry bincode.
//! A reply is always encoded the same way as the request it answers.

use serde::{Deserialize, Serialize};

use crate::sim::command::Command;
use crate::sim::snapshot::{SnapshotDigest, StateSnapshot};

// =============================================================================
// PEER -> SERVICE MESSAGES
// =============================================================================

/// Messages sent from a peer to the state service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRequest {
    /// Pull the latest published snapshot.
    GetState,

    /// Queue a command for the lead's next tick.
    SubmitCommand(Command),

    /// Ping for latency measurement.
    Ping {
        /// Peer timestamp, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVICE -> PEER MESSAGES
// =============================================================================

/// Messages sent from the state service to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceReply {
    /// Latest published snapshot.
    State(StateUpdate),

    /// Command queued for the next tick.
    CommandAccepted,

    /// Command discarded (service shutting down).
    CommandDropped {
        /// Why it was dropped.
        reason: String,
    },

    /// Pong response.
    Pong {
        /// Echoed peer timestamp.
        timestamp: u64,
        /// Server wall clock, milliseconds since the epoch.
        server_time: i64,
    },

    /// Request could not be handled.
    Error(ServiceFault),

    /// Service is shutting down.
    Shutdown {
        /// Reason given to peers.
        reason: String,
    },
}

/// A snapshot plus the digest computed when it was served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// The snapshot.
    pub snapshot: StateSnapshot,
    /// `snapshot.digest()` at publication time.
    pub digest: SnapshotDigest,
}

impl StateUpdate {
    /// Wrap a snapshot with its digest.
    pub fn new(snapshot: StateSnapshot) -> Self {
        let digest = snapshot.digest();
        Self { snapshot, digest }
    }

    /// True if the digest matches the snapshot contents.
    pub fn verify(&self) -> bool {
        self.snapshot.digest() == self.digest
    }
}

/// Error details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceFault {
    /// Error code.
    pub code: FaultCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// Frame could not be decoded.
    InvalidMessage,
    /// Peer limit reached.
    ServiceFull,
    /// Nothing has been published yet.
    NoStateYet,
}

// =============================================================================
// ENCODING
// =============================================================================

/// Frame encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// JSON in a text frame.
    Json,
    /// bincode in a binary frame.
    Binary,
}

/// Encoding/decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON failure.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// bincode failure.
    #[error("bincode: {0}")]
    Binary(#[from] bincode::Error),
}

impl PeerRequest {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServiceReply {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Build an error reply.
    pub fn fault(code: FaultCode, message: impl Into<String>) -> Self {
        ServiceReply::Error(ServiceFault {
            code,
            message: message.into(),
        })
    }
}
