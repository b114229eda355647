//! Network Layer
//!
//! Publish/subscribe boundary between a lead's tick loop and its peers,
//! plus the pull client mirrors use to reach a lead.
//! Nothing in here touches the simulation engine.

pub mod link;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod service;

pub use link::{ConnectivityError, Endpoint, SnapshotSource, StateLink};
pub use protocol::{PeerRequest, ServiceReply, StateUpdate};
pub use queue::{CommandQueue, Enqueued};
pub use server::{service_runtime, ServerConfig, ServiceError, StateServer};
pub use service::StateService;
