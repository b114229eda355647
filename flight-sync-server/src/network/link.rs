//! State Link
//!
//! Blocking pull client used by mirrors. The mirror's tick loop calls
//! `fetch` directly, so every socket operation is bounded by the link
//! timeout; a timeout is reported like any other connectivity failure.
//!
//! The connection is opened on construction and closed on drop. After a
//! failure the socket is discarded and reopened on the next call.

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::{
    self, client::IntoClientRequest, handshake::HandshakeError, protocol::WebSocket, Message,
};
use tracing::{debug, info};

use crate::network::protocol::{CodecError, PeerRequest, ServiceReply};
use crate::sim::command::Command;
use crate::sim::snapshot::StateSnapshot;

// =============================================================================
// ENDPOINT
// =============================================================================

/// Host/port of the lead a mirror is bound to. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// WebSocket URL of the lead's state server.
    pub fn url(&self) -> String {
        if self.host.contains(':') {
            format!("ws://[{}]:{}/", self.host, self.port)
        } else {
            format!("ws://{}:{}/", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "mirror://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "mirror://{}:{}", self.host, self.port)
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Connectivity errors. All of them are recoverable: the caller decides
/// whether to retry later or stop networking.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    /// Host name did not resolve.
    #[error("could not resolve {endpoint}: {source}")]
    Resolve {
        /// Lead endpoint.
        endpoint: Endpoint,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// TCP connection failed.
    #[error("could not connect to {endpoint}: {source}")]
    Connect {
        /// Lead endpoint.
        endpoint: Endpoint,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// WebSocket failure.
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// No reply within the link timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Connection closed by the lead.
    #[error("connection closed by lead")]
    Closed,

    /// Lead announced it is shutting down.
    #[error("lead is shutting down: {0}")]
    LeadShutdown(String),

    /// Reply could not be decoded.
    #[error("could not decode reply: {0}")]
    Decode(#[from] CodecError),

    /// Snapshot digest did not match its contents.
    #[error("snapshot for tick {tick} failed digest verification")]
    Corrupt {
        /// Tick of the rejected snapshot.
        tick: u64,
    },

    /// Lead answered with an error or refusal.
    #[error("lead refused request: {0}")]
    Refused(String),

    /// Lead answered with the wrong kind of reply.
    #[error("unexpected reply: {0}")]
    Unexpected(String),
}

impl ConnectivityError {
    /// True for decode-type failures, which usually mean both ends were
    /// built from different message definitions.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, ConnectivityError::Decode(_))
    }
}

// =============================================================================
// SNAPSHOT SOURCE
// =============================================================================

/// Anything a mirror can pull authoritative snapshots from.
pub trait SnapshotSource {
    /// Block until a snapshot arrives or the attempt fails.
    fn fetch(&mut self) -> Result<StateSnapshot, ConnectivityError>;

    /// Lead this source talks to.
    fn endpoint(&self) -> &Endpoint;
}

// =============================================================================
// STATE LINK
// =============================================================================

/// Blocking WebSocket client to a lead's state server.
pub struct StateLink {
    endpoint: Endpoint,
    timeout: Duration,
    socket: Option<WebSocket<TcpStream>>,
}

impl StateLink {
    /// Connect to the lead. Fails if the lead is unreachable.
    pub fn connect(endpoint: Endpoint, timeout: Duration) -> Result<Self, ConnectivityError> {
        let socket = open_socket(&endpoint, timeout)?;
        info!("Connected to lead server {}", endpoint);

        Ok(Self {
            endpoint,
            timeout,
            socket: Some(socket),
        })
    }

    /// Check if a socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Send a command to the lead's queue.
    pub fn submit(&mut self, command: Command) -> Result<(), ConnectivityError> {
        match self.round_trip(&PeerRequest::SubmitCommand(command))? {
            ServiceReply::CommandAccepted => Ok(()),
            ServiceReply::CommandDropped { reason } => Err(ConnectivityError::Refused(reason)),
            other => Err(unexpected(other)),
        }
    }

    /// Send one request and wait for its reply, dropping the socket on failure.
    fn round_trip(&mut self, request: &PeerRequest) -> Result<ServiceReply, ConnectivityError> {
        let result = self.try_round_trip(request);
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    fn try_round_trip(&mut self, request: &PeerRequest) -> Result<ServiceReply, ConnectivityError> {
        let timeout = self.timeout;
        let bytes = request.to_bytes().map_err(CodecError::from)?;
        let socket = self.socket()?;

        socket
            .send(Message::Binary(bytes))
            .map_err(|e| map_ws_error(e, timeout))?;

        loop {
            match socket.read().map_err(|e| map_ws_error(e, timeout))? {
                Message::Binary(data) => {
                    return Ok(ServiceReply::from_bytes(&data).map_err(CodecError::from)?);
                }
                Message::Text(text) => {
                    return Ok(ServiceReply::from_json(&text).map_err(CodecError::from)?);
                }
                Message::Close(_) => return Err(ConnectivityError::Closed),
                _ => continue,
            }
        }
    }

    fn socket(&mut self) -> Result<&mut WebSocket<TcpStream>, ConnectivityError> {
        if self.socket.is_none() {
            let socket = open_socket(&self.endpoint, self.timeout)?;
            info!("Reconnected to lead server {}", self.endpoint);
            self.socket = Some(socket);
        }
        self.socket.as_mut().ok_or(ConnectivityError::Closed)
    }

    fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None);
            let _ = socket.flush();
            debug!("Closed connection to {}", self.endpoint);
        }
    }
}

impl SnapshotSource for StateLink {
    fn fetch(&mut self) -> Result<StateSnapshot, ConnectivityError> {
        match self.round_trip(&PeerRequest::GetState)? {
            ServiceReply::State(update) => {
                if !update.verify() {
                    self.disconnect();
                    return Err(ConnectivityError::Corrupt {
                        tick: update.snapshot.tick,
                    });
                }
                Ok(update.snapshot)
            }
            ServiceReply::Shutdown { reason } => {
                self.disconnect();
                Err(ConnectivityError::LeadShutdown(reason))
            }
            ServiceReply::Error(fault) => Err(ConnectivityError::Refused(fault.message)),
            other => Err(unexpected(other)),
        }
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for StateLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn open_socket(endpoint: &Endpoint, timeout: Duration) -> Result<WebSocket<TcpStream>, ConnectivityError> {
    let addrs: Vec<SocketAddr> = (endpoint.host(), endpoint.port())
        .to_socket_addrs()
        .map_err(|source| ConnectivityError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?
        .collect();

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_error = e,
        }
    }
    let stream = stream.ok_or_else(|| ConnectivityError::Connect {
        endpoint: endpoint.clone(),
        source: last_error,
    })?;

    let configure = |stream: &TcpStream| -> io::Result<()> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)
    };
    configure(&stream).map_err(|source| ConnectivityError::Connect {
        endpoint: endpoint.clone(),
        source,
    })?;

    let request = endpoint.url().into_client_request()?;
    match tungstenite::client::client(request, stream) {
        Ok((socket, _response)) => Ok(socket),
        Err(HandshakeError::Failure(e)) => Err(map_ws_error(e, timeout)),
        Err(HandshakeError::Interrupted(_)) => Err(ConnectivityError::Timeout(timeout)),
    }
}

fn map_ws_error(error: tungstenite::Error, timeout: Duration) -> ConnectivityError {
    match error {
        tungstenite::Error::Io(e)
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            ConnectivityError::Timeout(timeout)
        }
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ConnectivityError::Closed
        }
        other => ConnectivityError::Transport(other),
    }
}

fn unexpected(reply: ServiceReply) -> ConnectivityError {
    ConnectivityError::Unexpected(format!("{reply:?}"))
}
