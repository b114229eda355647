//! State Server
//!
//! Async WebSocket server that exposes a `StateService` to mirrors and
//! other peers. Runs on its own bounded worker pool; the tick loop only
//! ever touches the `StateService` handle.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::{broadcast, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::network::protocol::{
    CodecError, Encoding, FaultCode, PeerRequest, ServiceReply,
};
use crate::network::queue::Enqueued;
use crate::network::service::StateService;
use crate::DEFAULT_LEAD_SERVER_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent peers.
    pub max_peers: usize,
    /// A peer silent for this long is disconnected.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LEAD_SERVER_PORT)),
            max_peers: 64,
            idle_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// State server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Reply could not be encoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Build the bounded worker pool the state server runs on.
pub fn service_runtime(workers: usize) -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers.max(1))
        .thread_name("state-service")
        .enable_all()
        .build()
}

/// Connected peer bookkeeping.
struct ConnectedPeer {
    /// Identifier used in logs.
    id: Uuid,
    /// Connection time.
    connected_at: Instant,
    /// Last request.
    last_activity: Instant,
    /// Requests answered.
    requests: u64,
}

type PeerMap = Arc<RwLock<BTreeMap<SocketAddr, ConnectedPeer>>>;

/// The state server.
pub struct StateServer {
    /// Server configuration.
    config: ServerConfig,
    /// Bound listener.
    listener: TcpListener,
    /// Shared state with the tick loop.
    service: StateService,
    /// Connected peers.
    peers: PeerMap,
    /// One permit per connection, taken at accept time.
    slots: Arc<Semaphore>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl StateServer {
    /// Bind the listener. Peers are not accepted until `run`.
    pub async fn bind(config: ServerConfig, service: StateService) -> Result<Self, ServiceError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let slots = Arc::new(Semaphore::new(config.max_peers));

        Ok(Self {
            config,
            listener,
            service,
            peers: Arc::new(RwLock::new(BTreeMap::new())),
            slots,
            shutdown_tx,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServiceError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept peers until `shutdown` is called.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), ServiceError> {
        info!("State server v{} listening", self.config.version);

        let cleanup_peers = self.peers.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_peers, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => match self.slots.clone().try_acquire_owned() {
                            Ok(permit) => {
                                debug!("New connection from {}", addr);
                                self.handle_connection(stream, addr, permit);
                            }
                            Err(_) => {
                                warn!("Peer limit reached, rejecting {}", addr);
                                self.reject_connection(stream, addr);
                            }
                        },
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        // Late submissions are answered with CommandDropped from here on.
        self.service.close();
        cleanup_handle.abort();

        Ok(())
    }

    /// Complete the handshake only to tell the peer the server is full.
    fn reject_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let handshake_timeout = self.config.idle_timeout;

        tokio::spawn(async move {
            let mut ws_stream = match timeout(handshake_timeout, accept_async(stream)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    debug!("WebSocket handshake failed for rejected {}: {}", addr, e);
                    return;
                }
                Err(_) => return,
            };

            let full = ServiceReply::fault(FaultCode::ServiceFull, "Peer limit reached");
            if let Ok(frame) = encode_reply(&full, Encoding::Json) {
                let _ = ws_stream.send(frame).await;
            }
            let _ = ws_stream.close(None).await;
        });
    }

    /// Handle a new WebSocket connection. The peer holds `permit` until its
    /// task ends.
    fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) {
        let peers = self.peers.clone();
        let service = self.service.clone();
        let idle_timeout = self.config.idle_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let peer_id = Uuid::new_v4();

            {
                let mut peers = peers.write().await;
                peers.insert(addr, ConnectedPeer {
                    id: peer_id,
                    connected_at: Instant::now(),
                    last_activity: Instant::now(),
                    requests: 0,
                });
            }
            info!(peer = %peer_id, "Peer {} connected", addr);

            loop {
                tokio::select! {
                    msg = timeout(idle_timeout, ws_receiver.next()) => {
                        let msg = match msg {
                            Ok(msg) => msg,
                            Err(_) => {
                                debug!(peer = %peer_id, "Peer {} idle, closing", addr);
                                break;
                            }
                        };

                        let (request, encoding) = match msg {
                            Some(Ok(Message::Text(text))) => {
                                (PeerRequest::from_json(&text).map_err(CodecError::from), Encoding::Json)
                            }
                            Some(Ok(Message::Binary(data))) => {
                                (PeerRequest::from_bytes(&data).map_err(CodecError::from), Encoding::Binary)
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(peer = %peer_id, "Peer {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(peer = %peer_id, "WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Pings are answered by tungstenite itself.
                            Some(Ok(_)) => continue,
                        };

                        let reply = match request {
                            Ok(request) => handle_request(&service, request),
                            Err(e) => {
                                debug!(peer = %peer_id, "Invalid message from {}: {}", addr, e);
                                ServiceReply::fault(FaultCode::InvalidMessage, "Invalid message format")
                            }
                        };

                        {
                            let mut peers = peers.write().await;
                            if let Some(peer) = peers.get_mut(&addr) {
                                peer.last_activity = Instant::now();
                                peer.requests += 1;
                            }
                        }

                        let frame = match encode_reply(&reply, encoding) {
                            Ok(frame) => frame,
                            Err(e) => {
                                error!("Failed to serialize reply: {}", e);
                                continue;
                            }
                        };
                        if ws_sender.send(frame).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let goodbye = ServiceReply::Shutdown {
                            reason: "Lead server shutting down".to_string(),
                        };
                        if let Ok(frame) = encode_reply(&goodbye, Encoding::Json) {
                            let _ = ws_sender.send(frame).await;
                        }
                        let _ = ws_sender.close().await;
                        break;
                    }
                }
            }

            let removed = peers.write().await.remove(&addr);
            if let Some(peer) = removed {
                info!(
                    peer = %peer.id,
                    requests = peer.requests,
                    connected_for = ?peer.connected_at.elapsed(),
                    "Peer {} cleaned up",
                    addr
                );
            }
        });
    }

    /// Drop bookkeeping for peers whose tasks have gone quiet.
    async fn run_cleanup_loop(peers: PeerMap, idle_timeout: Duration) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let mut peers = peers.write().await;
            let before = peers.len();
            // Leave a grace period so a live task can still remove its own entry.
            peers.retain(|_, p| now.duration_since(p.last_activity) <= idle_timeout * 2);
            if peers.len() != before {
                info!("Removed {} stale peer entries", before - peers.len());
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get connected peer count.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}

/// Answer a single peer request.
pub fn handle_request(service: &StateService, request: PeerRequest) -> ServiceReply {
    match request {
        PeerRequest::GetState => match service.latest() {
            Some(update) => ServiceReply::State((*update).clone()),
            None => ServiceReply::fault(FaultCode::NoStateYet, "No state published yet"),
        },
        PeerRequest::SubmitCommand(command) => {
            let id = command.id();
            match service.submit(command) {
                Enqueued::Accepted => ServiceReply::CommandAccepted,
                Enqueued::Dropped => {
                    warn!("Dropping {} command: service is shutting down", id);
                    ServiceReply::CommandDropped {
                        reason: "service is shutting down".to_string(),
                    }
                }
            }
        }
        PeerRequest::Ping { timestamp } => ServiceReply::Pong {
            timestamp,
            server_time: chrono::Utc::now().timestamp_millis(),
        },
    }
}

fn encode_reply(reply: &ServiceReply, encoding: Encoding) -> Result<Message, CodecError> {
    Ok(match encoding {
        Encoding::Json => Message::Text(reply.to_json()?),
        Encoding::Binary => Message::Binary(reply.to_bytes()?),
    })
}
