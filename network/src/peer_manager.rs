// Copyright (c) Liftnet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Peer connection management.
//!
//! Membership is static. The dial rule keeps exactly one connection per peer
//! pair: a node dials only peers with a strictly greater id and listens for
//! dials from lower ids. Each connection is one bidirectional stream opened
//! by the dialer; both sides exchange HELLO frames before application
//! traffic. A lost connection is re-dialed with bounded exponential backoff.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use quinn::{Connection, Endpoint, RecvStream, SendStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use liftnet_types::NodeId;

use crate::error::{NetworkError, Result};
use crate::frame::{decode_hello, encode_hello, FRAME_SIZE};
use crate::tls;

/// Transport tuning for the peer mesh.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub self_id: NodeId,
    /// QUIC port shared by every node.
    pub port: u16,
    /// Peer id to address, excluding self.
    pub peers: BTreeMap<NodeId, SocketAddr>,
    /// Deadline for the HELLO exchange on a fresh stream.
    pub handshake_timeout: Duration,
    /// Deadline for writing one frame before the connection is torn down.
    pub write_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub max_idle_timeout: Duration,
    pub redial_backoff_min: Duration,
    pub redial_backoff_max: Duration,
}

impl PeerConfig {
    pub fn new(self_id: NodeId, port: u16, peers: BTreeMap<NodeId, SocketAddr>) -> Self {
        Self {
            self_id,
            port,
            peers,
            handshake_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_millis(150),
            keep_alive_interval: Duration::from_secs(2),
            max_idle_timeout: Duration::from_secs(6),
            redial_backoff_min: Duration::from_millis(200),
            redial_backoff_max: Duration::from_secs(2),
        }
    }
}

/// One application frame received from a peer.
#[derive(Debug, Clone)]
pub struct IncomingFrame {
    pub from: NodeId,
    pub frame: Bytes,
}

struct PeerHandle {
    outbound: mpsc::Sender<Bytes>,
    generation: u64,
}

/// Registry of live peer connections, shared with the replicator.
///
/// Reads (broadcast fan-out) take the lock briefly on the fast path; writes
/// happen only on connect and disconnect.
pub struct PeerManager {
    self_id: NodeId,
    peers: RwLock<HashMap<NodeId, PeerHandle>>,
    generations: AtomicU64,
}

impl PeerManager {
    fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            peers: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Ids of currently connected peers, for logging.
    pub fn connected_peers(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Queue a frame to every connected peer. Non-blocking: a peer whose
    /// outbound queue is full misses this frame and catches up on the next
    /// publish tick.
    pub fn broadcast(&self, frame: Bytes) {
        self.broadcast_except(frame, &[]);
    }

    /// Queue a frame to every connected peer not in `skip`.
    pub fn broadcast_except(&self, frame: Bytes, skip: &[NodeId]) {
        let peers = self.peers.read();
        for (id, handle) in peers.iter() {
            if skip.contains(id) {
                continue;
            }
            if handle.outbound.try_send(frame.clone()).is_err() {
                debug!(peer = %id, "outbound queue full, dropping frame");
            }
        }
    }

    /// Register a connection. Returns `None` when a live connection to this
    /// peer already exists (the newcomer must be closed).
    fn register(&self, id: NodeId, outbound: mpsc::Sender<Bytes>) -> Option<u64> {
        let mut peers = self.peers.write();
        if peers.contains_key(&id) {
            return None;
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        peers.insert(id, PeerHandle { outbound, generation });
        Some(generation)
    }

    /// Drop a registration, but only the one identified by `generation`; a
    /// replacement connection registered in the meantime stays.
    fn unregister(&self, id: NodeId, generation: u64) {
        let mut peers = self.peers.write();
        if peers.get(&id).is_some_and(|h| h.generation == generation) {
            peers.remove(&id);
        }
    }
}

/// Bind the endpoint, start the listener and the dial loops.
///
/// Returns the shared peer registry and the stream of application frames
/// from all peers.
pub fn start(
    config: PeerConfig,
    cancel: CancellationToken,
) -> Result<(Arc<PeerManager>, mpsc::Receiver<IncomingFrame>)> {
    let server = tls::server_config(config.keep_alive_interval, config.max_idle_timeout)?;
    let client = tls::client_config(config.keep_alive_interval, config.max_idle_timeout)?;

    let listen: SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, config.port).into();
    let mut endpoint = Endpoint::server(server, listen)?;
    endpoint.set_default_client_config(client);

    info!(self_id = %config.self_id, %listen, "peer transport listening");

    let manager = Arc::new(PeerManager::new(config.self_id));
    let (incoming_tx, incoming_rx) = mpsc::channel(64);

    tokio::spawn(accept_loop(
        endpoint.clone(),
        Arc::clone(&manager),
        config.clone(),
        incoming_tx.clone(),
        cancel.clone(),
    ));

    for (&peer_id, &addr) in &config.peers {
        if peer_id > config.self_id {
            tokio::spawn(dial_loop(
                endpoint.clone(),
                Arc::clone(&manager),
                peer_id,
                addr,
                config.clone(),
                incoming_tx.clone(),
                cancel.clone(),
            ));
        }
    }

    Ok((manager, incoming_rx))
}

async fn accept_loop(
    endpoint: Endpoint,
    manager: Arc<PeerManager>,
    config: PeerConfig,
    incoming_tx: mpsc::Sender<IncomingFrame>,
    cancel: CancellationToken,
) {
    loop {
        let incoming = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = endpoint.accept() => match accepted {
                Some(incoming) => incoming,
                None => return,
            },
        };

        let manager = Arc::clone(&manager);
        let config = config.clone();
        let incoming_tx = incoming_tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_inbound(incoming, manager, config, incoming_tx, cancel).await {
                debug!("inbound connection ended: {e}");
            }
        });
    }
}

async fn handle_inbound(
    incoming: quinn::Incoming,
    manager: Arc<PeerManager>,
    config: PeerConfig,
    incoming_tx: mpsc::Sender<IncomingFrame>,
    cancel: CancellationToken,
) -> Result<()> {
    let connection = incoming.await?;
    let remote = connection.remote_address();

    // The dialer opens the stream and speaks first.
    let (mut send, mut recv) = timeout(config.handshake_timeout, connection.accept_bi())
        .await
        .map_err(|_| NetworkError::HandshakeTimeout)??;

    let hello = timeout(config.handshake_timeout, read_frame(&mut recv))
        .await
        .map_err(|_| NetworkError::HandshakeTimeout)??;
    let peer_id = decode_hello(&hello).ok_or(NetworkError::BadHello)?;

    send.write_all(&encode_hello(manager.self_id)).await?;

    info!(peer = %peer_id, %remote, "peer connected (inbound)");
    run_connection(manager, peer_id, connection, send, recv, config, incoming_tx, cancel).await;
    Ok(())
}

async fn dial_loop(
    endpoint: Endpoint,
    manager: Arc<PeerManager>,
    peer_id: NodeId,
    addr: SocketAddr,
    config: PeerConfig,
    incoming_tx: mpsc::Sender<IncomingFrame>,
    cancel: CancellationToken,
) {
    let mut backoff = config.redial_backoff_min;
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match dial_peer(&endpoint, addr, &config).await {
            Ok((connection, send, recv, heard_id)) => {
                if heard_id != peer_id {
                    warn!(expected = %peer_id, got = %heard_id, %addr, "peer answered with unexpected id");
                }
                info!(peer = %heard_id, %addr, "peer connected (dial)");
                backoff = config.redial_backoff_min;
                run_connection(
                    Arc::clone(&manager),
                    heard_id,
                    connection,
                    send,
                    recv,
                    config.clone(),
                    incoming_tx.clone(),
                    cancel.clone(),
                )
                .await;
                // Connection closed; fall through to re-dial.
            }
            Err(e) => {
                debug!(peer = %peer_id, %addr, "dial failed: {e}");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(config.redial_backoff_max);
    }
}

async fn dial_peer(
    endpoint: &Endpoint,
    addr: SocketAddr,
    config: &PeerConfig,
) -> Result<(Connection, SendStream, RecvStream, NodeId)> {
    let connection = endpoint.connect(addr, "liftnet")?.await?;
    let (mut send, mut recv) = connection.open_bi().await?;

    send.write_all(&encode_hello(config.self_id)).await?;

    let hello = timeout(config.handshake_timeout, read_frame(&mut recv))
        .await
        .map_err(|_| NetworkError::HandshakeTimeout)??;
    let peer_id = decode_hello(&hello).ok_or(NetworkError::BadHello)?;

    Ok((connection, send, recv, peer_id))
}

/// Pump one registered connection until it dies or is superseded.
#[allow(clippy::too_many_arguments)]
async fn run_connection(
    manager: Arc<PeerManager>,
    peer_id: NodeId,
    connection: Connection,
    send: SendStream,
    recv: RecvStream,
    config: PeerConfig,
    incoming_tx: mpsc::Sender<IncomingFrame>,
    cancel: CancellationToken,
) {
    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(32);
    let Some(generation) = manager.register(peer_id, outbound_tx) else {
        // A live connection to this peer already exists; keep it.
        debug!(peer = %peer_id, "duplicate connection rejected");
        connection.close(0u32.into(), b"duplicate");
        return;
    };

    tokio::select! {
        _ = cancel.cancelled() => {}
        result = write_frames(send, outbound_rx, config.write_timeout) => {
            if let Err(e) = result {
                debug!(peer = %peer_id, "writer stopped: {e}");
            }
        }
        result = read_frames(recv, peer_id, incoming_tx) => {
            if let Err(e) = result {
                debug!(peer = %peer_id, "reader stopped: {e}");
            }
        }
    }

    manager.unregister(peer_id, generation);
    connection.close(0u32.into(), b"closed");
    info!(peer = %peer_id, "peer disconnected");
}

async fn write_frames(
    mut send: SendStream,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    write_timeout: Duration,
) -> Result<()> {
    while let Some(frame) = outbound_rx.recv().await {
        timeout(write_timeout, send.write_all(&frame))
            .await
            .map_err(|_| NetworkError::WriteTimeout)??;
    }
    Ok(())
}

async fn read_frames(
    mut recv: RecvStream,
    peer_id: NodeId,
    incoming_tx: mpsc::Sender<IncomingFrame>,
) -> Result<()> {
    loop {
        let frame = read_frame(&mut recv).await?;
        let msg = IncomingFrame { from: peer_id, frame: Bytes::from(frame.to_vec()) };
        if incoming_tx.try_send(msg).is_err() {
            // Replicator is behind; the next snapshot supersedes this one.
            debug!(peer = %peer_id, "incoming queue full, dropping frame");
        }
    }
}

async fn read_frame(recv: &mut RecvStream) -> Result<[u8; FRAME_SIZE]> {
    let mut buf = [0u8; FRAME_SIZE];
    recv.read_exact(&mut buf).await?;
    Ok(buf)
}
