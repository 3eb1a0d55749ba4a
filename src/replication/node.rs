//! The replication node: one replica of the document plus its peer mesh.
//!
//! Architecture:
//! ```text
//!  local edit ──► ReplicaState (Mutex) ──► encoded records ──► PeerHandle queues
//!                 clock + sequence + log                        (one per peer)
//!                        ▲
//!  peer reader tasks ────┘ on_message (merge clock, apply op)
//! ```
//!
//! The state mutex is held only while an operation is applied. Records are
//! encoded under the lock and pushed to the peer queues after it is
//! released, so a stalled peer never blocks local edits.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, PeerConfig};
use crate::crdt::{
    CausalGapPolicy, Character, ClockSnapshot, RemoteInsert, RgaSequence, SiteId, VectorClock,
};
use crate::error::NodeError;
use crate::replication::connection::{self, ConnectionId, Direction, PeerHandle};
use crate::replication::log::{OperationKind, OperationLog};
use crate::replication::protocol::WireMessage;
use crate::transport;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Everything the node mutates, guarded as one unit.
#[derive(Debug)]
struct ReplicaState {
    clock: VectorClock,
    sequence: RgaSequence,
    log: OperationLog,
}

struct NodeInner {
    node_id: SiteId,
    state: Mutex<ReplicaState>,
    /// Active connections by peer id
    peers: RwLock<HashMap<SiteId, PeerHandle>>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    next_connection: AtomicU64,
}

/// A replica of the shared document.
///
/// Cheap to clone; all clones drive the same replica.
#[derive(Clone)]
pub struct ReplicationNode {
    inner: Arc<NodeInner>,
}

impl ReplicationNode {
    /// Creates a node that knows `known_sites` from startup.
    pub fn new<I, S>(node_id: impl Into<SiteId>, known_sites: I, gap_policy: CausalGapPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SiteId>,
    {
        let node_id = node_id.into();
        let (shutdown, _) = watch::channel(false);
        let state = ReplicaState {
            clock: VectorClock::new(node_id.clone(), known_sites),
            sequence: RgaSequence::with_gap_policy(gap_policy),
            log: OperationLog::new(),
        };

        ReplicationNode {
            inner: Arc::new(NodeInner {
                node_id,
                state: Mutex::new(state),
                peers: RwLock::new(HashMap::new()),
                running: AtomicBool::new(true),
                shutdown,
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a node from a resolved configuration.
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            config.node_id.clone(),
            config.peers.iter().map(|p| p.id.clone()),
            config.causal_gap,
        )
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Inserts `text` at visible `position`, one operation per character.
    ///
    /// Empty text and positions past the end are rejected before anything
    /// changes. Returns the number of characters inserted.
    pub fn local_insert(&self, position: usize, text: &str) -> Result<usize, NodeError> {
        if text.is_empty() {
            return Err(NodeError::EmptyText);
        }

        let records = {
            let mut state = self.inner.state.lock();
            let len = state.sequence.visible_len();
            if position > len {
                return Err(NodeError::InvalidPosition { position, len });
            }

            let mut records = Vec::with_capacity(text.len());
            for (offset, value) in text.chars().enumerate() {
                state.clock.increment();
                let op_id = state.clock.snapshot();
                let (character, origin) = state.sequence.insert(
                    position + offset,
                    value,
                    self.inner.node_id.clone(),
                    op_id.clone(),
                )?;

                let after = origin
                    .as_ref()
                    .map_or_else(|| "start".to_string(), ToString::to_string);
                state
                    .log
                    .record(OperationKind::LocalInsert, format!("'{value}' after {after}"));

                records.push(WireMessage::insert(
                    op_id,
                    self.inner.node_id.clone(),
                    character,
                    origin,
                ));
            }
            records
        };

        for record in &records {
            self.broadcast(record);
        }
        Ok(records.len())
    }

    /// Deletes the visible character at `position`.
    ///
    /// An out-of-range position is rejected without touching the clock or
    /// the log. Returns the tombstoned character.
    pub fn local_delete(&self, position: usize) -> Result<Character, NodeError> {
        let (character, record) = {
            let mut state = self.inner.state.lock();
            let len = state.sequence.visible_len();
            if position >= len {
                return Err(NodeError::InvalidPosition { position, len });
            }

            state.clock.increment();
            let character = state
                .sequence
                .delete(position)
                .ok_or(NodeError::InvalidPosition { position, len })?;
            state.log.record(
                OperationKind::LocalDelete,
                format!("'{}' {}", character.value(), character.position_id()),
            );

            let record =
                WireMessage::delete(self.inner.node_id.clone(), character.position_id().clone());
            (character, record)
        };

        self.broadcast(&record);
        Ok(character)
    }

    /// Applies a record received from a peer.
    ///
    /// Inserts merge their `op_id` into the local clock first. Duplicates
    /// and deletes of unknown characters change nothing.
    pub fn on_message(&self, message: WireMessage) {
        let mut state = self.inner.state.lock();
        match message {
            WireMessage::Insert {
                op_id,
                site_id,
                character,
                origin_id,
            } => {
                state.clock.merge(&op_id);
                let value = character.value();
                match state.sequence.apply_remote_insert(character, origin_id) {
                    RemoteInsert::Duplicate => {
                        debug!("Ignoring duplicate insert of '{}' from {}", value, site_id);
                    }
                    outcome => {
                        let detail = match outcome {
                            RemoteInsert::Pending => format!("'{value}' from {site_id} (waiting for origin)"),
                            RemoteInsert::Fallback => format!("'{value}' from {site_id} (origin missing, appended)"),
                            _ => format!("'{value}' from {site_id}"),
                        };
                        state.log.record(OperationKind::RemoteInsert, detail);
                    }
                }
            }
            WireMessage::Delete { site_id, target_id } => {
                match state.sequence.apply_remote_delete(&target_id) {
                    Some(character) => state.log.record(
                        OperationKind::RemoteDelete,
                        format!("'{}' from {}", character.value(), site_id),
                    ),
                    None => debug!("Delete from {} for unknown {}", site_id, target_id),
                }
            }
            WireMessage::Hello { node_id } => {
                debug!("Ignoring hello from {} outside of a handshake", node_id);
            }
        }
    }

    /// Decodes and applies one raw line; malformed input is dropped.
    pub fn on_line(&self, line: &str) {
        match WireMessage::decode(line) {
            Ok(message) => self.on_message(message),
            Err(e) => debug!("Discarding malformed line: {}", e),
        }
    }

    /// Returns the current visible text.
    pub fn visible_text(&self) -> String {
        self.inner.state.lock().sequence.visible_text()
    }

    /// The last `n` operation log entries, oldest first.
    pub fn operation_log(&self, n: usize) -> Vec<String> {
        let state = self.inner.state.lock();
        state.log.last(n).iter().map(ToString::to_string).collect()
    }

    /// Total number of operation log entries.
    pub fn operation_count(&self) -> usize {
        self.inner.state.lock().log.len()
    }

    /// Copy of the current vector clock.
    pub fn clock_snapshot(&self) -> ClockSnapshot {
        self.inner.state.lock().clock.snapshot()
    }

    /// Number of remote inserts waiting for their origin.
    pub fn pending_inserts(&self) -> usize {
        self.inner.state.lock().sequence.pending_len()
    }

    /// Ids of peers with an active connection, sorted.
    pub fn peers(&self) -> Vec<SiteId> {
        let mut peers: Vec<SiteId> = self.inner.peers.read().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Binds `addr` and accepts inbound peers until shutdown.
    ///
    /// Returns the bound address, which differs from `addr` for port 0.
    pub async fn listen(&self, addr: &str) -> Result<SocketAddr, NodeError> {
        if !self.is_running() {
            return Err(NodeError::Shutdown);
        }

        let listener = transport::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("[Node {}] Listening on {}", self.node_id(), local_addr);

        let listener = Arc::new(listener);
        let accept = move || {
            let listener = Arc::clone(&listener);
            async move {
                let (stream, remote) = listener.accept().await?;
                debug!("Accepted connection from {}", remote);
                let _ = stream.set_nodelay(true);
                Ok::<_, io::Error>(stream)
            }
        };
        tokio::spawn(accept_loop(
            self.clone(),
            accept,
            self.inner.shutdown.subscribe(),
        ));

        Ok(local_addr)
    }

    /// Dials a peer and starts the handshake.
    pub async fn connect(&self, addr: &str) -> Result<ConnectionId, NodeError> {
        if !self.is_running() {
            return Err(NodeError::Shutdown);
        }

        debug!("[Node {}] Connecting to {}", self.node_id(), addr);
        let stream = transport::connect(addr).await?;
        Ok(self.attach(stream, Direction::Outbound))
    }

    /// Dials every configured peer concurrently.
    ///
    /// Failures are logged and not retried. Returns how many dials succeeded.
    pub async fn connect_peers(&self, peers: &[PeerConfig]) -> usize {
        let attempts = peers.iter().map(|peer| async move {
            match self.connect(&peer.addr).await {
                Ok(_) => {
                    info!("[Node {}] Connected to peer {}", self.node_id(), peer.id);
                    true
                }
                Err(e) => {
                    warn!("[Node {}] Failed to connect to {}: {}", self.node_id(), peer.id, e);
                    false
                }
            }
        });
        join_all(attempts).await.into_iter().filter(|ok| *ok).count()
    }

    /// Runs the connection protocol over an established stream.
    ///
    /// Works for any ordered byte stream, TCP or in-memory.
    pub fn attach<S>(&self, stream: S, direction: Direction) -> ConnectionId
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed));
        connection::spawn(
            self.clone(),
            stream,
            id,
            direction,
            self.inner.shutdown.subscribe(),
        );
        id
    }

    /// Stops accepting, closes every connection and ends all tasks.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        self.inner.peers.write().clear();
        info!("[Node {}] Shut down", self.node_id());
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut shutdown = self.inner.shutdown.subscribe();
        async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        }
    }

    pub(crate) fn register_peer(&self, peer: SiteId, handle: PeerHandle) {
        if !self.is_running() {
            return;
        }
        info!("[Node {}] Peer {} active on {}", self.node_id(), peer, handle.id);
        self.inner.peers.write().insert(peer, handle);
    }

    /// Removes `peer` only if the map still points at connection `id`.
    pub(crate) fn unregister_peer(&self, peer: &str, id: ConnectionId) {
        let mut peers = self.inner.peers.write();
        if peers.get(peer).is_some_and(|h| h.id == id) {
            peers.remove(peer);
        }
    }

    /// Queues `message` for every active peer.
    ///
    /// Peers whose writer has stopped are dropped from the map; the others
    /// are unaffected.
    fn broadcast(&self, message: &WireMessage) {
        let line: Arc<str> = match message.encode() {
            Ok(line) => line.into(),
            Err(e) => {
                warn!("Failed to encode {} record: {}", message.kind(), e);
                return;
            }
        };

        let failed: Vec<(SiteId, ConnectionId)> = {
            let peers = self.inner.peers.read();
            peers
                .iter()
                .filter(|(_, handle)| !handle.send(line.clone()))
                .map(|(peer, handle)| (peer.clone(), handle.id))
                .collect()
        };

        for (peer, id) in failed {
            warn!("[Node {}] Dropping unreachable peer {}", self.node_id(), peer);
            self.unregister_peer(&peer, id);
        }
    }
}

/// Attaches every accepted stream until shutdown.
///
/// A failed accept only delays the next one; the loop ends on shutdown.
async fn accept_loop<F, Fut, S>(node: ReplicationNode, mut accept: F, mut shutdown: watch::Receiver<bool>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<S>>,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    while !*shutdown.borrow() {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = accept() => match accepted {
                Ok(stream) => {
                    node.attach(stream, Direction::Inbound);
                }
                Err(e) => {
                    warn!("[Node {}] Accept failed: {}", node.node_id(), e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    info!("[Node {}] Listener closed", node.node_id());
}
