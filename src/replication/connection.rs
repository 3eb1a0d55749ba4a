//! Per-connection tasks and the handshake state machine.
//!
//! Every live connection runs two tasks:
//! - a writer draining an unbounded queue of encoded lines, so a broadcast
//!   is a queue push and never waits on a slow peer
//! - a reader that performs the handshake and feeds operation records to
//!   the node
//!
//! ```text
//! Connecting ──► Handshaking ──► Active ──► Closed
//!  (outbound)     (hello sent)   (hello      (EOF, error
//!                                 received)   or shutdown)
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::crdt::SiteId;
use crate::replication::node::ReplicationNode;
use crate::replication::protocol::WireMessage;
use crate::transport;

/// Lifecycle of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Outbound dial in progress
    Connecting,
    /// Our hello is queued; waiting for the peer's
    Handshaking,
    /// Bound to a peer id and carrying operation records
    Active,
    /// Terminal; removed from the connection map
    Closed,
}

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Process-local connection number, used to tell apart two connections to
/// the same peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Sending side of a connection, stored in the node's connection map.
#[derive(Debug, Clone)]
pub(crate) struct PeerHandle {
    pub(crate) id: ConnectionId,
    sender: mpsc::UnboundedSender<Arc<str>>,
}

impl PeerHandle {
    /// Queues an encoded line. Returns false once the writer is gone.
    pub(crate) fn send(&self, line: Arc<str>) -> bool {
        self.sender.send(line).is_ok()
    }
}

/// Reader-side bookkeeping for one connection.
#[derive(Debug)]
pub(crate) struct Connection {
    id: ConnectionId,
    direction: Direction,
    state: ConnectionState,
    peer: Option<SiteId>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, direction: Direction) -> Self {
        let state = match direction {
            Direction::Outbound => ConnectionState::Connecting,
            Direction::Inbound => ConnectionState::Handshaking,
        };
        Connection {
            id,
            direction,
            state,
            peer: None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(
                "{} ({:?}) {:?} -> {:?}",
                self.id, self.direction, self.state, next
            );
            self.state = next;
        }
    }
}

/// Splits `stream`, queues our hello and spawns the reader and writer tasks.
pub(crate) fn spawn<S>(
    node: ReplicationNode,
    stream: S,
    id: ConnectionId,
    direction: Direction,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (sender, queue) = mpsc::unbounded_channel();
    let handle = PeerHandle { id, sender };

    let mut connection = Connection::new(id, direction);
    match WireMessage::hello(node.node_id()).encode() {
        Ok(hello) => {
            handle.send(hello.into());
        }
        Err(e) => warn!("Failed to encode hello: {}", e),
    }
    connection.transition(ConnectionState::Handshaking);

    tokio::spawn(write_loop(writer, queue, id));
    tokio::spawn(read_loop(node, reader, handle, connection, shutdown));
}

async fn write_loop<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<Arc<str>>, id: ConnectionId)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = queue.recv().await {
        if let Err(e) = transport::send_line(&mut writer, &line).await {
            warn!("{} send failed: {}", id, e);
            break;
        }
    }
    // Dropping the queue makes further sends on this handle fail
    drop(queue);
    let _ = writer.shutdown().await;
    debug!("{} writer stopped", id);
}

async fn read_loop<R>(
    node: ReplicationNode,
    reader: R,
    handle: PeerHandle,
    mut connection: Connection,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = transport::receive_lines(reader);

    while !*shutdown.borrow() {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = lines.next_line() => next,
        };

        match next {
            Ok(Some(line)) => handle_line(&node, &handle, &mut connection, &line),
            Ok(None) => {
                debug!("{} closed by remote", connection.id);
                break;
            }
            Err(e) => {
                warn!("{} receive failed: {}", connection.id, e);
                break;
            }
        }
    }

    connection.transition(ConnectionState::Closed);
    if let Some(peer) = connection.peer.take() {
        node.unregister_peer(&peer, connection.id);
        info!("[Node {}] Disconnected from peer {}", node.node_id(), peer);
    }
}

fn handle_line(
    node: &ReplicationNode,
    handle: &PeerHandle,
    connection: &mut Connection,
    line: &str,
) {
    if line.trim().is_empty() {
        return;
    }

    let message = match WireMessage::decode(line) {
        Ok(message) => message,
        Err(e) => {
            debug!("{} discarding malformed line: {}", connection.id, e);
            return;
        }
    };

    match message {
        WireMessage::Hello { node_id } if node_id.is_empty() => {
            warn!("{} ignoring hello without a node id", connection.id);
        }
        WireMessage::Hello { node_id } => {
            if let Some(previous) = connection.peer.replace(node_id.clone()) {
                if previous != node_id {
                    debug!("{} rebinding from {} to {}", connection.id, previous, node_id);
                    node.unregister_peer(&previous, connection.id);
                }
            }
            connection.transition(ConnectionState::Active);
            node.register_peer(node_id, handle.clone());
        }
        message if connection.state() != ConnectionState::Active => {
            warn!(
                "{} dropping {} record received before handshake",
                connection.id,
                message.kind()
            );
        }
        message => node.on_message(message),
    }
}
