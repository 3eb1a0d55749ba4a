//! Replication of the document between nodes.
//!
//! This module contains the node that owns a replica, the wire protocol it
//! speaks, the per-connection tasks and the operation log.

pub mod connection;
pub mod log;
pub mod node;
pub mod protocol;

pub use connection::{ConnectionId, ConnectionState, Direction};
pub use log::{LogEntry, OperationKind, OperationLog};
pub use node::ReplicationNode;
pub use protocol::WireMessage;
