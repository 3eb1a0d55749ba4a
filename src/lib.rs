//! # rga-replica - replicated plain-text document
//!
//! A Replicated Growable Array (RGA) CRDT for plain text, replicated between
//! a fixed set of peer nodes over TCP.
//!
//! ## Features
//!
//! - **Conflict-free**: concurrent edits converge to the same text on every replica,
//!   whatever order the operations arrive in
//! - **Vector clocks**: each character is identified by the clock snapshot of the
//!   operation that created it plus the id of the node that made it
//! - **Tombstones**: deleted characters stay in the sequence so later inserts can
//!   still anchor on them
//! - **Causal buffering**: inserts whose left neighbour has not arrived yet are
//!   held back until it does
//!
//! ## Example
//!
//! ```rust
//! use rga_replica::{CausalGapPolicy, ReplicationNode};
//!
//! let node = ReplicationNode::new("node1", ["node2"], CausalGapPolicy::Buffer);
//! node.local_insert(0, "hello").unwrap();
//! node.local_delete(0).unwrap();
//! assert_eq!(node.visible_text(), "ello");
//! ```

pub mod config;
pub mod crdt;
pub mod error;
pub mod replication;
pub mod server;
pub mod shell;
pub mod transport;

pub use crdt::{
    CausalGapPolicy, Character, ClockSnapshot, PositionId, RemoteInsert, RgaSequence, SiteId,
    VectorClock,
};
pub use error::{CommandError, ConfigError, NodeError, RgaError};
pub use replication::{ReplicationNode, WireMessage};
