//! CRDT (Conflict-free Replicated Data Type) implementation module.
//!
//! This module contains the RGA (Replicated Growable Array) sequence and all
//! its supporting types: characters, position identifiers and vector clocks.

pub mod character;
pub mod rga;
pub mod types;

// Re-export the main public API
pub use character::Character;
pub use rga::{CausalGapPolicy, RemoteInsert, RgaSequence};
pub use types::{ClockSnapshot, PositionId, SiteId, VectorClock};
