//! Type definitions for the RGA CRDT.
//!
//! This module contains all the fundamental types used throughout the RGA implementation,
//! organized into focused submodules for better maintainability.

pub mod clock;
pub mod position_id;
pub mod site;
pub mod snapshot;

pub use clock::VectorClock;
pub use position_id::PositionId;
pub use site::SiteId;
pub use snapshot::ClockSnapshot;
