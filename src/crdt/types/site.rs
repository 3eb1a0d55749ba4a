//! Site identifier type.
//!
//! A site is one participating node. Sites are named by plain strings
//! (`"node1"`, `"node2"`, ...) so identifiers read the same on the wire,
//! in configuration files and in logs.

/// A unique identifier for each site (node) in the distributed system.
///
/// Site identifiers take part in the total order of [`PositionId`]s, where
/// they compare by Unicode codepoint order.
///
/// [`PositionId`]: crate::PositionId
pub type SiteId = String;
