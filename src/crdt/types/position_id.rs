//! Position identifiers for characters in the RGA.
//!
//! This module contains the PositionId struct which serves as a globally unique
//! identifier for each character in the RGA, providing both identity and ordering.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crdt::types::site::SiteId;
use crate::crdt::types::snapshot::ClockSnapshot;

/// A unique identifier for each character in the RGA.
///
/// Built from the vector-clock snapshot taken right after the originating site
/// incremented its own counter, plus that site's identifier. Every site bumps
/// its counter before each local operation, so no two operations ever produce
/// the same identifier.
///
/// # Ordering
///
/// Identifiers are ordered first by clock snapshot (see [`ClockSnapshot`]),
/// then by site id. The order is a pure function of those two values, so every
/// replica agrees on it regardless of arrival order.
///
/// # Wire format
///
/// A two-element JSON array `[[[site, counter], ...], site]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(pub ClockSnapshot, pub SiteId);

impl PositionId {
    /// Creates a new PositionId from a clock snapshot and the originating site
    pub fn new(clock: ClockSnapshot, site: impl Into<SiteId>) -> Self {
        PositionId(clock, site.into())
    }

    /// Gets the clock snapshot
    pub fn clock(&self) -> &ClockSnapshot {
        &self.0
    }

    /// Gets the originating site
    pub fn site(&self) -> &str {
        &self.1
    }

    /// Counter of the originating site inside the snapshot
    pub fn counter(&self) -> u64 {
        self.0.get(&self.1)
    }
}

impl PartialOrd for PositionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PositionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0).then_with(|| self.1.cmp(&other.1))
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.1, self.0)
    }
}

/// Serde adapter for an optional origin.
///
/// The document start is written as `[null, null]`, matching the shape of a
/// present identifier so both fit the same two-slot array.
pub mod origin {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::PositionId;
    use crate::crdt::types::site::SiteId;
    use crate::crdt::types::snapshot::ClockSnapshot;

    pub fn serialize<S>(origin: &Option<PositionId>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match origin {
            Some(id) => id.serialize(serializer),
            None => (None::<ClockSnapshot>, None::<SiteId>).serialize(serializer),
        }
    }

    /// Accepts `null`, `[null, null]` or a full `[clock, site]` pair.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PositionId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<(Option<ClockSnapshot>, Option<SiteId>)>::deserialize(deserializer)?;
        match raw {
            None | Some((None, None)) => Ok(None),
            Some((Some(clock), Some(site))) => Ok(Some(PositionId(clock, site))),
            Some((Some(_), None)) => Err(D::Error::custom("origin has a clock but no site")),
            Some((None, Some(_))) => Err(D::Error::custom("origin has a site but no clock")),
        }
    }
}
