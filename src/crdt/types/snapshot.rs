//! Canonical vector-clock snapshots.
//!
//! A [`ClockSnapshot`] is the frozen copy of a vector clock that gets embedded
//! in every [`PositionId`](crate::PositionId). It always holds its
//! `(site, counter)` pairs sorted by site, which is what makes the derived
//! lexicographic ordering meaningful across replicas.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crdt::types::site::SiteId;

/// An immutable, canonically ordered sequence of `(site, counter)` pairs.
///
/// # Ordering
///
/// Snapshots compare as their pair sequences: pair by pair, site first and
/// counter second, with a shorter prefix ordering first. Two snapshots taken
/// by different replicas compare the same way everywhere because the pairs
/// are sorted on construction and on every deserialization.
///
/// # Wire format
///
/// Serializes as a JSON array of `[site, counter]` pairs. Deserializes from
/// either that array form or a JSON object mapping site to counter; both are
/// normalized through [`ClockSnapshot::from_pairs`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawSnapshot", into = "Vec<(SiteId, u64)>")]
pub struct ClockSnapshot(Vec<(SiteId, u64)>);

/// The shapes a snapshot may take on the wire.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSnapshot {
    Map(HashMap<SiteId, u64>),
    Pairs(Vec<(SiteId, u64)>),
}

impl From<RawSnapshot> for ClockSnapshot {
    fn from(raw: RawSnapshot) -> Self {
        match raw {
            RawSnapshot::Map(map) => ClockSnapshot::from_pairs(map),
            RawSnapshot::Pairs(pairs) => ClockSnapshot::from_pairs(pairs),
        }
    }
}

impl From<ClockSnapshot> for Vec<(SiteId, u64)> {
    fn from(snapshot: ClockSnapshot) -> Self {
        snapshot.0
    }
}

impl ClockSnapshot {
    /// Builds a snapshot from pairs in any order.
    ///
    /// This is the single normalization point: pairs are sorted by site and a
    /// site listed more than once keeps its highest counter.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (SiteId, u64)>,
    {
        let mut merged: BTreeMap<SiteId, u64> = BTreeMap::new();
        for (site, counter) in pairs {
            let entry = merged.entry(site).or_insert(counter);
            *entry = (*entry).max(counter);
        }
        ClockSnapshot(merged.into_iter().collect())
    }

    /// Counter recorded for `site`, or 0 when the site is absent.
    pub fn get(&self, site: &str) -> u64 {
        self.0
            .binary_search_by(|(s, _)| s.as_str().cmp(site))
            .map(|i| self.0[i].1)
            .unwrap_or(0)
    }

    /// Iterates the pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&SiteId, u64)> {
        self.0.iter().map(|(site, counter)| (site, *counter))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The canonical pairs as a slice.
    pub fn pairs(&self) -> &[(SiteId, u64)] {
        &self.0
    }
}

impl fmt::Display for ClockSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (site, counter)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{site}: {counter}")?;
        }
        write!(f, "}}")
    }
}

/// Serde adapter writing a snapshot as a JSON object (`{"node1": 3}`).
///
/// Used for the `op_id` field of insert records, which existing peers read
/// as a mapping. Reading accepts both shapes.
pub mod as_map {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::ClockSnapshot;

    pub fn serialize<S>(snapshot: &ClockSnapshot, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(snapshot.iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ClockSnapshot, D::Error>
    where
        D: Deserializer<'de>,
    {
        ClockSnapshot::deserialize(deserializer)
    }
}
