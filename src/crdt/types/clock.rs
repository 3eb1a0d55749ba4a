//! Vector clock implementation for tracking causal history.
//!
//! This module contains the VectorClock struct which keeps one counter per
//! known site and produces the snapshots embedded in position identifiers.

use std::collections::BTreeMap;
use std::fmt;

use crate::crdt::types::site::SiteId;
use crate::crdt::types::snapshot::ClockSnapshot;

/// A per-site vector clock.
///
/// The owning site's counter moves forward by exactly one per local
/// operation. Merging a remote snapshot takes the pointwise maximum, so no
/// entry ever decreases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorClock {
    site_id: SiteId,
    counters: BTreeMap<SiteId, u64>,
}

impl VectorClock {
    /// Creates a clock for `site_id` with every known site (self included) at 0
    pub fn new<I, S>(site_id: impl Into<SiteId>, known_sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SiteId>,
    {
        let site_id = site_id.into();
        let mut counters: BTreeMap<SiteId, u64> =
            known_sites.into_iter().map(|s| (s.into(), 0)).collect();
        counters.entry(site_id.clone()).or_insert(0);
        VectorClock { site_id, counters }
    }

    /// Advances this site's own counter and returns the new value.
    ///
    /// Must be called once per locally originated operation, before the
    /// operation is applied, so the snapshot taken afterwards reflects it.
    pub fn increment(&mut self) -> u64 {
        let counter = self.counters.entry(self.site_id.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Merges a remote snapshot: pointwise max, unknown sites adopted as-is
    pub fn merge(&mut self, remote: &ClockSnapshot) {
        for (site, counter) in remote.iter() {
            let local = self.counters.entry(site.clone()).or_insert(0);
            *local = (*local).max(counter);
        }
    }

    /// Returns an immutable copy of the current counters
    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot::from_pairs(self.counters.iter().map(|(s, c)| (s.clone(), *c)))
    }

    /// Gets the counter for a site (0 if unknown)
    pub fn get(&self, site: &str) -> u64 {
        self.counters.get(site).copied().unwrap_or(0)
    }

    /// Gets this clock's own site id
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Number of sites this clock knows about
    pub fn known_sites(&self) -> usize {
        self.counters.len()
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VectorClock({})", self.snapshot())
    }
}
