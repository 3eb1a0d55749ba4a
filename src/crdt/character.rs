//! Character definition for the RGA CRDT.
//!
//! This module contains the Character struct which represents individual
//! codepoints in the replicated document.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::crdt::types::{ClockSnapshot, PositionId, SiteId};

/// Represents a single character within the RGA.
///
/// Each character contains:
/// - The codepoint it carries
/// - A position identifier that fixes its place in the total order
/// - A deletion flag that acts as a tombstone for logical deletion
///
/// # Tombstone Deletion
///
/// Characters are never removed from the sequence. Deleting only sets the
/// tombstone, and nothing clears it again, so later inserts can still find
/// a deleted character when it is their origin.
///
/// Equality, hashing and ordering look at the position identifier only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CharacterRecord", into = "CharacterRecord")]
pub struct Character {
    value: char,
    position_id: PositionId,
    deleted: bool,
}

impl Character {
    /// Creates a live character stamped with `clock` and `site`
    pub fn new(value: char, clock: ClockSnapshot, site: impl Into<SiteId>) -> Self {
        Character {
            value,
            position_id: PositionId::new(clock, site),
            deleted: false,
        }
    }

    /// Creates a live character with an existing identifier
    pub fn with_id(value: char, position_id: PositionId) -> Self {
        Character {
            value,
            position_id,
            deleted: false,
        }
    }

    pub fn value(&self) -> char {
        self.value
    }

    pub fn position_id(&self) -> &PositionId {
        &self.position_id
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns true if this character contributes to the visible text
    pub fn is_visible(&self) -> bool {
        !self.deleted
    }

    /// Marks this character as deleted.
    ///
    /// Returns false when it was already a tombstone.
    pub fn delete(&mut self) -> bool {
        let was_live = !self.deleted;
        self.deleted = true;
        was_live
    }
}

impl PartialEq for Character {
    fn eq(&self, other: &Self) -> bool {
        self.position_id == other.position_id
    }
}

impl Eq for Character {}

impl Hash for Character {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.position_id.hash(state);
    }
}

impl PartialOrd for Character {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Character {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position_id.cmp(&other.position_id)
    }
}

/// Flat wire form: `{"value", "vector_clock", "site_id", "deleted"}`.
#[derive(Serialize, Deserialize)]
struct CharacterRecord {
    value: char,
    vector_clock: ClockSnapshot,
    site_id: SiteId,
    #[serde(default)]
    deleted: bool,
}

impl From<CharacterRecord> for Character {
    fn from(record: CharacterRecord) -> Self {
        Character {
            value: record.value,
            position_id: PositionId(record.vector_clock, record.site_id),
            deleted: record.deleted,
        }
    }
}

impl From<Character> for CharacterRecord {
    fn from(character: Character) -> Self {
        let PositionId(vector_clock, site_id) = character.position_id;
        CharacterRecord {
            value: character.value,
            vector_clock,
            site_id,
            deleted: character.deleted,
        }
    }
}
