//! Core RGA CRDT implementation.
//!
//! This module contains the RgaSequence struct and its insert, delete and
//! merge operations. Every character is placed relative to its origin, the
//! character that sat immediately to its left when it was typed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crdt::character::Character;
use crate::crdt::types::{ClockSnapshot, PositionId, SiteId};
use crate::error::RgaError;

/// What to do with a remote insert whose origin has not arrived yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CausalGapPolicy {
    /// Hold the character back until its origin is integrated
    #[default]
    Buffer,
    /// Place the character at the physical end of the sequence.
    ///
    /// Replicas that see the records in a different order can end up with a
    /// different text, so this is only kept for compatibility with peers
    /// that behave this way.
    AppendToEnd,
}

/// Outcome of [`RgaSequence::apply_remote_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteInsert {
    /// Placed after its origin
    Integrated,
    /// Already known; nothing changed
    Duplicate,
    /// Origin unknown; parked until it arrives
    Pending,
    /// Origin unknown; appended at the end
    Fallback,
}

/// The Replicated Growable Array (RGA) sequence.
///
/// # Design
///
/// - A plain vector holds the physical order, tombstones included
/// - Entries are never removed or reordered, only inserted between
/// - Concurrent inserts at one origin are ordered by [`PositionId`], which is
///   the same on every replica
/// - The document start acts as an implicit origin, written as `None`
#[derive(Debug, Clone, Default)]
pub struct RgaSequence {
    /// Physical order of all characters ever integrated
    characters: Vec<Character>,
    /// Remote inserts waiting for their origin, keyed by that origin
    pending: HashMap<PositionId, Vec<Character>>,
    gap_policy: CausalGapPolicy,
}

impl RgaSequence {
    /// Creates an empty sequence that buffers causal gaps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty sequence with an explicit causal gap policy.
    pub fn with_gap_policy(gap_policy: CausalGapPolicy) -> Self {
        RgaSequence {
            gap_policy,
            ..Self::default()
        }
    }

    pub fn gap_policy(&self) -> CausalGapPolicy {
        self.gap_policy
    }

    /// Inserts `value` at visible `index` as a local operation.
    ///
    /// `clock` is the snapshot taken after the caller incremented its own
    /// counter. The character at `index - 1` becomes the origin; inserting at
    /// 0 uses the document start.
    ///
    /// # Returns
    ///
    /// * `Ok((Character, Option<PositionId>))` - The new character and its origin
    /// * `Err(RgaError)` - If `index` is past the end of the visible text
    pub fn insert(
        &mut self,
        index: usize,
        value: char,
        site: impl Into<SiteId>,
        clock: ClockSnapshot,
    ) -> Result<(Character, Option<PositionId>), RgaError> {
        let len = self.visible_len();
        if index > len {
            return Err(RgaError::IndexOutOfBounds { index, len });
        }

        let origin = match index {
            0 => None,
            _ => self
                .visible_characters()
                .nth(index - 1)
                .map(|c| c.position_id().clone()),
        };

        let character = Character::new(value, clock, site);
        let slot = self
            .find_slot(character.position_id(), origin.as_ref())
            .unwrap_or(self.characters.len());
        self.characters.insert(slot, character.clone());

        Ok((character, origin))
    }

    /// Integrates a character received from another replica.
    ///
    /// Applying the same character twice is a no-op.
    pub fn apply_remote_insert(
        &mut self,
        character: Character,
        origin: Option<PositionId>,
    ) -> RemoteInsert {
        let id = character.position_id().clone();
        if self.contains(&id) || self.is_pending(&id) {
            return RemoteInsert::Duplicate;
        }

        let origin = match origin {
            None => {
                self.place(self.skip_greater(0, &id), character);
                return RemoteInsert::Integrated;
            }
            Some(origin) => origin,
        };

        if let Some(slot) = self.index_of(&origin) {
            self.place(self.skip_greater(slot + 1, &id), character);
            return RemoteInsert::Integrated;
        }

        match self.gap_policy {
            CausalGapPolicy::Buffer => {
                debug!(%id, %origin, "Origin not yet known, buffering insert");
                self.pending.entry(origin).or_default().push(character);
                RemoteInsert::Pending
            }
            CausalGapPolicy::AppendToEnd => {
                warn!(%id, %origin, "Origin not found, appending at end; replicas may diverge");
                self.place(self.characters.len(), character);
                RemoteInsert::Fallback
            }
        }
    }

    /// Deletes the character at visible `index` as a local operation.
    ///
    /// Returns the tombstoned character, or `None` if `index` is out of range.
    pub fn delete(&mut self, index: usize) -> Option<Character> {
        let slot = self.physical_index_of_visible(index)?;
        let character = &mut self.characters[slot];
        character.delete();
        Some(character.clone())
    }

    /// Tombstones the character identified by `id`.
    ///
    /// Deleting an unknown or already deleted identifier is a safe no-op;
    /// the former returns `None`. A character still waiting in the causal
    /// gap buffer is tombstoned there and arrives deleted.
    pub fn apply_remote_delete(&mut self, id: &PositionId) -> Option<Character> {
        if let Some(slot) = self.index_of(id) {
            let character = &mut self.characters[slot];
            character.delete();
            return Some(character.clone());
        }

        self.pending
            .values_mut()
            .flat_map(|waiting| waiting.iter_mut())
            .find(|c| c.position_id() == id)
            .map(|character| {
                character.delete();
                character.clone()
            })
    }

    /// Returns the current visible content as a String.
    pub fn visible_text(&self) -> String {
        self.visible_characters().map(Character::value).collect()
    }

    /// Iterates every integrated character, tombstones included.
    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.characters.iter()
    }

    /// Iterates the characters that make up the visible text.
    pub fn visible_characters(&self) -> impl Iterator<Item = &Character> {
        self.characters.iter().filter(|c| c.is_visible())
    }

    /// Gets the number of visible characters.
    pub fn visible_len(&self) -> usize {
        self.visible_characters().count()
    }

    /// Gets the number of integrated characters, tombstones included.
    pub fn physical_len(&self) -> usize {
        self.characters.len()
    }

    /// Gets the number of characters waiting for their origin.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Returns true if `id` has been integrated.
    pub fn contains(&self, id: &PositionId) -> bool {
        self.index_of(id).is_some()
    }

    /// Looks up an integrated character by identifier.
    pub fn get(&self, id: &PositionId) -> Option<&Character> {
        self.index_of(id).map(|slot| &self.characters[slot])
    }

    fn is_pending(&self, id: &PositionId) -> bool {
        self.pending
            .values()
            .any(|waiting| waiting.iter().any(|c| c.position_id() == id))
    }

    fn index_of(&self, id: &PositionId) -> Option<usize> {
        self.characters.iter().position(|c| c.position_id() == id)
    }

    fn physical_index_of_visible(&self, index: usize) -> Option<usize> {
        self.characters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_visible())
            .nth(index)
            .map(|(slot, _)| slot)
    }

    /// Placement rule shared by local and remote inserts.
    ///
    /// Starting right after the origin, skip every entry whose identifier is
    /// greater than `id`; the new character goes before the first entry that
    /// is not. Returns `None` when the origin is not integrated.
    fn find_slot(&self, id: &PositionId, origin: Option<&PositionId>) -> Option<usize> {
        let start = match origin {
            None => 0,
            Some(origin) => self.index_of(origin)? + 1,
        };
        Some(self.skip_greater(start, id))
    }

    fn skip_greater(&self, mut slot: usize, id: &PositionId) -> usize {
        while slot < self.characters.len() && self.characters[slot].position_id() > id {
            slot += 1;
        }
        slot
    }

    fn place(&mut self, slot: usize, character: Character) {
        let id = character.position_id().clone();
        self.characters.insert(slot, character);
        self.release_pending(id);
    }

    /// Integrates every buffered character that was waiting, directly or
    /// transitively, on `placed`.
    fn release_pending(&mut self, placed: PositionId) {
        let mut ready = vec![placed];
        while let Some(origin) = ready.pop() {
            let Some(waiting) = self.pending.remove(&origin) else {
                continue;
            };
            for character in waiting {
                let id = character.position_id().clone();
                if let Some(slot) = self.find_slot(&id, Some(&origin)) {
                    debug!(%id, %origin, "Releasing buffered insert");
                    self.characters.insert(slot, character);
                    ready.push(id);
                }
            }
        }
    }
}
