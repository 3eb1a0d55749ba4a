//! Line-delimited JSON wire protocol between replicas.
//!
//! Wire format, one JSON object per line:
//! ```text
//! {"type":"hello","node_id":"node1"}
//! {"type":"insert","op_id":{..},"site_id":"node1","char":{..},"origin_id":[[..],"node1"]}
//! {"type":"delete","site_id":"node1","target_id":[[..],"node1"]}
//! ```
//!
//! Every clock snapshot is normalized to sorted pairs while decoding, no
//! matter whether the sender wrote it as an object or as pairs.

use serde::{Deserialize, Serialize};

use crate::crdt::types::{position_id, snapshot};
use crate::crdt::{Character, ClockSnapshot, PositionId, SiteId};

/// A single protocol record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    /// First record on every connection, in both directions
    Hello { node_id: SiteId },

    /// A character inserted by `site_id`
    Insert {
        /// Sender's clock right after the operation
        #[serde(default, with = "snapshot::as_map")]
        op_id: ClockSnapshot,
        site_id: SiteId,
        #[serde(rename = "char")]
        character: Character,
        /// Left neighbor at insertion time; `[null, null]` for document start
        #[serde(with = "position_id::origin")]
        origin_id: Option<PositionId>,
    },

    /// A tombstone for `target_id`
    Delete { site_id: SiteId, target_id: PositionId },
}

impl WireMessage {
    pub fn hello(node_id: impl Into<SiteId>) -> Self {
        WireMessage::Hello {
            node_id: node_id.into(),
        }
    }

    pub fn insert(
        op_id: ClockSnapshot,
        site_id: impl Into<SiteId>,
        character: Character,
        origin_id: Option<PositionId>,
    ) -> Self {
        WireMessage::Insert {
            op_id,
            site_id: site_id.into(),
            character,
            origin_id,
        }
    }

    pub fn delete(site_id: impl Into<SiteId>, target_id: PositionId) -> Self {
        WireMessage::Delete {
            site_id: site_id.into(),
            target_id,
        }
    }

    /// Encodes the record as one newline-terminated line.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decodes one line (with or without its trailing newline).
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::Insert { .. } => "insert",
            WireMessage::Delete { .. } => "delete",
        }
    }
}
