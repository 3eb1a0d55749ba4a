//! Error types for the replicated document and its node runtime.

use thiserror::Error;

/// Errors raised by local operations on an [`RgaSequence`](crate::RgaSequence).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RgaError {
    /// A visible index past the end of the document
    #[error("Index {index} is out of bounds for a document of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Errors raised at the public API of a [`ReplicationNode`](crate::ReplicationNode).
///
/// Every variant is reported before any state is touched, so a failed call
/// never leaves a partially applied edit behind.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Insert called with an empty string
    #[error("Cannot insert empty text")]
    EmptyText,

    /// Position outside of the visible document
    #[error("Invalid position {position} for a document of length {len}")]
    InvalidPosition { position: usize, len: usize },

    /// Transport failure while binding or dialing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The node has been stopped
    #[error("Node is shut down")]
    Shutdown,
}

impl From<RgaError> for NodeError {
    fn from(err: RgaError) -> Self {
        match err {
            RgaError::IndexOutOfBounds { index, len } => NodeError::InvalidPosition {
                position: index,
                len,
            },
        }
    }
}

/// Errors raised while loading node configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The requested node id is not part of the topology
    #[error("Unknown node id '{0}'")]
    UnknownNode(String),

    /// An address that does not parse as `host:port`
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),
}

/// Errors raised while parsing a shell command line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Wrong number of arguments; carries the usage line
    #[error("usage: {0}")]
    Usage(&'static str),

    /// A position that is not a non-negative integer
    #[error("invalid position '{0}'")]
    InvalidPosition(String),

    /// Unrecognized command word
    #[error("unknown command '{0}'. Type 'help' for help.")]
    Unknown(String),
}
