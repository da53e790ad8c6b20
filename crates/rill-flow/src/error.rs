//! Error types for flow editing, lowering and persistence.

use std::path::PathBuf;

use rill_ir::{IrError, MathError};
use thiserror::Error;

use crate::graph::{Edge, NodeId};

/// Errors raised by flow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A node's text names no known function.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A connection request violates the graph rules.
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// A cycle that passes through no lag-capable node.
    #[error("cycle through non-lag nodes: {nodes:?}")]
    CyclicGraph {
        /// Ids of the nodes left unordered, ascending.
        nodes: Vec<u32>,
    },

    /// The node does not exist.
    #[error("node {0} not found")]
    UnknownNode(NodeId),

    /// The edge does not exist.
    #[error("edge {0} not found")]
    UnknownEdge(Edge),

    /// An inline math node failed to compile.
    #[error("math node '{text}': {source}")]
    Math {
        /// Node text.
        text: String,
        /// Compiler error.
        #[source]
        source: MathError,
    },

    /// Generated IR failed validation.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// Failed to read a flow file
    #[error("failed to read file '{path}': {source}")]
    Load {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a flow file
    #[error("failed to write file '{path}': {source}")]
    Save {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse flow: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize flow: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl FlowError {
    /// Create a load error.
    pub fn load(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Load {
            path: path.into(),
            source,
        }
    }

    /// Create a save error.
    pub fn save(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Save {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn connection(message: impl Into<String>) -> Self {
        Self::InvalidConnection(message.into())
    }
}

/// Result alias for flow operations.
pub type Result<T> = std::result::Result<T, FlowError>;
