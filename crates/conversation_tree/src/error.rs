//! Error types for the conversation tree, its configuration and storage.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by operations on a `ConversationTree`.
///
/// Every failing call leaves the tree exactly as it was.
#[derive(Debug, Error)]
pub enum TreeError {
    /// No node with this id exists.
    #[error("Node not found: {0}")]
    NotFound(Uuid),

    /// The parent of a new node does not exist.
    #[error("Invalid parent node: {0}")]
    InvalidParent(Uuid),

    /// A branch or cursor operation named a node that does not exist.
    #[error("Invalid node: {0}")]
    InvalidNode(Uuid),

    #[error("Branch not found: {0}")]
    BranchNotFound(Uuid),

    #[error("The root node cannot be deleted")]
    CannotDeleteRoot,

    /// The two branches have no differences.
    #[error("Nothing to merge: branches have no differences")]
    NothingToMerge,

    /// A change subscriber tried to mutate the tree while being notified.
    #[error("Reentrant mutation attempted from a change subscriber")]
    ReentrantMutation,

    /// No detached subtree with this id is held in the undo log.
    #[error("Detached subtree not found: {0}")]
    DetachedNotFound(Uuid),

    /// The call is valid in shape but not for this node or position.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A structural invariant does not hold (usually a hand-edited snapshot).
    #[error("Corrupted tree: {0}")]
    Corrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors raised while loading a `TreeConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Errors raised by `TreeStorage` implementations and the `ConversationManager`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Invalid conversation id: {0:?}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Tree(#[from] TreeError),
}
