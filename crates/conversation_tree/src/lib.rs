//! `conversation_tree` records a chat conversation as a tree of immutable
//! message nodes. Branches are named pointers into the tree, so users can fork
//! alternative continuations, compare two of them and merge one into another
//! without ever rewriting an existing message.

pub mod config;
pub mod error;
pub mod manager;
pub mod notifier;
pub mod storage;
pub mod structs;

// Re-export the public API
pub use config::{DiffConfig, MergeConfig, ReplaceMode, TreeConfig};
pub use error::{ConfigError, Result, StorageError, TreeError};
pub use manager::ConversationManager;
pub use notifier::{ChangeNotifier, DispatchState, Subscription};
pub use storage::{FileTreeStorage, TreeStorage};
pub use structs::branch::{Branch, BranchId, BranchOptions};
pub use structs::diff::{BranchComparison, BranchDifference, BranchSide, DifferenceType};
pub use structs::events::{TreeChange, TreeOperation};
pub use structs::merge::MergeStrategy;
pub use structs::navigation::{Breadcrumb, NavigationState};
pub use structs::node::{AttachmentRef, ConversationNode, NewMessage, NodeId, NodeMetadata, Role};
pub use structs::tree::{ConversationTree, DetachedSubtree};
