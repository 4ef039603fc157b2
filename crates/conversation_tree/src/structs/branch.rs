use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::structs::node::NodeId;

pub type BranchId = Uuid;

/// Colors handed out to new branches in creation order.
pub const BRANCH_COLORS: [&str; 8] = [
    "#3b82f6", "#10b981", "#f59e0b", "#ef4444", "#8b5cf6", "#ec4899", "#14b8a6", "#f97316",
];

/// A named pointer to the node a line of conversation currently ends at.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub leaf_node_id: NodeId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Number of nodes from the root to `leaf_node_id`, both included.
    pub message_count: usize,
}

impl Branch {
    pub fn new(name: String, leaf_node_id: NodeId, message_count: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            leaf_node_id,
            created_at: Utc::now(),
            is_favorite: false,
            color: None,
            message_count,
        }
    }
}

/// Optional display metadata supplied when forking.
#[derive(Clone, Debug, Default)]
pub struct BranchOptions {
    pub name: Option<String>,
    pub color: Option<String>,
    pub is_favorite: bool,
}

impl BranchOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}
