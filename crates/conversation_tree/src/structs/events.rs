use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::structs::branch::BranchId;
use crate::structs::merge::MergeStrategy;
use crate::structs::navigation::NavigationState;
use crate::structs::node::NodeId;

/// Delivered to subscribers once per successful mutating call. Carries the
/// navigation state after the mutation so a UI can re-render without reading
/// the tree back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeChange {
    pub tree_id: Uuid,
    pub operation: TreeOperation,
    pub navigation: NavigationState,
    pub timestamp: DateTime<Utc>,
}

impl TreeChange {
    pub fn new(tree_id: Uuid, operation: TreeOperation, navigation: NavigationState) -> Self {
        Self {
            tree_id,
            operation,
            navigation,
            timestamp: Utc::now(),
        }
    }
}

/// The mutation that produced a [`TreeChange`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeOperation {
    NodeCreated {
        node_id: NodeId,
        parent_id: NodeId,
    },
    MessageAdded {
        node_id: NodeId,
        parent_id: NodeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        branch_id: Option<BranchId>,
    },
    /// An edit or regeneration created a sibling of `original_id`.
    MessageRevised {
        original_id: NodeId,
        node_id: NodeId,
        regenerated: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        branch_id: Option<BranchId>,
    },
    NodeDeleted {
        node_id: NodeId,
        removed_nodes: usize,
        retargeted_branches: Vec<BranchId>,
        removed_branches: Vec<BranchId>,
    },
    BranchCreated {
        branch_id: BranchId,
        leaf_node_id: NodeId,
    },
    BranchRenamed {
        branch_id: BranchId,
        name: String,
    },
    BranchColorChanged {
        branch_id: BranchId,
        color: String,
    },
    BranchFavoriteToggled {
        branch_id: BranchId,
        is_favorite: bool,
    },
    BranchDeleted {
        branch_id: BranchId,
    },
    BranchLeafAdvanced {
        branch_id: BranchId,
        leaf_node_id: NodeId,
    },
    BranchSwitched {
        branch_id: BranchId,
        node_id: NodeId,
    },
    CursorMoved {
        from: NodeId,
        to: NodeId,
    },
    BranchesMerged {
        source_branch_id: BranchId,
        target_branch_id: BranchId,
        strategy: MergeStrategy,
        tip_node_id: NodeId,
        created_nodes: usize,
        detached_nodes: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_branch_id: Option<BranchId>,
    },
    DetachedRestored {
        detached_id: Uuid,
        root_node_id: NodeId,
        /// Branches moved back onto the restored subtree.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        restored_branches: Vec<BranchId>,
    },
    DetachedPurged {
        purged: usize,
    },
}

impl TreeOperation {
    pub fn name(&self) -> &'static str {
        match self {
            TreeOperation::NodeCreated { .. } => "node_created",
            TreeOperation::MessageAdded { .. } => "message_added",
            TreeOperation::MessageRevised { .. } => "message_revised",
            TreeOperation::NodeDeleted { .. } => "node_deleted",
            TreeOperation::BranchCreated { .. } => "branch_created",
            TreeOperation::BranchRenamed { .. } => "branch_renamed",
            TreeOperation::BranchColorChanged { .. } => "branch_color_changed",
            TreeOperation::BranchFavoriteToggled { .. } => "branch_favorite_toggled",
            TreeOperation::BranchDeleted { .. } => "branch_deleted",
            TreeOperation::BranchLeafAdvanced { .. } => "branch_leaf_advanced",
            TreeOperation::BranchSwitched { .. } => "branch_switched",
            TreeOperation::CursorMoved { .. } => "cursor_moved",
            TreeOperation::BranchesMerged { .. } => "branches_merged",
            TreeOperation::DetachedRestored { .. } => "detached_restored",
            TreeOperation::DetachedPurged { .. } => "detached_purged",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_navigation(node_id: NodeId) -> NavigationState {
        NavigationState {
            current_node_id: node_id,
            current_branch: None,
            available_branches: Vec::new(),
            can_go_back: false,
            can_go_forward: false,
            breadcrumbs: Vec::new(),
        }
    }

    #[test]
    fn tree_change_serializes_tagged_operation() {
        let node_id = Uuid::nil();
        let change = TreeChange::new(
            Uuid::nil(),
            TreeOperation::MessageAdded {
                node_id,
                parent_id: node_id,
                branch_id: None,
            },
            empty_navigation(node_id),
        );

        let json = serde_json::to_value(&change).expect("serialize");
        assert_eq!(json["tree_id"], json!(Uuid::nil()));
        assert_eq!(json["operation"]["type"], json!("message_added"));
        assert!(json["operation"].get("branch_id").is_none());
        assert_eq!(json["navigation"]["can_go_back"], json!(false));
    }

    #[test]
    fn merged_operation_round_trips() {
        let operation = TreeOperation::BranchesMerged {
            source_branch_id: Uuid::new_v4(),
            target_branch_id: Uuid::new_v4(),
            strategy: MergeStrategy::Interleave,
            tip_node_id: Uuid::new_v4(),
            created_nodes: 3,
            detached_nodes: 0,
            new_branch_id: Some(Uuid::new_v4()),
        };

        let serialized = serde_json::to_string(&operation).expect("serialize");
        let deserialized: TreeOperation = serde_json::from_str(&serialized).expect("deserialize");

        assert_eq!(deserialized, operation);
        assert_eq!(deserialized.name(), "branches_merged");
    }
}
