use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::structs::branch::Branch;
use crate::structs::events::TreeOperation;
use crate::structs::node::{ConversationNode, NodeId, Role};
use crate::structs::tree::ConversationTree;

/// Read model for a UI: where the cursor is and where it can go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationState {
    pub current_node_id: NodeId,
    pub current_branch: Option<Branch>,
    pub available_branches: Vec<Branch>,
    pub can_go_back: bool,
    pub can_go_forward: bool,
    /// Root to cursor.
    pub breadcrumbs: Vec<Breadcrumb>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub node_id: NodeId,
    pub role: Role,
    pub label: String,
}

impl Breadcrumb {
    fn from_node(node: &ConversationNode, max_chars: usize) -> Self {
        let content = node.content.trim();
        let label = if content.is_empty() {
            node.role.to_string()
        } else if content.chars().count() > max_chars {
            let truncated: String = content.chars().take(max_chars).collect();
            format!("{}…", truncated.trim_end())
        } else {
            content.to_string()
        };
        Self {
            node_id: node.id,
            role: node.role,
            label,
        }
    }
}

impl ConversationTree {
    /// Recomputed from scratch on every call.
    pub fn navigation_state(&self) -> NavigationState {
        let current = self.nodes.get(&self.current_node_id);
        let breadcrumbs = self
            .get_path(self.current_node_id)
            .map(|path| {
                path.into_iter()
                    .map(|node| Breadcrumb::from_node(node, self.config.breadcrumb_label_chars))
                    .collect()
            })
            .unwrap_or_default();

        NavigationState {
            current_node_id: self.current_node_id,
            current_branch: self.current_branch().cloned(),
            available_branches: self.branches.clone(),
            can_go_back: current.is_some_and(|node| node.parent_id.is_some()),
            can_go_forward: current.is_some_and(|node| !node.child_ids.is_empty()),
            breadcrumbs,
        }
    }

    /// Nodes from the root to the cursor.
    pub fn active_path(&self) -> Result<Vec<&ConversationNode>> {
        self.get_path(self.current_node_id)
    }

    /// Moves the cursor to its parent.
    pub fn go_back(&mut self) -> Result<NodeId> {
        self.ensure_mutable("go_back")?;
        let from = self.current_node_id;
        let to = self
            .get_node(from)?
            .parent_id
            .ok_or_else(|| TreeError::InvalidOperation("already at the root".to_string()))?;
        self.move_cursor(from, to);
        Ok(to)
    }

    /// Moves the cursor one step towards the current branch's leaf, or to
    /// the most recently created child when the cursor is off-branch.
    pub fn go_forward(&mut self) -> Result<NodeId> {
        self.ensure_mutable("go_forward")?;
        let from = self.current_node_id;
        let node = self.get_node(from)?;

        let on_branch = self
            .current_branch()
            .filter(|branch| branch.leaf_node_id != from)
            .and_then(|branch| self.path_ids(branch.leaf_node_id).ok())
            .and_then(|path| {
                let index = path.iter().position(|id| *id == from)?;
                path.get(index + 1).copied()
            });

        let to = on_branch
            .or_else(|| node.child_ids.last().copied())
            .ok_or_else(|| TreeError::InvalidOperation("already at a leaf".to_string()))?;
        self.move_cursor(from, to);
        Ok(to)
    }

    fn move_cursor(&mut self, from: NodeId, to: NodeId) {
        self.current_node_id = to;
        tracing::debug!(
            tree_id = %self.id,
            from = %from,
            to = %to,
            "ConversationTree: Cursor moved"
        );
        self.emit(TreeOperation::CursorMoved { from, to });
    }
}
