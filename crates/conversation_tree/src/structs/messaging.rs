use crate::error::{Result, TreeError};
use crate::structs::branch::BranchId;
use crate::structs::events::TreeOperation;
use crate::structs::node::{ConversationNode, NewMessage, NodeId, NodeMetadata, Role};
use crate::structs::tree::ConversationTree;

impl ConversationTree {
    /// Appends a message under the cursor and moves the cursor onto it.
    ///
    /// The current branch advances only if it ended at the cursor; appending
    /// in the middle of a branch creates an unnamed fork that callers can
    /// name with `create_branch`.
    pub fn add_message(&mut self, message: NewMessage) -> Result<NodeId> {
        self.ensure_mutable("add_message")?;
        let parent_id = self.current_node_id;
        let advancing = self
            .current_branch()
            .filter(|branch| branch.leaf_node_id == parent_id)
            .map(|branch| branch.id);

        let node_id = self.attach(parent_id, message)?;
        if let Some(branch_id) = advancing {
            let index = self.branch_index(branch_id)?;
            self.set_branch_leaf(index, node_id);
            self.active_branch_id = Some(branch_id);
        }
        self.current_node_id = node_id;

        self.log_message_added(node_id, parent_id, advancing);
        self.emit(TreeOperation::MessageAdded {
            node_id,
            parent_id,
            branch_id: advancing,
        });
        Ok(node_id)
    }

    /// Appends a message after the branch's leaf, advances the branch and
    /// moves the cursor onto the new node.
    pub fn add_message_to_branch(&mut self, branch_id: BranchId, message: NewMessage) -> Result<NodeId> {
        self.ensure_mutable("add_message_to_branch")?;
        let index = self.branch_index(branch_id)?;
        let parent_id = self.branches[index].leaf_node_id;

        let node_id = self.attach(parent_id, message)?;
        self.set_branch_leaf(index, node_id);
        self.active_branch_id = Some(branch_id);
        self.current_node_id = node_id;

        self.log_message_added(node_id, parent_id, Some(branch_id));
        self.emit(TreeOperation::MessageAdded {
            node_id,
            parent_id,
            branch_id: Some(branch_id),
        });
        Ok(node_id)
    }

    /// Creates an edited sibling of `node_id`. The original stays in the tree.
    pub fn edit_message(&mut self, node_id: NodeId, content: impl Into<String>) -> Result<NodeId> {
        self.ensure_mutable("edit_message")?;
        let metadata = NodeMetadata {
            edited_from: Some(node_id),
            ..Default::default()
        };
        self.revise(node_id, content.into(), metadata)
    }

    /// Records a new assistant answer next to `node_id`. The engine never
    /// calls a model; `content` is the already generated response.
    pub fn regenerate_response(
        &mut self,
        node_id: NodeId,
        content: impl Into<String>,
        mut metadata: NodeMetadata,
    ) -> Result<NodeId> {
        self.ensure_mutable("regenerate_response")?;
        if self.get_node(node_id)?.role != Role::Assistant {
            return Err(TreeError::InvalidOperation(format!(
                "only assistant messages can be regenerated, {node_id} is not one"
            )));
        }
        metadata.regenerated = true;
        metadata.edited_from = Some(node_id);
        self.revise(node_id, content.into(), metadata)
    }

    /// Shared by edit and regenerate: new sibling with the same role and
    /// attachments, cursor moves onto it, and the current branch is
    /// retargeted if the original lay on its path.
    fn revise(&mut self, node_id: NodeId, content: String, metadata: NodeMetadata) -> Result<NodeId> {
        let original = self.get_node(node_id)?;
        let parent_id = original.parent_id.ok_or_else(|| {
            TreeError::InvalidOperation("the root message cannot be revised".to_string())
        })?;
        let regenerated = metadata.regenerated;
        let message = NewMessage {
            role: original.role,
            content,
            attachments: original.attachments.clone(),
            metadata,
        };

        let retarget = self
            .current_branch()
            .filter(|branch| self.is_ancestor_or_self(node_id, branch.leaf_node_id))
            .map(|branch| branch.id);

        let new_id = self.insert_node(ConversationNode::new(Some(parent_id), message));
        if let Some(branch_id) = retarget {
            let index = self.branch_index(branch_id)?;
            self.set_branch_leaf(index, new_id);
            self.active_branch_id = Some(branch_id);
        }
        self.current_node_id = new_id;

        tracing::info!(
            tree_id = %self.id,
            original_id = %node_id,
            node_id = %new_id,
            regenerated,
            branch_id = ?retarget,
            "ConversationTree: Message revised"
        );

        self.emit(TreeOperation::MessageRevised {
            original_id: node_id,
            node_id: new_id,
            regenerated,
            branch_id: retarget,
        });
        Ok(new_id)
    }

    fn log_message_added(&self, node_id: NodeId, parent_id: NodeId, branch_id: Option<BranchId>) {
        let content_len = self.nodes.get(&node_id).map(|n| n.content.len()).unwrap_or(0);
        tracing::info!(
            tree_id = %self.id,
            node_id = %node_id,
            parent_id = %parent_id,
            branch_id = ?branch_id,
            content_len,
            node_count = self.nodes.len(),
            "ConversationTree: Message added"
        );
    }
}
