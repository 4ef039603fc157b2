use crate::error::{Result, TreeError};
use crate::structs::branch::{Branch, BranchId, BranchOptions, BRANCH_COLORS};
use crate::structs::events::TreeOperation;
use crate::structs::node::NodeId;
use crate::structs::tree::ConversationTree;

impl ConversationTree {
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn get_branch(&self, branch_id: BranchId) -> Result<&Branch> {
        self.branches
            .iter()
            .find(|branch| branch.id == branch_id)
            .ok_or(TreeError::BranchNotFound(branch_id))
    }

    pub fn find_branch_by_name(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|branch| branch.name == name)
    }

    /// First branch (in creation order) ending at `node_id`.
    pub fn branch_for_leaf(&self, node_id: NodeId) -> Option<&Branch> {
        self.branches
            .iter()
            .find(|branch| branch.leaf_node_id == node_id)
    }

    /// The branch the cursor belongs to.
    ///
    /// The active branch wins while the cursor is on its path; otherwise the
    /// first branch ending at the cursor, then the first branch passing
    /// through it.
    pub fn current_branch(&self) -> Option<&Branch> {
        let cursor = self.current_node_id;
        let active = self
            .active_branch_id
            .and_then(|id| self.branches.iter().find(|branch| branch.id == id))
            .filter(|branch| self.is_ancestor_or_self(cursor, branch.leaf_node_id));

        active
            .or_else(|| self.branch_for_leaf(cursor))
            .or_else(|| {
                self.branches
                    .iter()
                    .find(|branch| self.is_ancestor_or_self(cursor, branch.leaf_node_id))
            })
    }

    /// Forks a new branch ending at `from_node_id`.
    pub fn create_branch(&mut self, from_node_id: NodeId, options: BranchOptions) -> Result<BranchId> {
        self.ensure_mutable("create_branch")?;
        let branch_id = self.register_branch(from_node_id, options)?;

        tracing::info!(
            tree_id = %self.id,
            branch_id = %branch_id,
            from_node_id = %from_node_id,
            branch_count = self.branches.len(),
            "ConversationTree: Branch created"
        );

        self.emit(TreeOperation::BranchCreated {
            branch_id,
            leaf_node_id: from_node_id,
        });
        Ok(branch_id)
    }

    pub fn rename_branch(&mut self, branch_id: BranchId, name: impl Into<String>) -> Result<()> {
        self.ensure_mutable("rename_branch")?;
        let index = self.branch_index(branch_id)?;
        let name = name.into();
        self.branches[index].name = name.clone();

        tracing::info!(
            tree_id = %self.id,
            branch_id = %branch_id,
            name = %name,
            "ConversationTree: Branch renamed"
        );

        self.emit(TreeOperation::BranchRenamed { branch_id, name });
        Ok(())
    }

    pub fn set_branch_color(&mut self, branch_id: BranchId, color: impl Into<String>) -> Result<()> {
        self.ensure_mutable("set_branch_color")?;
        let index = self.branch_index(branch_id)?;
        let color = color.into();
        self.branches[index].color = Some(color.clone());
        self.emit(TreeOperation::BranchColorChanged { branch_id, color });
        Ok(())
    }

    /// Flips the favorite flag and returns the new value.
    pub fn toggle_branch_favorite(&mut self, branch_id: BranchId) -> Result<bool> {
        self.ensure_mutable("toggle_branch_favorite")?;
        let index = self.branch_index(branch_id)?;
        let is_favorite = !self.branches[index].is_favorite;
        self.branches[index].is_favorite = is_favorite;
        self.emit(TreeOperation::BranchFavoriteToggled {
            branch_id,
            is_favorite,
        });
        Ok(is_favorite)
    }

    /// Removes the branch pointer. Nodes are never touched.
    pub fn delete_branch(&mut self, branch_id: BranchId) -> Result<Branch> {
        self.ensure_mutable("delete_branch")?;
        let index = self.branch_index(branch_id)?;
        let branch = self.branches.remove(index);
        if self.active_branch_id == Some(branch_id) {
            self.active_branch_id = None;
        }

        tracing::info!(
            tree_id = %self.id,
            branch_id = %branch_id,
            name = %branch.name,
            "ConversationTree: Branch deleted"
        );

        self.emit(TreeOperation::BranchDeleted { branch_id });
        Ok(branch)
    }

    /// Moves the cursor. Switching branches is `switch_to_branch`, or this
    /// with the branch's leaf.
    pub fn switch_to_node(&mut self, node_id: NodeId) -> Result<()> {
        self.ensure_mutable("switch_to_node")?;
        if !self.nodes.contains_key(&node_id) {
            return Err(TreeError::InvalidNode(node_id));
        }
        let from = self.current_node_id;
        self.current_node_id = node_id;

        tracing::debug!(
            tree_id = %self.id,
            from = %from,
            to = %node_id,
            "ConversationTree: Switched to node"
        );

        self.emit(TreeOperation::CursorMoved { from, to: node_id });
        Ok(())
    }

    /// Moves the cursor to the branch's leaf and makes it the active branch.
    pub fn switch_to_branch(&mut self, branch_id: BranchId) -> Result<NodeId> {
        self.ensure_mutable("switch_to_branch")?;
        let node_id = self.get_branch(branch_id)?.leaf_node_id;
        self.current_node_id = node_id;
        self.active_branch_id = Some(branch_id);

        tracing::info!(
            tree_id = %self.id,
            branch_id = %branch_id,
            node_id = %node_id,
            "ConversationTree: Switched branch"
        );

        self.emit(TreeOperation::BranchSwitched { branch_id, node_id });
        Ok(node_id)
    }

    /// Points the branch at `new_leaf_id` and recounts its messages.
    pub fn advance_branch_leaf(&mut self, branch_id: BranchId, new_leaf_id: NodeId) -> Result<()> {
        self.ensure_mutable("advance_branch_leaf")?;
        let index = self.branch_index(branch_id)?;
        if !self.nodes.contains_key(&new_leaf_id) {
            return Err(TreeError::InvalidNode(new_leaf_id));
        }
        self.set_branch_leaf(index, new_leaf_id);
        self.emit(TreeOperation::BranchLeafAdvanced {
            branch_id,
            leaf_node_id: new_leaf_id,
        });
        Ok(())
    }

    pub(crate) fn branch_index(&self, branch_id: BranchId) -> Result<usize> {
        self.branches
            .iter()
            .position(|branch| branch.id == branch_id)
            .ok_or(TreeError::BranchNotFound(branch_id))
    }

    pub(crate) fn set_branch_leaf(&mut self, index: usize, leaf_node_id: NodeId) {
        let message_count = self.path_len(leaf_node_id);
        let branch = &mut self.branches[index];
        branch.leaf_node_id = leaf_node_id;
        branch.message_count = message_count;

        tracing::debug!(
            tree_id = %self.id,
            branch = %branch.name,
            leaf_node_id = %leaf_node_id,
            message_count,
            "ConversationTree: Branch leaf moved"
        );
    }

    /// Builds and stores a branch without notifying.
    pub(crate) fn register_branch(
        &mut self,
        from_node_id: NodeId,
        options: BranchOptions,
    ) -> Result<BranchId> {
        if !self.nodes.contains_key(&from_node_id) {
            return Err(TreeError::InvalidNode(from_node_id));
        }
        let position = self.branches.len();
        let name = options.name.unwrap_or_else(|| {
            format!("{} {}", self.config.branch_name_prefix, position + 1)
        });
        let mut branch = Branch::new(name, from_node_id, self.path_len(from_node_id));
        branch.color = options
            .color
            .or_else(|| Some(BRANCH_COLORS[position % BRANCH_COLORS.len()].to_string()));
        branch.is_favorite = options.is_favorite;

        let branch_id = branch.id;
        self.branches.push(branch);
        Ok(branch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::structs::node::NewMessage;
    use uuid::Uuid;

    fn forked_tree() -> (ConversationTree, NodeId, NodeId, BranchId) {
        let mut tree = ConversationTree::with_greeting("hi", TreeConfig::default());
        let u1 = tree.add_message(NewMessage::user("explain X")).unwrap();
        let a1 = tree.add_message(NewMessage::assistant("X is...")).unwrap();
        let alt = tree.create_branch(u1, BranchOptions::named("alt")).unwrap();
        (tree, u1, a1, alt)
    }

    #[test]
    fn create_branch_defaults_name_and_color() {
        let (mut tree, u1, _, _) = forked_tree();
        let id = tree.create_branch(u1, BranchOptions::default()).unwrap();
        let branch = tree.get_branch(id).unwrap();

        assert_eq!(branch.name, "Branch 3");
        assert_eq!(branch.color.as_deref(), Some(BRANCH_COLORS[2]));
        assert_eq!(branch.leaf_node_id, u1);
        assert_eq!(branch.message_count, 2);
    }

    #[test]
    fn create_branch_from_missing_node_fails() {
        let (mut tree, _, _, _) = forked_tree();
        let result = tree.create_branch(Uuid::new_v4(), BranchOptions::default());
        assert!(matches!(result, Err(TreeError::InvalidNode(_))));
        assert_eq!(tree.branches().len(), 2);
    }

    #[test]
    fn metadata_mutations_require_existing_branch() {
        let (mut tree, _, _, alt) = forked_tree();
        let missing = Uuid::new_v4();

        tree.rename_branch(alt, "alternative").unwrap();
        tree.set_branch_color(alt, "#000000").unwrap();
        assert!(tree.toggle_branch_favorite(alt).unwrap());
        assert!(!tree.toggle_branch_favorite(alt).unwrap());

        let branch = tree.get_branch(alt).unwrap();
        assert_eq!(branch.name, "alternative");
        assert_eq!(branch.color.as_deref(), Some("#000000"));

        assert!(matches!(tree.rename_branch(missing, "x"), Err(TreeError::BranchNotFound(_))));
        assert!(matches!(tree.set_branch_color(missing, "x"), Err(TreeError::BranchNotFound(_))));
        assert!(matches!(tree.toggle_branch_favorite(missing), Err(TreeError::BranchNotFound(_))));
    }

    #[test]
    fn switch_to_branch_moves_cursor_and_activates() {
        let (mut tree, u1, a1, alt) = forked_tree();
        let main = tree.find_branch_by_name("main").unwrap().id;
        assert_eq!(tree.current_node_id(), a1);

        assert_eq!(tree.switch_to_branch(alt).unwrap(), u1);
        assert_eq!(tree.current_branch().unwrap().id, alt);

        tree.switch_to_branch(main).unwrap();
        assert_eq!(tree.current_branch().unwrap().id, main);
        assert_eq!(tree.current_node_id(), a1);
    }

    #[test]
    fn current_branch_prefers_exact_leaf_over_path_membership() {
        let (mut tree, u1, _, alt) = forked_tree();
        tree.active_branch_id = None;
        tree.switch_to_node(u1).unwrap();

        assert_eq!(tree.current_branch().unwrap().id, alt);
    }

    #[test]
    fn switch_to_missing_node_fails() {
        let (mut tree, _, a1, _) = forked_tree();
        assert!(matches!(
            tree.switch_to_node(Uuid::new_v4()),
            Err(TreeError::InvalidNode(_))
        ));
        assert_eq!(tree.current_node_id(), a1);
    }

    #[test]
    fn advance_branch_leaf_recounts_messages() {
        let (mut tree, _, a1, alt) = forked_tree();
        tree.advance_branch_leaf(alt, a1).unwrap();
        assert_eq!(tree.get_branch(alt).unwrap().message_count, 3);

        assert!(matches!(
            tree.advance_branch_leaf(alt, Uuid::new_v4()),
            Err(TreeError::InvalidNode(_))
        ));
    }

    #[test]
    fn delete_branch_keeps_nodes() {
        let (mut tree, _, _, alt) = forked_tree();
        let nodes_before = tree.node_count();

        let removed = tree.delete_branch(alt).unwrap();

        assert_eq!(removed.name, "alt");
        assert_eq!(tree.node_count(), nodes_before);
        assert!(matches!(tree.get_branch(alt), Err(TreeError::BranchNotFound(_))));
        tree.validate().unwrap();
    }
}
