use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TreeConfig;
use crate::error::{Result, TreeError};
use crate::notifier::{ChangeNotifier, Subscription};
use crate::structs::branch::{Branch, BranchId, BRANCH_COLORS};
use crate::structs::events::{TreeChange, TreeOperation};
use crate::structs::node::{ConversationNode, NewMessage, NodeId, Role};

/// A complete branching conversation.
///
/// `nodes` is the single source of truth for message data. Branches only
/// point into it, so any number of branches can share ancestry without
/// copying a message.
#[derive(Serialize, Deserialize, Debug)]
pub struct ConversationTree {
    pub(crate) id: Uuid,
    pub(crate) root_id: NodeId,
    /// Where the user currently is, independent of any branch leaf.
    pub(crate) current_node_id: NodeId,
    pub(crate) nodes: HashMap<NodeId, ConversationNode>,
    /// Creation order.
    pub(crate) branches: Vec<Branch>,
    /// Branch the user last switched to or appended on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) active_branch_id: Option<BranchId>,
    /// Undo log of subtrees removed by `replace` merges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) detached: Vec<DetachedSubtree>,

    #[serde(skip)]
    pub(crate) config: TreeConfig,
    #[serde(skip)]
    pub(crate) notifier: ChangeNotifier,
}

/// A subtree cut out of the live tree, kept so it can be restored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DetachedSubtree {
    pub id: Uuid,
    /// Node the subtree hung from when it was detached.
    pub parent_id: NodeId,
    pub root_node_id: NodeId,
    /// All nodes of the subtree with their links intact, root first.
    pub nodes: Vec<ConversationNode>,
    pub detached_at: DateTime<Utc>,
    pub reason: String,
    /// Branches that ended inside the subtree, with the leaf each had.
    /// Restoring moves them back while they still sit at `parent_id`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retargeted_branches: Vec<(BranchId, NodeId)>,
}

impl Default for ConversationTree {
    fn default() -> Self {
        Self::new(TreeConfig::default())
    }
}

/// Clones carry the data only; subscribers stay with the original tree.
impl Clone for ConversationTree {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            root_id: self.root_id,
            current_node_id: self.current_node_id,
            nodes: self.nodes.clone(),
            branches: self.branches.clone(),
            active_branch_id: self.active_branch_id,
            detached: self.detached.clone(),
            config: self.config.clone(),
            notifier: ChangeNotifier::new(),
        }
    }
}

impl ConversationTree {
    /// Creates a tree whose root is an empty system message.
    pub fn new(config: TreeConfig) -> Self {
        Self::with_root(NewMessage::new(Role::System, ""), config)
    }

    /// Creates a tree whose root is an assistant greeting.
    pub fn with_greeting(greeting: impl Into<String>, config: TreeConfig) -> Self {
        Self::with_root(NewMessage::assistant(greeting), config)
    }

    pub fn with_root(message: NewMessage, config: TreeConfig) -> Self {
        let root = ConversationNode::new(None, message);
        let root_id = root.id;
        let mut main = Branch::new(config.default_branch_name.clone(), root_id, 1);
        main.color = Some(BRANCH_COLORS[0].to_string());
        let id = Uuid::new_v4();

        tracing::info!(
            tree_id = %id,
            root_id = %root_id,
            branch = %main.name,
            "ConversationTree: Created"
        );

        Self {
            id,
            root_id,
            current_node_id: root_id,
            nodes: HashMap::from([(root_id, root)]),
            active_branch_id: Some(main.id),
            branches: vec![main],
            detached: Vec::new(),
            config,
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn current_node_id(&self) -> NodeId {
        self.current_node_id
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Replaces the configuration; needed after deserializing, which always
    /// starts from the defaults.
    pub fn set_config(&mut self, config: TreeConfig) {
        self.config = config;
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TreeChange) + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ConversationNode> {
        self.nodes.values()
    }

    pub fn detached(&self) -> &[DetachedSubtree] {
        &self.detached
    }

    // ========== Node Store ==========

    pub fn get_node(&self, node_id: NodeId) -> Result<&ConversationNode> {
        self.nodes.get(&node_id).ok_or(TreeError::NotFound(node_id))
    }

    /// Creates a node under `parent_id`. Neither branch leaves nor the cursor
    /// move; use `add_message` for that.
    pub fn create_node(&mut self, parent_id: NodeId, message: NewMessage) -> Result<NodeId> {
        self.ensure_mutable("create_node")?;
        let node_id = self.attach(parent_id, message)?;

        tracing::info!(
            tree_id = %self.id,
            node_id = %node_id,
            parent_id = %parent_id,
            node_count = self.nodes.len(),
            "ConversationTree: Node created"
        );

        self.emit(TreeOperation::NodeCreated { node_id, parent_id });
        Ok(node_id)
    }

    /// Nodes from the root to `node_id`, root first.
    pub fn get_path(&self, node_id: NodeId) -> Result<Vec<&ConversationNode>> {
        let ids = self.path_ids(node_id)?;
        Ok(ids.iter().filter_map(|id| self.nodes.get(id)).collect())
    }

    /// Ids from the root to `node_id`, following parent links only.
    pub fn path_ids(&self, node_id: NodeId) -> Result<Vec<NodeId>> {
        let mut cursor = Some(self.get_node(node_id)?);
        let mut path = Vec::new();

        while let Some(node) = cursor {
            path.push(node.id);
            if path.len() > self.nodes.len() {
                return Err(TreeError::Corrupted(format!(
                    "parent links of {node_id} form a cycle"
                )));
            }
            cursor = match node.parent_id {
                Some(parent_id) => Some(self.nodes.get(&parent_id).ok_or_else(|| {
                    TreeError::Corrupted(format!("missing parent {parent_id} of {}", node.id))
                })?),
                None => None,
            };
        }

        path.reverse();
        Ok(path)
    }

    pub fn depth(&self, node_id: NodeId) -> Result<usize> {
        Ok(self.path_ids(node_id)?.len() - 1)
    }

    pub fn children(&self, node_id: NodeId) -> Result<Vec<&ConversationNode>> {
        let node = self.get_node(node_id)?;
        Ok(node
            .child_ids
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect())
    }

    /// Position of `node_id` among its siblings and the sibling count, for
    /// "2 of 3" style version pickers. The root is `(0, 1)`.
    pub fn siblings(&self, node_id: NodeId) -> Result<(usize, usize)> {
        let node = self.get_node(node_id)?;
        let Some(parent_id) = node.parent_id else {
            return Ok((0, 1));
        };
        let parent = self.get_node(parent_id)?;
        let index = parent
            .child_ids
            .iter()
            .position(|id| *id == node_id)
            .ok_or_else(|| {
                TreeError::Corrupted(format!("{node_id} missing from its parent's children"))
            })?;
        Ok((index, parent.child_ids.len()))
    }

    /// True if `ancestor` lies on the root path of `node_id` (or is it).
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node_id: NodeId) -> bool {
        let mut cursor = self.nodes.get(&node_id);
        let mut steps = 0;
        while let Some(node) = cursor {
            if node.id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            cursor = node.parent_id.and_then(|id| self.nodes.get(&id));
        }
        false
    }

    /// Removes the subtree rooted at `node_id`.
    ///
    /// Branches ending inside it are retargeted to the deleted node's parent
    /// when `preserve_branches` is set and removed otherwise. A cursor inside
    /// the subtree moves to that parent. Returns the number of removed nodes.
    pub fn delete_node(&mut self, node_id: NodeId, preserve_branches: bool) -> Result<usize> {
        self.ensure_mutable("delete_node")?;
        let parent_id = self
            .get_node(node_id)?
            .parent_id
            .ok_or(TreeError::CannotDeleteRoot)?;

        let removed = self.detach_subtree(node_id);
        let removed_ids: HashSet<NodeId> = removed.iter().map(|node| node.id).collect();
        let (retargeted_branches, removed_branches) =
            self.reconcile_branches(&removed_ids, preserve_branches.then_some(parent_id));
        if removed_ids.contains(&self.current_node_id) {
            self.current_node_id = parent_id;
        }

        tracing::info!(
            tree_id = %self.id,
            node_id = %node_id,
            removed_nodes = removed.len(),
            retargeted = retargeted_branches.len(),
            removed_branches = removed_branches.len(),
            "ConversationTree: Subtree deleted"
        );

        self.emit(TreeOperation::NodeDeleted {
            node_id,
            removed_nodes: removed.len(),
            retargeted_branches,
            removed_branches,
        });
        Ok(removed.len())
    }

    // ========== Integrity ==========

    /// Checks every structural invariant and reports the first violation.
    pub fn validate(&self) -> Result<()> {
        let corrupted = |msg: String| Err(TreeError::Corrupted(msg));

        match self.nodes.get(&self.root_id) {
            None => return corrupted(format!("root {} is missing", self.root_id)),
            Some(root) if root.parent_id.is_some() => {
                return corrupted(format!("root {} has a parent", self.root_id));
            }
            Some(_) => {}
        }

        for node in self.nodes.values() {
            match node.parent_id {
                None if node.id != self.root_id => {
                    return corrupted(format!("{} is a second root", node.id));
                }
                None => {}
                Some(parent_id) => {
                    let Some(parent) = self.nodes.get(&parent_id) else {
                        return corrupted(format!("{} points to missing parent {parent_id}", node.id));
                    };
                    if !parent.child_ids.contains(&node.id) {
                        return corrupted(format!("{} is not listed by its parent", node.id));
                    }
                }
            }

            let mut seen = HashSet::new();
            for child_id in &node.child_ids {
                if !seen.insert(*child_id) {
                    return corrupted(format!("{} lists child {child_id} twice", node.id));
                }
                match self.nodes.get(child_id) {
                    Some(child) if child.parent_id == Some(node.id) => {}
                    Some(_) => {
                        return corrupted(format!("{} lists {child_id} which has another parent", node.id));
                    }
                    None => return corrupted(format!("{} lists missing child {child_id}", node.id)),
                }
            }
        }

        let reachable = self.subtree_ids(self.root_id).len();
        if reachable != self.nodes.len() {
            return corrupted(format!(
                "{} of {} nodes are unreachable from the root",
                self.nodes.len() - reachable,
                self.nodes.len()
            ));
        }

        if !self.nodes.contains_key(&self.current_node_id) {
            return corrupted(format!("cursor {} is missing", self.current_node_id));
        }

        for branch in &self.branches {
            if !self.nodes.contains_key(&branch.leaf_node_id) {
                return corrupted(format!(
                    "branch {} points to missing leaf {}",
                    branch.name, branch.leaf_node_id
                ));
            }
            let count = self.path_len(branch.leaf_node_id);
            if branch.message_count != count {
                return corrupted(format!(
                    "branch {} caches {} messages but its path has {count}",
                    branch.name, branch.message_count
                ));
            }
        }

        if let Some(active) = self.active_branch_id {
            if !self.branches.iter().any(|b| b.id == active) {
                return corrupted(format!("active branch {active} does not exist"));
            }
        }

        // Detached nodes must never share an id with the live tree or each other.
        let mut detached_ids = HashSet::new();
        for entry in &self.detached {
            if !entry.nodes.iter().any(|node| node.id == entry.root_node_id) {
                return corrupted(format!(
                    "detached entry {} does not hold its root {}",
                    entry.id, entry.root_node_id
                ));
            }
            for node in &entry.nodes {
                if self.nodes.contains_key(&node.id) {
                    return corrupted(format!(
                        "detached entry {} holds live node {}",
                        entry.id, node.id
                    ));
                }
                if !detached_ids.insert(node.id) {
                    return corrupted(format!("detached node {} appears twice", node.id));
                }
            }
        }

        Ok(())
    }

    // ========== Serialization ==========

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and validates a tree. The result uses the default config.
    pub fn from_json(json: &str) -> Result<Self> {
        let tree: Self = serde_json::from_str(json)?;
        tree.validate()?;
        tracing::debug!(
            tree_id = %tree.id,
            node_count = tree.nodes.len(),
            branch_count = tree.branches.len(),
            "ConversationTree: Loaded from JSON"
        );
        Ok(tree)
    }

    // ========== Internal helpers ==========

    pub(crate) fn ensure_mutable(&self, operation: &'static str) -> Result<()> {
        if self.notifier.is_dispatching() {
            tracing::warn!(
                tree_id = %self.id,
                operation,
                "ConversationTree: Rejected mutation during change dispatch"
            );
            return Err(TreeError::ReentrantMutation);
        }
        Ok(())
    }

    pub(crate) fn emit(&self, operation: TreeOperation) {
        if !self.notifier.has_subscribers() {
            return;
        }
        let change = TreeChange::new(self.id, operation, self.navigation_state());
        self.notifier.notify(&change);
    }

    /// Puts the data of `snapshot` back in place, keeping this tree's
    /// subscribers and dispatch flag.
    pub(crate) fn restore_from(&mut self, snapshot: ConversationTree) {
        let notifier = std::mem::take(&mut self.notifier);
        *self = snapshot;
        self.notifier = notifier;
    }

    /// Creates a node under an existing parent without notifying.
    pub(crate) fn attach(&mut self, parent_id: NodeId, message: NewMessage) -> Result<NodeId> {
        if !self.nodes.contains_key(&parent_id) {
            return Err(TreeError::InvalidParent(parent_id));
        }
        // System messages only ever appear as the root.
        if message.role == Role::System {
            return Err(TreeError::InvalidOperation(
                "system messages are only allowed at the root".to_string(),
            ));
        }
        Ok(self.insert_node(ConversationNode::new(Some(parent_id), message)))
    }

    /// Inserts a fully built node and links it under its parent, which the
    /// caller has already checked.
    pub(crate) fn insert_node(&mut self, node: ConversationNode) -> NodeId {
        let node_id = node.id;
        if let Some(parent) = node.parent_id.and_then(|id| self.nodes.get_mut(&id)) {
            parent.child_ids.push(node_id);
        }
        self.nodes.insert(node_id, node);
        node_id
    }

    /// Number of nodes from the root to `node_id`, both included.
    pub(crate) fn path_len(&self, node_id: NodeId) -> usize {
        let mut count = 0;
        let mut cursor = self.nodes.get(&node_id);
        while let Some(node) = cursor {
            count += 1;
            if count > self.nodes.len() {
                break;
            }
            cursor = node.parent_id.and_then(|id| self.nodes.get(&id));
        }
        count
    }

    /// Ids of the subtree rooted at `node_id` in breadth-first order.
    pub(crate) fn subtree_ids(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([node_id]);
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            ids.push(id);
            queue.extend(node.child_ids.iter().copied());
        }
        ids
    }

    /// Unlinks the subtree from its parent and removes it from the node map,
    /// returning the removed nodes root first.
    pub(crate) fn detach_subtree(&mut self, node_id: NodeId) -> Vec<ConversationNode> {
        let ids = self.subtree_ids(node_id);
        if let Some(parent_id) = self.nodes.get(&node_id).and_then(|n| n.parent_id) {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.child_ids.retain(|id| *id != node_id);
            }
        }
        ids.iter().filter_map(|id| self.nodes.remove(id)).collect()
    }

    /// Fixes up branches whose leaf was removed: retargets them to
    /// `retarget_to` if given, otherwise drops them. Returns the ids of
    /// retargeted and dropped branches.
    pub(crate) fn reconcile_branches(
        &mut self,
        removed: &HashSet<NodeId>,
        retarget_to: Option<NodeId>,
    ) -> (Vec<BranchId>, Vec<BranchId>) {
        let mut retargeted = Vec::new();
        let mut dropped = Vec::new();

        match retarget_to {
            Some(target) => {
                let count = self.path_len(target);
                for branch in &mut self.branches {
                    if removed.contains(&branch.leaf_node_id) {
                        branch.leaf_node_id = target;
                        branch.message_count = count;
                        retargeted.push(branch.id);
                    }
                }
            }
            None => {
                self.branches.retain(|branch| {
                    if removed.contains(&branch.leaf_node_id) {
                        dropped.push(branch.id);
                        false
                    } else {
                        true
                    }
                });
                if self
                    .active_branch_id
                    .is_some_and(|active| dropped.contains(&active))
                {
                    self.active_branch_id = None;
                }
            }
        }

        (retargeted, dropped)
    }
}
