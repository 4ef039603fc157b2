//! Conversation manager service
//!
//! Owns one `ConversationTree` behind an async lock and persists it through a
//! `TreeStorage` after every successful mutation.

use crate::config::TreeConfig;
use crate::error::{Result as TreeResult, StorageError, TreeError};
use crate::notifier::{DispatchState, Subscription};
use crate::storage::TreeStorage;
use crate::structs::branch::{Branch, BranchId, BranchOptions};
use crate::structs::diff::BranchComparison;
use crate::structs::events::TreeChange;
use crate::structs::merge::MergeStrategy;
use crate::structs::navigation::NavigationState;
use crate::structs::node::{ConversationNode, NewMessage, NodeId, NodeMetadata};
use crate::structs::tree::ConversationTree;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

type Result<T> = std::result::Result<T, StorageError>;

/// Conversation Manager - shared, auto-saving access to one conversation.
///
/// Change subscribers run while the manager holds its write lock. They get
/// everything they need in the `TreeChange`; calling back into the manager
/// to mutate fails with `ReentrantMutation`, and reading from inside a
/// callback would wait on the lock forever.
pub struct ConversationManager<S: TreeStorage> {
    storage: Arc<S>,
    tree: Arc<RwLock<ConversationTree>>,
    conversation_id: String,
    dispatch: DispatchState,
}

impl<S: TreeStorage> Clone for ConversationManager<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            tree: Arc::clone(&self.tree),
            conversation_id: self.conversation_id.clone(),
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<S: TreeStorage> ConversationManager<S> {
    /// Loads the conversation, or creates and saves an empty one.
    pub async fn open(storage: S, conversation_id: impl Into<String>, config: TreeConfig) -> Result<Self> {
        let conversation_id = conversation_id.into();
        let storage = Arc::new(storage);

        let mut tree = match storage.load_tree(&conversation_id).await {
            Ok(tree) => tree,
            Err(StorageError::NotFound(_)) => {
                let tree = ConversationTree::new(config.clone());
                storage.save_tree(&conversation_id, &tree).await?;
                tracing::info!(
                    conversation_id = %conversation_id,
                    tree_id = %tree.id(),
                    "ConversationManager: Created conversation"
                );
                tree
            }
            Err(e) => return Err(e),
        };
        tree.set_config(config);

        Ok(Self::with_storage(Arc::clone(&storage), conversation_id, tree))
    }

    /// Wraps an existing tree and saves it immediately.
    pub async fn from_tree(storage: S, conversation_id: impl Into<String>, tree: ConversationTree) -> Result<Self> {
        let conversation_id = conversation_id.into();
        let storage = Arc::new(storage);
        storage.save_tree(&conversation_id, &tree).await?;
        Ok(Self::with_storage(storage, conversation_id, tree))
    }

    fn with_storage(storage: Arc<S>, conversation_id: String, tree: ConversationTree) -> Self {
        let dispatch = tree.notifier().dispatch_state();
        Self {
            storage,
            tree: Arc::new(RwLock::new(tree)),
            conversation_id,
            dispatch,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TreeChange) + Send + Sync + 'static,
    {
        self.tree.read().await.subscribe(callback)
    }

    /// A detached copy of the tree.
    pub async fn snapshot(&self) -> ConversationTree {
        self.tree.read().await.clone()
    }

    pub async fn navigation_state(&self) -> NavigationState {
        self.tree.read().await.navigation_state()
    }

    pub async fn branches(&self) -> Vec<Branch> {
        self.tree.read().await.branches().to_vec()
    }

    pub async fn compare_branches(&self, branch_a: BranchId, branch_b: BranchId) -> Result<BranchComparison> {
        Ok(self.tree.read().await.compare_branches(branch_a, branch_b)?)
    }

    pub async fn get_path(&self, node_id: NodeId) -> Result<Vec<ConversationNode>> {
        let tree = self.tree.read().await;
        Ok(tree.get_path(node_id)?.into_iter().cloned().collect())
    }

    // ========== Mutations (each one saves) ==========

    pub async fn add_message(&self, message: NewMessage) -> Result<NodeId> {
        self.mutate("add_message", move |tree| tree.add_message(message)).await
    }

    pub async fn add_message_to_branch(&self, branch_id: BranchId, message: NewMessage) -> Result<NodeId> {
        self.mutate("add_message_to_branch", move |tree| {
            tree.add_message_to_branch(branch_id, message)
        })
        .await
    }

    pub async fn edit_message(&self, node_id: NodeId, content: impl Into<String>) -> Result<NodeId> {
        let content = content.into();
        self.mutate("edit_message", move |tree| tree.edit_message(node_id, content))
            .await
    }

    pub async fn regenerate_response(
        &self,
        node_id: NodeId,
        content: impl Into<String>,
        metadata: NodeMetadata,
    ) -> Result<NodeId> {
        let content = content.into();
        self.mutate("regenerate_response", move |tree| {
            tree.regenerate_response(node_id, content, metadata)
        })
        .await
    }

    pub async fn delete_node(&self, node_id: NodeId, preserve_branches: bool) -> Result<usize> {
        self.mutate("delete_node", move |tree| tree.delete_node(node_id, preserve_branches))
            .await
    }

    pub async fn create_branch(&self, from_node_id: NodeId, options: BranchOptions) -> Result<BranchId> {
        self.mutate("create_branch", move |tree| tree.create_branch(from_node_id, options))
            .await
    }

    pub async fn rename_branch(&self, branch_id: BranchId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.mutate("rename_branch", move |tree| tree.rename_branch(branch_id, name))
            .await
    }

    pub async fn set_branch_color(&self, branch_id: BranchId, color: impl Into<String>) -> Result<()> {
        let color = color.into();
        self.mutate("set_branch_color", move |tree| tree.set_branch_color(branch_id, color))
            .await
    }

    pub async fn toggle_branch_favorite(&self, branch_id: BranchId) -> Result<bool> {
        self.mutate("toggle_branch_favorite", move |tree| {
            tree.toggle_branch_favorite(branch_id)
        })
        .await
    }

    pub async fn delete_branch(&self, branch_id: BranchId) -> Result<Branch> {
        self.mutate("delete_branch", move |tree| tree.delete_branch(branch_id))
            .await
    }

    pub async fn switch_to_branch(&self, branch_id: BranchId) -> Result<NodeId> {
        self.mutate("switch_to_branch", move |tree| tree.switch_to_branch(branch_id))
            .await
    }

    pub async fn switch_to_node(&self, node_id: NodeId) -> Result<()> {
        self.mutate("switch_to_node", move |tree| tree.switch_to_node(node_id))
            .await
    }

    pub async fn go_back(&self) -> Result<NodeId> {
        self.mutate("go_back", |tree| tree.go_back()).await
    }

    pub async fn go_forward(&self) -> Result<NodeId> {
        self.mutate("go_forward", |tree| tree.go_forward()).await
    }

    pub async fn merge_branches(
        &self,
        source_branch_id: BranchId,
        target_branch_id: BranchId,
        strategy: MergeStrategy,
    ) -> Result<NodeId> {
        self.mutate("merge_branches", move |tree| {
            tree.merge_branches(source_branch_id, target_branch_id, strategy)
        })
        .await
    }

    pub async fn merge_into_new_branch(
        &self,
        source_branch_id: BranchId,
        target_branch_id: BranchId,
        strategy: MergeStrategy,
        name: Option<String>,
    ) -> Result<(BranchId, NodeId)> {
        self.mutate("merge_into_new_branch", move |tree| {
            tree.merge_into_new_branch(source_branch_id, target_branch_id, strategy, name)
        })
        .await
    }

    pub async fn restore_detached(&self, detached_id: Uuid) -> Result<NodeId> {
        self.mutate("restore_detached", move |tree| tree.restore_detached(detached_id))
            .await
    }

    pub async fn purge_detached(&self) -> Result<usize> {
        self.mutate("purge_detached", |tree| tree.purge_detached()).await
    }

    /// Applies `apply` under the write lock and saves on success. A failed
    /// save rolls the in-memory tree back, so the call changes nothing;
    /// subscribers have already been told about the change by then.
    ///
    /// The dispatch flag is checked before locking: a subscriber calling back
    /// in would otherwise wait on the lock its own caller holds.
    async fn mutate<T, F>(&self, operation: &'static str, apply: F) -> Result<T>
    where
        F: FnOnce(&mut ConversationTree) -> TreeResult<T>,
    {
        if self.dispatch.is_dispatching() {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                operation,
                "ConversationManager: Rejected mutation during change dispatch"
            );
            return Err(TreeError::ReentrantMutation.into());
        }

        let mut tree = self.tree.write().await;
        let before = tree.clone();
        let value = apply(&mut *tree)?;
        if let Err(e) = self.storage.save_tree(&self.conversation_id, &tree).await {
            tree.restore_from(before);
            tracing::warn!(
                conversation_id = %self.conversation_id,
                operation,
                error = %e,
                "ConversationManager: Save failed, change rolled back"
            );
            return Err(e);
        }

        tracing::debug!(
            conversation_id = %self.conversation_id,
            operation,
            node_count = tree.node_count(),
            "ConversationManager: Mutation saved"
        );
        Ok(value)
    }
}
