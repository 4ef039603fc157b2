//! Conversation storage trait and implementations

use crate::error::StorageError;
use crate::structs::tree::ConversationTree;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

type Result<T> = std::result::Result<T, StorageError>;

/// Conversation storage trait
#[async_trait]
pub trait TreeStorage: Send + Sync {
    /// Load a conversation tree. Snapshots are validated before they are returned.
    async fn load_tree(&self, conversation_id: &str) -> Result<ConversationTree>;

    /// Save a conversation tree
    async fn save_tree(&self, conversation_id: &str, tree: &ConversationTree) -> Result<()>;

    async fn tree_exists(&self, conversation_id: &str) -> bool;

    /// Delete a conversation. Deleting a missing one is not an error.
    async fn delete_tree(&self, conversation_id: &str) -> Result<()>;

    /// Ids of all stored conversations, sorted.
    async fn list_trees(&self) -> Result<Vec<String>>;
}

/// Stores each conversation as pretty-printed JSON in `<base>/<id>.json`.
#[derive(Clone, Debug)]
pub struct FileTreeStorage {
    base_path: PathBuf,
}

impl FileTreeStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn tree_path(&self, conversation_id: &str) -> Result<PathBuf> {
        validate_id(conversation_id)?;
        Ok(self.base_path.join(format!("{}.json", conversation_id)))
    }
}

/// Ids become file names, so anything that could escape the base directory
/// is rejected.
fn validate_id(conversation_id: &str) -> Result<()> {
    let invalid = conversation_id.trim().is_empty()
        || conversation_id.contains(['/', '\\'])
        || conversation_id.contains("..");
    if invalid {
        return Err(StorageError::InvalidId(conversation_id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl TreeStorage for FileTreeStorage {
    async fn load_tree(&self, conversation_id: &str) -> Result<ConversationTree> {
        let path = self.tree_path(conversation_id)?;

        if !path.exists() {
            return Err(StorageError::NotFound(conversation_id.to_string()));
        }

        let contents = fs::read_to_string(&path).await?;
        let tree = ConversationTree::from_json(&contents)?;

        tracing::debug!(
            conversation_id,
            path = %path.display(),
            node_count = tree.node_count(),
            "FileTreeStorage: Loaded conversation"
        );
        Ok(tree)
    }

    async fn save_tree(&self, conversation_id: &str, tree: &ConversationTree) -> Result<()> {
        let path = self.tree_path(conversation_id)?;
        fs::create_dir_all(&self.base_path).await?;

        let contents = tree.to_json()?;
        // Write then rename so a crash never leaves a half-written snapshot.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, contents).await?;
        fs::rename(&tmp_path, &path).await?;

        tracing::debug!(
            conversation_id,
            path = %path.display(),
            node_count = tree.node_count(),
            "FileTreeStorage: Saved conversation"
        );
        Ok(())
    }

    async fn tree_exists(&self, conversation_id: &str) -> bool {
        self.tree_path(conversation_id)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    async fn delete_tree(&self, conversation_id: &str) -> Result<()> {
        let path = self.tree_path(conversation_id)?;

        if path.exists() {
            fs::remove_file(&path).await?;
            tracing::info!(conversation_id, "FileTreeStorage: Deleted conversation");
        }

        Ok(())
    }

    async fn list_trees(&self) -> Result<Vec<String>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
