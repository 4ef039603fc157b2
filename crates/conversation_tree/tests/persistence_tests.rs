//! Tests for snapshot round trips and manager-backed persistence

use std::collections::HashMap;

use conversation_tree::{
    AttachmentRef, BranchOptions, ConversationManager, ConversationTree, FileTreeStorage,
    MergeStrategy, NewMessage, Role, StorageError, TreeConfig, TreeError, TreeStorage,
};
use tempfile::tempdir;

fn busy_tree() -> ConversationTree {
    let mut tree = ConversationTree::with_greeting("Hello!", TreeConfig::default());
    let u1 = tree
        .add_message(
            NewMessage::user("look at this")
                .with_attachment(AttachmentRef::new("file-1").with_name("a.png").with_mime_type("image/png")),
        )
        .unwrap();
    tree.add_message(NewMessage::assistant("nice picture").with_model("gpt-4"))
        .unwrap();
    let main = tree.branches()[0].id;
    let alt = tree
        .create_branch(
            u1,
            BranchOptions {
                name: Some("alt".to_string()),
                color: Some("#00ff00".to_string()),
                is_favorite: true,
            },
        )
        .unwrap();
    tree.add_message_to_branch(alt, NewMessage::assistant("meh")).unwrap();
    tree.merge_branches(alt, main, MergeStrategy::Replace).unwrap();
    tree.go_back().unwrap();
    tree
}

#[test]
fn test_json_round_trip_is_faithful() {
    let tree = busy_tree();

    let restored = ConversationTree::from_json(&tree.to_json().unwrap()).unwrap();

    assert_eq!(restored.id(), tree.id());
    assert_eq!(restored.root_id(), tree.root_id());
    assert_eq!(restored.current_node_id(), tree.current_node_id());
    assert_eq!(restored.branches(), tree.branches());
    assert_eq!(restored.detached(), tree.detached());
    assert_eq!(restored.current_branch(), tree.current_branch());

    let original: HashMap<_, _> = tree.nodes().map(|n| (n.id, n.clone())).collect();
    let reloaded: HashMap<_, _> = restored.nodes().map(|n| (n.id, n.clone())).collect();
    assert_eq!(original, reloaded);
    assert_eq!(restored.navigation_state(), tree.navigation_state());
}

#[test]
fn test_snapshot_shape() {
    let tree = ConversationTree::with_greeting("Hello!", TreeConfig::default());
    let value: serde_json::Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();

    assert!(value["nodes"].is_object());
    assert_eq!(value["branches"][0]["name"], "main");
    assert_eq!(value["current_node_id"], value["root_id"]);
    let root = &value["nodes"][tree.root_id().to_string()];
    assert_eq!(root["role"], "assistant");
    assert_eq!(root["content"], "Hello!");
}

#[test]
fn test_corrupted_snapshot_is_rejected() {
    let tree = busy_tree();
    let mut value: serde_json::Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();
    let root = tree.root_id().to_string();
    value["nodes"][&root]["child_ids"] = serde_json::json!([]);

    let result = ConversationTree::from_json(&value.to_string());
    assert!(matches!(result, Err(TreeError::Corrupted(_))));
}

#[test]
fn test_detached_nodes_colliding_with_live_ones_are_rejected() {
    let tree = busy_tree();
    assert_eq!(tree.detached().len(), 1);
    let mut value: serde_json::Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();
    let live = value["nodes"][tree.root_id().to_string()].clone();
    value["detached"][0]["nodes"]
        .as_array_mut()
        .unwrap()
        .push(live);

    let result = ConversationTree::from_json(&value.to_string());
    assert!(matches!(result, Err(TreeError::Corrupted(_))));
}

#[test]
fn test_detached_entry_without_its_root_is_rejected() {
    let tree = busy_tree();
    let mut value: serde_json::Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();
    value["detached"][0]["root_node_id"] = serde_json::json!(uuid::Uuid::new_v4());

    let result = ConversationTree::from_json(&value.to_string());
    assert!(matches!(result, Err(TreeError::Corrupted(_))));
}

#[tokio::test]
async fn test_manager_persists_every_mutation() {
    let dir = tempdir().unwrap();
    let storage = FileTreeStorage::new(dir.path());
    let manager = ConversationManager::open(storage.clone(), "chat", TreeConfig::default())
        .await
        .unwrap();

    let u1 = manager.add_message(NewMessage::user("q")).await.unwrap();
    manager
        .add_message(NewMessage::new(Role::Assistant, "a"))
        .await
        .unwrap();
    let alt = manager
        .create_branch(u1, BranchOptions::named("alt"))
        .await
        .unwrap();
    manager
        .add_message_to_branch(alt, NewMessage::assistant("b"))
        .await
        .unwrap();
    let main = manager.branches().await[0].id;
    let tip = manager
        .merge_branches(alt, main, MergeStrategy::Append)
        .await
        .unwrap();

    let stored = storage.load_tree("chat").await.unwrap();
    assert_eq!(stored.get_branch(main).unwrap().leaf_node_id, tip);
    assert_eq!(stored.node_count(), 5);

    let comparison = manager.compare_branches(main, alt).await.unwrap();
    assert_eq!(comparison.common_ancestor_id, u1);
    let path = manager.get_path(tip).await.unwrap();
    assert_eq!(path.len(), 4);
}

#[tokio::test]
async fn test_manager_surfaces_tree_errors() {
    let dir = tempdir().unwrap();
    let manager = ConversationManager::open(FileTreeStorage::new(dir.path()), "chat", TreeConfig::default())
        .await
        .unwrap();
    let root = manager.snapshot().await.root_id();

    let result = manager.delete_node(root, false).await;
    assert!(matches!(result, Err(StorageError::Tree(TreeError::CannotDeleteRoot))));

    let result = ConversationManager::open(FileTreeStorage::new(dir.path()), "../x", TreeConfig::default()).await;
    assert!(matches!(result, Err(StorageError::InvalidId(_))));
}
