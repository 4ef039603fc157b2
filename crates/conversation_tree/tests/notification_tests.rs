//! Tests for change notification and reentrancy protection

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use conversation_tree::{
    BranchOptions, ConversationManager, ConversationTree, FileTreeStorage, MergeStrategy,
    NewMessage, NodeMetadata, StorageError, TreeChange, TreeConfig, TreeError,
};
use tempfile::tempdir;

fn recorder(tree: &ConversationTree) -> Arc<Mutex<Vec<TreeChange>>> {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    tree.subscribe(move |change| sink.lock().unwrap().push(change.clone()));
    changes
}

fn names(changes: &Arc<Mutex<Vec<TreeChange>>>) -> Vec<&'static str> {
    changes
        .lock()
        .unwrap()
        .iter()
        .map(|change| change.operation.name())
        .collect()
}

#[test]
fn test_every_mutation_notifies_once() {
    let mut tree = ConversationTree::with_greeting("hi", TreeConfig::default());
    let changes = recorder(&tree);
    let root = tree.root_id();

    let u1 = tree.add_message(NewMessage::user("q")).unwrap();
    let a1 = tree.add_message(NewMessage::assistant("a")).unwrap();
    let alt = tree.create_branch(u1, BranchOptions::named("alt")).unwrap();
    tree.add_message_to_branch(alt, NewMessage::assistant("b")).unwrap();
    tree.regenerate_response(a1, "a2", NodeMetadata::default()).unwrap();
    tree.edit_message(u1, "q2").unwrap();
    tree.rename_branch(alt, "other").unwrap();
    tree.set_branch_color(alt, "#123456").unwrap();
    tree.toggle_branch_favorite(alt).unwrap();
    tree.switch_to_branch(alt).unwrap();
    tree.go_back().unwrap();
    tree.go_forward().unwrap();
    tree.switch_to_node(root).unwrap();
    let extra = tree.create_node(root, NewMessage::user("side")).unwrap();
    tree.delete_node(extra, true).unwrap();
    tree.delete_branch(alt).unwrap();

    assert_eq!(
        names(&changes),
        vec![
            "message_added",
            "message_added",
            "branch_created",
            "message_added",
            "message_revised",
            "message_revised",
            "branch_renamed",
            "branch_color_changed",
            "branch_favorite_toggled",
            "branch_switched",
            "cursor_moved",
            "cursor_moved",
            "cursor_moved",
            "node_created",
            "node_deleted",
            "branch_deleted",
        ]
    );
}

#[test]
fn test_multi_node_merge_notifies_once() {
    let mut tree = ConversationTree::with_greeting("hi", TreeConfig::default());
    let u1 = tree.add_message(NewMessage::user("q")).unwrap();
    let main = tree.branches()[0].id;
    let alt = tree.create_branch(u1, BranchOptions::named("alt")).unwrap();
    for content in ["b1", "b2", "b3"] {
        tree.add_message_to_branch(alt, NewMessage::assistant(content)).unwrap();
    }
    let changes = recorder(&tree);

    let tip = tree.merge_branches(alt, main, MergeStrategy::Append).unwrap();

    let changes = changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    match &changes[0].operation {
        conversation_tree::TreeOperation::BranchesMerged {
            created_nodes,
            tip_node_id,
            new_branch_id,
            ..
        } => {
            assert_eq!(*created_nodes, 3);
            assert_eq!(*tip_node_id, tip);
            assert!(new_branch_id.is_none());
        }
        other => panic!("unexpected operation: {other:?}"),
    }
}

#[test]
fn test_failed_and_read_only_calls_do_not_notify() {
    let mut tree = ConversationTree::with_greeting("hi", TreeConfig::default());
    let changes = recorder(&tree);
    let main = tree.branches()[0].id;

    assert!(tree.go_back().is_err());
    assert!(tree.delete_node(tree.root_id(), true).is_err());
    tree.compare_branches(main, main).unwrap();
    tree.navigation_state();
    tree.validate().unwrap();
    tree.merge_branches(main, main, MergeStrategy::Append).unwrap();

    assert!(names(&changes).is_empty());
}

#[test]
fn test_change_carries_resulting_navigation_state() {
    let mut tree = ConversationTree::with_greeting("hi", TreeConfig::default());
    let changes = recorder(&tree);

    let u1 = tree.add_message(NewMessage::user("q")).unwrap();

    let changes = changes.lock().unwrap();
    let change = &changes[0];
    assert_eq!(change.tree_id, tree.id());
    assert_eq!(change.navigation.current_node_id, u1);
    assert_eq!(change.navigation.breadcrumbs.len(), 2);
    assert_eq!(
        change.navigation.current_branch.as_ref().map(|b| b.leaf_node_id),
        Some(u1)
    );
}

#[test]
fn test_subscribers_run_in_order_and_unsubscribe() {
    let mut tree = ConversationTree::default();
    let order = Arc::new(Mutex::new(Vec::new()));

    let first_sink = Arc::clone(&order);
    let first = tree.subscribe(move |_| first_sink.lock().unwrap().push(1));
    let second_sink = Arc::clone(&order);
    tree.subscribe(move |_| second_sink.lock().unwrap().push(2));

    tree.add_message(NewMessage::user("one")).unwrap();
    assert!(first.unsubscribe());
    tree.add_message(NewMessage::user("two")).unwrap();

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 2]);
    assert_eq!(tree.notifier().subscriber_count(), 1);
}

#[test]
fn test_dispatch_flag_is_set_only_during_callbacks() {
    let mut tree = ConversationTree::default();
    let state = tree.notifier().dispatch_state();
    let observed = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&observed);
    let during = state.clone();
    tree.subscribe(move |_| flag.store(during.is_dispatching(), Ordering::SeqCst));

    tree.add_message(NewMessage::user("q")).unwrap();

    assert!(observed.load(Ordering::SeqCst));
    assert!(!state.is_dispatching());
    tree.add_message(NewMessage::user("still mutable")).unwrap();
}

#[tokio::test]
async fn test_manager_rejects_reentrant_mutation() {
    let dir = tempdir().unwrap();
    let manager = ConversationManager::open(FileTreeStorage::new(dir.path()), "chat", TreeConfig::default())
        .await
        .unwrap();

    let rejected = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let inner = manager.clone();
    let rejected_sink = Arc::clone(&rejected);
    let calls_sink = Arc::clone(&calls);
    manager
        .subscribe(move |_| {
            calls_sink.fetch_add(1, Ordering::SeqCst);
            let nested = futures::executor::block_on(inner.add_message(NewMessage::user("nested")));
            if matches!(nested, Err(StorageError::Tree(TreeError::ReentrantMutation))) {
                rejected_sink.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

    manager.add_message(NewMessage::user("outer")).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(rejected.load(Ordering::SeqCst), 1);
    // Only the root and the outer message exist.
    assert_eq!(manager.snapshot().await.node_count(), 2);

    manager.add_message(NewMessage::user("after")).await.unwrap();
    assert_eq!(manager.snapshot().await.node_count(), 3);
}
