//! Tests for forking, comparing and path queries

use conversation_tree::{
    BranchId, BranchOptions, BranchSide, ConversationTree, DifferenceType, NewMessage, NodeId,
    TreeConfig, TreeError,
};
use uuid::Uuid;

struct Scenario {
    tree: ConversationTree,
    root: NodeId,
    u1: NodeId,
    a1: NodeId,
    a2: NodeId,
    main: BranchId,
    alt: BranchId,
}

/// R -> U1 -> A1 on "main", and "alt" forked at U1 with a different answer A2.
fn scenario() -> Scenario {
    let mut tree = ConversationTree::with_greeting("Hello! How can I help?", TreeConfig::default());
    let root = tree.root_id();
    let u1 = tree.add_message(NewMessage::user("explain X")).unwrap();
    let a1 = tree.add_message(NewMessage::assistant("X is a letter.")).unwrap();
    let main = tree.find_branch_by_name("main").unwrap().id;
    let alt = tree.create_branch(u1, BranchOptions::named("alt")).unwrap();
    let a2 = tree
        .add_message_to_branch(alt, NewMessage::assistant("X is a variable."))
        .unwrap();
    Scenario {
        tree,
        root,
        u1,
        a1,
        a2,
        main,
        alt,
    }
}

fn contents(tree: &ConversationTree, leaf: NodeId) -> Vec<String> {
    tree.get_path(leaf)
        .unwrap()
        .into_iter()
        .map(|node| node.content.clone())
        .collect()
}

#[test]
fn test_fork_and_compare_scenario() {
    let s = scenario();

    assert_eq!(s.tree.get_branch(s.main).unwrap().leaf_node_id, s.a1);
    assert_eq!(s.tree.get_branch(s.alt).unwrap().leaf_node_id, s.a2);

    let comparison = s.tree.compare_branches(s.main, s.alt).unwrap();
    assert_eq!(comparison.common_ancestor_id, s.u1);
    assert_eq!(comparison.differences.len(), 2);

    let a = &comparison.differences[0];
    assert_eq!((a.node_id, a.branch, a.kind), (s.a1, BranchSide::A, DifferenceType::Added));
    assert_eq!(a.content, "X is a letter.");
    assert_eq!(a.depth, 2);

    let b = &comparison.differences[1];
    assert_eq!((b.node_id, b.branch, b.kind), (s.a2, BranchSide::B, DifferenceType::Added));
    // R and U1 are shared.
    assert_eq!(comparison.common_messages, 2);
}

#[test]
fn test_diff_symmetry() {
    let s = scenario();
    let forward = s.tree.compare_branches(s.main, s.alt).unwrap();
    let backward = s.tree.compare_branches(s.alt, s.main).unwrap();

    let from_forward: Vec<_> = forward
        .unique_to(BranchSide::A)
        .map(|d| (d.node_id, d.content.clone()))
        .collect();
    let from_backward: Vec<_> = backward
        .unique_to(BranchSide::B)
        .map(|d| (d.node_id, d.content.clone()))
        .collect();
    assert_eq!(from_forward, from_backward);
    assert_eq!(forward.common_ancestor_id, backward.common_ancestor_id);
}

#[test]
fn test_diff_identity() {
    let s = scenario();
    for branch in [s.main, s.alt] {
        let comparison = s.tree.compare_branches(branch, branch).unwrap();
        assert!(comparison.is_identical());
        assert_eq!(
            comparison.common_ancestor_id,
            s.tree.get_branch(branch).unwrap().leaf_node_id
        );
    }
}

#[test]
fn test_compare_unknown_branch() {
    let s = scenario();
    let missing = Uuid::new_v4();
    assert!(matches!(
        s.tree.compare_branches(s.main, missing),
        Err(TreeError::BranchNotFound(id)) if id == missing
    ));
}

#[test]
fn test_path_determinism() {
    let s = scenario();
    for leaf in [s.root, s.u1, s.a1, s.a2] {
        let path = s.tree.get_path(leaf).unwrap();
        assert_eq!(path.first().unwrap().id, s.root);
        assert_eq!(path.last().unwrap().id, leaf);
        assert_eq!(path.len(), s.tree.depth(leaf).unwrap() + 1);
    }
    assert_eq!(
        contents(&s.tree, s.a2),
        vec!["Hello! How can I help?", "explain X", "X is a variable."]
    );
}

#[test]
fn test_switching_branches_moves_cursor() {
    let mut s = scenario();

    assert_eq!(s.tree.switch_to_branch(s.main).unwrap(), s.a1);
    assert_eq!(s.tree.current_node_id(), s.a1);
    assert_eq!(s.tree.current_branch().unwrap().id, s.main);

    let state = s.tree.navigation_state();
    assert_eq!(state.available_branches.len(), 2);
    assert_eq!(state.breadcrumbs.len(), 3);
    assert!(state.can_go_back);
    assert!(!state.can_go_forward);

    // Continuing on main leaves alt untouched.
    let a3 = s.tree.add_message(NewMessage::user("thanks")).unwrap();
    assert_eq!(s.tree.get_branch(s.main).unwrap().leaf_node_id, a3);
    assert_eq!(s.tree.get_branch(s.alt).unwrap().leaf_node_id, s.a2);
    s.tree.validate().unwrap();
}

#[test]
fn test_branch_metadata_updates() {
    let mut s = scenario();

    s.tree.rename_branch(s.alt, "variables").unwrap();
    s.tree.set_branch_color(s.alt, "#ff0000").unwrap();
    assert!(s.tree.toggle_branch_favorite(s.alt).unwrap());
    assert!(!s.tree.toggle_branch_favorite(s.alt).unwrap());

    let branch = s.tree.get_branch(s.alt).unwrap();
    assert_eq!(branch.name, "variables");
    assert_eq!(branch.color.as_deref(), Some("#ff0000"));
    assert!(!branch.is_favorite);
    assert!(s.tree.find_branch_by_name("alt").is_none());
}

#[test]
fn test_delete_branch_keeps_nodes() {
    let mut s = scenario();
    let nodes_before = s.tree.node_count();

    let removed = s.tree.delete_branch(s.alt).unwrap();

    assert_eq!(removed.name, "alt");
    assert_eq!(s.tree.branches().len(), 1);
    assert_eq!(s.tree.node_count(), nodes_before);
    assert!(s.tree.contains_node(s.a2));
    assert!(matches!(
        s.tree.switch_to_branch(s.alt),
        Err(TreeError::BranchNotFound(_))
    ));
}

#[test]
fn test_delete_node_reconciles_branches() {
    let mut s = scenario();

    let removed = s.tree.delete_node(s.a2, false).unwrap();
    assert_eq!(removed, 1);
    assert!(s.tree.get_branch(s.alt).is_err());
    assert_eq!(s.tree.current_node_id(), s.u1);

    let removed = s.tree.delete_node(s.u1, true).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(s.tree.get_branch(s.main).unwrap().leaf_node_id, s.root);
    assert_eq!(s.tree.node_count(), 1);
    s.tree.validate().unwrap();

    assert!(matches!(
        s.tree.delete_node(s.root, true),
        Err(TreeError::CannotDeleteRoot)
    ));
}

#[test]
fn test_invalid_ids_leave_tree_untouched() {
    let mut s = scenario();
    let before = s.tree.to_json().unwrap();
    let missing = Uuid::new_v4();

    assert!(matches!(
        s.tree.create_node(missing, NewMessage::user("orphan")),
        Err(TreeError::InvalidParent(_))
    ));
    assert!(matches!(s.tree.get_node(missing), Err(TreeError::NotFound(_))));
    assert!(s.tree.switch_to_node(missing).is_err());
    assert!(s.tree.create_branch(missing, BranchOptions::default()).is_err());
    assert!(s.tree.advance_branch_leaf(s.main, missing).is_err());
    assert!(s.tree.delete_node(missing, true).is_err());

    assert_eq!(s.tree.to_json().unwrap(), before);
}
