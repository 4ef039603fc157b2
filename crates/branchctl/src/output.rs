//! Terminal rendering for branchctl.

use colored::{ColoredString, Colorize};
use conversation_tree::{
    BranchComparison, BranchSide, ConversationNode, ConversationTree, DetachedSubtree,
    DifferenceType, NavigationState, Role,
};
use uuid::Uuid;

const PREVIEW_CHARS: usize = 72;

pub fn short_id(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or("").trim();
    if line.chars().count() > PREVIEW_CHARS {
        let cut: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

fn role_label(role: Role) -> ColoredString {
    match role {
        Role::System => "system".dimmed(),
        Role::User => "user".cyan(),
        Role::Assistant => "assistant".magenta(),
    }
}

pub fn print_conversation_list(ids: &[String]) {
    if ids.is_empty() {
        println!("{}", "No conversations stored".dimmed());
        return;
    }
    for id in ids {
        println!("{id}");
    }
}

pub fn print_navigation(state: &NavigationState) {
    let branch = state
        .current_branch
        .as_ref()
        .map(|b| b.name.bold())
        .unwrap_or_else(|| "(no branch)".dimmed());
    println!("On {} at {}", branch, short_id(state.current_node_id));

    let trail: Vec<String> = state
        .breadcrumbs
        .iter()
        .map(|crumb| crumb.label.clone())
        .collect();
    println!("{}", trail.join(" › ").dimmed());

    let mut moves = Vec::new();
    if state.can_go_back {
        moves.push("back");
    }
    if state.can_go_forward {
        moves.push("forward");
    }
    if !moves.is_empty() {
        println!("{}", format!("can go {}", moves.join(", ")).dimmed());
    }
}

pub fn print_branches(tree: &ConversationTree) {
    let current = tree.current_branch().map(|b| b.id);
    for branch in tree.branches() {
        let marker = if Some(branch.id) == current { "*" } else { " " };
        let star = if branch.is_favorite { " ★" } else { "" };
        let leaf = tree
            .get_node(branch.leaf_node_id)
            .map(|node| preview(&node.content))
            .unwrap_or_default();
        println!(
            "{} {}{} {} {} {}",
            marker.green(),
            branch.name.bold(),
            star.yellow(),
            format!("[{}]", short_id(branch.id)).dimmed(),
            format!("{} msgs", branch.message_count).dimmed(),
            leaf
        );
    }
}

pub fn print_path(tree: &ConversationTree, path: &[ConversationNode]) {
    for node in path {
        let cursor = if node.id == tree.current_node_id() { "→" } else { " " };
        let mut tags = Vec::new();
        if node.metadata.edited_from.is_some() && !node.metadata.regenerated {
            tags.push("edited");
        }
        if node.metadata.regenerated {
            tags.push("regenerated");
        }
        if node.metadata.merged_from.is_some() {
            tags.push("merged");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" ({})", tags.join(", "))
        };
        let siblings = match tree.siblings(node.id) {
            Ok((index, count)) if count > 1 => format!(" {}/{}", index + 1, count),
            _ => String::new(),
        };
        println!(
            "{} {} {}{}{}: {}",
            cursor.green(),
            short_id(node.id).dimmed(),
            role_label(node.role),
            siblings.yellow(),
            tags.dimmed(),
            preview(&node.content)
        );
    }
}

pub fn print_comparison(comparison: &BranchComparison) {
    println!(
        "{} {} vs {}",
        "Comparing".bold(),
        comparison.branch_a.name.cyan(),
        comparison.branch_b.name.magenta()
    );
    println!(
        "{}",
        format!(
            "common ancestor {}, ~{} shared message(s)",
            short_id(comparison.common_ancestor_id),
            comparison.common_messages
        )
        .dimmed()
    );
    if comparison.is_identical() {
        println!("{}", "Branches are identical".green());
        return;
    }
    for difference in &comparison.differences {
        let side = match difference.branch {
            BranchSide::A => comparison.branch_a.name.cyan(),
            BranchSide::B => comparison.branch_b.name.magenta(),
        };
        let kind = match difference.kind {
            DifferenceType::Added => "+".green(),
            DifferenceType::Removed => "-".red(),
            DifferenceType::Modified => "~".yellow(),
        };
        println!(
            "{} {} @{} {}",
            kind,
            side,
            difference.depth,
            preview(&difference.content)
        );
    }
}

pub fn print_detached(detached: &[DetachedSubtree]) {
    if detached.is_empty() {
        println!("{}", "Nothing detached".dimmed());
        return;
    }
    for entry in detached {
        println!(
            "{} {} node(s) under {} at {}: {}",
            short_id(entry.id).bold(),
            entry.nodes.len(),
            short_id(entry.parent_id),
            entry.detached_at.format("%Y-%m-%d %H:%M"),
            entry.reason.dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_first_line_only() {
        assert_eq!(preview("first\nsecond"), "first");
        let long = "x".repeat(PREVIEW_CHARS + 5);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 1);
    }
}
