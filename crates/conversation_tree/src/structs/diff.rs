use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::structs::branch::{Branch, BranchId};
use crate::structs::node::NodeId;
use crate::structs::tree::ConversationTree;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BranchSide {
    A,
    B,
}

impl BranchSide {
    pub fn other(self) -> Self {
        match self {
            BranchSide::A => BranchSide::B,
            BranchSide::B => BranchSide::A,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceType {
    Added,
    Removed,
    Modified,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BranchDifference {
    pub node_id: NodeId,
    /// Side the node is unique to.
    pub branch: BranchSide,
    #[serde(rename = "type")]
    pub kind: DifferenceType,
    pub content: String,
    /// Distance from the root.
    pub depth: usize,
}

/// Result of `compare_branches`. Computed on demand, never stored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BranchComparison {
    pub branch_a: Branch,
    pub branch_b: Branch,
    /// Deepest node shared by both root-to-leaf paths.
    pub common_ancestor_id: NodeId,
    /// Nodes unique to A (oldest first), then nodes unique to B, each framed
    /// from its own side.
    pub differences: Vec<BranchDifference>,
    /// Display-only estimate of shared messages.
    pub common_messages: usize,
}

impl BranchComparison {
    pub fn is_identical(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn unique_to(&self, side: BranchSide) -> impl Iterator<Item = &BranchDifference> {
        self.differences.iter().filter(move |d| d.branch == side)
    }

    /// All differences framed from `side`: its own unique nodes keep their
    /// type, the other side's `added` nodes become `removed`.
    pub fn as_seen_from(&self, side: BranchSide) -> Vec<BranchDifference> {
        self.differences
            .iter()
            .map(|difference| {
                let mut framed = difference.clone();
                if difference.branch != side && difference.kind == DifferenceType::Added {
                    framed.kind = DifferenceType::Removed;
                }
                framed
            })
            .collect()
    }
}

/// Where two root-to-leaf paths part ways.
#[derive(Debug, Clone)]
pub(crate) struct Divergence {
    pub common_ancestor_id: NodeId,
    /// Depth of the common ancestor.
    pub common_depth: usize,
    pub unique_a: Vec<NodeId>,
    pub unique_b: Vec<NodeId>,
    pub len_a: usize,
    pub len_b: usize,
}

impl Divergence {
    pub fn is_empty(&self) -> bool {
        self.unique_a.is_empty() && self.unique_b.is_empty()
    }
}

impl ConversationTree {
    /// Compares two branches through their lowest common ancestor.
    pub fn compare_branches(&self, branch_a_id: BranchId, branch_b_id: BranchId) -> Result<BranchComparison> {
        let branch_a = self.get_branch(branch_a_id)?.clone();
        let branch_b = self.get_branch(branch_b_id)?.clone();
        let divergence = self.divergence(branch_a.leaf_node_id, branch_b.leaf_node_id)?;

        let mut differences: Vec<BranchDifference> = divergence
            .unique_a
            .iter()
            .enumerate()
            .map(|(offset, id)| (BranchSide::A, offset, *id))
            .chain(
                divergence
                    .unique_b
                    .iter()
                    .enumerate()
                    .map(|(offset, id)| (BranchSide::B, offset, *id)),
            )
            .filter_map(|(side, offset, id)| {
                self.nodes.get(&id).map(|node| BranchDifference {
                    node_id: id,
                    branch: side,
                    kind: DifferenceType::Added,
                    content: node.content.clone(),
                    depth: divergence.common_depth + 1 + offset,
                })
            })
            .collect();

        if self.config.diff.detect_modifications {
            self.mark_modifications(&divergence, &mut differences);
        }

        let common_messages = divergence
            .len_a
            .min(divergence.len_b)
            .saturating_sub(divergence.unique_a.len().max(divergence.unique_b.len()));

        tracing::debug!(
            tree_id = %self.id,
            branch_a = %branch_a.name,
            branch_b = %branch_b.name,
            common_ancestor_id = %divergence.common_ancestor_id,
            unique_a = divergence.unique_a.len(),
            unique_b = divergence.unique_b.len(),
            "ConversationTree: Branches compared"
        );

        Ok(BranchComparison {
            branch_a,
            branch_b,
            common_ancestor_id: divergence.common_ancestor_id,
            differences,
            common_messages,
        })
    }

    /// Walks both root paths in lockstep; the last shared id is the LCA.
    pub(crate) fn divergence(&self, leaf_a: NodeId, leaf_b: NodeId) -> Result<Divergence> {
        let path_a = self.path_ids(leaf_a)?;
        let path_b = self.path_ids(leaf_b)?;

        let shared = path_a
            .iter()
            .zip(path_b.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if shared == 0 {
            return Err(TreeError::Corrupted(format!(
                "{leaf_a} and {leaf_b} do not share a root"
            )));
        }

        Ok(Divergence {
            common_ancestor_id: path_a[shared - 1],
            common_depth: shared - 1,
            unique_a: path_a[shared..].to_vec(),
            unique_b: path_b[shared..].to_vec(),
            len_a: path_a.len(),
            len_b: path_b.len(),
        })
    }

    /// Re-labels depth-aligned pairs produced by an edit or regeneration
    /// whose contents differ.
    fn mark_modifications(&self, divergence: &Divergence, differences: &mut [BranchDifference]) {
        let pairs = divergence.unique_a.iter().zip(divergence.unique_b.iter());
        for (a_id, b_id) in pairs {
            let (Some(a), Some(b)) = (self.nodes.get(a_id), self.nodes.get(b_id)) else {
                continue;
            };
            if a.content == b.content || !a.is_revision_of(b) {
                continue;
            }
            for difference in differences.iter_mut() {
                if difference.node_id == *a_id || difference.node_id == *b_id {
                    difference.kind = DifferenceType::Modified;
                }
            }
        }
    }
}
