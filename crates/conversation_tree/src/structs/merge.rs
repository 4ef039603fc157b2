use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ReplaceMode;
use crate::error::{Result, TreeError};
use crate::structs::branch::{BranchId, BranchOptions};
use crate::structs::diff::Divergence;
use crate::structs::events::TreeOperation;
use crate::structs::node::{ConversationNode, NodeId};
use crate::structs::tree::{ConversationTree, DetachedSubtree};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Copy the source's unique nodes after the target's leaf.
    Append,
    /// Discard the target's divergent nodes and graft the source's in their
    /// place. Irreversible when the replace mode is `delete`.
    Replace,
    /// Time-ordered union of both sides as a new chain under the common
    /// ancestor; neither branch moves.
    Interleave,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Append => "append",
            MergeStrategy::Replace => "replace",
            MergeStrategy::Interleave => "interleave",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(MergeStrategy::Append),
            "replace" => Ok(MergeStrategy::Replace),
            "interleave" => Ok(MergeStrategy::Interleave),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

/// What a merge did, before it is announced.
struct MergeReport {
    tip_node_id: NodeId,
    created_nodes: usize,
    detached_nodes: usize,
}

impl ConversationTree {
    /// Merges the source branch's unique content into the target branch and
    /// returns the resulting tip node.
    ///
    /// `append` and `replace` move the target's leaf to the tip; `interleave`
    /// leaves both branches alone (see `merge_into_new_branch`). When the
    /// branches do not differ nothing is created and the target's leaf is
    /// returned, unless `merge.fail_on_empty` asks for `NothingToMerge`.
    pub fn merge_branches(
        &mut self,
        source_branch_id: BranchId,
        target_branch_id: BranchId,
        strategy: MergeStrategy,
    ) -> Result<NodeId> {
        self.ensure_mutable("merge_branches")?;
        let Some(report) = self.run_merge(source_branch_id, target_branch_id, strategy)? else {
            return Ok(self.get_branch(target_branch_id)?.leaf_node_id);
        };

        self.emit(TreeOperation::BranchesMerged {
            source_branch_id,
            target_branch_id,
            strategy,
            tip_node_id: report.tip_node_id,
            created_nodes: report.created_nodes,
            detached_nodes: report.detached_nodes,
            new_branch_id: None,
        });
        Ok(report.tip_node_id)
    }

    /// Runs a merge and registers a new branch ending at its tip. Named
    /// `"<source> + <target>"` unless a name is given.
    pub fn merge_into_new_branch(
        &mut self,
        source_branch_id: BranchId,
        target_branch_id: BranchId,
        strategy: MergeStrategy,
        name: Option<String>,
    ) -> Result<(BranchId, NodeId)> {
        self.ensure_mutable("merge_into_new_branch")?;
        let source_name = self.get_branch(source_branch_id)?.name.clone();
        let target_name = self.get_branch(target_branch_id)?.name.clone();

        let report = match self.run_merge(source_branch_id, target_branch_id, strategy)? {
            Some(report) => report,
            None => {
                let leaf = self.get_branch(target_branch_id)?.leaf_node_id;
                MergeReport {
                    tip_node_id: leaf,
                    created_nodes: 0,
                    detached_nodes: 0,
                }
            }
        };

        let options = BranchOptions {
            name: Some(name.unwrap_or_else(|| format!("{source_name} + {target_name}"))),
            ..Default::default()
        };
        let branch_id = self.register_branch(report.tip_node_id, options)?;

        self.emit(TreeOperation::BranchesMerged {
            source_branch_id,
            target_branch_id,
            strategy,
            tip_node_id: report.tip_node_id,
            created_nodes: report.created_nodes,
            detached_nodes: report.detached_nodes,
            new_branch_id: Some(branch_id),
        });
        Ok((branch_id, report.tip_node_id))
    }

    /// Brings a subtree detached by a `replace` merge back under its
    /// original parent. Returns the subtree's root node.
    pub fn restore_detached(&mut self, detached_id: Uuid) -> Result<NodeId> {
        self.ensure_mutable("restore_detached")?;
        let index = self
            .detached
            .iter()
            .position(|entry| entry.id == detached_id)
            .ok_or(TreeError::DetachedNotFound(detached_id))?;
        let parent_id = self.detached[index].parent_id;
        if !self.nodes.contains_key(&parent_id) {
            return Err(TreeError::InvalidParent(parent_id));
        }

        let entry = self.detached.remove(index);
        let root_node_id = entry.root_node_id;
        let restored = entry.nodes.len();
        // Detached nodes keep their child lists; only the root is relinked.
        for node in entry.nodes {
            if node.id == root_node_id {
                self.insert_node(node);
            } else {
                self.nodes.insert(node.id, node);
            }
        }

        // Branches that moved on since the merge are left alone.
        let mut restored_branches = Vec::new();
        for (branch_id, old_leaf) in entry.retargeted_branches {
            let Ok(branch_index) = self.branch_index(branch_id) else {
                continue;
            };
            if self.branches[branch_index].leaf_node_id == parent_id
                && self.nodes.contains_key(&old_leaf)
            {
                self.set_branch_leaf(branch_index, old_leaf);
                restored_branches.push(branch_id);
            }
        }

        tracing::info!(
            tree_id = %self.id,
            detached_id = %detached_id,
            root_node_id = %root_node_id,
            restored,
            restored_branches = restored_branches.len(),
            "ConversationTree: Detached subtree restored"
        );

        self.emit(TreeOperation::DetachedRestored {
            detached_id,
            root_node_id,
            restored_branches,
        });
        Ok(root_node_id)
    }

    /// Drops every detached subtree. Returns how many were dropped.
    pub fn purge_detached(&mut self) -> Result<usize> {
        self.ensure_mutable("purge_detached")?;
        let purged = self.detached.len();
        self.detached.clear();
        if purged == 0 {
            return Ok(0);
        }
        tracing::info!(tree_id = %self.id, purged, "ConversationTree: Detached subtrees purged");
        self.emit(TreeOperation::DetachedPurged { purged });
        Ok(purged)
    }

    /// Performs the merge without notifying. `None` means the branches do
    /// not differ (or the strategy has nothing to do) and nothing changed.
    fn run_merge(
        &mut self,
        source_branch_id: BranchId,
        target_branch_id: BranchId,
        strategy: MergeStrategy,
    ) -> Result<Option<MergeReport>> {
        let source = self.get_branch(source_branch_id)?.clone();
        let target = self.get_branch(target_branch_id)?.clone();
        let divergence = self.divergence(source.leaf_node_id, target.leaf_node_id)?;

        if divergence.is_empty() {
            if self.config.merge.fail_on_empty {
                return Err(TreeError::NothingToMerge);
            }
            tracing::debug!(
                tree_id = %self.id,
                source = %source.name,
                target = %target.name,
                "ConversationTree: Merge skipped, branches are identical"
            );
            return Ok(None);
        }

        let source_nodes = self.cloned_nodes(&divergence.unique_a);
        let target_index = self.branch_index(target_branch_id)?;

        let report = match strategy {
            MergeStrategy::Append => {
                if source_nodes.is_empty() {
                    return Ok(None);
                }
                let created = self.graft_copies(target.leaf_node_id, &source_nodes, strategy);
                let tip_node_id = created.last().copied().unwrap_or(target.leaf_node_id);
                self.set_branch_leaf(target_index, tip_node_id);
                MergeReport {
                    tip_node_id,
                    created_nodes: created.len(),
                    detached_nodes: 0,
                }
            }
            MergeStrategy::Replace => {
                let reason = format!("replace merge of '{}' into '{}'", source.name, target.name);
                let detached_nodes =
                    self.discard_divergent(&divergence, target_branch_id, reason);
                let created =
                    self.graft_copies(divergence.common_ancestor_id, &source_nodes, strategy);
                let tip_node_id = created
                    .last()
                    .copied()
                    .unwrap_or(divergence.common_ancestor_id);
                self.set_branch_leaf(target_index, tip_node_id);
                if !self.nodes.contains_key(&self.current_node_id) {
                    self.current_node_id = tip_node_id;
                }
                MergeReport {
                    tip_node_id,
                    created_nodes: created.len(),
                    detached_nodes,
                }
            }
            MergeStrategy::Interleave => {
                let mut combined = source_nodes;
                combined.extend(self.cloned_nodes(&divergence.unique_b));
                // Stable: equal timestamps keep source before target.
                combined.sort_by_key(|node| node.created_at);
                let created = self.graft_copies(divergence.common_ancestor_id, &combined, strategy);
                let tip_node_id = created
                    .last()
                    .copied()
                    .unwrap_or(divergence.common_ancestor_id);
                MergeReport {
                    tip_node_id,
                    created_nodes: created.len(),
                    detached_nodes: 0,
                }
            }
        };

        tracing::info!(
            tree_id = %self.id,
            source = %source.name,
            target = %target.name,
            strategy = %strategy,
            common_ancestor_id = %divergence.common_ancestor_id,
            tip_node_id = %report.tip_node_id,
            created_nodes = report.created_nodes,
            detached_nodes = report.detached_nodes,
            "ConversationTree: Branches merged"
        );

        Ok(Some(report))
    }

    fn cloned_nodes(&self, ids: &[NodeId]) -> Vec<ConversationNode> {
        ids.iter().filter_map(|id| self.nodes.get(id).cloned()).collect()
    }

    /// Copies `originals` as a chain under `parent_id`, keeping role,
    /// content, attachments and timestamps. Returns the new ids in order.
    fn graft_copies(
        &mut self,
        parent_id: NodeId,
        originals: &[ConversationNode],
        strategy: MergeStrategy,
    ) -> Vec<NodeId> {
        let mut created = Vec::with_capacity(originals.len());
        let mut parent = parent_id;
        for original in originals {
            let mut metadata = original.metadata.clone();
            metadata.merged_from = Some(original.id);
            metadata.merge_strategy = Some(strategy);
            let copy = ConversationNode {
                id: Uuid::new_v4(),
                parent_id: Some(parent),
                child_ids: Vec::new(),
                role: original.role,
                content: original.content.clone(),
                attachments: original.attachments.clone(),
                created_at: original.created_at,
                metadata,
            };
            parent = self.insert_node(copy);
            created.push(parent);
        }
        created
    }

    /// Removes the target side's divergent subtree (detached or deleted per
    /// config). Other branches ending inside it fall back to the common
    /// ancestor. Returns the number of nodes removed.
    fn discard_divergent(
        &mut self,
        divergence: &Divergence,
        target_branch_id: BranchId,
        reason: String,
    ) -> usize {
        let Some(&first) = divergence.unique_b.first() else {
            return 0;
        };
        let removed = self.detach_subtree(first);
        let removed_ids: HashSet<NodeId> = removed.iter().map(|node| node.id).collect();
        let retargeted_branches: Vec<(BranchId, NodeId)> = self
            .branches
            .iter()
            .filter(|branch| branch.id != target_branch_id)
            .filter(|branch| removed_ids.contains(&branch.leaf_node_id))
            .map(|branch| (branch.id, branch.leaf_node_id))
            .collect();
        self.reconcile_branches(&removed_ids, Some(divergence.common_ancestor_id));

        let count = removed.len();
        if self.config.merge.replace_mode == ReplaceMode::Detach {
            self.detached.push(DetachedSubtree {
                id: Uuid::new_v4(),
                parent_id: divergence.common_ancestor_id,
                root_node_id: first,
                nodes: removed,
                detached_at: Utc::now(),
                reason,
                retargeted_branches,
            });
        }
        count
    }
}
