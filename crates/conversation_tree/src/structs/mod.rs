pub mod branch;
pub mod diff;
pub mod events;
pub mod merge;
pub mod messaging;
pub mod navigation;
pub mod node;
pub mod tree;
pub mod tree_branches;
