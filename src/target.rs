//! Targets: named entry points for a build.  A target has no state of its
//! own; it is satisfied when everything it requires is.

use crate::node::{NodeId, NodeInfo};

#[derive(Debug)]
pub struct Target {
    pub info: NodeInfo,
    /// Productions and other targets, never rules.
    pub requires: Vec<NodeId>,
}

impl Target {
    pub fn new(name: &str) -> Self {
        Target {
            info: NodeInfo::new(name),
            requires: Vec::new(),
        }
    }

    pub fn next_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.requires.iter().copied()
    }
}
