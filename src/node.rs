//! Identity shared by every node of the graph.

use crate::densemap::dense_id;

dense_id!(
    /// Index of a Production within its Graph.
    ProductionId
);
dense_id!(
    /// Index of a Rule within its Graph.
    RuleId
);
dense_id!(
    /// Index of a Target within its Graph.
    TargetId
);

/// Any node of the graph.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Production(ProductionId),
    Rule(RuleId),
    Target(TargetId),
}

impl NodeId {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeId::Production(_) => NodeKind::Production,
            NodeId::Rule(_) => NodeKind::Rule,
            NodeId::Target(_) => NodeKind::Target,
        }
    }
}

impl From<ProductionId> for NodeId {
    fn from(id: ProductionId) -> Self {
        NodeId::Production(id)
    }
}
impl From<RuleId> for NodeId {
    fn from(id: RuleId) -> Self {
        NodeId::Rule(id)
    }
}
impl From<TargetId> for NodeId {
    fn from(id: TargetId) -> Self {
        NodeId::Target(id)
    }
}

/// The category of a node; names are unique per category.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeKind {
    Production,
    Rule,
    Target,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NodeKind::Production => "production",
            NodeKind::Rule => "rule",
            NodeKind::Target => "target",
        })
    }
}

/// Name bookkeeping carried by every node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Unique within the node's category.
    pub name: String,
    /// Display name, defaults to `name`.
    pub short_name: String,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        NodeInfo {
            short_name: name.clone(),
            name,
        }
    }
}

impl std::fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short_name)
    }
}

/// Render node names sorted and comma-joined, for diagnostics that must read
/// the same from run to run.
pub fn format_names<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_unstable();
    names.join(", ")
}
