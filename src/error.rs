//! Structural errors, found while building and completing a graph.

use crate::node::NodeKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate {kind} name: {name:?}")]
    DuplicateName { kind: NodeKind, name: String },

    #[error("{owner:?} can only link to {expected}, got {kind} {name:?}")]
    WrongLinkType {
        owner: String,
        expected: &'static str,
        kind: NodeKind,
        name: String,
    },

    #[error("production {production:?} is already produced by rule {existing:?}, can't also be produced by {rule:?}")]
    MultipleProducers {
        production: String,
        existing: String,
        rule: String,
    },

    #[error("unknown target: {0:?}")]
    UnknownTarget(String),

    #[error("graph has no targets")]
    NoTargets,

    /// Nodes forming the cycle, in dependency order, starting at the node
    /// that was reached twice.
    #[error("cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("nodes not reachable from any target: {0}")]
    Unreachable(String),

    #[error("nodes linked into the graph but never added: {0}")]
    Unregistered(String),

    #[error("no rule to build production(s): {0}")]
    NoRule(String),

    #[error("graph is already complete")]
    AlreadyComplete,

    #[error("graph is not complete")]
    NotComplete,
}
