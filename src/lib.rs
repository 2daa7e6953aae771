mod densemap;
pub mod error;
pub mod fs;
pub mod graph;
pub mod node;
pub mod production;
pub mod progress;
pub mod rule;
pub mod sink;
pub mod state;
pub mod target;
pub mod task;
pub mod trace;
pub mod work;

pub use error::GraphError;
pub use graph::Graph;
pub use node::{NodeId, ProductionId, RuleId, TargetId};
pub use production::{Artifact, MTime};
pub use rule::Action;
pub use state::{ProductionState, RuleState};
