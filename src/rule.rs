//! Rules: the build steps of the graph, and how their staleness is decided.

use crate::node::{NodeInfo, ProductionId};
use crate::production::MTime;
use crate::state::RuleState;
use crate::task::{TaskContext, TaskResult};
use std::sync::Arc;
use std::time::SystemTime;

/// The work a Rule performs.  The graph never calls this itself; a scheduler
/// (see `work::Work`) runs it once the rule is ready.
pub trait Action: Send + Sync {
    /// Perform the step.  Returns an Err() if we failed outside of the step
    /// itself; a step that ran and failed reports it in the TaskResult.
    fn execute(&self, ctx: &TaskContext) -> anyhow::Result<TaskResult>;

    /// Message to display while the step runs.
    fn describe(&self) -> Option<String> {
        None
    }
}

pub struct Rule {
    pub info: NodeInfo,
    pub action: Arc<dyn Action>,
    pub requires: Vec<ProductionId>,
    pub produces: Vec<ProductionId>,
    pub state: RuleState,
}

impl Rule {
    pub fn new(name: &str, action: Arc<dyn Action>) -> Self {
        Rule {
            info: NodeInfo::new(name),
            action,
            requires: Vec::new(),
            produces: Vec::new(),
            state: RuleState::Unknown,
        }
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.info.name)
            .field("requires", &self.requires)
            .field("produces", &self.produces)
            .field("state", &self.state)
            .finish()
    }
}

/// Newest modification time among a rule's inputs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequiresTime {
    /// The rule has no inputs.
    None,
    /// Some input does not exist; sorts after every time.
    Missing,
    Newest(SystemTime),
}

impl RequiresTime {
    pub fn of(times: impl IntoIterator<Item = MTime>) -> Self {
        let mut acc = RequiresTime::None;
        for mtime in times {
            acc = match (acc, mtime) {
                (_, MTime::Missing) => return RequiresTime::Missing,
                (RequiresTime::Newest(t), MTime::Stamp(s)) => RequiresTime::Newest(t.max(s)),
                (_, MTime::Stamp(s)) => RequiresTime::Newest(s),
            };
        }
        acc
    }

    /// Whether an output with the given time predates the inputs.
    pub fn is_newer_than(&self, mtime: MTime) -> bool {
        match (self, mtime) {
            (_, MTime::Missing) => true,
            (RequiresTime::None, _) => false,
            (RequiresTime::Missing, _) => true,
            (RequiresTime::Newest(t), MTime::Stamp(s)) => s < *t,
        }
    }
}

/// Oldest modification time among a rule's outputs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProducesTime {
    /// The rule has no outputs.
    None,
    /// Some output does not exist; sorts before every time.
    Missing,
    Oldest(SystemTime),
}

impl ProducesTime {
    pub fn of(times: impl IntoIterator<Item = MTime>) -> Self {
        let mut acc = ProducesTime::None;
        for mtime in times {
            acc = match (acc, mtime) {
                (_, MTime::Missing) => return ProducesTime::Missing,
                (ProducesTime::Oldest(t), MTime::Stamp(s)) => ProducesTime::Oldest(t.min(s)),
                (_, MTime::Stamp(s)) => ProducesTime::Oldest(s),
            };
        }
        acc
    }
}

/// The time-based half of a rule's state, used once no input has failed or
/// been blocked.
pub fn staleness(requires: RequiresTime, produces: ProducesTime) -> RuleState {
    match (requires, produces) {
        // Nothing in and nothing out: not a meaningful step.
        (RequiresTime::None, ProducesTime::None) => RuleState::Failed,
        (RequiresTime::None, ProducesTime::Missing) => RuleState::Outdated,
        (RequiresTime::None, ProducesTime::Oldest(_)) => RuleState::Ok,
        (_, ProducesTime::None) | (_, ProducesTime::Missing) => RuleState::Outdated,
        (RequiresTime::Missing, ProducesTime::Oldest(_)) => RuleState::Outdated,
        (RequiresTime::Newest(newest_in), ProducesTime::Oldest(oldest_out)) => {
            if oldest_out < newest_in {
                RuleState::Outdated
            } else {
                RuleState::Ok
            }
        }
    }
}
