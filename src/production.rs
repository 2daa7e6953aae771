//! Productions: the artifacts of the graph.

use crate::node::{NodeInfo, RuleId};
use crate::state::ProductionState;
use std::sync::Arc;
use std::time::SystemTime;

/// MTime info gathered for an artifact.  This also models "does not exist".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    pub fn exists(&self) -> bool {
        matches!(self, MTime::Stamp(_))
    }
}

/// The concrete thing behind a Production: a file, a table, anything that
/// can report when it was last modified.
///
/// Once the producing rule has finished, implementations must be safe to
/// query from any thread.
pub trait Artifact: Send + Sync {
    /// Modification time of the artifact, or `MTime::Missing`.
    fn local_time(&self) -> MTime;

    /// The producing rule finished successfully.
    fn finish_succeed(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// The producing rule failed.
    fn finish_fail(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// A rule that consumed this artifact finished.  Called once per
    /// consumer, possibly from several threads at once.
    fn finish_require(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct Production {
    pub info: NodeInfo,
    /// None until the production is added; a linked but never added entry
    /// is an error at completion time.
    pub artifact: Option<Arc<dyn Artifact>>,
    pub produced_by: Option<RuleId>,
    pub required_by: Vec<RuleId>,
    pub state: ProductionState,
}

impl Production {
    pub fn new(name: &str) -> Self {
        Production {
            info: NodeInfo::new(name),
            artifact: None,
            produced_by: None,
            required_by: Vec::new(),
            state: ProductionState::Unknown,
        }
    }

    pub fn local_time(&self) -> MTime {
        match &self.artifact {
            Some(artifact) => artifact.local_time(),
            None => MTime::Missing,
        }
    }
}

impl std::fmt::Debug for Production {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Production")
            .field("name", &self.info.name)
            .field("produced_by", &self.produced_by)
            .field("required_by", &self.required_by)
            .field("state", &self.state)
            .finish()
    }
}
