//! Node state machines.  Every change of state goes through the transition
//! tables here; anything not listed is a contract violation.

use thiserror::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ProductionState {
    Unknown,
    /// Producer has yet to run.
    Outdated,
    /// Exists and is up to date.
    Current,
    /// Producer failed.
    Failed,
    /// Some upstream production failed or cannot be built.
    Blocked,
    /// No producer and does not exist.
    Bad,
}

impl ProductionState {
    pub const ALL: [ProductionState; 6] = [
        ProductionState::Unknown,
        ProductionState::Outdated,
        ProductionState::Current,
        ProductionState::Failed,
        ProductionState::Blocked,
        ProductionState::Bad,
    ];

    pub fn can_become(self, to: ProductionState) -> bool {
        use ProductionState::*;
        matches!(
            (self, to),
            (Unknown, Outdated | Current | Blocked | Bad)
                | (Outdated, Current | Blocked | Failed | Bad)
        )
    }

    pub fn is_terminal(self) -> bool {
        ProductionState::ALL.iter().all(|&to| !self.can_become(to))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RuleState {
    Unknown,
    Outdated,
    Running,
    Ok,
    Failed,
    Blocked,
}

impl RuleState {
    pub const ALL: [RuleState; 6] = [
        RuleState::Unknown,
        RuleState::Outdated,
        RuleState::Running,
        RuleState::Ok,
        RuleState::Failed,
        RuleState::Blocked,
    ];

    pub fn can_become(self, to: RuleState) -> bool {
        use RuleState::*;
        matches!(
            (self, to),
            (Unknown, Ok | Outdated | Blocked)
                | (Outdated, Running | Blocked)
                | (Running, Ok | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        RuleState::ALL.iter().all(|&to| !self.can_become(to))
    }

    /// The state a rule's outputs take when the rule enters this state, if
    /// they change at all.
    pub fn production_state(self) -> Option<ProductionState> {
        match self {
            RuleState::Ok => Some(ProductionState::Current),
            RuleState::Failed => Some(ProductionState::Failed),
            RuleState::Blocked => Some(ProductionState::Blocked),
            RuleState::Unknown | RuleState::Outdated | RuleState::Running => None,
        }
    }
}

macro_rules! state_names {
    ($ty:ident { $($state:ident => $name:literal),* $(,)? }) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $($ty::$state => $name,)*
                })
            }
        }
    };
}

state_names!(ProductionState {
    Unknown => "unknown",
    Outdated => "outdated",
    Current => "current",
    Failed => "failed",
    Blocked => "blocked",
    Bad => "bad",
});

state_names!(RuleState {
    Unknown => "unknown",
    Outdated => "outdated",
    Running => "running",
    Ok => "ok",
    Failed => "failed",
    Blocked => "blocked",
});

/// An attempted state change that the transition table does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind} state transition for {name:?}: {from} -> {to}")]
pub struct TransitionError {
    pub kind: crate::node::NodeKind,
    pub name: String,
    pub from: String,
    pub to: String,
}

/// Number of rules in each state.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct StateCounts([usize; 6]);

impl StateCounts {
    fn slot(state: RuleState) -> usize {
        RuleState::ALL
            .iter()
            .position(|&s| s == state)
            .unwrap_or_default()
    }

    pub fn add(&mut self, state: RuleState) {
        self.0[Self::slot(state)] += 1;
    }

    pub fn get(&self, state: RuleState) -> usize {
        self.0[Self::slot(state)]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}
