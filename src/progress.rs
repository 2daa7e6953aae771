//! Run progress tracking and reporting, for the purpose of display to the
//! user.

use crate::node::RuleId;
use crate::state::StateCounts;
use crate::task::{TaskResult, Termination};
use std::io::Write;

/// Trait for run progress notifications.  Called from the scheduling thread
/// only.
pub trait Progress {
    /// Called as rules move through states.
    fn update(&mut self, counts: &StateCounts);

    /// Called when a rule starts.
    fn task_started(&mut self, id: RuleId, message: &str);

    /// Called when a rule completes.
    fn task_finished(&mut self, id: RuleId, message: &str, result: &TaskResult);

    /// Log a line of output.
    fn log(&mut self, msg: &str);
}

/// Progress implementation for "dumb" console, without any overprinting.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// The id of the last rule printed, used to avoid printing it twice
    /// when we have two updates from the same rule in a row.
    last_started: Option<RuleId>,
}

impl DumbConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Progress for DumbConsoleProgress {
    fn update(&mut self, _counts: &StateCounts) {
        // ignore
    }

    fn task_started(&mut self, id: RuleId, message: &str) {
        self.log(message);
        self.last_started = Some(id);
    }

    fn task_finished(&mut self, id: RuleId, message: &str, result: &TaskResult) {
        match result.termination {
            Termination::Success => {
                if result.output.is_empty() || self.last_started == Some(id) {
                    // Output is empty, or we just printed the message, don't print it again.
                } else {
                    self.log(message)
                }
            }
            Termination::Interrupted => self.log(&format!("interrupted: {}", message)),
            Termination::Failure => self.log(&format!("failed: {}", message)),
        };
        if !result.output.is_empty() {
            let mut stdout = std::io::stdout();
            // Losing the console is not a reason to stop the run.
            let _ = stdout.write_all(&result.output).and_then(|_| stdout.flush());
        }
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}
