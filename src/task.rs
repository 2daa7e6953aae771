//! Runs the commands behind a CommandRule.
//! Unaware of the graph; just command execution.

use crate::rule::Action;
use crate::sink::{TraceSink, Verbosity};
use std::io::Write;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

/// The result of executing a rule's action.
#[derive(Debug)]
pub struct TaskResult {
    pub termination: Termination,
    /// Console output.
    pub output: Vec<u8>,
}

impl TaskResult {
    pub fn success() -> Self {
        TaskResult {
            termination: Termination::Success,
            output: Vec::new(),
        }
    }

    pub fn failure(output: impl Into<Vec<u8>>) -> Self {
        TaskResult {
            termination: Termination::Failure,
            output: output.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.termination == Termination::Success
    }
}

/// What an action gets to see while it runs.
pub struct TaskContext<'a> {
    /// Name of the rule being run.
    pub rule: &'a str,
    pub sink: &'a dyn TraceSink,
    /// Whether to log command lines as they are run.
    pub verbose: bool,
}

/// A rule action running a list of shell command lines in order, stopping at
/// the first that fails.
#[derive(Debug, Clone)]
pub struct CommandRule {
    cmdlines: Vec<String>,
    desc: Option<String>,
}

impl CommandRule {
    pub fn new<S: Into<String>>(cmdlines: impl IntoIterator<Item = S>) -> Self {
        CommandRule {
            cmdlines: cmdlines.into_iter().map(Into::into).collect(),
            desc: None,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn cmdlines(&self) -> &[String] {
        &self.cmdlines
    }
}

impl Action for CommandRule {
    fn execute(&self, ctx: &TaskContext) -> anyhow::Result<TaskResult> {
        let mut output = Vec::new();
        for cmdline in &self.cmdlines {
            if ctx.verbose {
                ctx.sink
                    .emit(Verbosity::Info, &format!("{}: {}", ctx.rule, cmdline));
            }
            let mut result = run_command(cmdline)?;
            output.append(&mut result.output);
            if !result.is_success() {
                return Ok(TaskResult {
                    termination: result.termination,
                    output,
                });
            }
        }
        Ok(TaskResult {
            termination: Termination::Success,
            output,
        })
    }

    fn describe(&self) -> Option<String> {
        self.desc.clone().or_else(|| Some(self.cmdlines.join("; ")))
    }
}

#[cfg(unix)]
fn shell(cmdline: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    cmd
}

#[cfg(windows)]
fn shell(cmdline: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd");
    cmd.arg("/c").arg(cmdline);
    cmd
}

/// Executes a command line as a subprocess.
/// Returns an Err() if we failed outside of the process itself.
pub fn run_command(cmdline: &str) -> anyhow::Result<TaskResult> {
    let mut cmd = shell(cmdline).output()?;
    let mut output = Vec::new();
    output.append(&mut cmd.stdout);
    output.append(&mut cmd.stderr);

    let termination = if cmd.status.success() {
        Termination::Success
    } else {
        termination_of_failure(&cmd.status, &mut output)?
    };
    Ok(TaskResult {
        termination,
        output,
    })
}

#[cfg(unix)]
fn termination_of_failure(
    status: &std::process::ExitStatus,
    output: &mut Vec<u8>,
) -> anyhow::Result<Termination> {
    use std::os::unix::process::ExitStatusExt;
    Ok(match status.signal() {
        Some(libc::SIGINT) => {
            write!(output, "interrupted")?;
            Termination::Interrupted
        }
        Some(sig) => {
            write!(output, "signal {}", sig)?;
            Termination::Failure
        }
        None => Termination::Failure,
    })
}

#[cfg(windows)]
fn termination_of_failure(
    _status: &std::process::ExitStatus,
    _output: &mut Vec<u8>,
) -> anyhow::Result<Termination> {
    Ok(Termination::Failure)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;

    fn ctx<'a>(sink: &'a RecordingSink, verbose: bool) -> TaskContext<'a> {
        TaskContext {
            rule: "test",
            sink,
            verbose,
        }
    }

    #[test]
    fn runs_in_order() -> anyhow::Result<()> {
        let sink = RecordingSink::new(Verbosity::Trace);
        let rule = CommandRule::new(["echo one", "echo two"]);
        assert_eq!(rule.cmdlines(), ["echo one", "echo two"]);
        let result = rule.execute(&ctx(&sink, true))?;
        assert!(result.is_success());
        assert_eq!(std::str::from_utf8(&result.output)?, "one\ntwo\n");
        assert!(sink.contains("test: echo one"));
        Ok(())
    }

    #[test]
    fn stops_at_failure() -> anyhow::Result<()> {
        let sink = RecordingSink::new(Verbosity::Trace);
        let rule = CommandRule::new(["echo before", "exit 3", "echo after"]);
        let result = rule.execute(&ctx(&sink, false))?;
        assert_eq!(result.termination, Termination::Failure);
        assert_eq!(std::str::from_utf8(&result.output)?, "before\n");
        assert!(sink.messages().is_empty());
        Ok(())
    }

    #[test]
    fn description() {
        let rule = CommandRule::new(["a", "b"]);
        assert_eq!(rule.describe().as_deref(), Some("a; b"));
        let rule = rule.with_description("build b");
        assert_eq!(rule.describe().as_deref(), Some("build b"));
    }
}
