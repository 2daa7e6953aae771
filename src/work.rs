//! Runs the rules of a completed graph, potentially in parallel.
//!
//! The graph decides what may run; this module only asks it for ready rules,
//! executes their actions on a thread pool and reports the outcome back.

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::{format_names, NodeId, RuleId};
use crate::progress::Progress;
use crate::sink::Verbosity;
use crate::state::RuleState;
use crate::task::{TaskContext, TaskResult, Termination};
use crate::trace;
use anyhow::{anyhow, bail};
use std::panic::AssertUnwindSafe;
use std::sync::mpsc;
use std::time::Instant;

/// Environment variable overriding Options::parallelism.
pub const PARALLELISM_ENV: &str = "EXRUN_PARALLELISM";

#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of rules running at once.
    pub parallelism: usize,
    /// Stop starting rules after this many failures; 0 means never stop.
    pub keep_going: usize,
    /// Report outdated rules without running anything.
    pub dry_run: bool,
    /// Log command lines as they are run.
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parallelism: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            keep_going: 1,
            dry_run: false,
            verbose: false,
        }
    }
}

impl Options {
    /// Defaults, with parallelism taken from $EXRUN_PARALLELISM if set.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut options = Options::default();
        if let Ok(val) = std::env::var(PARALLELISM_ENV) {
            options.parallelism = match val.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => bail!("invalid {} {:?}", PARALLELISM_ENV, val),
            };
        }
        Ok(options)
    }
}

struct FinishedTask {
    /// A (faked) "thread id", used to put different finished rules in
    /// different tracks in a performance trace.
    tid: usize,
    id: RuleId,
    span: (Instant, Instant),
    result: TaskResult,
}

/// Tracks faked "thread ids" -- integers assigned to running rules to track
/// parallelism in perf trace output.
struct ThreadIds {
    /// An entry is true when claimed, false or nonexistent otherwise.
    slots: Vec<bool>,
}

impl ThreadIds {
    fn new() -> Self {
        ThreadIds { slots: Vec::new() }
    }

    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                let idx = self.slots.len();
                self.slots.push(true);
                idx
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

pub struct Work<'a> {
    graph: &'a Graph,
    progress: &'a mut dyn Progress,
    options: Options,
    pool: rayon::ThreadPool,
}

impl<'a> Work<'a> {
    pub fn new(
        graph: &'a Graph,
        progress: &'a mut dyn Progress,
        options: Options,
    ) -> anyhow::Result<Self> {
        if !graph.is_complete() {
            return Err(GraphError::NotComplete.into());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.parallelism.max(1))
            .thread_name(|i| format!("exrun-{}", i))
            .build()?;
        Ok(Work {
            graph,
            progress,
            options,
            pool,
        })
    }

    fn message(&self, id: RuleId) -> String {
        self.graph
            .action(id)
            .describe()
            .unwrap_or_else(|| self.graph.short_name(id))
    }

    /// Run every outdated rule below the roots.  Returns the number of rules
    /// that ran successfully, or an error naming the rules that failed.
    pub fn run(&mut self, roots: &[NodeId]) -> anyhow::Result<usize> {
        if self.options.dry_run {
            return Ok(self.dry_run(roots));
        }
        trace::scope("work.run", || self.run_rules(roots))
    }

    fn dry_run(&mut self, roots: &[NodeId]) -> usize {
        let outdated = self.graph.outdated_rules(roots);
        for &id in &outdated {
            let msg = format!("would run: {}", self.message(id));
            self.progress.log(&msg);
        }
        outdated.len()
    }

    fn can_start_more(&self, failed: usize) -> bool {
        self.options.keep_going == 0 || failed < self.options.keep_going
    }

    fn run_rules(&mut self, roots: &[NodeId]) -> anyhow::Result<usize> {
        let (tx, rx) = mpsc::channel::<FinishedTask>();
        let mut tids = ThreadIds::new();
        let mut running = 0;
        let mut ran = 0;
        let mut failed: Vec<RuleId> = Vec::new();

        loop {
            if self.can_start_more(failed.len()) {
                for id in self.graph.ready(roots) {
                    if running >= self.options.parallelism.max(1) {
                        break;
                    }
                    self.start(id, tids.claim(), tx.clone());
                    running += 1;
                }
            }
            self.progress.update(&self.graph.state_counts());

            if running == 0 {
                break;
            }
            let task = rx
                .recv()
                .map_err(|err| anyhow!("lost track of running rules: {}", err))?;
            running -= 1;
            tids.release(task.tid);
            let id = task.id;
            trace::write_complete(&self.graph.name(id), task.tid, task.span.0, task.span.1);

            if self.finish(task) {
                ran += 1;
            } else {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let names: Vec<String> = failed.iter().map(|&id| self.graph.name(id)).collect();
            bail!(
                "{} rule(s) failed: {}",
                failed.len(),
                format_names(names.iter().map(String::as_str))
            );
        }
        Ok(ran)
    }

    fn start(&mut self, id: RuleId, tid: usize, tx: mpsc::Sender<FinishedTask>) {
        self.graph.set_rule_state(id, RuleState::Running);
        let message = self.message(id);
        self.progress.task_started(id, &message);

        let action = self.graph.action(id);
        let name = self.graph.name(id);
        let sink = self.graph.sink().clone();
        let verbose = self.options.verbose;
        self.pool.spawn(move || {
            let start = Instant::now();
            let ctx = TaskContext {
                rule: &name,
                sink: &*sink,
                verbose,
            };
            // A panicking action must still report back, or the run would
            // wait for it forever.
            let result = match std::panic::catch_unwind(AssertUnwindSafe(|| action.execute(&ctx))) {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => TaskResult::failure(format!("{:#}", err)),
                Err(_) => TaskResult::failure("action panicked"),
            };
            let finish = Instant::now();
            // The send will only fail if the receiver disappeared, e.g. due to shutting down.
            let _ = tx.send(FinishedTask {
                tid,
                id,
                span: (start, finish),
                result,
            });
        });
    }

    /// Apply the outcome of a rule to its productions and to the graph.
    /// Returns whether the rule succeeded.
    fn finish(&mut self, mut task: FinishedTask) -> bool {
        let id = task.id;
        let sink = self.graph.sink().clone();
        let name = self.graph.name(id);
        let outputs = self.graph.produces(id);

        let mut ok = task.result.is_success();
        if ok {
            for &p in &outputs {
                let artifact = match self.graph.artifact(p) {
                    Some(artifact) => artifact,
                    None => continue,
                };
                if let Err(err) = artifact.finish_succeed() {
                    let msg = format!("{}: {:#}\n", self.graph.name(p), err);
                    task.result.output.extend_from_slice(msg.as_bytes());
                    task.result.termination = Termination::Failure;
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            for &p in &outputs {
                if let Some(artifact) = self.graph.artifact(p) {
                    if let Err(err) = artifact.finish_fail() {
                        sink.emit(
                            Verbosity::Error,
                            &format!("{}: cleanup failed: {:#}", self.graph.name(p), err),
                        );
                    }
                }
            }
        }
        for p in self.graph.requires(id) {
            if let Some(artifact) = self.graph.artifact(p) {
                if let Err(err) = artifact.finish_require() {
                    sink.emit(
                        Verbosity::Error,
                        &format!("{}: release failed: {:#}", self.graph.name(p), err),
                    );
                }
            }
        }

        let message = self.message(id);
        self.progress.task_finished(id, &message, &task.result);
        if ok {
            sink.emit(Verbosity::Info, &format!("rule {} ok", name));
            self.graph.set_rule_state(id, RuleState::Ok);
        } else {
            sink.emit(Verbosity::Error, &format!("rule {} failed", name));
            self.graph.set_rule_state(id, RuleState::Failed);
        }
        ok
    }
}
