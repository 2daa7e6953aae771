//! Where the graph and the scheduler send their diagnostics.

use std::sync::Mutex;

#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub enum Verbosity {
    Error,
    Info,
    Debug,
    Trace,
}

/// Receives diagnostic messages.  Shared by every node of a graph.
pub trait TraceSink: Send + Sync {
    fn emit(&self, level: Verbosity, msg: &str);
}

/// Forwards to the `tracing` crate.
#[derive(Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn emit(&self, level: Verbosity, msg: &str) {
        match level {
            Verbosity::Error => tracing::error!(target: "exrun", "{}", msg),
            Verbosity::Info => tracing::info!(target: "exrun", "{}", msg),
            Verbosity::Debug => tracing::debug!(target: "exrun", "{}", msg),
            Verbosity::Trace => tracing::trace!(target: "exrun", "{}", msg),
        }
    }
}

#[derive(Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn emit(&self, _level: Verbosity, _msg: &str) {}
}

/// Keeps every message at or above a level, for inspection by tests.
pub struct RecordingSink {
    max: Verbosity,
    messages: Mutex<Vec<(Verbosity, String)>>,
}

impl RecordingSink {
    pub fn new(max: Verbosity) -> Self {
        RecordingSink {
            max,
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<(Verbosity, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|(_, msg)| msg.contains(text))
    }
}

impl TraceSink for RecordingSink {
    fn emit(&self, level: Verbosity, msg: &str) {
        if level <= self.max {
            self.messages.lock().unwrap().push((level, msg.to_owned()));
        }
    }
}
