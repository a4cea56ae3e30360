//! Where decoders and pollers report problems they recover from.

use std::sync::Mutex;

use log::warn;

pub trait DiagnosticSink: Send + Sync {
    /// `source` names the file or server the message is about.
    fn report(&self, source: &str, message: &str);
}

/// Forwards every message to the `log` facade at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, source: &str, message: &str) {
        warn!("{source}: {message}");
    }
}

/// Keeps messages in memory so they can be inspected afterwards.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, source: &str, message: &str) {
        let line = format!("{source}: {message}");
        match self.messages.lock() {
            Ok(mut guard) => guard.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }
}
