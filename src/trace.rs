//! Execution trace recording for diagnostics.
//!
//! The recorder keeps the last few instructions the runtime attempted, each
//! tagged with the method and source line it came from, so a failed run can
//! show how it got where it died.
use std::collections::VecDeque;
use std::fmt;

/// One attempted instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub method: String,
    pub line: usize,
    pub instruction: String,
}

impl fmt::Display for RecordEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}: {}", self.method, self.line, self.instruction)
    }
}

/// Bounded ring of the most recent instructions.
#[derive(Debug, Clone)]
pub struct TraceRecorder {
    capacity: usize,
    trace: VecDeque<RecordEntry>,
}

impl TraceRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            trace: VecDeque::with_capacity(capacity),
        }
    }

    /// Records an instruction before it executes. With a capacity of zero
    /// only the last instruction is kept.
    pub fn record(&mut self, method: &str, line: usize, instruction: &str) {
        while self.trace.len() >= self.capacity.max(1) {
            self.trace.pop_front();
        }
        self.trace.push_back(RecordEntry {
            method: method.to_string(),
            line,
            instruction: instruction.to_string(),
        });
    }

    /// The last attempted instruction.
    pub fn last(&self) -> Option<&RecordEntry> {
        self.trace.back()
    }

    /// Recorded entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &RecordEntry> {
        self.trace.iter()
    }

    pub fn clear(&mut self) {
        self.trace.clear();
    }
}
