//! Per-executable command history buffers.
//!
//! A session owns one buffer per client executable name. Recall, search,
//! and dedup semantics live client-side; the server only stores bounded
//! entries and deletes the buffers when the session dies.

use std::collections::VecDeque;

/// Bounded history storage for one executable.
#[derive(Clone, Debug)]
pub struct HistoryBuffer {
    exe: String,
    capacity: usize,
    entries: VecDeque<String>,
}

impl HistoryBuffer {
    pub fn new(exe: impl Into<String>, capacity: usize) -> Self {
        HistoryBuffer {
            exe: exe.into(),
            capacity,
            entries: VecDeque::new(),
        }
    }

    /// Executable name this buffer belongs to.
    pub fn exe(&self) -> &str {
        &self.exe
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a line, evicting the oldest entry at capacity.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
