//! Tracing output capture for the chat screen.
//!
//! While the alternate screen is active, anything written to stderr would
//! tear the layout. `LogBuffer` is handed to the fmt layer as its writer and
//! keeps the most recent lines in memory for the debug pane.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;

/// Lines held between two drains. Older lines are discarded first.
const DEFAULT_CAPACITY: usize = 500;

#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn locked(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.locked();
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Take everything captured so far, oldest first.
    pub fn drain(&self) -> Vec<String> {
        self.locked().drain(..).collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-event writer. The fmt layer writes one event in several chunks;
/// complete lines go to the buffer as they arrive, the tail on drop.
pub struct LineWriter {
    target: LogBuffer,
    partial: Vec<u8>,
}

impl LineWriter {
    fn emit(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_end_matches(['\r', '\n']);
        if !text.is_empty() {
            self.target.push(text);
        }
    }
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.partial.extend_from_slice(buf);
        while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=end).collect();
            self.emit(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            self.emit(&rest);
        }
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter {
            target: self.clone(),
            partial: Vec::new(),
        }
    }
}
