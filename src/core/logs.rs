/// User-visible log entries
///
/// These are the lines shown in the global log pane of a front end, distinct
/// from the diagnostic `log` facade output. Every entry renders as
/// `HH:mm:ss - <message>`.
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A log entry with timestamp and message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub level: LogLevel,
}

/// Log entry severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogEntry {
    /// Create a new log entry with the current timestamp
    pub fn new(message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
            level,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, LogLevel::Info)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, LogLevel::Warning)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, LogLevel::Error)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Append-only buffer of the most recent log entries
pub struct LogBuffer {
    entries: Vec<LogEntry>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);

        // Trim oldest entries if we exceed the max
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(0..excess);
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entry_renders_clock_prefix() {
        let mut entry = LogEntry::info("Port1 opened.");
        entry.timestamp = Local
            .with_ymd_and_hms(2024, 5, 1, 9, 4, 7)
            .single()
            .expect("unambiguous local time");
        assert_eq!(entry.to_string(), "09:04:07 - Port1 opened.");
    }

    #[test]
    fn buffer_keeps_most_recent_entries() {
        let mut buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(LogEntry::info(format!("line {i}")));
        }
        let messages: Vec<_> = buffer.entries().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(buffer.tail(2)[0].message, "line 3");
        assert_eq!(buffer.tail(10).len(), 3);
    }
}
