//! Append-only, size-bounded operational log.
//!
//! Every orchestration, delivery, and admin outcome is recorded here for
//! the dashboard collaborator; the newest entries evict the oldest once
//! the cap is reached.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 1000;

/// One recorded operational outcome.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// In-memory ring of recent operational outcomes, newest first.
pub struct OpsLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl OpsLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity,
        }
    }

    pub fn record(&self, kind: &str, message: impl Into<String>) {
        self.push(kind, message.into(), None);
    }

    pub fn record_with(&self, kind: &str, message: impl Into<String>, context: serde_json::Value) {
        self.push(kind, message.into(), Some(context));
    }

    fn push(&self, kind: &str, message: String, context: Option<serde_json::Value>) {
        tracing::debug!(kind, %message, "ops log");
        let mut entries = self.entries.lock();
        entries.push_front(LogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: kind.to_string(),
            message,
            context,
        });
        while entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    /// The `limit` most recent entries, newest first.
    pub fn tail(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.lock().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for OpsLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first() {
        let log = OpsLog::new();
        log.record("A", "first");
        log.record("B", "second");

        let tail = log.tail(10);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].kind, "B");
        assert_eq!(tail[1].kind, "A");
    }

    #[test]
    fn test_capacity_bound() {
        let log = OpsLog::with_capacity(3);
        for i in 0..10 {
            log.record("K", format!("entry {i}"));
        }
        assert_eq!(log.len(), 3);
        let tail = log.tail(10);
        assert_eq!(tail[0].message, "entry 9");
        assert_eq!(tail[2].message, "entry 7");
    }

    #[test]
    fn test_tail_limit() {
        let log = OpsLog::new();
        for i in 0..5 {
            log.record("K", format!("entry {i}"));
        }
        assert_eq!(log.tail(2).len(), 2);
    }
}
