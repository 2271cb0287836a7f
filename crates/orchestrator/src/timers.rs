//! Registry of pending delayed-start timers, at most one per contact.
//!
//! Cancellation is explicit and is the only safe way to keep a stale timer
//! from reviving superseded state; fired callbacks additionally re-validate
//! conversation state before mutating anything.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use funnel_core::types::ContactKey;

struct PendingTimer {
    funnel_id: String,
    created_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

pub struct TimerRegistry {
    timers: DashMap<ContactKey, PendingTimer>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            timers: DashMap::new(),
        }
    }

    /// Registers a delayed-start task, aborting any timer it supersedes.
    pub fn schedule(&self, key: ContactKey, funnel_id: String, handle: JoinHandle<()>) {
        let timer = PendingTimer {
            funnel_id,
            created_at: Utc::now(),
            handle,
        };
        if let Some(previous) = self.timers.insert(key, timer) {
            previous.handle.abort();
        }
    }

    /// Aborts and removes the contact's pending timer. Returns whether one
    /// existed.
    pub fn cancel(&self, key: &ContactKey) -> bool {
        match self.timers.remove(key) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Removes the registration for a timer that has fired, but only while
    /// it still owns the slot (a superseding schedule may have replaced it).
    pub fn complete(&self, key: &ContactKey, funnel_id: &str) {
        self.timers
            .remove_if(key, |_, timer| timer.funnel_id == funnel_id);
    }

    /// The pending funnel id and scheduling time for a contact, if any.
    pub fn pending(&self, key: &ContactKey) -> Option<(String, DateTime<Utc>)> {
        self.timers
            .get(key)
            .map(|t| (t.funnel_id.clone(), t.created_at))
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
