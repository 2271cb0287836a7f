//! Sticky routing table — the delivery endpoint last used successfully per
//! contact, plus the process-wide round-robin cursor that spreads
//! first-message load across endpoints.

use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::Mutex;

use funnel_core::types::ContactKey;

pub struct StickyRoutes {
    routes: DashMap<ContactKey, String>,
    /// Position of the endpoint that served the last successful
    /// first-of-conversation send; `None` until the first success.
    last_first_message_slot: Mutex<Option<usize>>,
}

impl StickyRoutes {
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
            last_first_message_slot: Mutex::new(None),
        }
    }

    pub fn get(&self, key: &ContactKey) -> Option<String> {
        self.routes.get(key).map(|r| r.clone())
    }

    /// Candidate endpoint ordering for one delivery:
    /// - non-first message with a sticky route: sticky endpoint first, then
    ///   the rest in configured order;
    /// - first message: configured list rotated to start one past the last
    ///   successful first-message endpoint;
    /// - otherwise: configured order.
    pub fn candidates(
        &self,
        key: &ContactKey,
        endpoints: &[String],
        is_first_message: bool,
    ) -> Vec<String> {
        if !is_first_message {
            if let Some(sticky) = self.get(key) {
                let mut ordered = vec![sticky.clone()];
                ordered.extend(endpoints.iter().filter(|e| **e != sticky).cloned());
                return ordered;
            }
        } else if !endpoints.is_empty() {
            let start = match *self.last_first_message_slot.lock() {
                Some(last) => (last + 1) % endpoints.len(),
                None => 0,
            };
            let mut ordered = endpoints[start..].to_vec();
            ordered.extend_from_slice(&endpoints[..start]);
            return ordered;
        }
        endpoints.to_vec()
    }

    /// Records a successful send: overwrites the contact's sticky route
    /// and, for first messages, advances the round-robin cursor to the
    /// endpoint's configured position.
    pub fn record_success(
        &self,
        key: &ContactKey,
        endpoint: &str,
        endpoints: &[String],
        is_first_message: bool,
    ) {
        self.routes.insert(key.clone(), endpoint.to_string());
        if is_first_message {
            if let Some(slot) = endpoints.iter().position(|e| e == endpoint) {
                *self.last_first_message_slot.lock() = Some(slot);
            }
        }
    }

    /// Count of contacts pinned to each configured endpoint.
    pub fn distribution(&self, endpoints: &[String]) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> =
            endpoints.iter().map(|e| (e.clone(), 0)).collect();
        for entry in self.routes.iter() {
            if let Some(count) = counts.get_mut(entry.value()) {
                *count += 1;
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn export(&self) -> Vec<(ContactKey, String)> {
        self.routes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn load(&self, routes: Vec<(ContactKey, String)>) {
        self.routes.clear();
        for (key, endpoint) in routes {
            self.routes.insert(key, endpoint);
        }
    }
}

impl Default for StickyRoutes {
    fn default() -> Self {
        Self::new()
    }
}
