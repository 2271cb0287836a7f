//! Per-contact mutual exclusion over inbound-event processing.
//!
//! Two near-simultaneous inbound messages from the same contact must not
//! both observe-and-advance the same conversation. Acquisition is bounded:
//! on timeout the event is dropped with a distinguishable outcome instead
//! of being processed unsafely. Release happens on guard drop, so every
//! exit path — including error paths — releases the lock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use funnel_core::types::ContactKey;
use funnel_core::{FunnelError, FunnelResult};

pub struct ContactLocks {
    locks: DashMap<ContactKey, Arc<Mutex<()>>>,
    timeout: Duration,
}

/// Scoped lock over one contact's event processing.
#[derive(Debug)]
pub struct ContactGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ContactLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Blocks up to the configured timeout for the contact's lock.
    pub async fn acquire(&self, key: &ContactKey) -> FunnelResult<ContactGuard> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(ContactGuard { _guard: guard }),
            Err(_) => {
                metrics::counter!("orchestrator.lock_timeouts").increment(1);
                Err(FunnelError::LockTimeout(key.to_string()))
            }
        }
    }
}
