//! Shared mutable state for the funnel engine: the funnel catalog, the
//! per-contact conversation store and address index, the lead history
//! ledger, the sticky routing table, and the JSON snapshot contract.

pub mod catalog;
pub mod conversations;
pub mod history;
pub mod routing;
pub mod snapshot;

pub use catalog::{FunnelCatalog, MoveDirection, KEYWORD_FUNNEL_PREFIX};
pub use conversations::ConversationStore;
pub use history::LeadHistory;
pub use routing::StickyRoutes;
pub use snapshot::SnapshotStore;

use std::sync::Arc;

/// Bundle of every shared store, initialized at startup from snapshots and
/// torn down by a final snapshot flush. Cheap to clone.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<FunnelCatalog>,
    pub conversations: Arc<ConversationStore>,
    pub history: Arc<LeadHistory>,
    pub routes: Arc<StickyRoutes>,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(FunnelCatalog::new()),
            conversations: Arc::new(ConversationStore::new()),
            history: Arc::new(LeadHistory::new()),
            routes: Arc::new(StickyRoutes::new()),
        }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new()
    }
}
