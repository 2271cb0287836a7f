//! JSON snapshot persistence — the load-on-start / periodic-save contract.
//!
//! Two documents under the data directory: `funnels.json` (ordered funnel
//! list) and `conversations.json` (conversation records with ISO-8601
//! timestamps plus the address index, sticky routes, and lead history as
//! key-value pair lists). Saves are best-effort; loads fall back to seeded
//! defaults and empty stores, never a startup failure.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use funnel_core::types::{ContactKey, Conversation, Funnel};
use funnel_core::FunnelResult;

use crate::catalog::FunnelCatalog;
use crate::conversations::ConversationStore;
use crate::history::LeadHistory;
use crate::routing::StickyRoutes;
use crate::Stores;

const FUNNELS_FILE: &str = "funnels.json";
const CONVERSATIONS_FILE: &str = "conversations.json";

/// On-disk shape of `conversations.json`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationSnapshot {
    conversations: Vec<Conversation>,
    #[serde(default)]
    address_index: Vec<(String, ContactKey)>,
    #[serde(default)]
    sticky_routes: Vec<(ContactKey, String)>,
    #[serde(default)]
    lead_history: Vec<(ContactKey, Vec<String>)>,
}

pub struct SnapshotStore {
    data_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn funnels_path(&self) -> PathBuf {
        self.data_dir.join(FUNNELS_FILE)
    }

    fn conversations_path(&self) -> PathBuf {
        self.data_dir.join(CONVERSATIONS_FILE)
    }

    pub async fn save_funnels(&self, catalog: &FunnelCatalog) -> FunnelResult<()> {
        let funnels = catalog.list();
        self.write_json(&self.funnels_path(), &funnels).await?;
        info!(count = funnels.len(), "Funnels snapshot written");
        Ok(())
    }

    /// Replaces the catalog from disk. Returns false (leaving the current
    /// contents, normally the seeded defaults) when the file is missing or
    /// corrupt.
    pub async fn load_funnels(&self, catalog: &FunnelCatalog) -> bool {
        match self.read_json::<Vec<Funnel>>(&self.funnels_path()).await {
            Some(funnels) => {
                let kept = catalog.load(funnels);
                info!(count = kept, "Funnels snapshot loaded");
                true
            }
            None => {
                warn!("No usable funnels snapshot, keeping defaults");
                false
            }
        }
    }

    pub async fn save_conversations(&self, stores: &Stores) -> FunnelResult<()> {
        let snapshot = ConversationSnapshot {
            conversations: stores.conversations.list(),
            address_index: stores.conversations.export_index(),
            sticky_routes: stores.routes.export(),
            lead_history: stores.history.export(),
        };
        self.write_json(&self.conversations_path(), &snapshot)
            .await?;
        info!(
            count = snapshot.conversations.len(),
            "Conversations snapshot written"
        );
        Ok(())
    }

    /// Rehydrates the conversation store, address index, sticky routes, and
    /// lead history. Returns false (leaving the stores empty) when the file
    /// is missing or corrupt.
    pub async fn load_conversations(
        &self,
        conversations: &ConversationStore,
        routes: &StickyRoutes,
        history: &LeadHistory,
    ) -> bool {
        match self
            .read_json::<ConversationSnapshot>(&self.conversations_path())
            .await
        {
            Some(snapshot) => {
                let count = snapshot.conversations.len();
                conversations.load(snapshot.conversations, snapshot.address_index);
                routes.load(snapshot.sticky_routes);
                history.load(snapshot.lead_history);
                info!(count, "Conversations snapshot loaded");
                true
            }
            None => {
                warn!("No usable conversations snapshot, starting empty");
                false
            }
        }
    }

    /// Writes both documents; failures are logged, in-memory state stays
    /// authoritative until the next successful write.
    pub async fn flush(&self, stores: &Stores) {
        if let Err(e) = self.save_funnels(&stores.catalog).await {
            warn!(error = %e, "Failed to write funnels snapshot");
        }
        if let Err(e) = self.save_conversations(stores).await {
            warn!(error = %e, "Failed to write conversations snapshot");
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> FunnelResult<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let body = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Option<T> {
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Snapshot read failed");
                return None;
            }
        };
        match serde_json::from_slice(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Snapshot parse failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_core::types::Step;

    fn key(raw: &str) -> ContactKey {
        ContactKey::parse(raw).unwrap()
    }

    fn populated_stores() -> Stores {
        let stores = Stores::new();
        stores.catalog.seed_defaults();

        let k = key("5511987654321");
        let mut conv =
            Conversation::initial_delay(k.clone(), "5511987654321@s.whatsapp.net", "lead", "FRASE_CHAVE_4");
        conv.step_index = 1;
        stores.conversations.put(conv);
        stores.conversations.register_address("5511987654321", &k);
        stores.history.record(&k, "FRASE_CHAVE_4");
        stores
            .routes
            .record_success(&k, "RM01", &["RM01".to_string()], true);
        stores
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path());
        let stores = populated_stores();

        snapshots.flush(&stores).await;

        let restored = Stores::new();
        assert!(snapshots.load_funnels(&restored.catalog).await);
        assert!(
            snapshots
                .load_conversations(&restored.conversations, &restored.routes, &restored.history)
                .await
        );

        let k = key("5511987654321");
        let conv = restored.conversations.get(&k).unwrap();
        assert_eq!(conv.funnel_id.as_deref(), Some("FRASE_CHAVE_4"));
        assert_eq!(conv.step_index, 1);
        assert!(conv.waiting_initial_delay);

        assert_eq!(restored.catalog.len(), 4);
        assert!(restored.history.contains(&k, "FRASE_CHAVE_4"));
        assert_eq!(restored.routes.get(&k), Some("RM01".to_string()));
        assert_eq!(restored.conversations.resolve_address("11987654321"), Some(k));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path().join("nothing-here"));
        let stores = Stores::new();
        stores.catalog.seed_defaults();

        assert!(!snapshots.load_funnels(&stores.catalog).await);
        assert!(
            !snapshots
                .load_conversations(&stores.conversations, &stores.routes, &stores.history)
                .await
        );
        // Defaults survive a failed load.
        assert_eq!(stores.catalog.len(), 4);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("funnels.json"), b"{not json")
            .await
            .unwrap();
        let snapshots = SnapshotStore::new(dir.path());
        let catalog = FunnelCatalog::new();
        catalog.seed_defaults();

        assert!(!snapshots.load_funnels(&catalog).await);
        assert_eq!(catalog.len(), 4);
    }

    #[tokio::test]
    async fn test_timestamps_serialized_as_iso8601() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path());
        let stores = populated_stores();
        snapshots.save_conversations(&stores).await.unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("conversations.json"))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let created_at = parsed["conversations"][0]["createdAt"].as_str().unwrap();
        assert!(created_at.contains('T'), "expected ISO-8601, got {created_at}");
    }

    #[test]
    fn test_default_catalog_has_sample_steps() {
        let catalog = FunnelCatalog::new();
        catalog.seed_defaults();
        let funnel = catalog.get("FRASE_CHAVE_4").unwrap();
        assert_eq!(funnel.steps.len(), 1);
        assert!(matches!(funnel.steps[0], Step { wait_for_reply: true, .. }));
    }
}
