//! Lead history ledger — per-contact, append-only list of funnel ids
//! already started, consulted to block duplicate funnel starts.

use dashmap::DashMap;

use funnel_core::types::ContactKey;

pub struct LeadHistory {
    entries: DashMap<ContactKey, Vec<String>>,
}

impl LeadHistory {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn contains(&self, key: &ContactKey, funnel_id: &str) -> bool {
        self.entries
            .get(key)
            .map(|h| h.iter().any(|f| f == funnel_id))
            .unwrap_or(false)
    }

    /// Appends a funnel id to the contact's history. Idempotent.
    pub fn record(&self, key: &ContactKey, funnel_id: &str) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        if !entry.iter().any(|f| f == funnel_id) {
            entry.push(funnel_id.to_string());
        }
    }

    pub fn get(&self, key: &ContactKey) -> Vec<String> {
        self.entries.get(key).map(|h| h.clone()).unwrap_or_default()
    }

    pub fn export(&self) -> Vec<(ContactKey, Vec<String>)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn load(&self, entries: Vec<(ContactKey, Vec<String>)>) {
        self.entries.clear();
        for (key, history) in entries {
            self.entries.insert(key, history);
        }
    }
}

impl Default for LeadHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_contains() {
        let history = LeadHistory::new();
        let key = ContactKey::parse("11987654321").unwrap();

        assert!(!history.contains(&key, "FRASE_CHAVE_1"));
        history.record(&key, "FRASE_CHAVE_1");
        assert!(history.contains(&key, "FRASE_CHAVE_1"));
        assert!(!history.contains(&key, "FRASE_CHAVE_2"));
    }

    #[test]
    fn test_record_is_append_only_and_idempotent() {
        let history = LeadHistory::new();
        let key = ContactKey::parse("11987654321").unwrap();

        history.record(&key, "FRASE_CHAVE_1");
        history.record(&key, "FRASE_CHAVE_1");
        history.record(&key, "FRASE_CHAVE_2");

        assert_eq!(
            history.get(&key),
            vec!["FRASE_CHAVE_1".to_string(), "FRASE_CHAVE_2".to_string()]
        );
    }
}
