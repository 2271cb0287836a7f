//! Per-contact conversation store plus the many-to-one address index that
//! maps every observed raw-address variant to its `ContactKey`.

use dashmap::DashMap;
use tracing::debug;

use funnel_core::types::{ContactKey, Conversation, JID_SUFFIX};

/// Brazilian country prefix; contacts present addresses with and without it.
const COUNTRY_PREFIX: &str = "55";

pub struct ConversationStore {
    conversations: DashMap<ContactKey, Conversation>,
    /// Raw-address digit variants -> ContactKey. Populated opportunistically
    /// on every inbound/outbound event; entries are never removed.
    address_index: DashMap<String, ContactKey>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: DashMap::new(),
            address_index: DashMap::new(),
        }
    }

    pub fn get(&self, key: &ContactKey) -> Option<Conversation> {
        self.conversations.get(key).map(|c| c.clone())
    }

    pub fn put(&self, conversation: Conversation) {
        self.conversations
            .insert(conversation.contact_key.clone(), conversation);
    }

    /// Applies `mutate` to the current record under the map guard, so a
    /// stale snapshot taken before an await cannot clobber concurrent
    /// writes. Returns false when the contact is unknown.
    pub fn update(&self, key: &ContactKey, mutate: impl FnOnce(&mut Conversation)) -> bool {
        match self.conversations.get_mut(key) {
            Some(mut entry) => {
                mutate(&mut entry);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &ContactKey) -> bool {
        self.conversations.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn list(&self) -> Vec<Conversation> {
        self.conversations.iter().map(|c| c.clone()).collect()
    }

    /// Records every normalization variant of a raw address against a key:
    /// the digit string as observed, plus the forms with and without the
    /// country prefix.
    pub fn register_address(&self, raw: &str, key: &ContactKey) {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return;
        }
        self.address_index.insert(digits.clone(), key.clone());
        if let Some(national) = digits.strip_prefix(COUNTRY_PREFIX) {
            self.address_index.insert(national.to_string(), key.clone());
        } else {
            self.address_index
                .insert(format!("{COUNTRY_PREFIX}{digits}"), key.clone());
        }
    }

    /// Resolves a raw address to its key via the index, falling back to
    /// suffix normalization.
    pub fn resolve_address(&self, raw: &str) -> Option<ContactKey> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if let Some(entry) = self.address_index.get(&digits) {
            return Some(entry.clone());
        }
        ContactKey::parse(raw)
    }

    /// Looks up the conversation for a raw address, registering the address
    /// variant on a hit.
    pub fn find_by_address(&self, raw: &str) -> Option<Conversation> {
        let key = self.resolve_address(raw)?;
        let conversation = self.get(&key);
        if conversation.is_some() {
            self.register_address(raw, &key);
        } else {
            debug!(%key, "No conversation for address");
        }
        conversation
    }

    pub fn export_index(&self) -> Vec<(String, ContactKey)> {
        self.address_index
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn load(&self, conversations: Vec<Conversation>, index: Vec<(String, ContactKey)>) {
        self.conversations.clear();
        for conversation in conversations {
            self.conversations
                .insert(conversation.contact_key.clone(), conversation);
        }
        self.address_index.clear();
        for (address, key) in index {
            self.address_index.insert(address, key);
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a raw address as the gateway JID: ensures the country prefix,
/// inserts the mobile ninth digit for legacy 12-digit numbers, and appends
/// the gateway suffix.
pub fn remote_jid(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let mut formatted = if digits.starts_with(COUNTRY_PREFIX) {
        digits
    } else {
        format!("{COUNTRY_PREFIX}{digits}")
    };
    if formatted.len() == 12 {
        let area = &formatted[2..4];
        let number = &formatted[4..];
        formatted = format!("{COUNTRY_PREFIX}{area}9{number}");
    }
    format!("{formatted}{JID_SUFFIX}")
}
