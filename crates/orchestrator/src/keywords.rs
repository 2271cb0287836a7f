//! Keyword detection — case-insensitive substring match of inbound text
//! against the configured phrase table.

use funnel_core::config::KeywordRule;

pub struct KeywordMatcher {
    /// (lowercased phrase, funnel id), in configured order.
    rules: Vec<(String, String)>,
}

impl KeywordMatcher {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|r| (r.phrase.to_lowercase(), r.funnel_id))
                .collect(),
        }
    }

    /// The funnel id bound to the first phrase contained in `text`, if any.
    pub fn detect(&self, text: &str) -> Option<&str> {
        let normalized = text.to_lowercase();
        let normalized = normalized.trim();
        self.rules
            .iter()
            .find(|(phrase, _)| normalized.contains(phrase.as_str()))
            .map(|(_, funnel_id)| funnel_id.as_str())
    }
}
