//! Shared domain types for the funnel orchestration engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suffix the chat gateway appends to phone-number addresses.
pub const JID_SUFFIX: &str = "@s.whatsapp.net";

/// Placeholder body used when an inbound message carries no resolvable text.
pub const OPAQUE_MESSAGE_TEXT: &str = "[mensagem]";

/// Normalized contact identifier: the last 8 significant digits of a
/// phone-like address. A contact may present its address with or without
/// country/area prefixes across messages, so every routing and state lookup
/// keys on this suffix rather than the raw address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactKey(String);

impl ContactKey {
    /// Derives a key from a raw address by stripping non-digits and keeping
    /// the last 8 digits. Returns `None` when fewer than 8 digits remain.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 8 {
            return None;
        }
        Some(Self(digits[digits.len() - 8..].to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of work a funnel step performs. Content kinds produce one
/// outbound message; `Delay` and `Typing` are pure pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Text,
    Image,
    Video,
    Audio,
    Delay,
    Typing,
}

impl StepKind {
    pub fn is_content(self) -> bool {
        !matches!(self, StepKind::Delay | StepKind::Typing)
    }
}

/// A single step within a funnel.
///
/// Wire format matches the snapshot/CRUD document shape (camelCase keys,
/// every field beyond `type` optional).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Seconds to wait before executing this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_before: Option<u64>,
    /// Duration of a `Delay` step, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u64>,
    /// Duration of a `Typing` step, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing_seconds: Option<u64>,
    /// Show a typing indicator before sending a content step.
    #[serde(default)]
    pub show_typing: bool,
    /// Halt the funnel at this step until the contact replies.
    #[serde(default)]
    pub wait_for_reply: bool,
}

impl Step {
    /// Shorthand for a plain text step.
    pub fn text(id: impl Into<String>, body: impl Into<String>, wait_for_reply: bool) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::Text,
            text: Some(body.into()),
            media_url: None,
            delay_before: None,
            delay_seconds: None,
            typing_seconds: None,
            show_typing: false,
            wait_for_reply,
        }
    }

    /// Non-empty caption accompanying a media step, if any.
    pub fn caption(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// A named, ordered sequence of steps triggered by a keyword phrase or
/// manual operator selection. Immutable during a single conversation's
/// traversal; the catalog is the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funnel {
    pub id: String,
    pub name: String,
    pub steps: Vec<Step>,
}

/// Derived view of the dominant condition of a conversation, used for
/// dashboard aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    PendingKeyword,
    InitialDelay,
    Active,
    AwaitingReply,
    Paused,
    Completed,
}

/// Per-contact state machine instance. One live record per `ContactKey`,
/// created on first inbound event or manual funnel selection and never
/// deleted (terminal states persist for audit and the dashboard).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub contact_key: ContactKey,
    pub remote_jid: String,
    pub contact_name: String,
    #[serde(default)]
    pub funnel_id: Option<String>,
    #[serde(default)]
    pub step_index: usize,
    #[serde(default)]
    pub waiting_for_keyword: bool,
    #[serde(default)]
    pub waiting_for_response: bool,
    #[serde(default)]
    pub waiting_initial_delay: bool,
    #[serde(default)]
    pub paused: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_system_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_reply_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Conversation {
    /// A lead with no funnel bound yet, waiting for a keyword phrase.
    pub fn pending_keyword(
        contact_key: ContactKey,
        remote_jid: impl Into<String>,
        contact_name: impl Into<String>,
    ) -> Self {
        Self {
            contact_key,
            remote_jid: remote_jid.into(),
            contact_name: contact_name.into(),
            funnel_id: None,
            step_index: 0,
            waiting_for_keyword: true,
            waiting_for_response: false,
            waiting_initial_delay: false,
            paused: false,
            created_at: Utc::now(),
            last_system_message_at: None,
            last_reply_at: None,
            completed: false,
            completed_at: None,
            paused_at: None,
            has_error: false,
            error_message: None,
        }
    }

    /// A conversation bound to a funnel, waiting out the initial delay
    /// before step 0 is delivered.
    pub fn initial_delay(
        contact_key: ContactKey,
        remote_jid: impl Into<String>,
        contact_name: impl Into<String>,
        funnel_id: impl Into<String>,
    ) -> Self {
        Self {
            funnel_id: Some(funnel_id.into()),
            waiting_for_keyword: false,
            waiting_initial_delay: true,
            ..Self::pending_keyword(contact_key, remote_jid, contact_name)
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        if self.completed {
            ConversationPhase::Completed
        } else if self.paused {
            ConversationPhase::Paused
        } else if self.waiting_for_keyword {
            ConversationPhase::PendingKeyword
        } else if self.waiting_initial_delay {
            ConversationPhase::InitialDelay
        } else if self.waiting_for_response {
            ConversationPhase::AwaitingReply
        } else {
            ConversationPhase::Active
        }
    }
}

/// A structured inbound message event, as resolved from the webhook
/// transport collaborator.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Raw gateway address of the sender, e.g. `5511987654321@s.whatsapp.net`.
    pub remote_jid: String,
    /// Self-sent messages are ignored by the orchestrator.
    pub from_me: bool,
    /// Message body resolved down to a single text value.
    pub text: String,
}

impl InboundMessage {
    /// Sender address with the gateway JID suffix stripped.
    pub fn address(&self) -> &str {
        self.remote_jid
            .strip_suffix(JID_SUFFIX)
            .unwrap_or(&self.remote_jid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_key_normalization() {
        let with_country = ContactKey::parse("5511987654321").unwrap();
        let without_country = ContactKey::parse("11987654321").unwrap();
        let formatted = ContactKey::parse("+55 (11) 98765-4321").unwrap();

        assert_eq!(with_country, without_country);
        assert_eq!(with_country, formatted);
        assert_eq!(with_country.as_str(), "87654321");
        assert_eq!(with_country.as_str().len(), 8);
    }

    #[test]
    fn test_contact_key_too_short() {
        assert!(ContactKey::parse("1234567").is_none());
        assert!(ContactKey::parse("").is_none());
        assert!(ContactKey::parse("abc").is_none());
    }

    #[test]
    fn test_step_caption_ignores_whitespace() {
        let mut step = Step::text("step_0", "  ", false);
        assert!(step.caption().is_none());
        step.text = Some("hello".to_string());
        assert_eq!(step.caption(), Some("hello"));
        step.text = None;
        assert!(step.caption().is_none());
    }

    #[test]
    fn test_step_wire_format() {
        let json = r#"{"id":"step_0","type":"text","text":"oi","waitForReply":true}"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.kind, StepKind::Text);
        assert!(step.wait_for_reply);
        assert!(!step.show_typing);
    }

    #[test]
    fn test_conversation_phase_precedence() {
        let key = ContactKey::parse("11987654321").unwrap();
        let mut conv = Conversation::initial_delay(key, "jid", "name", "FRASE_CHAVE_1");
        assert_eq!(conv.phase(), ConversationPhase::InitialDelay);

        conv.paused = true;
        assert_eq!(conv.phase(), ConversationPhase::Paused);

        conv.completed = true;
        assert_eq!(conv.phase(), ConversationPhase::Completed);

        conv.completed = false;
        conv.paused = false;
        conv.waiting_initial_delay = false;
        conv.waiting_for_response = true;
        assert_eq!(conv.phase(), ConversationPhase::AwaitingReply);

        conv.waiting_for_response = false;
        assert_eq!(conv.phase(), ConversationPhase::Active);
    }

    #[test]
    fn test_inbound_address_strips_jid_suffix() {
        let msg = InboundMessage {
            remote_jid: "5511987654321@s.whatsapp.net".to_string(),
            from_me: false,
            text: "oi".to_string(),
        };
        assert_eq!(msg.address(), "5511987654321");
    }
}
