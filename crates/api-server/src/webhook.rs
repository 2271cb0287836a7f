//! Inbound webhook intake for Evolution-style gateway events.
//!
//! The webhook always acknowledges: a malformed payload is discarded with
//! a success response so the gateway does not retry it forever. Only a
//! contact-lock timeout surfaces as a non-success body.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use funnel_core::types::{InboundMessage, OPAQUE_MESSAGE_TEXT};
use funnel_core::FunnelError;

use crate::rest::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub key: Option<MessageKey>,
    #[serde(default)]
    pub message: Option<MessageBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: bool,
}

/// The subset of gateway message shapes that carry usable text. Anything
/// else resolves to the opaque placeholder.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default)]
    pub image_message: Option<CaptionedMedia>,
    #[serde(default)]
    pub video_message: Option<CaptionedMedia>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CaptionedMedia {
    #[serde(default)]
    pub caption: Option<String>,
}

impl MessageBody {
    /// Resolves the envelope's message shapes down to one text value.
    pub fn resolve_text(&self) -> String {
        self.conversation
            .clone()
            .or_else(|| self.extended_text_message.as_ref().and_then(|e| e.text.clone()))
            .or_else(|| self.image_message.as_ref().and_then(|m| m.caption.clone()))
            .or_else(|| self.video_message.as_ref().and_then(|m| m.caption.clone()))
            .unwrap_or_else(|| OPAQUE_MESSAGE_TEXT.to_string())
    }
}

impl WebhookEnvelope {
    /// Extracts the inbound message, if the envelope carries one.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let data = self.data?;
        let key = data.key?;
        let remote_jid = key.remote_jid?;
        let text = data
            .message
            .as_ref()
            .map(MessageBody::resolve_text)
            .unwrap_or_else(|| OPAQUE_MESSAGE_TEXT.to_string());
        Some(InboundMessage {
            remote_jid,
            from_me: key.from_me,
            text,
        })
    }
}

/// POST /webhook/evolution — gateway event intake.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    metrics::counter!("api.webhook_events").increment(1);

    let envelope: WebhookEnvelope = match serde_json::from_value(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "Unparseable webhook payload, discarding");
            return Json(json!({ "success": true }));
        }
    };
    let Some(inbound) = envelope.into_inbound() else {
        debug!("Webhook payload without message key, discarding");
        return Json(json!({ "success": true }));
    };

    match state.engine.handle_inbound(&inbound).await {
        Ok(()) => Json(json!({ "success": true })),
        Err(FunnelError::LockTimeout(contact)) => {
            warn!(contact, "Webhook processing lock timed out");
            Json(json!({ "success": false, "error": "contact busy" }))
        }
        Err(FunnelError::MalformedInbound(reason)) => {
            debug!(reason, "Unresolvable webhook sender, discarding");
            Json(json!({ "success": true }))
        }
        Err(e) => {
            warn!(error = %e, "Webhook processing failed");
            metrics::counter!("api.webhook_errors").increment(1);
            Json(json!({ "success": false, "error": e.to_string() }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> WebhookEnvelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_plain_conversation_text() {
        let inbound = envelope(
            r#"{"data":{"key":{"remoteJid":"5511987654321@s.whatsapp.net","fromMe":false},
                "message":{"conversation":"oi gaby td bem"}}}"#,
        )
        .into_inbound()
        .unwrap();
        assert_eq!(inbound.text, "oi gaby td bem");
        assert!(!inbound.from_me);
    }

    #[test]
    fn test_extended_text_and_captions() {
        let extended = envelope(
            r#"{"data":{"key":{"remoteJid":"x"},
                "message":{"extendedTextMessage":{"text":"quoted reply"}}}}"#,
        )
        .into_inbound()
        .unwrap();
        assert_eq!(extended.text, "quoted reply");

        let image = envelope(
            r#"{"data":{"key":{"remoteJid":"x"},
                "message":{"imageMessage":{"caption":"foto"}}}}"#,
        )
        .into_inbound()
        .unwrap();
        assert_eq!(image.text, "foto");
    }

    #[test]
    fn test_opaque_message_placeholder() {
        let inbound = envelope(
            r#"{"data":{"key":{"remoteJid":"x"},"message":{"audioMessage":{}}}}"#,
        )
        .into_inbound()
        .unwrap();
        assert_eq!(inbound.text, OPAQUE_MESSAGE_TEXT);

        let no_message = envelope(r#"{"data":{"key":{"remoteJid":"x"}}}"#)
            .into_inbound()
            .unwrap();
        assert_eq!(no_message.text, OPAQUE_MESSAGE_TEXT);
    }

    #[test]
    fn test_missing_key_is_discarded() {
        assert!(envelope(r#"{"data":{}}"#).into_inbound().is_none());
        assert!(envelope(r#"{}"#).into_inbound().is_none());
        assert!(envelope(r#"{"data":{"key":{"fromMe":true}}}"#)
            .into_inbound()
            .is_none());
    }
}
