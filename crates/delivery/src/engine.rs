//! Delivery engine — attempts one step's content across candidate
//! endpoints with bounded retry and sticky endpoint affinity.
//!
//! Attempt budget is deterministic: per endpoint at most
//! `max_attempts_per_endpoint` tries with a fixed backoff between them,
//! then the next candidate; failure is returned only once every candidate
//! is exhausted.

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::json;
use tracing::{info, warn};

use funnel_core::config::EngineConfig;
use funnel_core::oplog::OpsLog;
use funnel_core::types::{ContactKey, Step, StepKind, JID_SUFFIX};
use funnel_store::StickyRoutes;

use crate::gateway::{ChatGateway, GatewayError, MediaKind};

/// Outcome of a successful delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub endpoint: String,
}

pub struct DeliveryEngine {
    gateway: Arc<dyn ChatGateway>,
    routes: Arc<StickyRoutes>,
    endpoints: Vec<String>,
    max_attempts: u32,
    retry_backoff: Duration,
    oplog: Arc<OpsLog>,
}

impl DeliveryEngine {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        routes: Arc<StickyRoutes>,
        endpoints: Vec<String>,
        config: &EngineConfig,
        oplog: Arc<OpsLog>,
    ) -> Self {
        Self {
            gateway,
            routes,
            endpoints,
            max_attempts: config.max_attempts_per_endpoint.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            oplog,
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Attempts to deliver one content step to a contact. On the first
    /// success anywhere, records the sticky route (and, for a first
    /// message, advances the round-robin cursor) and returns the endpoint
    /// used. Returns the last error only after every candidate endpoint
    /// has exhausted its attempts.
    pub async fn deliver(
        &self,
        contact: &ContactKey,
        remote_jid: &str,
        step: &Step,
        is_first_message: bool,
    ) -> Result<DeliveryReceipt, GatewayError> {
        let number = remote_jid.strip_suffix(JID_SUFFIX).unwrap_or(remote_jid);
        let candidates = self
            .routes
            .candidates(contact, &self.endpoints, is_first_message);

        let mut last_error = GatewayError::Transport("no delivery endpoints configured".into());

        for endpoint in &candidates {
            for attempt in 1..=self.max_attempts {
                match self.send_step(endpoint, number, contact, step).await {
                    Ok(()) => {
                        self.routes.record_success(
                            contact,
                            endpoint,
                            &self.endpoints,
                            is_first_message,
                        );
                        metrics::counter!("delivery.sends", "endpoint" => endpoint.clone())
                            .increment(1);
                        self.oplog.record_with(
                            "SEND_SUCCESS",
                            format!("Delivered via {endpoint}"),
                            json!({ "contactKey": contact.as_str(), "attempt": attempt }),
                        );
                        return Ok(DeliveryReceipt {
                            endpoint: endpoint.clone(),
                        });
                    }
                    Err(e @ GatewayError::Payload(_)) => {
                        // Retrying cannot fix a malformed step.
                        warn!(%contact, error = %e, "Unsendable step");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(%contact, endpoint, attempt, error = %e, "Send attempt failed");
                        last_error = e;
                        if attempt < self.max_attempts {
                            tokio::time::sleep(self.retry_backoff).await;
                        }
                    }
                }
            }
        }

        metrics::counter!("delivery.exhausted").increment(1);
        self.oplog.record_with(
            "SEND_ALL_FAILED",
            format!("All endpoints exhausted for {contact}"),
            json!({ "lastError": last_error.to_string() }),
        );
        Err(last_error)
    }

    async fn send_step(
        &self,
        endpoint: &str,
        number: &str,
        contact: &ContactKey,
        step: &Step,
    ) -> Result<(), GatewayError> {
        match step.kind {
            StepKind::Text => {
                let text = step
                    .text
                    .as_deref()
                    .ok_or_else(|| GatewayError::Payload("text step has no body".into()))?;
                self.gateway.send_text(endpoint, number, text).await
            }
            StepKind::Image | StepKind::Video => {
                let media = step
                    .media_url
                    .as_deref()
                    .ok_or_else(|| GatewayError::Payload("media step has no mediaUrl".into()))?;
                let kind = if step.kind == StepKind::Image {
                    MediaKind::Image
                } else {
                    MediaKind::Video
                };
                self.gateway
                    .send_media(endpoint, number, kind, media, step.caption())
                    .await
            }
            StepKind::Audio => {
                let media = step
                    .media_url
                    .as_deref()
                    .ok_or_else(|| GatewayError::Payload("audio step has no mediaUrl".into()))?;
                self.send_voice_note(endpoint, number, contact, media).await
            }
            StepKind::Delay | StepKind::Typing => Err(GatewayError::Payload(
                "pacing steps never reach the delivery engine".into(),
            )),
        }
    }

    /// Voice-note pipeline: fetch the source, re-encode to an embeddable
    /// data URI, and send as PTT. Falls back to a generic media call with
    /// the encoded payload, and finally to passing the source URL directly.
    async fn send_voice_note(
        &self,
        endpoint: &str,
        number: &str,
        contact: &ContactKey,
        url: &str,
    ) -> Result<(), GatewayError> {
        match self.gateway.fetch_media(url).await {
            Ok(bytes) => {
                let data_uri = format!(
                    "data:audio/mpeg;base64,{}",
                    BASE64_STANDARD.encode(&bytes)
                );
                info!(%contact, bytes = bytes.len(), "Audio re-encoded for voice note");

                match self
                    .gateway
                    .send_voice(endpoint, number, &data_uri, true)
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        self.oplog.record_with(
                            "AUDIO_FALLBACK_MEDIA",
                            "Voice note rejected, retrying as generic media",
                            json!({ "contactKey": contact.as_str(), "error": e.to_string() }),
                        );
                        self.gateway
                            .send_media(endpoint, number, MediaKind::Audio, &data_uri, None)
                            .await
                    }
                }
            }
            Err(e) => {
                self.oplog.record_with(
                    "AUDIO_FALLBACK_URL",
                    "Source fetch failed, passing URL directly",
                    json!({ "contactKey": contact.as_str(), "error": e.to_string() }),
                );
                self.gateway.send_voice(endpoint, number, url, false).await
            }
        }
    }
}
