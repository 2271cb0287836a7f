//! HTTP client for the outbound chat gateway (Evolution-compatible API).
//!
//! The gateway is addressed by "instance" name and distinguishes
//! caption-bearing from caption-less media calls, which is why `send_media`
//! only includes the caption field when one is present.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use funnel_core::config::GatewayConfig;

/// Failure taxonomy surfaced to the delivery engine. None of these are
/// fatal to the process.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("media fetch failed: {0}")]
    MediaFetch(String),

    #[error("unsendable step: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

/// Seam between the delivery engine and the remote gateway, so the engine
/// is testable without a network.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send_text(&self, instance: &str, number: &str, text: &str)
        -> Result<(), GatewayError>;

    async fn send_media(
        &self,
        instance: &str,
        number: &str,
        kind: MediaKind,
        media: &str,
        caption: Option<&str>,
    ) -> Result<(), GatewayError>;

    /// Sends a voice note (PTT). `encoded` marks payloads already
    /// re-encoded to an embeddable data URI.
    async fn send_voice(
        &self,
        instance: &str,
        number: &str,
        audio: &str,
        encoded: bool,
    ) -> Result<(), GatewayError>;

    /// Fetches source media bytes for re-encoding.
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, GatewayError>;
}

pub struct EvolutionGateway {
    http: reqwest::Client,
    media_http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EvolutionGateway {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let media_http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.media_fetch_timeout_ms))
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(Self {
            http,
            media_http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post(
        &self,
        instance: &str,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<(), GatewayError> {
        let url = format!("{}{}/{}", self.base_url, endpoint, instance);
        debug!(%url, instance, "Gateway request");

        let mut request = self.http.post(&url).json(&payload);
        if !self.api_key.is_empty() {
            request = request.header("apikey", &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%url, status = status.as_u16(), "Gateway error response");
        Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatGateway for EvolutionGateway {
    async fn send_text(
        &self,
        instance: &str,
        number: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        self.post(
            instance,
            "/message/sendText",
            json!({ "number": number, "text": text }),
        )
        .await
    }

    async fn send_media(
        &self,
        instance: &str,
        number: &str,
        kind: MediaKind,
        media: &str,
        caption: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut payload = json!({
            "number": number,
            "mediatype": kind.as_str(),
            "media": media,
        });
        // The remote API treats captioned and caption-less media as
        // distinct calls; never send an empty caption field.
        if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
            payload["caption"] = json!(caption);
        }
        if kind == MediaKind::Audio {
            payload["mimetype"] = json!("audio/mpeg");
        }
        self.post(instance, "/message/sendMedia", payload).await
    }

    async fn send_voice(
        &self,
        instance: &str,
        number: &str,
        audio: &str,
        encoded: bool,
    ) -> Result<(), GatewayError> {
        let mut payload = json!({
            "number": number,
            "audio": audio,
            "delay": 1200,
        });
        if encoded {
            payload["encoding"] = json!(true);
        }
        self.post(instance, "/message/sendWhatsAppAudio", payload)
            .await
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        let response = self
            .media_http
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::MediaFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::MediaFetch(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| GatewayError::MediaFetch(e.to_string()))
    }
}
