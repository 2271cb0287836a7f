//! End-to-end conversation flows through the funnel engine with a
//! recording in-memory gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use funnel_core::config::{AppConfig, EngineConfig};
use funnel_core::oplog::OpsLog;
use funnel_core::types::{ContactKey, ConversationPhase, Funnel, InboundMessage, Step};
use funnel_core::FunnelError;
use funnel_delivery::{ChatGateway, DeliveryEngine, GatewayError, MediaKind};
use funnel_orchestrator::FunnelEngine;
use funnel_store::Stores;

#[derive(Debug, Clone)]
struct Sent {
    endpoint: String,
    number: String,
    text: String,
}

struct RecordingGateway {
    sent: Mutex<Vec<Sent>>,
    fail_sends: bool,
}

impl RecordingGateway {
    fn ok() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_sends: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::ok()
        }
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatGateway for RecordingGateway {
    async fn send_text(&self, instance: &str, number: &str, text: &str) -> Result<(), GatewayError> {
        if self.fail_sends {
            return Err(GatewayError::Api {
                status: 500,
                body: "down".into(),
            });
        }
        self.sent.lock().push(Sent {
            endpoint: instance.to_string(),
            number: number.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_media(
        &self,
        _instance: &str,
        _number: &str,
        _kind: MediaKind,
        _media: &str,
        _caption: Option<&str>,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn send_voice(
        &self,
        _instance: &str,
        _number: &str,
        _audio: &str,
        _encoded: bool,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn fetch_media(&self, _url: &str) -> Result<Vec<u8>, GatewayError> {
        Ok(Vec::new())
    }
}

struct Harness {
    engine: Arc<FunnelEngine>,
    stores: Stores,
    gateway: Arc<RecordingGateway>,
    oplog: Arc<OpsLog>,
}

/// Millisecond-scale delayed start so flows settle within a test run.
const INITIAL_DELAY: Duration = Duration::from_millis(30);
/// Long enough for the delayed start plus the subsequent step run.
const SETTLE: Duration = Duration::from_millis(120);

fn harness(gateway: RecordingGateway, funnels: Vec<Funnel>) -> Harness {
    let stores = Stores::new();
    for funnel in funnels {
        stores.catalog.insert(funnel).unwrap();
    }
    let oplog = Arc::new(OpsLog::new());
    let config = EngineConfig {
        retry_backoff_ms: 1,
        ..EngineConfig::default()
    };
    let gateway = Arc::new(gateway);
    let delivery = Arc::new(DeliveryEngine::new(
        gateway.clone(),
        stores.routes.clone(),
        vec!["A".to_string()],
        &config,
        oplog.clone(),
    ));
    let engine = Arc::new(
        FunnelEngine::new(
            stores.clone(),
            delivery,
            &config,
            AppConfig::default().keywords,
            oplog.clone(),
        )
        .with_initial_delay(INITIAL_DELAY),
    );
    Harness {
        engine,
        stores,
        gateway,
        oplog,
    }
}

fn single_step_funnel(id: &str) -> Funnel {
    Funnel {
        id: id.to_string(),
        name: format!("{id} test"),
        steps: vec![Step::text("step_0", "primeira mensagem", true)],
    }
}

fn two_step_funnel(id: &str, first_waits: bool) -> Funnel {
    Funnel {
        id: id.to_string(),
        name: format!("{id} test"),
        steps: vec![
            Step::text("step_0", "primeira", first_waits),
            Step::text("step_1", "segunda", true),
        ],
    }
}

const JID: &str = "5511987654321@s.whatsapp.net";

fn inbound(text: &str) -> InboundMessage {
    InboundMessage {
        remote_jid: JID.to_string(),
        from_me: false,
        text: text.to_string(),
    }
}

fn key() -> ContactKey {
    ContactKey::parse(JID).unwrap()
}

#[tokio::test]
async fn test_keyword_starts_funnel_after_initial_delay() {
    let h = harness(RecordingGateway::ok(), vec![single_step_funnel("FRASE_CHAVE_1")]);

    h.engine
        .handle_inbound(&inbound("oi gaby quero te ajudar"))
        .await
        .unwrap();

    // Nothing is delivered inside the delay window.
    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.phase(), ConversationPhase::InitialDelay);
    assert_eq!(h.engine.pending_timers(), 1);
    assert!(h.gateway.sent().is_empty());

    tokio::time::sleep(SETTLE).await;

    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "primeira mensagem");
    assert_eq!(sent[0].number, "5511987654321");

    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.phase(), ConversationPhase::AwaitingReply);
    assert_eq!(conv.step_index, 0);
    assert_eq!(h.engine.pending_timers(), 0);
    assert!(h.stores.history.contains(&key(), "FRASE_CHAVE_1"));
}

#[tokio::test]
async fn test_non_keyword_message_parks_lead_until_keyword() {
    let h = harness(RecordingGateway::ok(), vec![single_step_funnel("FRASE_CHAVE_1")]);

    h.engine.handle_inbound(&inbound("bom dia")).await.unwrap();

    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.phase(), ConversationPhase::PendingKeyword);
    assert_eq!(h.engine.pending_timers(), 0);

    // A later keyword message promotes the parked lead.
    h.engine
        .handle_inbound(&inbound("oi gaby quero te ajudar"))
        .await
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    assert_eq!(h.gateway.sent().len(), 1);
    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.phase(), ConversationPhase::AwaitingReply);
}

#[tokio::test]
async fn test_steps_auto_advance_until_wait_for_reply() {
    let h = harness(
        RecordingGateway::ok(),
        vec![two_step_funnel("FRASE_CHAVE_1", false)],
    );

    h.engine
        .handle_inbound(&inbound("oi gaby quero te ajudar"))
        .await
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    // Step 0 does not wait, so both steps go out in one run.
    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].text, "primeira");
    assert_eq!(sent[1].text, "segunda");

    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.step_index, 1);
    assert_eq!(conv.phase(), ConversationPhase::AwaitingReply);
}

#[tokio::test]
async fn test_reply_advances_and_final_reply_completes() {
    let h = harness(
        RecordingGateway::ok(),
        vec![two_step_funnel("FRASE_CHAVE_1", true)],
    );

    h.engine
        .handle_inbound(&inbound("oi gaby quero te ajudar"))
        .await
        .unwrap();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(h.gateway.sent().len(), 1);

    h.engine.handle_inbound(&inbound("sim, pode falar")).await.unwrap();
    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.step_index, 1);
    assert_eq!(h.gateway.sent().len(), 2);
    assert!(conv.last_reply_at.is_some());

    // Reply to the last step ends the funnel, exactly once.
    h.engine.handle_inbound(&inbound("obrigado")).await.unwrap();
    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.phase(), ConversationPhase::Completed);
    assert!(conv.completed_at.is_some());
    assert_eq!(h.gateway.sent().len(), 2);

    let ends = h
        .oplog
        .tail(1000)
        .into_iter()
        .filter(|e| e.kind == "FUNNEL_END")
        .count();
    assert_eq!(ends, 1);

    // Further messages are inert.
    h.engine.handle_inbound(&inbound("alguém aí?")).await.unwrap();
    assert_eq!(h.gateway.sent().len(), 2);
}

#[tokio::test]
async fn test_pause_cancels_pending_delayed_start() {
    let h = harness(RecordingGateway::ok(), vec![single_step_funnel("FRASE_CHAVE_1")]);

    h.engine
        .handle_inbound(&inbound("oi gaby quero te ajudar"))
        .await
        .unwrap();
    let paused = h.engine.pause(&key()).unwrap();
    assert_eq!(paused.phase(), ConversationPhase::Paused);
    assert_eq!(h.engine.pending_timers(), 0);

    // The delay window elapses with nothing delivered.
    tokio::time::sleep(SETTLE).await;
    assert!(h.gateway.sent().is_empty());

    // Messages from the paused contact do not advance anything.
    h.engine.handle_inbound(&inbound("oi?")).await.unwrap();
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test]
async fn test_resume_replays_current_step() {
    let h = harness(RecordingGateway::ok(), vec![single_step_funnel("FRASE_CHAVE_1")]);

    h.engine
        .handle_inbound(&inbound("oi gaby quero te ajudar"))
        .await
        .unwrap();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(h.gateway.sent().len(), 1);

    h.engine.pause(&key()).unwrap();
    h.engine.resume(&key()).unwrap();
    tokio::time::sleep(SETTLE).await;

    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].text, "primeira mensagem");
    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.phase(), ConversationPhase::AwaitingReply);
}

#[tokio::test]
async fn test_repeated_keyword_does_not_restart_funnel() {
    let h = harness(RecordingGateway::ok(), vec![single_step_funnel("FRASE_CHAVE_1")]);

    h.engine
        .handle_inbound(&inbound("oi gaby quero te ajudar"))
        .await
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    // Reply completes the single-step funnel.
    h.engine.handle_inbound(&inbound("oi")).await.unwrap();
    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.phase(), ConversationPhase::Completed);

    // The same keyword again neither errors nor re-sends.
    h.engine
        .handle_inbound(&inbound("oi gaby quero te ajudar"))
        .await
        .unwrap();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(h.gateway.sent().len(), 1);
}

#[tokio::test]
async fn test_manual_selection_starts_immediately() {
    let h = harness(
        RecordingGateway::ok(),
        vec![
            single_step_funnel("FRASE_CHAVE_1"),
            single_step_funnel("FRASE_CHAVE_2"),
        ],
    );

    h.engine.handle_inbound(&inbound("bom dia")).await.unwrap();
    h.engine.select_funnel(&key(), "FRASE_CHAVE_2").unwrap();

    // No initial-delay timer for manual selections.
    assert_eq!(h.engine.pending_timers(), 0);
    tokio::time::sleep(SETTLE).await;
    assert_eq!(h.gateway.sent().len(), 1);

    let conv = h.stores.conversations.get(&key()).unwrap();
    assert_eq!(conv.funnel_id.as_deref(), Some("FRASE_CHAVE_2"));
    assert_eq!(conv.phase(), ConversationPhase::AwaitingReply);
}

#[tokio::test]
async fn test_manual_selection_errors() {
    let h = harness(RecordingGateway::ok(), vec![single_step_funnel("FRASE_CHAVE_1")]);

    assert!(matches!(
        h.engine.select_funnel(&key(), "FRASE_CHAVE_1"),
        Err(FunnelError::UnknownContact(_))
    ));

    h.engine.handle_inbound(&inbound("bom dia")).await.unwrap();
    assert!(matches!(
        h.engine.select_funnel(&key(), "FRASE_CHAVE_99"),
        Err(FunnelError::UnknownFunnel(_))
    ));

    h.engine.select_funnel(&key(), "FRASE_CHAVE_1").unwrap();
    assert!(matches!(
        h.engine.select_funnel(&key(), "FRASE_CHAVE_1"),
        Err(FunnelError::DuplicateFunnel { .. })
    ));
}

#[tokio::test]
async fn test_delivery_failure_stalls_conversation() {
    let h = harness(
        RecordingGateway::failing(),
        vec![single_step_funnel("FRASE_CHAVE_1")],
    );

    h.engine
        .handle_inbound(&inbound("oi gaby quero te ajudar"))
        .await
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    let conv = h.stores.conversations.get(&key()).unwrap();
    assert!(conv.has_error);
    assert!(conv.error_message.is_some());
    assert!(!conv.completed);
    assert!(!conv.waiting_for_response);
    assert_eq!(conv.step_index, 0);
}

#[tokio::test]
async fn test_self_sent_messages_are_ignored() {
    let h = harness(RecordingGateway::ok(), vec![single_step_funnel("FRASE_CHAVE_1")]);

    let mut msg = inbound("oi gaby quero te ajudar");
    msg.from_me = true;
    h.engine.handle_inbound(&msg).await.unwrap();

    assert!(h.stores.conversations.get(&key()).is_none());
    assert_eq!(h.engine.pending_timers(), 0);
}
