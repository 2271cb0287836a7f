//! The funnel state machine. One engine instance owns every per-contact
//! conversation transition: keyword-triggered starts, the delayed first
//! step, reply-driven advancement, auto-advancing step runs, pause/resume
//! and manual funnel selection.
//!
//! All transitions for a contact happen under that contact's lock except
//! the delayed-start callback, which instead re-validates conversation
//! state at fire time before touching anything.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use funnel_core::config::{EngineConfig, KeywordRule};
use funnel_core::oplog::OpsLog;
use funnel_core::types::{ContactKey, Conversation, InboundMessage, StepKind};
use funnel_core::{FunnelError, FunnelResult};
use funnel_delivery::DeliveryEngine;
use funnel_store::conversations::remote_jid;
use funnel_store::Stores;

use crate::keywords::KeywordMatcher;
use crate::locks::ContactLocks;
use crate::timers::TimerRegistry;

const DEFAULT_DELAY_STEP_SECS: u64 = 10;
const DEFAULT_TYPING_STEP_SECS: u64 = 3;

/// Cheap to clone; spawned tasks hold their own handle.
#[derive(Clone)]
pub struct FunnelEngine {
    stores: Stores,
    delivery: Arc<DeliveryEngine>,
    locks: Arc<ContactLocks>,
    timers: Arc<TimerRegistry>,
    keywords: Arc<KeywordMatcher>,
    oplog: Arc<OpsLog>,
    initial_delay: Duration,
    typing_indicator: Duration,
}

impl FunnelEngine {
    pub fn new(
        stores: Stores,
        delivery: Arc<DeliveryEngine>,
        config: &EngineConfig,
        keywords: Vec<KeywordRule>,
        oplog: Arc<OpsLog>,
    ) -> Self {
        Self {
            stores,
            delivery,
            locks: Arc::new(ContactLocks::new(Duration::from_millis(
                config.lock_timeout_ms,
            ))),
            timers: Arc::new(TimerRegistry::new()),
            keywords: Arc::new(KeywordMatcher::new(keywords)),
            oplog,
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            typing_indicator: Duration::from_secs(config.typing_indicator_secs),
        }
    }

    /// Overrides the delayed-start window (tests drive this down to
    /// milliseconds).
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Number of contacts currently waiting out their delayed start.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Processes one inbound message end to end: contact resolution, lock
    /// acquisition, keyword detection or reply advancement. Self-sent
    /// messages are ignored.
    pub async fn handle_inbound(&self, message: &InboundMessage) -> FunnelResult<()> {
        if message.from_me {
            return Ok(());
        }

        let address = message.address().to_string();
        let key = self
            .stores
            .conversations
            .resolve_address(&address)
            .ok_or_else(|| {
                FunnelError::MalformedInbound(format!("unresolvable address {address:?}"))
            })?;

        let _guard = match self.locks.acquire(&key).await {
            Ok(guard) => guard,
            Err(e) => {
                self.oplog.record_with(
                    "WEBHOOK_LOCK_TIMEOUT",
                    format!("Dropped inbound event for {key}"),
                    json!({ "contactKey": key.as_str() }),
                );
                return Err(e);
            }
        };
        self.stores.conversations.register_address(&address, &key);

        match self.stores.conversations.get(&key) {
            None => self.handle_first_contact(&key, &address, message).await,
            Some(conversation) if conversation.waiting_for_keyword => {
                self.handle_pending_keyword(&key, &address, &conversation, message)
                    .await
            }
            Some(conversation) if conversation.paused => {
                self.oplog.record_with(
                    "MESSAGE_WHILE_PAUSED",
                    format!("Ignoring message from paused contact {key}"),
                    json!({ "contactKey": key.as_str() }),
                );
                Ok(())
            }
            Some(conversation)
                if conversation.waiting_for_response && !conversation.waiting_initial_delay =>
            {
                self.oplog.record_with(
                    "CLIENT_REPLY",
                    format!("Reply from {key}"),
                    json!({ "contactKey": key.as_str(), "stepIndex": conversation.step_index }),
                );
                self.stores.conversations.update(&key, |c| {
                    c.waiting_for_response = false;
                    c.last_reply_at = Some(chrono::Utc::now());
                });
                self.advance_on_reply(&key).await;
                Ok(())
            }
            Some(conversation) => {
                debug!(%key, phase = ?conversation.phase(), "Inbound message with no transition");
                Ok(())
            }
        }
    }

    async fn handle_first_contact(
        &self,
        key: &ContactKey,
        address: &str,
        message: &InboundMessage,
    ) -> FunnelResult<()> {
        match self.keywords.detect(&message.text) {
            Some(funnel_id) => {
                let funnel_id = funnel_id.to_string();
                self.oplog.record_with(
                    "KEYWORD_DETECTED",
                    format!("Keyword matched for new contact {key}"),
                    json!({ "contactKey": key.as_str(), "funnelId": funnel_id }),
                );
                self.start_keyword_funnel(key, address, &funnel_id)
            }
            None => {
                self.stores.conversations.put(Conversation::pending_keyword(
                    key.clone(),
                    remote_jid(address),
                    address,
                ));
                self.oplog.record_with(
                    "LEAD_PENDING",
                    format!("New contact {key} without keyword, waiting"),
                    json!({ "contactKey": key.as_str() }),
                );
                Ok(())
            }
        }
    }

    async fn handle_pending_keyword(
        &self,
        key: &ContactKey,
        address: &str,
        conversation: &Conversation,
        message: &InboundMessage,
    ) -> FunnelResult<()> {
        match self.keywords.detect(&message.text) {
            Some(funnel_id) => {
                let funnel_id = funnel_id.to_string();
                self.oplog.record_with(
                    "KEYWORD_DETECTED",
                    format!("Keyword matched for pending contact {key}"),
                    json!({ "contactKey": key.as_str(), "funnelId": funnel_id }),
                );
                self.start_keyword_funnel(key, address, &funnel_id)
            }
            None => {
                debug!(%key, since = %conversation.created_at, "Still no keyword");
                Ok(())
            }
        }
    }

    /// Starts a keyword-triggered funnel; a duplicate (the contact already
    /// received this funnel) is logged and swallowed rather than surfaced,
    /// since the sender cannot act on it.
    fn start_keyword_funnel(
        &self,
        key: &ContactKey,
        address: &str,
        funnel_id: &str,
    ) -> FunnelResult<()> {
        match self.start_funnel_with_delay(key, address, funnel_id) {
            Err(FunnelError::DuplicateFunnel { .. }) => {
                self.oplog.record_with(
                    "FUNNEL_ALREADY_SENT",
                    format!("{funnel_id} already sent to {key}, ignoring trigger"),
                    json!({ "contactKey": key.as_str(), "funnelId": funnel_id }),
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Binds a funnel to the contact and schedules delivery of step 0 after
    /// the initial-delay window.
    fn start_funnel_with_delay(
        &self,
        key: &ContactKey,
        address: &str,
        funnel_id: &str,
    ) -> FunnelResult<()> {
        if self.stores.history.contains(key, funnel_id) {
            return Err(FunnelError::DuplicateFunnel {
                contact_key: key.to_string(),
                funnel_id: funnel_id.to_string(),
            });
        }

        self.stores.conversations.put(Conversation::initial_delay(
            key.clone(),
            remote_jid(address),
            address,
            funnel_id,
        ));
        self.stores.conversations.register_address(address, key);
        self.stores.history.record(key, funnel_id);
        metrics::counter!("orchestrator.funnels_started").increment(1);
        self.oplog.record_with(
            "FUNNEL_START_DELAY",
            format!("{funnel_id} bound to {key}, start delayed"),
            json!({
                "contactKey": key.as_str(),
                "funnelId": funnel_id,
                "delaySecs": self.initial_delay.as_secs_f64(),
            }),
        );

        let engine = self.clone();
        let timer_key = key.clone();
        let timer_funnel = funnel_id.to_string();
        let delay = self.initial_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.initial_delay_fired(&timer_key, &timer_funnel).await;
        });
        self.timers.schedule(key.clone(), funnel_id.to_string(), handle);
        Ok(())
    }

    /// Delayed-start callback. Runs without the contact lock, so it
    /// re-checks that the conversation still expects this exact start
    /// before proceeding.
    async fn initial_delay_fired(&self, key: &ContactKey, funnel_id: &str) {
        self.timers.complete(key, funnel_id);

        let Some(conversation) = self.stores.conversations.get(key) else {
            return;
        };
        let still_expected = conversation.funnel_id.as_deref() == Some(funnel_id)
            && !conversation.paused
            && conversation.waiting_initial_delay;
        if !still_expected {
            debug!(%key, funnel_id, "Stale delayed start, skipping");
            return;
        }

        self.stores
            .conversations
            .update(key, |c| c.waiting_initial_delay = false);
        self.oplog.record_with(
            "INITIAL_DELAY_DONE",
            format!("Starting {funnel_id} for {key}"),
            json!({ "contactKey": key.as_str(), "funnelId": funnel_id }),
        );
        self.run_from_current(key).await;
    }

    /// Executes steps from the conversation's current index until a
    /// wait-for-reply step is delivered, the funnel completes, a gate
    /// (pause, pending delay) is hit, or a delivery fails.
    async fn run_from_current(&self, key: &ContactKey) {
        loop {
            let Some(conversation) = self.stores.conversations.get(key) else {
                return;
            };
            if conversation.paused || conversation.waiting_initial_delay || conversation.completed
            {
                debug!(%key, phase = ?conversation.phase(), "Step run gated");
                return;
            }
            let Some(funnel_id) = conversation.funnel_id.clone() else {
                return;
            };
            let Some(funnel) = self.stores.catalog.get(&funnel_id) else {
                warn!(%key, funnel_id, "Conversation references a missing funnel");
                return;
            };
            if conversation.step_index >= funnel.steps.len() {
                self.complete(key, &funnel_id);
                return;
            }

            let step = funnel.steps[conversation.step_index].clone();
            let is_first_message =
                conversation.step_index == 0 && conversation.last_system_message_at.is_none();

            if let Some(secs) = step.delay_before {
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }

            match step.kind {
                StepKind::Delay => {
                    let secs = step.delay_seconds.unwrap_or(DEFAULT_DELAY_STEP_SECS);
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
                StepKind::Typing => {
                    let secs = step.typing_seconds.unwrap_or(DEFAULT_TYPING_STEP_SECS);
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
                _ => {
                    if step.show_typing {
                        tokio::time::sleep(self.typing_indicator).await;
                    }
                    match self
                        .delivery
                        .deliver(key, &conversation.remote_jid, &step, is_first_message)
                        .await
                    {
                        Ok(receipt) => {
                            let waits = step.wait_for_reply;
                            self.stores.conversations.update(key, |c| {
                                c.last_system_message_at = Some(chrono::Utc::now());
                                if waits {
                                    c.waiting_for_response = true;
                                }
                            });
                            if waits {
                                self.oplog.record_with(
                                    "STEP_WAITING_REPLY",
                                    format!("Step {} delivered, awaiting reply", step.id),
                                    json!({
                                        "contactKey": key.as_str(),
                                        "funnelId": funnel_id,
                                        "stepIndex": conversation.step_index,
                                        "endpoint": receipt.endpoint,
                                    }),
                                );
                                return;
                            }
                        }
                        Err(e) => {
                            self.stores.conversations.update(key, |c| {
                                c.has_error = true;
                                c.error_message = Some(e.to_string());
                            });
                            metrics::counter!("orchestrator.step_failures").increment(1);
                            self.oplog.record_with(
                                "STEP_FAILED",
                                format!("Step {} failed for {key}", step.id),
                                json!({
                                    "contactKey": key.as_str(),
                                    "funnelId": funnel_id,
                                    "stepIndex": conversation.step_index,
                                    "error": e.to_string(),
                                }),
                            );
                            return;
                        }
                    }
                }
            }

            self.stores.conversations.update(key, |c| {
                c.step_index += 1;
                c.waiting_for_response = false;
            });
        }
    }

    /// Moves past the wait-for-reply step the contact just answered and
    /// resumes the step run.
    async fn advance_on_reply(&self, key: &ContactKey) {
        let Some(conversation) = self.stores.conversations.get(key) else {
            return;
        };
        if conversation.paused {
            return;
        }
        let Some(funnel_id) = conversation.funnel_id.clone() else {
            return;
        };
        let Some(funnel) = self.stores.catalog.get(&funnel_id) else {
            return;
        };

        let next = conversation.step_index + 1;
        if next >= funnel.steps.len() {
            self.complete(key, &funnel_id);
            return;
        }
        self.stores.conversations.update(key, |c| {
            c.step_index = next;
            c.waiting_for_response = false;
        });
        self.run_from_current(key).await;
    }

    /// Marks the funnel finished. Exactly-once: the transition happens
    /// under the map guard, so concurrent callers record a single end.
    fn complete(&self, key: &ContactKey, funnel_id: &str) {
        let mut newly_completed = false;
        self.stores.conversations.update(key, |c| {
            if !c.completed {
                c.completed = true;
                c.completed_at = Some(chrono::Utc::now());
                c.waiting_for_response = false;
                newly_completed = true;
            }
        });
        if newly_completed {
            metrics::counter!("orchestrator.funnels_completed").increment(1);
            self.oplog.record_with(
                "FUNNEL_END",
                format!("{funnel_id} completed for {key}"),
                json!({ "contactKey": key.as_str(), "funnelId": funnel_id }),
            );
        }
    }

    /// Operator pause: freezes the conversation and cancels any pending
    /// delayed start.
    pub fn pause(&self, key: &ContactKey) -> FunnelResult<Conversation> {
        if !self.stores.conversations.contains(key) {
            return Err(FunnelError::UnknownContact(key.to_string()));
        }
        self.stores.conversations.update(key, |c| {
            c.paused = true;
            c.paused_at = Some(chrono::Utc::now());
        });
        let cancelled = self.timers.cancel(key);
        self.oplog.record_with(
            "CONVERSATION_PAUSED",
            format!("Paused {key}"),
            json!({ "contactKey": key.as_str(), "cancelledTimer": cancelled }),
        );
        self.stores
            .conversations
            .get(key)
            .ok_or_else(|| FunnelError::UnknownContact(key.to_string()))
    }

    /// Operator resume: clears pause and any leftover delay gate, then
    /// replays the current step in the background.
    pub fn resume(&self, key: &ContactKey) -> FunnelResult<Conversation> {
        if !self.stores.conversations.contains(key) {
            return Err(FunnelError::UnknownContact(key.to_string()));
        }
        self.stores.conversations.update(key, |c| {
            c.paused = false;
            c.paused_at = None;
            c.waiting_initial_delay = false;
        });
        self.oplog.record_with(
            "CONVERSATION_RESUMED",
            format!("Resumed {key}"),
            json!({ "contactKey": key.as_str() }),
        );

        let engine = self.clone();
        let run_key = key.clone();
        tokio::spawn(async move {
            engine.run_from_current(&run_key).await;
        });
        self.stores
            .conversations
            .get(key)
            .ok_or_else(|| FunnelError::UnknownContact(key.to_string()))
    }

    /// Operator funnel selection: rebinds the contact to the given funnel
    /// at step 0 and starts it immediately, bypassing the initial delay.
    /// Duplicate selections are rejected, unlike keyword triggers.
    pub fn select_funnel(
        &self,
        key: &ContactKey,
        funnel_id: &str,
    ) -> FunnelResult<Conversation> {
        if !self.stores.conversations.contains(key) {
            return Err(FunnelError::UnknownContact(key.to_string()));
        }
        if !self.stores.catalog.contains(funnel_id) {
            return Err(FunnelError::UnknownFunnel(funnel_id.to_string()));
        }
        if self.stores.history.contains(key, funnel_id) {
            return Err(FunnelError::DuplicateFunnel {
                contact_key: key.to_string(),
                funnel_id: funnel_id.to_string(),
            });
        }

        self.timers.cancel(key);
        self.stores.conversations.update(key, |c| {
            c.funnel_id = Some(funnel_id.to_string());
            c.step_index = 0;
            c.waiting_for_keyword = false;
            c.waiting_initial_delay = false;
            c.waiting_for_response = false;
            c.paused = false;
            c.paused_at = None;
            c.completed = false;
            c.completed_at = None;
            c.has_error = false;
            c.error_message = None;
        });
        self.stores.history.record(key, funnel_id);
        self.oplog.record_with(
            "FUNNEL_SELECTED_MANUALLY",
            format!("{funnel_id} selected for {key}"),
            json!({ "contactKey": key.as_str(), "funnelId": funnel_id }),
        );

        let engine = self.clone();
        let run_key = key.clone();
        tokio::spawn(async move {
            engine.run_from_current(&run_key).await;
        });
        self.stores
            .conversations
            .get(key)
            .ok_or_else(|| FunnelError::UnknownContact(key.to_string()))
    }
}
