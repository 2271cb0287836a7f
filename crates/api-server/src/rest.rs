//! Operator control and dashboard REST endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use funnel_core::oplog::{LogEntry, OpsLog};
use funnel_core::types::{ContactKey, Conversation, ConversationPhase};
use funnel_core::FunnelError;
use funnel_orchestrator::FunnelEngine;
use funnel_store::{SnapshotStore, Stores};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FunnelEngine>,
    pub stores: Stores,
    pub oplog: Arc<OpsLog>,
    pub snapshots: Arc<SnapshotStore>,
    pub endpoints: Vec<String>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    /// Best-effort snapshot after a mutating admin action, off the request
    /// path.
    pub fn flush_snapshot(&self) {
        let snapshots = self.snapshots.clone();
        let stores = self.stores.clone();
        tokio::spawn(async move {
            snapshots.flush(&stores).await;
        });
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(e: FunnelError) -> ApiError {
    let (status, error) = match &e {
        FunnelError::UnknownContact(_) => (StatusCode::NOT_FOUND, "unknown_contact"),
        FunnelError::UnknownFunnel(_) => (StatusCode::BAD_REQUEST, "unknown_funnel"),
        FunnelError::DuplicateFunnel { .. } => (StatusCode::BAD_REQUEST, "duplicate_funnel"),
        FunnelError::InvalidOperation(_) => (StatusCode::BAD_REQUEST, "invalid_operation"),
        FunnelError::LockTimeout(_) => (StatusCode::CONFLICT, "contact_busy"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: e.to_string(),
        }),
    )
}

fn parse_contact_key(raw: &str) -> Result<ContactKey, ApiError> {
    ContactKey::parse(raw).ok_or_else(|| {
        error_response(FunnelError::InvalidOperation(format!(
            "not a contact key: {raw:?}"
        )))
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub node_id: String,
    pub uptime_secs: u64,
    pub total_conversations: usize,
    pub total_funnels: usize,
    pub pending_timers: usize,
    pub phases: HashMap<ConversationPhase, usize>,
    pub instance_distribution: HashMap<String, usize>,
}

/// GET /api/dashboard — aggregate counters for the operator UI. Reads are
/// unsynchronized snapshots; numbers may lag in-flight transitions.
pub async fn dashboard(State(state): State<AppState>) -> Json<DashboardResponse> {
    let mut phases: HashMap<ConversationPhase, usize> = HashMap::new();
    for conversation in state.stores.conversations.list() {
        *phases.entry(conversation.phase()).or_default() += 1;
    }

    Json(DashboardResponse {
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        total_conversations: state.stores.conversations.len(),
        total_funnels: state.stores.catalog.len(),
        pending_timers: state.engine.pending_timers(),
        phases,
        instance_distribution: state.stores.routes.distribution(&state.endpoints),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub phase: ConversationPhase,
    pub sticky_instance: Option<String>,
}

fn view(state: &AppState, conversation: Conversation) -> ConversationView {
    ConversationView {
        phase: conversation.phase(),
        sticky_instance: state.stores.routes.get(&conversation.contact_key),
        conversation,
    }
}

/// GET /api/conversations — every conversation, newest first, joined with
/// its sticky delivery endpoint.
pub async fn list_conversations(State(state): State<AppState>) -> Json<Vec<ConversationView>> {
    let mut conversations = state.stores.conversations.list();
    conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(
        conversations
            .into_iter()
            .map(|c| view(&state, c))
            .collect(),
    )
}

/// POST /api/conversation/:contact_key/pause
pub async fn pause_conversation(
    State(state): State<AppState>,
    Path(contact_key): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let key = parse_contact_key(&contact_key)?;
    let conversation = state.engine.pause(&key).map_err(error_response)?;
    info!(%key, "Conversation paused by operator");
    state.flush_snapshot();
    Ok(Json(view(&state, conversation)))
}

/// POST /api/conversation/:contact_key/resume
pub async fn resume_conversation(
    State(state): State<AppState>,
    Path(contact_key): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let key = parse_contact_key(&contact_key)?;
    let conversation = state.engine.resume(&key).map_err(error_response)?;
    info!(%key, "Conversation resumed by operator");
    state.flush_snapshot();
    Ok(Json(view(&state, conversation)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectFunnelRequest {
    pub funnel_id: String,
}

/// POST /api/conversation/:contact_key/select-funnel
pub async fn select_funnel(
    State(state): State<AppState>,
    Path(contact_key): Path<String>,
    Json(request): Json<SelectFunnelRequest>,
) -> Result<Json<ConversationView>, ApiError> {
    let key = parse_contact_key(&contact_key)?;
    let conversation = state
        .engine
        .select_funnel(&key, &request.funnel_id)
        .map_err(error_response)?;
    info!(%key, funnel_id = %request.funnel_id, "Funnel selected by operator");
    state.flush_snapshot();
    Ok(Json(view(&state, conversation)))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

fn default_log_limit() -> usize {
    100
}

/// GET /api/logs?limit=N — operational log tail, newest first.
pub async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    Json(state.oplog.tail(query.limit))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
