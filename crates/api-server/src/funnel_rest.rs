//! Funnel catalog CRUD endpoints.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use funnel_core::types::Funnel;
use funnel_store::catalog::{is_default_funnel, MoveDirection};

use crate::rest::{error_response, ApiError, AppState};

const EXPORT_VERSION: &str = "1.0";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelView {
    #[serde(flatten)]
    pub funnel: Funnel,
    pub is_default: bool,
    pub step_count: usize,
}

fn view(funnel: Funnel) -> FunnelView {
    FunnelView {
        is_default: is_default_funnel(&funnel.id),
        step_count: funnel.steps.len(),
        funnel,
    }
}

/// GET /api/funnels
pub async fn list_funnels(State(state): State<AppState>) -> Json<Vec<FunnelView>> {
    Json(state.stores.catalog.list().into_iter().map(view).collect())
}

/// POST /api/funnels — create or replace a funnel. Ids outside the
/// reserved keyword namespace are rejected.
pub async fn upsert_funnel(
    State(state): State<AppState>,
    Json(funnel): Json<Funnel>,
) -> Result<Json<FunnelView>, ApiError> {
    let id = funnel.id.clone();
    state
        .stores
        .catalog
        .insert(funnel)
        .map_err(error_response)?;
    info!(funnel_id = %id, "Funnel upserted by operator");
    state.flush_snapshot();

    let stored = state
        .stores
        .catalog
        .get(&id)
        .ok_or_else(|| error_response(funnel_core::FunnelError::UnknownFunnel(id)))?;
    Ok(Json(view(stored)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveStepRequest {
    pub from_index: usize,
    pub direction: MoveDirection,
}

/// POST /api/funnels/:funnel_id/move-step
pub async fn move_step(
    State(state): State<AppState>,
    Path(funnel_id): Path<String>,
    Json(request): Json<MoveStepRequest>,
) -> Result<Json<FunnelView>, ApiError> {
    let updated = state
        .stores
        .catalog
        .move_step(&funnel_id, request.from_index, request.direction)
        .map_err(error_response)?;
    state.flush_snapshot();
    Ok(Json(view(updated)))
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelExport {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub total_funnels: usize,
    pub funnels: Vec<Funnel>,
}

/// GET /api/funnels/export — portable catalog document.
pub async fn export_funnels(State(state): State<AppState>) -> Json<FunnelExport> {
    let funnels = state.stores.catalog.list();
    Json(FunnelExport {
        version: EXPORT_VERSION.to_string(),
        export_date: Utc::now(),
        total_funnels: funnels.len(),
        funnels,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
}

/// POST /api/funnels/import — merges an export document into the catalog.
/// Funnels with ids outside the reserved namespace are skipped, not fatal.
pub async fn import_funnels(
    State(state): State<AppState>,
    Json(document): Json<FunnelExport>,
) -> Json<ImportResult> {
    let mut imported = 0;
    let mut skipped = 0;
    for funnel in document.funnels {
        let id = funnel.id.clone();
        match state.stores.catalog.insert(funnel) {
            Ok(()) => imported += 1,
            Err(e) => {
                warn!(funnel_id = %id, error = %e, "Skipping funnel on import");
                skipped += 1;
            }
        }
    }
    info!(imported, skipped, "Funnel import finished");
    state.flush_snapshot();
    Json(ImportResult { imported, skipped })
}
