//! Usage ingestion
//!
//! The request router reports served usage here. Calls are signed like
//! admin calls and need the `RecordUsage` action.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};

use super::RegistryApiState;
use super::admin::AdminCaller;
use super::error::ApiError;
use crate::auth::AdminAction;
use crate::error::RegistryError;
use crate::points::{AwardOutcome, UsageEvent};

/// POST /usage - Credit one usage event to the points ledger
async fn record_usage(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
    body: Result<Json<UsageEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<AwardOutcome>), ApiError> {
    state.admin.authorize(&actor, AdminAction::RecordUsage)?;
    // Unknown categories fail here and surface as 400
    let Json(event) = body.map_err(|e| RegistryError::validation(e.body_text()))?;
    let outcome = state.ledger.award(event).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub fn create_router(state: RegistryApiState) -> Router {
    Router::new()
        .route("/usage", post(record_usage))
        .with_state(state)
}
