//! Public read endpoints
//!
//! Nothing here exposes credentials, owner addresses of providers or
//! registration signals.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RegistryApiState;
use super::error::ApiError;
use crate::error::RegistryError;
use crate::health::UptimeReport;
use crate::points::{OwnerTotals, PointsTransaction};
use crate::registry::PublicProviderInfo;

const DEFAULT_UPTIME_HOURS: i64 = 24;
const MAX_UPTIME_HOURS: i64 = 24 * 30;
const DEFAULT_LEADERBOARD_SIZE: usize = 20;
const MAX_LEADERBOARD_SIZE: usize = 100;
const RECENT_TRANSACTIONS: usize = 50;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub providers: usize,
    pub active_providers: usize,
}

#[derive(Debug, Serialize)]
pub struct DirectoryResponse {
    pub total: usize,
    pub providers: Vec<PublicProviderInfo>,
}

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct OwnerPointsResponse {
    #[serde(flatten)]
    pub totals: OwnerTotals,
    pub recent_transactions: Vec<PointsTransaction>,
}

/// GET /health - Service liveness and provider counts
async fn health(State(state): State<RegistryApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        providers: state.registry.provider_count().await,
        active_providers: state.registry.list_active().await.len(),
    })
}

/// GET /providers - Public directory of registered providers
async fn list_providers(State(state): State<RegistryApiState>) -> Json<DirectoryResponse> {
    let providers = state.registry.public_directory().await;
    Json(DirectoryResponse {
        total: providers.len(),
        providers,
    })
}

/// GET /providers/random - One uniformly chosen active provider
async fn random_provider(
    State(state): State<RegistryApiState>,
) -> Result<Json<PublicProviderInfo>, ApiError> {
    state
        .selection
        .select_random_public()
        .await
        .map(Json)
        .ok_or_else(|| RegistryError::NotFound("no active provider".to_string()).into())
}

/// GET /providers/{id} - Public view of one provider
async fn get_provider(
    State(state): State<RegistryApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicProviderInfo>, ApiError> {
    state
        .registry
        .public_info(id)
        .await
        .map(Json)
        .ok_or_else(|| RegistryError::NotFound(format!("provider {}", id)).into())
}

/// GET /providers/{id}/uptime?hours= - Availability over a trailing window
async fn provider_uptime(
    State(state): State<RegistryApiState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UptimeQuery>,
) -> Result<Json<UptimeReport>, ApiError> {
    let hours = query.hours.unwrap_or(DEFAULT_UPTIME_HOURS);
    if !(1..=MAX_UPTIME_HOURS).contains(&hours) {
        return Err(RegistryError::validation(format!(
            "hours must be between 1 and {}",
            MAX_UPTIME_HOURS
        ))
        .into());
    }
    if state.registry.get(id).await.is_none() {
        return Err(RegistryError::NotFound(format!("provider {}", id)).into());
    }
    Ok(Json(
        state
            .health
            .uptime(id, chrono::Duration::hours(hours))
            .await,
    ))
}

/// GET /points/leaderboard?limit= - Owners ranked by lifetime points
async fn leaderboard(
    State(state): State<RegistryApiState>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<Vec<OwnerTotals>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_SIZE)
        .clamp(1, MAX_LEADERBOARD_SIZE);
    Json(state.ledger.leaderboard(limit).await)
}

/// GET /points/{owner} - Lifetime totals and recent ledger entries
async fn owner_points(
    State(state): State<RegistryApiState>,
    Path(owner): Path<String>,
) -> Json<OwnerPointsResponse> {
    let totals = state.ledger.totals_by_owner(&owner).await;
    let recent_transactions = state
        .ledger
        .transactions_for_owner(&owner, RECENT_TRANSACTIONS)
        .await;
    Json(OwnerPointsResponse {
        totals,
        recent_transactions,
    })
}

pub fn create_router(state: RegistryApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/providers", get(list_providers))
        .route("/providers/random", get(random_provider))
        .route("/providers/{id}", get(get_provider))
        .route("/providers/{id}/uptime", get(provider_uptime))
        .route("/points/leaderboard", get(leaderboard))
        .route("/points/{owner}", get(owner_points))
        .with_state(state)
}
