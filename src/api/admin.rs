//! Admin endpoints
//!
//! Callers sign `admin:{METHOD}:{path}:{address}:{timestamp}` and send it in the
//! `x-admin-address`, `x-admin-timestamp` and `x-admin-signature` headers.
//! A valid signature only proves identity; each action is then checked
//! against the admin policy by [`crate::registry::AdminService`].

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, request::Parts},
    response::Response,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::RegistryApiState;
use super::error::{ApiError, unauthorized};
use crate::auth::{AdminAction, admin_message, check_freshness};
use crate::balance::BalanceSweep;
use crate::health::{HealthCheckRecord, HealthSweep};
use crate::registry::{Provider, ProviderStatus};
use crate::risk::{SignalCluster, SuspiciousProvider, VerificationStatus};

pub const ADMIN_ADDRESS_HEADER: &str = "x-admin-address";
pub const ADMIN_TIMESTAMP_HEADER: &str = "x-admin-timestamp";
pub const ADMIN_SIGNATURE_HEADER: &str = "x-admin-signature";

/// Authenticated admin address
#[derive(Debug, Clone)]
pub struct AdminCaller(pub String);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<RegistryApiState> for AdminCaller {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &RegistryApiState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let (Some(address), Some(timestamp), Some(signature)) = (
            header(headers, ADMIN_ADDRESS_HEADER),
            header(headers, ADMIN_TIMESTAMP_HEADER),
            header(headers, ADMIN_SIGNATURE_HEADER),
        ) else {
            return Err(unauthorized("missing admin signature headers"));
        };
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| unauthorized("invalid admin timestamp"))?;

        if let Err(e) = check_freshness(timestamp, Utc::now(), state.admin_signature_max_age_secs)
        {
            warn!(path = %parts.uri.path(), "Stale admin signature");
            return Err(unauthorized(e.to_string()));
        }

        let address = address.to_lowercase();
        let message = admin_message(
            parts.method.as_str(),
            parts.uri.path(),
            &address,
            timestamp,
        );
        if !state.verifier.verify(&message, signature, &address) {
            warn!(path = %parts.uri.path(), "Invalid admin signature");
            return Err(unauthorized("invalid admin signature"));
        }
        Ok(AdminCaller(address))
    }
}

/// Provider view for operators; still omits the credential
#[derive(Debug, Serialize)]
pub struct AdminProviderView {
    pub id: Uuid,
    pub owner_address: String,
    pub name: String,
    pub region: Option<String>,
    pub status: ProviderStatus,
    pub is_active: bool,
    pub verification_status: VerificationStatus,
    pub risk_score: u8,
    pub flagged_reason: Option<String>,
    pub consecutive_failures: u32,
    pub balance: f64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

impl From<Provider> for AdminProviderView {
    fn from(p: Provider) -> Self {
        Self {
            id: p.id,
            owner_address: p.owner_address,
            name: p.metadata.name,
            region: p.metadata.region,
            status: p.status,
            is_active: p.is_active,
            verification_status: p.verification_status,
            risk_score: p.risk_score,
            flagged_reason: p.flagged_reason,
            consecutive_failures: p.consecutive_failures,
            balance: p.balance,
            last_health_check: p.last_health_check,
            registered_at: p.registered_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    #[serde(default)]
    pub bypass_validation: bool,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SuspiciousQuery {
    pub min_score: Option<u8>,
}

/// GET /admin/providers - Every provider with its review state
async fn list_providers(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
) -> Result<Json<Vec<AdminProviderView>>, ApiError> {
    state.admin.authorize(&actor, AdminAction::ViewAnalytics)?;
    let providers = state.registry.list_all().await;
    Ok(Json(providers.into_iter().map(Into::into).collect()))
}

/// POST /admin/providers/{id}/activate - Force a provider live
async fn activate_provider(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
    Path(id): Path<Uuid>,
    Json(request): Json<ActivateRequest>,
) -> Result<Json<AdminProviderView>, ApiError> {
    let provider = state
        .admin
        .force_activate(&actor, id, request.bypass_validation, &request.reason)
        .await?;
    Ok(Json(provider.into()))
}

/// POST /admin/providers/{id}/suspend - Remove a provider from routing
async fn suspend_provider(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
    Path(id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<AdminProviderView>, ApiError> {
    let provider = state.admin.suspend(&actor, id, &request.reason).await?;
    Ok(Json(provider.into()))
}

/// POST /admin/providers/{id}/flag - Send a provider back to review
async fn flag_provider(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
    Path(id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<AdminProviderView>, ApiError> {
    let provider = state.admin.flag(&actor, id, &request.reason).await?;
    Ok(Json(provider.into()))
}

/// DELETE /admin/providers/{id}?reason= - Remove a provider, keeping its points
async fn remove_provider(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
    Path(id): Path<Uuid>,
    Query(query): Query<RemoveQuery>,
) -> Result<Json<AdminProviderView>, ApiError> {
    let reason = query.reason.unwrap_or_else(|| "removed by admin".to_string());
    let provider = state.admin.remove(&actor, id, &reason).await?;
    Ok(Json(provider.into()))
}

/// GET /admin/providers/{id}/checks?limit= - Latest probe outcomes, newest first
async fn provider_checks(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
    Path(id): Path<Uuid>,
    Query(query): Query<ChecksQuery>,
) -> Result<Json<Vec<HealthCheckRecord>>, ApiError> {
    state.admin.authorize(&actor, AdminAction::ViewAnalytics)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.health.recent_checks(id, limit).await))
}

/// GET /admin/clusters - Providers sharing registration signals
async fn clusters(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
) -> Result<Json<Vec<SignalCluster>>, ApiError> {
    Ok(Json(state.admin.cluster_report(&actor).await?))
}

/// GET /admin/suspicious?min_score= - Providers at or above a risk score
async fn suspicious(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
    Query(query): Query<SuspiciousQuery>,
) -> Result<Json<Vec<SuspiciousProvider>>, ApiError> {
    let min_score = query.min_score.unwrap_or(40);
    Ok(Json(state.admin.suspicious(&actor, min_score).await?))
}

/// POST /admin/health/run - Run a health sweep now
async fn run_health(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
) -> Result<Json<HealthSweep>, ApiError> {
    state.admin.authorize(&actor, AdminAction::RunJobs)?;
    Ok(Json(state.health.check_all().await))
}

/// POST /admin/balances/run - Run a balance sweep now
async fn run_balances(
    State(state): State<RegistryApiState>,
    AdminCaller(actor): AdminCaller,
) -> Result<Json<BalanceSweep>, ApiError> {
    state.admin.authorize(&actor, AdminAction::RunJobs)?;
    Ok(Json(state.balances.refresh_all().await))
}

pub fn create_router(state: RegistryApiState) -> Router {
    Router::new()
        .route("/admin/providers", get(list_providers))
        .route("/admin/providers/{id}", delete(remove_provider))
        .route("/admin/providers/{id}/activate", post(activate_provider))
        .route("/admin/providers/{id}/suspend", post(suspend_provider))
        .route("/admin/providers/{id}/flag", post(flag_provider))
        .route("/admin/providers/{id}/checks", get(provider_checks))
        .route("/admin/clusters", get(clusters))
        .route("/admin/suspicious", get(suspicious))
        .route("/admin/health/run", post(run_health))
        .route("/admin/balances/run", post(run_balances))
        .with_state(state)
}
