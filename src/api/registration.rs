//! Provider registration endpoints

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    routing::post,
};

use super::RegistryApiState;
use super::error::ApiError;
use super::middleware::ClientIp;
use crate::registry::{ClientSignals, RegistrationReceipt, RegistrationRequest};

fn client_signals(ip: Option<Extension<ClientIp>>, headers: &HeaderMap) -> ClientSignals {
    ClientSignals {
        ip: ip.and_then(|Extension(ClientIp(ip))| ip),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.trim().to_string())
            .filter(|ua| !ua.is_empty()),
    }
}

/// POST /providers/register - Signed, risk-scored registration
async fn register(
    State(state): State<RegistryApiState>,
    ip: Option<Extension<ClientIp>>,
    headers: HeaderMap,
    Json(request): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegistrationReceipt>), ApiError> {
    let client = client_signals(ip, &headers);
    let receipt = state.registration.register(request, client).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /providers/register/verified - Registration proven by an upstream balance query
async fn register_verified(
    State(state): State<RegistryApiState>,
    ip: Option<Extension<ClientIp>>,
    headers: HeaderMap,
    Json(request): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegistrationReceipt>), ApiError> {
    let client = client_signals(ip, &headers);
    let receipt = state
        .registration
        .register_balance_verified(request, client)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub fn create_router(state: RegistryApiState) -> Router {
    Router::new()
        .route("/providers/register", post(register))
        .route("/providers/register/verified", post(register_verified))
        .with_state(state)
}
