//! HTTP API for the provider registry
//!
//! - Public directory, random selection, uptime and points
//! - Signed provider registration
//! - Signed, policy-gated admin overrides and job triggers
//! - Signed usage ingestion feeding the points ledger
//! - Security middleware (client IP, rate limiting, headers, body size)

pub mod admin;
pub mod error;
pub mod middleware;
pub mod public;
pub mod registration;
pub mod usage;

use axum::{Router, middleware as axum_middleware};
use std::sync::Arc;

use crate::auth::SignatureVerifier;
use crate::balance::BalanceReconciler;
use crate::health::HealthMonitor;
use crate::points::PointsLedger;
use crate::registry::{AdminService, ProviderRegistry, RegistrationService, SelectionService};

pub use error::ApiError;
pub use middleware::{
    ClientIp, RateLimiter, SecurityMiddlewareConfig, SecurityState, body_size_middleware,
    client_ip_middleware, get_client_ip, logging_middleware, rate_limit_middleware,
    security_headers_middleware,
};

/// Services shared by every route
#[derive(Clone)]
pub struct RegistryApiState {
    pub registry: Arc<ProviderRegistry>,
    pub registration: Arc<RegistrationService>,
    pub admin: Arc<AdminService>,
    pub selection: Arc<SelectionService>,
    pub ledger: Arc<PointsLedger>,
    pub health: Arc<HealthMonitor>,
    pub balances: Arc<BalanceReconciler>,
    /// Verifies the signed admin headers
    pub verifier: Arc<dyn SignatureVerifier>,
    pub admin_signature_max_age_secs: i64,
}

/// Full application router with the security stack applied
///
/// Layers run outermost first: client IP, logging, security headers,
/// rate limiting, then the body size check.
pub fn create_app(state: RegistryApiState, security: SecurityState) -> Router {
    Router::new()
        .merge(public::create_router(state.clone()))
        .merge(registration::create_router(state.clone()))
        .merge(usage::create_router(state.clone()))
        .merge(admin::create_router(state))
        .layer(axum_middleware::from_fn_with_state(
            security.clone(),
            body_size_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            security.clone(),
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(security_headers_middleware))
        .layer(axum_middleware::from_fn_with_state(
            security.clone(),
            logging_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            security,
            client_ip_middleware,
        ))
}
