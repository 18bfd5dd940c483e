//! HTTP mapping of registry errors

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::error::RegistryError;

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError(pub RegistryError);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
            RegistryError::DuplicateOwner(_) | RegistryError::DuplicateCredential => {
                StatusCode::CONFLICT
            }
            RegistryError::Unauthorized(_) => StatusCode::FORBIDDEN,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RegistryError::Decryption(_) | RegistryError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() && !matches!(self.0, RegistryError::Upstream(_)) {
            error!(error = %self.0, "Request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Authentication failures before any registry call
pub fn unauthorized(message: impl Into<String>) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}
