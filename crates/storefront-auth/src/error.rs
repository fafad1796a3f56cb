//! Authentication error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token is malformed")]
    Malformed,

    #[error("Token is expired")]
    Expired,

    #[error("Token verification failed")]
    VerificationFailed,

    #[error("Token claims type is invalid")]
    ClaimsTypeMismatch,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Profile not found")]
    ProfileNotFound,

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Forbidden")]
    Forbidden,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AuthError {
    /// Short label for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Malformed => "malformed",
            AuthError::Expired => "expired",
            AuthError::VerificationFailed => "verification_failed",
            AuthError::ClaimsTypeMismatch => "claims_type_mismatch",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::ProfileNotFound => "profile_not_found",
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::Forbidden => "forbidden",
            AuthError::Configuration(_) => "configuration",
            AuthError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Callers only ever see the opaque message; the kind stays in the logs
        let (status, message) = match &self {
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "permission denied"),
            AuthError::Configuration(_) | AuthError::StoreUnavailable(_) => {
                error!(error = %self, "Auth capability failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
            _ => (StatusCode::UNAUTHORIZED, "unauthorized"),
        };

        debug!(reason = self.reason(), "Rejecting request");
        metrics::counter!("storefront_auth_rejections_total", "reason" => self.reason())
            .increment(1);

        let body = axum::Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
