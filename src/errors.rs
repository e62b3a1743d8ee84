// src/errors.rs
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Provider detail is only echoed back to callers outside production.
/// Off until start-up decides otherwise.
static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(false);

pub fn set_expose_details(expose: bool) {
    EXPOSE_DETAILS.store(expose, Ordering::Relaxed);
}

fn expose_details() -> bool {
    EXPOSE_DETAILS.load(Ordering::Relaxed)
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Gateway authentication failed: {0}")]
    GatewayAuth(String),

    #[error("Gateway rejected the request: {0}")]
    GatewayRequest(String),

    /// The push request may or may not have reached the gateway.
    #[error("Payment outcome unknown: {0}")]
    PaymentOutcomeUnknown(String),

    #[error("Malformed callback: {0}")]
    CallbackParse(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Not allowed to access this payment")]
    Authorization,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("MongoDB error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Duplicate key error")]
    DuplicateKey,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::GatewayAuth(_) => "GATEWAY_AUTH_ERROR",
            AppError::GatewayRequest(_) => "GATEWAY_REQUEST_ERROR",
            AppError::PaymentOutcomeUnknown(_) => "PAYMENT_OUTCOME_UNKNOWN",
            AppError::CallbackParse(_) => "CALLBACK_PARSE_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Authorization => "FORBIDDEN",
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Database(_) | AppError::Ledger(_) => "DATABASE_ERROR",
            AppError::DuplicateKey => "DUPLICATE_KEY",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::GatewayAuth(_) => StatusCode::BAD_GATEWAY,
            AppError::GatewayRequest(_) => StatusCode::BAD_GATEWAY,
            AppError::PaymentOutcomeUnknown(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::CallbackParse(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Authorization => StatusCode::FORBIDDEN,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DuplicateKey => StatusCode::CONFLICT,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Configuration(_) | AppError::GatewayAuth(_) => {
                "Payment service is temporarily unavailable".to_string()
            }
            AppError::GatewayRequest(_) => "Payment request was declined".to_string(),
            AppError::PaymentOutcomeUnknown(_) => {
                "Payment status is unknown; check your phone before retrying".to_string()
            }
            AppError::Database(_) | AppError::Ledger(_) => "Database error".to_string(),
            // Client-facing errors carry no provider detail.
            other => other.to_string(),
        }
    }

    fn detail_message(&self, expose: bool) -> String {
        if expose {
            self.to_string()
        } else {
            self.public_message()
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = self.public_message();

        let message = self.detail_message(expose_details());

        let body = Json(json!({
            "error": error_message,
            "code": self.code(),
            "message": message,
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for AppError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        AppError::Ledger(format!("BSON serialization failed: {}", err))
    }
}

// Helper conversion functions
impl AppError {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::Configuration(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
