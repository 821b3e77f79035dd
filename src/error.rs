//! Unified error handling for the payment core
//!
//! Every fallible path in the service converges on `AppError`, which carries
//! enough structure to produce an HTTP status, a stable machine-readable code,
//! and a user-safe message. Provider internals never leak through this type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "ESCROW_NOT_FOUND")]
    EscrowNotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "ESCROW_ALREADY_EXISTS")]
    EscrowAlreadyExists,
    #[serde(rename = "ACTIVE_PAYMENT_EXISTS")]
    ActivePaymentExists,
    #[serde(rename = "OVER_FUNDING")]
    OverFunding,
    #[serde(rename = "OVER_RELEASE")]
    OverRelease,
    #[serde(rename = "OVER_REFUND")]
    OverRefund,
    #[serde(rename = "REFUND_EXCEEDS_CAPTURED")]
    RefundExceedsCaptured,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Payment with the given id doesn't exist
    PaymentNotFound { payment_id: String },
    /// Escrow account with the given id doesn't exist
    EscrowNotFound { escrow_id: String },
    /// Transaction with the given id doesn't exist
    TransactionNotFound { transaction_id: String },
    /// The entity is not in a state that permits the requested operation
    InvalidState {
        entity: String,
        current: String,
        requested: String,
    },
    /// A transaction already has an escrow account
    EscrowAlreadyExists { transaction_id: String },
    /// A transaction already has a payment that isn't failed or cancelled
    ActivePaymentExists { transaction_id: String },
    /// Funding would exceed the escrow target amount
    OverFunding { requested: String, target: String },
    /// Release would exceed the funded (minus refunded) amount
    OverRelease { requested: String, available: String },
    /// Refund would exceed the funded (minus released) amount
    OverRefund { requested: String, available: String },
    /// Payment refund total would exceed the captured amount
    RefundExceedsCaptured { requested: String, available: String },
    /// The caller is not allowed to perform the operation
    NotAuthorized { user_id: String, action: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment providers)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment provider (Stripe, Swish, MobilePay, Vipps) error
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
    /// Webhook signature could not be verified
    InvalidSignature { provider: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Unsupported or invalid currency
    InvalidCurrency { currency: String, reason: String },
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Unsupported payment method / currency combination
    UnsupportedMethod { method: String, reason: String },
    /// Required field missing
    MissingField { field: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::EscrowNotFound { .. } => 404,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::InvalidState { .. } => 409,
                DomainError::EscrowAlreadyExists { .. } => 409,
                DomainError::ActivePaymentExists { .. } => 409,
                DomainError::OverFunding { .. } => 422,
                DomainError::OverRelease { .. } => 422,
                DomainError::OverRefund { .. } => 422,
                DomainError::RefundExceedsCaptured { .. } => 422,
                DomainError::NotAuthorized { .. } => 403,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
                ExternalError::InvalidSignature { .. } => 401,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::EscrowNotFound { .. } => ErrorCode::EscrowNotFound,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::InvalidState { .. } => ErrorCode::InvalidState,
                DomainError::EscrowAlreadyExists { .. } => ErrorCode::EscrowAlreadyExists,
                DomainError::ActivePaymentExists { .. } => ErrorCode::ActivePaymentExists,
                DomainError::OverFunding { .. } => ErrorCode::OverFunding,
                DomainError::OverRelease { .. } => ErrorCode::OverRelease,
                DomainError::OverRefund { .. } => ErrorCode::OverRefund,
                DomainError::RefundExceedsCaptured { .. } => ErrorCode::RefundExceedsCaptured,
                DomainError::NotAuthorized { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
                ExternalError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment '{}' not found", payment_id)
                }
                DomainError::EscrowNotFound { escrow_id } => {
                    format!("Escrow account '{}' not found", escrow_id)
                }
                DomainError::TransactionNotFound { transaction_id } => {
                    format!("Transaction '{}' not found", transaction_id)
                }
                DomainError::InvalidState {
                    entity,
                    current,
                    requested,
                } => {
                    format!(
                        "Cannot move {} from '{}' to '{}'",
                        entity, current, requested
                    )
                }
                DomainError::EscrowAlreadyExists { transaction_id } => {
                    format!(
                        "Transaction '{}' already has an escrow account",
                        transaction_id
                    )
                }
                DomainError::ActivePaymentExists { transaction_id } => {
                    format!(
                        "Transaction '{}' already has an active payment",
                        transaction_id
                    )
                }
                DomainError::OverFunding { requested, target } => {
                    format!(
                        "Funding of {} would exceed escrow target {}",
                        requested, target
                    )
                }
                DomainError::OverRelease {
                    requested,
                    available,
                } => {
                    format!(
                        "Release of {} exceeds available escrow balance {}",
                        requested, available
                    )
                }
                DomainError::OverRefund {
                    requested,
                    available,
                } => {
                    format!(
                        "Refund of {} exceeds refundable escrow balance {}",
                        requested, available
                    )
                }
                DomainError::RefundExceedsCaptured {
                    requested,
                    available,
                } => {
                    format!(
                        "Refund of {} exceeds remaining captured amount {}",
                        requested, available
                    )
                }
                DomainError::NotAuthorized { action, .. } => {
                    format!("You are not allowed to {}", action)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
                ExternalError::InvalidSignature { .. } => "Invalid webhook signature".to_string(),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::UnsupportedMethod { method, reason } => {
                    format!("Unsupported payment method '{}': {}", method, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
                ExternalError::InvalidSignature { .. } => false,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "success": false,
            "error": {
                "code": self.error_code(),
                "message": self.user_message(),
            }
        }));
        (status, body).into_response()
    }
}

// Conversions from specific error types
// Note: From<DatabaseError> is implemented in database/error.rs to avoid circular dependency

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_maps_to_conflict() {
        let error = AppError::domain(DomainError::InvalidState {
            entity: "payment".to_string(),
            current: "succeeded".to_string(),
            requested: "failed".to_string(),
        });

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::InvalidState);
        assert!(error.user_message().contains("succeeded"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn refund_exceeds_captured_is_unprocessable() {
        let error = AppError::domain(DomainError::RefundExceedsCaptured {
            requested: "3001.00".to_string(),
            available: "2000.00".to_string(),
        });

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::RefundExceedsCaptured);
        assert!(error.user_message().contains("3001.00"));
    }

    #[test]
    fn not_authorized_maps_to_forbidden() {
        let error = AppError::domain(DomainError::NotAuthorized {
            user_id: "u1".to_string(),
            action: "release escrow funds".to_string(),
        });

        assert_eq!(error.status_code(), 403);
        assert_eq!(error.error_code(), ErrorCode::Forbidden);
    }

    #[test]
    fn invalid_signature_maps_to_unauthorized() {
        let error = AppError::new(AppErrorKind::External(ExternalError::InvalidSignature {
            provider: "stripe".to_string(),
        }));

        assert_eq!(error.status_code(), 401);
        assert!(!error.is_retryable());
    }

    #[test]
    fn rate_limit_is_retryable() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "stripe".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert!(error.is_retryable());
    }

    #[test]
    fn validation_error_maps_to_bad_request() {
        let error = AppError::validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "amount must be greater than zero".to_string(),
        });

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }

    #[test]
    fn infrastructure_errors_hide_details_from_users() {
        let error = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "connection refused at 10.0.0.5:5432".to_string(),
            is_retryable: true,
        }));

        assert_eq!(error.status_code(), 500);
        assert!(!error.user_message().contains("10.0.0.5"));
    }
}
