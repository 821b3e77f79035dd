use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, ExternalError, ValidationError as AppValidationError,
        };

        match &err {
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(AppValidationError::MissingField {
                    field: field.clone().unwrap_or_else(|| message.clone()),
                }))
                .with_context(message.clone())
            }
            PaymentError::WebhookVerificationError { .. } => {
                AppError::new(AppErrorKind::External(ExternalError::InvalidSignature {
                    provider: "payments".to_string(),
                }))
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                service: "payments".to_string(),
                retry_after: *retry_after_seconds,
            })),
            PaymentError::ProviderError {
                provider,
                message,
                retryable,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                provider: provider.clone(),
                message: message.clone(),
                is_retryable: *retryable,
            })),
            PaymentError::NetworkError { message } => {
                AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "payments".to_string(),
                    message: message.clone(),
                    is_retryable: true,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
        assert_eq!(
            PaymentError::WebhookVerificationError {
                message: "bad sig".to_string()
            }
            .http_status_code(),
            401
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::WebhookVerificationError {
            message: "bad sig".to_string()
        }
        .is_retryable());
        assert!(PaymentError::ProviderError {
            provider: "stripe".to_string(),
            message: "503".to_string(),
            provider_code: None,
            retryable: true
        }
        .is_retryable());
    }

    #[test]
    fn provider_error_converts_to_bad_gateway() {
        let err = PaymentError::ProviderError {
            provider: "vipps".to_string(),
            message: "upstream 500".to_string(),
            provider_code: Some("500".to_string()),
            retryable: true,
        };
        let app: crate::error::AppError = err.into();
        assert_eq!(app.status_code(), 502);
        assert!(app.is_retryable());
    }
}
