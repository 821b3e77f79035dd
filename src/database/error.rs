use thiserror::Error;

/// Classified database error kinds
#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Unique constraint violated (23505)
    UniqueViolation { constraint: String },
    /// Foreign key constraint violated (23503)
    ForeignKeyViolation { constraint: String },
    /// Row not found where one was required
    NotFound { entity: String },
    /// Connection-level failure (pool exhausted, network, TLS)
    Connection { message: String },
    /// Query execution or decoding failure
    Query { message: String },
    /// Anything else
    Unknown { message: String },
}

/// Database error wrapper with retryability classification
#[derive(Debug, Clone, Error)]
#[error("{}", self.message())]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
        })
    }

    /// Classify a raw sqlx error
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
            }),
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                match db_err.code().as_deref() {
                    Some("23505") => Self::new(DatabaseErrorKind::UniqueViolation { constraint }),
                    Some("23503") => {
                        Self::new(DatabaseErrorKind::ForeignKeyViolation { constraint })
                    }
                    _ => Self::new(DatabaseErrorKind::Query {
                        message: db_err.to_string(),
                    }),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::new(DatabaseErrorKind::Connection {
                    message: err.to_string(),
                })
            }
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: err.to_string(),
            }),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }

    fn message(&self) -> String {
        match &self.kind {
            DatabaseErrorKind::UniqueViolation { constraint } => {
                format!("unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::ForeignKeyViolation { constraint } => {
                format!("foreign key constraint violated: {}", constraint)
            }
            DatabaseErrorKind::NotFound { entity } => format!("{} not found", entity),
            DatabaseErrorKind::Connection { message } => {
                format!("database connection error: {}", message)
            }
            DatabaseErrorKind::Query { message } => format!("query error: {}", message),
            DatabaseErrorKind::Unknown { message } => format!("database error: {}", message),
        }
    }
}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_is_not_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: "uq_escrow_transaction".to_string(),
        });
        assert!(err.is_unique_violation());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("uq_escrow_transaction"));
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::Connection {
            message: "pool timed out".to_string(),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn conversion_to_app_error_keeps_retryability() {
        let err = DatabaseError::new(DatabaseErrorKind::Connection {
            message: "pool timed out".to_string(),
        });
        let app: crate::error::AppError = err.into();
        assert_eq!(app.status_code(), 500);
        assert!(app.is_retryable());
    }
}
