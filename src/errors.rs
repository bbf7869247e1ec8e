use http::StatusCode;
use sea_orm::error::DbErr;
use sea_orm::TransactionError;
use serde::{Deserialize, Serialize};

/// Error body handed to the presentation layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

impl From<&ServiceError> for ErrorResponse {
    fn from(error: &ServiceError) -> Self {
        let status = error.status_code();
        Self {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: error.code().to_string(),
            message: error.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stock insufficient: requested {requested}, available {available}")]
    InsufficientInventory { requested: i32, available: i32 },

    #[error("Holder's holdings insufficient to return {requested} (holds {held})")]
    InsufficientHoldings { requested: i32, held: i32 },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Operation '{operation}' is not supported for asset type '{asset_type}'")]
    InvalidOperationForType {
        operation: String,
        asset_type: String,
    },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification of asset pool {0}")]
    ConcurrentModification(i64),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<TransactionError<ServiceError>> for ServiceError {
    fn from(err: TransactionError<ServiceError>) -> Self {
        match err {
            TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
            TransactionError::Transaction(service_err) => service_err,
        }
    }
}

impl ServiceError {
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", kind, id))
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidQuantity(_)
            | Self::InvalidOperationForType { .. }
            | Self::InvalidStatus(_)
            | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientInventory { .. } | Self::InsufficientHoldings { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable code used as the metrics label and in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::InsufficientInventory { .. } => "insufficient_inventory",
            Self::InsufficientHoldings { .. } => "insufficient_holdings",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::InvalidOperationForType { .. } => "invalid_operation_for_type",
            Self::InvalidStatus(_) => "invalid_status",
            Self::ValidationError(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::Forbidden(_) => "forbidden",
            Self::ExternalServiceError(_) => "external_service_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for display.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(_) => {
                "The asset was modified by another operation, please retry".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Validation failures are raised before any write.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::InsufficientInventory { .. }
                | Self::InsufficientHoldings { .. }
                | Self::InvalidQuantity(_)
                | Self::InvalidOperationForType { .. }
                | Self::InvalidStatus(_)
                | Self::ValidationError(_)
                | Self::Forbidden(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InsufficientInventory {
                requested: 3,
                available: 1
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InsufficientHoldings {
                requested: 3,
                held: 1
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InvalidQuantity(0).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ConcurrentModification(7).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Forbidden("asset.issue".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("pool counters unbalanced".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("disk full".into())).response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InsufficientHoldings {
                requested: 4,
                held: 2
            }
            .response_message(),
            "Holder's holdings insufficient to return 4 (holds 2)"
        );
    }

    #[test]
    fn transaction_errors_unwrap_to_service_errors() {
        let err: ServiceError =
            TransactionError::Transaction(ServiceError::InvalidQuantity(-1)).into();
        assert!(matches!(err, ServiceError::InvalidQuantity(-1)));

        let err: ServiceError =
            TransactionError::<ServiceError>::Connection(DbErr::Custom("gone".into())).into();
        assert!(matches!(err, ServiceError::DatabaseError(_)));
    }

    #[test]
    fn error_response_carries_code() {
        let body = ErrorResponse::from(&ServiceError::InvalidQuantity(0));
        assert_eq!(body.code, "invalid_quantity");
        assert_eq!(body.error, "Bad Request");
    }
}
