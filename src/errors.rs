use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::entities::item::ItemStatus;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error envelope returned for every failed action.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "success": false,
    "error": "Conflict",
    "code": "not_available",
    "message": "Item is not available (current status: IN_USE)",
    "extra": { "status": "IN_USE" },
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    /// HTTP status category (e.g., "Not Found", "Conflict")
    #[schema(example = "Conflict")]
    pub error: String,
    /// Machine-readable error code
    #[schema(example = "not_available")]
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Structured detail the caller can react to
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub extra: Option<Value>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Target lies outside the caller's visible units. Rendered exactly like
    /// `NotFound` so that existence is not leaked across scope boundaries.
    #[error("Out of scope: {0}")]
    OutOfScope(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Item is not available (current status: {status})")]
    NotAvailable { status: ItemStatus },

    #[error("Item is not in use (current status: {status})")]
    NotInUse { status: ItemStatus },

    #[error("Item is not in maintenance (current status: {status})")]
    NotInMaintenance { status: ItemStatus },

    #[error("No open movement found for item {0}")]
    NoOpenMovement(uuid::Uuid),

    #[error("Duplicate value: {0}")]
    DuplicateCode(String),

    #[error("Record has history: {message}")]
    HasHistory {
        message: String,
        can_deactivate: bool,
    },

    #[error("Record has dependents: {0}")]
    HasDependents(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unit hierarchy cycle: {0}")]
    HierarchyCycle(String),

    #[error("Unit hierarchy deeper than {max_depth} levels below {unit_id}")]
    HierarchyTooDeep {
        unit_id: uuid::Uuid,
        max_depth: usize,
    },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::OutOfScope(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotAvailable { .. }
            | Self::NotInUse { .. }
            | Self::NotInMaintenance { .. }
            | Self::NoOpenMovement(_)
            | Self::DuplicateCode(_)
            | Self::HasHistory { .. }
            | Self::HasDependents(_)
            | Self::HierarchyCycle(_) => StatusCode::CONFLICT,
            Self::ValidationError(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::HierarchyTooDeep { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Machine-readable code carried in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => "internal_error",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::OutOfScope(_) | Self::NotFound(_) => "not_found",
            Self::NotAvailable { .. } => "not_available",
            Self::NotInUse { .. } => "not_in_use",
            Self::NotInMaintenance { .. } => "not_in_maintenance",
            Self::NoOpenMovement(_) => "no_open_movement",
            Self::DuplicateCode(_) => "duplicate",
            Self::HasHistory { .. } => "has_history",
            Self::HasDependents(_) => "has_dependents",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::HierarchyCycle(_) => "hierarchy_cycle",
            Self::HierarchyTooDeep { .. } => "hierarchy_too_deep",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::OutOfScope(_) => "Not found".to_string(),
            Self::NotFound(what) => format!("Not found: {}", what),
            _ => self.to_string(),
        }
    }

    /// Structured detail for state and integrity errors.
    pub fn extra(&self) -> Option<Value> {
        match self {
            Self::NotAvailable { status }
            | Self::NotInUse { status }
            | Self::NotInMaintenance { status } => {
                Some(json!({ "status": status }))
            }
            Self::HasHistory { can_deactivate, .. } => {
                Some(json!({ "can_deactivate": can_deactivate }))
            }
            Self::NoOpenMovement(item_id) => Some(json!({ "item_id": item_id })),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::DatabaseError(_) | Self::InternalError(_))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.is_internal() {
            tracing::error!(error = %self, "request failed with internal error");
        } else if matches!(self, Self::OutOfScope(_)) {
            tracing::debug!(error = %self, "out-of-scope access reported as not found");
        }

        let err = ErrorResponse {
            success: false,
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            extra: self.extra(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("item".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(!payload.success);
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }

    #[tokio::test]
    async fn out_of_scope_is_indistinguishable_from_not_found() {
        let hidden = ServiceError::OutOfScope("unit 42 is outside the session".into());
        assert_eq!(hidden.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(hidden.code(), "not_found");

        let body = to_bytes(hidden.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.message, "Not found");
        assert!(payload.extra.is_none());
    }

    #[tokio::test]
    async fn has_history_offers_deactivation() {
        let err = ServiceError::HasHistory {
            message: "item has 3 movements".into(),
            can_deactivate: true,
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let body = to_bytes(err.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "has_history");
        assert_eq!(payload.extra, Some(json!({ "can_deactivate": true })));
    }

    #[test]
    fn state_errors_carry_current_status() {
        let err = ServiceError::NotAvailable {
            status: ItemStatus::InUse,
        };
        assert_eq!(err.extra(), Some(json!({ "status": "IN_USE" })));
        assert_eq!(
            err.response_message(),
            "Item is not available (current status: IN_USE)"
        );
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::NotInUse {
                status: ItemStatus::Available
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::HierarchyTooDeep {
                unit_id: uuid::Uuid::nil(),
                max_depth: 10
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn service_error_response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("pool exhausted".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::db_error("connection reset").response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NotFound("Item not found".into()).response_message(),
            "Not found: Item not found"
        );
    }
}
