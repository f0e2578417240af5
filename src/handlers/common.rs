use crate::{config::AppConfig, errors::ServiceError, services::PageRequest};
use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

/// Pagination parameters for list operations
#[derive(Debug, Default, Clone, Deserialize, Serialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size, capped by `api_max_page_size`
    pub per_page: Option<u64>,
}

impl PaginationParams {
    pub fn to_request(&self, config: &AppConfig) -> PageRequest {
        PageRequest::new(self.page.unwrap_or(1), config.page_size(self.per_page))
    }
}

/// Optional free-text search plus pagination.
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchParams {
    /// Case-insensitive substring search
    pub q: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl SearchParams {
    pub fn to_request(&self, config: &AppConfig) -> PageRequest {
        PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
        .to_request(config)
    }
}

/// Parses an optional RFC 3339 timestamp query parameter.
pub fn parse_timestamp(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, ServiceError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| {
                    ServiceError::ValidationError(format!("{} must be an RFC 3339 timestamp", field))
                })
        })
        .transpose()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(crate::ApiResponse::success(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn pagination_clamps_to_config() {
        let config = AppConfig::new(
            "sqlite::memory:".into(),
            crate::config::DEV_DEFAULT_JWT_SECRET.into(),
            3600,
            "127.0.0.1".into(),
            8080,
            "development".into(),
        );
        let request = PaginationParams {
            page: Some(0),
            per_page: Some(10_000),
        }
        .to_request(&config);
        assert_eq!(request.page, 1);
        assert_eq!(request.per_page, config.api_max_page_size);

        let default = PaginationParams::default().to_request(&config);
        assert_eq!(default.per_page, config.api_default_page_size);
    }

    #[test]
    fn timestamps_parse_or_fail_validation() {
        assert!(parse_timestamp("from", None).unwrap().is_none());
        assert!(parse_timestamp("from", Some("2024-05-01T10:00:00Z"))
            .unwrap()
            .is_some());
        assert_matches!(
            parse_timestamp("from", Some("yesterday")),
            Err(ServiceError::ValidationError(_))
        );
    }
}
