//! Custody API Library
//!
//! Tracks custody of equipment held by a hierarchy of organizational units:
//! check-out and return, maintenance, transfers between units, and audit
//! reports, all scoped by the caller's role and position in the hierarchy.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use http::HeaderValue;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::{Any, CorsLayer}};
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::handlers::AppServices;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub event_sender: Arc<EventSender>,
    pub auth: Arc<AuthService>,
    pub services: AppServices,
}

impl AppState {
    /// Wires every service over one pool and one event channel.
    pub fn new(db: Arc<DbPool>, config: AppConfig, event_sender: Arc<EventSender>) -> Self {
        let auth = Arc::new(AuthService::new(
            auth::AuthConfig::from(&config),
            db.clone(),
        ));
        let services = AppServices::new(db.clone(), event_sender.clone(), &config);
        Self {
            db,
            config,
            event_sender,
            auth,
            services,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn success_with_message(data: T, message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Self::success(data)
        }
    }
}

impl ApiResponse<()> {
    /// Success without a payload, e.g. after a delete.
    pub fn message(message: &str) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.to_string()),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Every `/api/v1` route; all of them require a bearer token.
pub fn api_v1_routes(auth: Arc<AuthService>) -> Router<AppState> {
    Router::new()
        .route("/me", get(handlers::auth::me))
        .nest("/units", handlers::units::units_router())
        .nest("/users", handlers::users::users_router())
        .nest("/item-types", handlers::item_types::item_types_router())
        .nest("/items", handlers::items::items_router())
        .merge(handlers::custody::custody_router())
        .merge(handlers::reports::reports_router())
        .with_auth(auth)
}

/// Full application router: public routes, the authenticated API, Swagger UI
/// and the cross-cutting layers.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(handlers::auth::login))
        .nest("/api/v1", api_v1_routes(state.auth.clone()))
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_origins()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!("using permissive CORS; no explicit origins configured");
        CorsLayer::permissive()
    } else {
        ::tracing::warn!("no CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    Ok(Json(ApiResponse::success(json!({
        "status": db_status,
        "checks": { "database": db_status },
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn message_response_has_no_data() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-del"), async {
                ApiResponse::message("Item deleted")
            })
            .await;

        assert!(response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("Item deleted"));
        let body = serde_json::to_value(&response).unwrap();
        assert!(body.get("data").is_none());
        assert_eq!(body["meta"]["request_id"], "meta-del");
    }

    #[test]
    fn success_with_message_keeps_payload() {
        let response = ApiResponse::success_with_message(7, "Item returned");
        assert_eq!(response.data, Some(7));
        assert_eq!(response.message.as_deref(), Some("Item returned"));
        assert!(response.meta.is_some());
    }
}
