use crate::{
    auth::Session,
    entities::{item, ItemStatus},
    errors::ServiceError,
    handlers::{
        common::{created_response, PaginationParams},
        custody,
    },
    services::{
        items::{CreateItemRequest, DeactivateItemRequest, ItemHistory, UpdateItemRequest},
        scope::ItemFilter,
        Page,
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

pub fn items_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_items).post(create_item))
        .route("/:id", get(get_item).put(update_item).delete(delete_item))
        .route("/:id/history", get(item_history))
        .route("/:id/deactivate", post(deactivate_item))
        .route("/:id/checkout", post(custody::checkout))
        .route("/:id/return", post(custody::return_item))
        .route("/:id/complete-maintenance", post(custody::complete_maintenance))
        .route("/:id/transfer", post(custody::transfer_item))
}

/// Item list filters
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ItemListQuery {
    /// AVAILABLE, IN_USE, MAINTENANCE or INACTIVE
    pub status: Option<String>,
    pub type_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    /// Substring of code or description
    pub q: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl ItemListQuery {
    pub fn filters(&self) -> Result<Vec<ItemFilter>, ServiceError> {
        let mut filters = Vec::new();
        if let Some(status) = self.status.as_deref().filter(|s| !s.trim().is_empty()) {
            let status = status
                .parse::<ItemStatus>()
                .map_err(ServiceError::ValidationError)?;
            filters.push(ItemFilter::Status(status));
        }
        if let Some(type_id) = self.type_id {
            filters.push(ItemFilter::Type(type_id));
        }
        if let Some(unit_id) = self.unit_id {
            filters.push(ItemFilter::Unit(unit_id));
        }
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            filters.push(ItemFilter::Search(q.to_string()));
        }
        Ok(filters)
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/items",
    params(ItemListQuery),
    responses(
        (status = 200, description = "Items in visible units", body = Page<item::Model>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "items"
)]
pub async fn list_items(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ItemListQuery>,
) -> ApiResult<Page<item::Model>> {
    let filters = query.filters()?;
    let page = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    }
    .to_request(&state.config);
    let items = state.services.items.list_items(&session, filters, page).await?;
    Ok(Json(ApiResponse::success(items)))
}

#[utoipa::path(
    get,
    path = "/api/v1/items/{id}",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Item", body = item::Model),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "items"
)]
pub async fn get_item(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<item::Model> {
    let item = state.services.items.get_item(&session, id).await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    post,
    path = "/api/v1/items",
    request_body = CreateItemRequest,
    responses(
        (status = 201, description = "Item registered", body = item::Model),
        (status = 409, description = "Code already in use", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "items"
)]
pub async fn create_item(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreateItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let item = state.services.items.create_item(&session, payload).await?;
    Ok(created_response(item))
}

#[utoipa::path(
    put,
    path = "/api/v1/items/{id}",
    params(("id" = Uuid, Path, description = "Item ID")),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Item updated", body = item::Model),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "items"
)]
pub async fn update_item(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> ApiResult<item::Model> {
    let item = state.services.items.update_item(&session, id, payload).await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/items/{id}",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Item deleted"),
        (status = 409, description = "Item has history; extra.can_deactivate says whether deactivation is possible", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "items"
)]
pub async fn delete_item(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.services.items.delete_item(&session, id).await?;
    Ok(Json(ApiResponse::message("Item deleted")))
}

#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/deactivate",
    params(("id" = Uuid, Path, description = "Item ID")),
    request_body = DeactivateItemRequest,
    responses(
        (status = 200, description = "Item deactivated", body = item::Model),
        (status = 409, description = "Item is in use", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "items"
)]
pub async fn deactivate_item(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    payload: Option<Json<DeactivateItemRequest>>,
) -> ApiResult<item::Model> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let item = state
        .services
        .items
        .deactivate_item(&session, id, request)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    get,
    path = "/api/v1/items/{id}/history",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Movements and transfers of the item", body = ItemHistory),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "items"
)]
pub async fn item_history(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<ItemHistory> {
    let history = state.services.items.item_history(&session, id).await?;
    Ok(Json(ApiResponse::success(history)))
}
