use crate::{
    auth::Session,
    entities::item_type,
    errors::ServiceError,
    handlers::common::{created_response, SearchParams},
    services::{item_types::ItemTypeRequest, Page},
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use uuid::Uuid;

pub fn item_types_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_item_types).post(create_item_type))
        .route(
            "/:id",
            get(get_item_type).put(update_item_type).delete(delete_item_type),
        )
}

#[utoipa::path(
    get,
    path = "/api/v1/item-types",
    params(SearchParams),
    responses((status = 200, description = "Item types", body = Page<item_type::Model>)),
    security(("bearer_auth" = [])),
    tag = "item-types"
)]
pub async fn list_item_types(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<SearchParams>,
) -> ApiResult<Page<item_type::Model>> {
    let page = params.to_request(&state.config);
    let types = state
        .services
        .item_types
        .list_item_types(&session, params.q, page)
        .await?;
    Ok(Json(ApiResponse::success(types)))
}

#[utoipa::path(
    get,
    path = "/api/v1/item-types/{id}",
    params(("id" = Uuid, Path, description = "Item type ID")),
    responses(
        (status = 200, description = "Item type", body = item_type::Model),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "item-types"
)]
pub async fn get_item_type(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<item_type::Model> {
    let item_type = state.services.item_types.get_item_type(&session, id).await?;
    Ok(Json(ApiResponse::success(item_type)))
}

#[utoipa::path(
    post,
    path = "/api/v1/item-types",
    request_body = ItemTypeRequest,
    responses(
        (status = 201, description = "Item type created", body = item_type::Model),
        (status = 409, description = "Name already in use", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "item-types"
)]
pub async fn create_item_type(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<ItemTypeRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let item_type = state
        .services
        .item_types
        .create_item_type(&session, payload)
        .await?;
    Ok(created_response(item_type))
}

#[utoipa::path(
    put,
    path = "/api/v1/item-types/{id}",
    params(("id" = Uuid, Path, description = "Item type ID")),
    request_body = ItemTypeRequest,
    responses(
        (status = 200, description = "Item type renamed", body = item_type::Model),
        (status = 409, description = "Referenced by items or name in use", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "item-types"
)]
pub async fn update_item_type(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(payload): Json<ItemTypeRequest>,
) -> ApiResult<item_type::Model> {
    let item_type = state
        .services
        .item_types
        .update_item_type(&session, id, payload)
        .await?;
    Ok(Json(ApiResponse::success(item_type)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/item-types/{id}",
    params(("id" = Uuid, Path, description = "Item type ID")),
    responses(
        (status = 200, description = "Item type deleted"),
        (status = 409, description = "Referenced by items", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "item-types"
)]
pub async fn delete_item_type(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.services.item_types.delete_item_type(&session, id).await?;
    Ok(Json(ApiResponse::message("Item type deleted")))
}
