use crate::{
    auth::Session,
    entities::unit,
    handlers::common::{created_response, SearchParams},
    services::{
        hierarchy::UnitNode,
        units::{CreateUnitRequest, UpdateUnitRequest},
        Page,
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use uuid::Uuid;

pub fn units_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_units).post(create_unit))
        .route("/tree", get(unit_tree))
        .route("/:id", get(get_unit).put(update_unit).delete(delete_unit))
}

/// List visible units
#[utoipa::path(
    get,
    path = "/api/v1/units",
    params(SearchParams),
    responses(
        (status = 200, description = "Visible units", body = Page<unit::Model>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "units"
)]
pub async fn list_units(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<SearchParams>,
) -> ApiResult<Page<unit::Model>> {
    let page = params.to_request(&state.config);
    let units = state.services.units.list_units(&session, params.q, page).await?;
    Ok(Json(ApiResponse::success(units)))
}

/// The caller's home unit with its visible descendants
#[utoipa::path(
    get,
    path = "/api/v1/units/tree",
    responses(
        (status = 200, description = "Nested unit tree", body = UnitNode),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "units"
)]
pub async fn unit_tree(State(state): State<AppState>, session: Session) -> ApiResult<UnitNode> {
    let tree = state.services.units.unit_tree(&session).await?;
    Ok(Json(ApiResponse::success(tree)))
}

#[utoipa::path(
    get,
    path = "/api/v1/units/{id}",
    params(("id" = Uuid, Path, description = "Unit ID")),
    responses(
        (status = 200, description = "Unit", body = unit::Model),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "units"
)]
pub async fn get_unit(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<unit::Model> {
    let unit = state.services.units.get_unit(&session, id).await?;
    Ok(Json(ApiResponse::success(unit)))
}

#[utoipa::path(
    post,
    path = "/api/v1/units",
    request_body = CreateUnitRequest,
    responses(
        (status = 201, description = "Unit created", body = unit::Model),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Hierarchy cycle", body = crate::errors::ErrorResponse),
        (status = 422, description = "Hierarchy too deep", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "units"
)]
pub async fn create_unit(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreateUnitRequest>,
) -> Result<impl IntoResponse, crate::errors::ServiceError> {
    let unit = state.services.units.create_unit(&session, payload).await?;
    Ok(created_response(unit))
}

#[utoipa::path(
    put,
    path = "/api/v1/units/{id}",
    params(("id" = Uuid, Path, description = "Unit ID")),
    request_body = UpdateUnitRequest,
    responses(
        (status = 200, description = "Unit updated", body = unit::Model),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Hierarchy cycle", body = crate::errors::ErrorResponse),
        (status = 422, description = "Hierarchy too deep", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "units"
)]
pub async fn update_unit(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUnitRequest>,
) -> ApiResult<unit::Model> {
    let unit = state.services.units.update_unit(&session, id, payload).await?;
    Ok(Json(ApiResponse::success(unit)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/units/{id}",
    params(("id" = Uuid, Path, description = "Unit ID")),
    responses(
        (status = 200, description = "Unit deleted"),
        (status = 409, description = "Unit has dependents", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "units"
)]
pub async fn delete_unit(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.services.units.delete_unit(&session, id).await?;
    Ok(Json(ApiResponse::message("Unit deleted")))
}
