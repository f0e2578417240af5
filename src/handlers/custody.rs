use crate::{
    auth::Session,
    entities::{item, movement, transfer},
    errors::ServiceError,
    handlers::common::{parse_timestamp, PaginationParams},
    services::{
        custody::{
            CheckoutRequest, HeldItem, MovementOutcome, ReturnRequest, TransferOutcome,
            TransferRequest,
        },
        scope::{MovementFilter, TransferFilter},
        Page,
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

pub fn custody_router() -> Router<AppState> {
    Router::new()
        .route("/movements", get(list_movements))
        .route("/transfers", get(list_transfers))
        .route("/my-items", get(my_items))
}

/// Movement list filters
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MovementQuery {
    pub item_id: Option<Uuid>,
    pub holder_id: Option<Uuid>,
    /// `true` for open movements only, `false` for closed only
    pub open: Option<bool>,
    /// RFC 3339 lower bound on checkout time
    pub from: Option<String>,
    /// RFC 3339 upper bound on checkout time
    pub until: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl MovementQuery {
    pub fn filters(&self) -> Result<Vec<MovementFilter>, ServiceError> {
        let mut filters = Vec::new();
        if let Some(id) = self.item_id {
            filters.push(MovementFilter::Item(id));
        }
        if let Some(id) = self.holder_id {
            filters.push(MovementFilter::Holder(id));
        }
        if let Some(open) = self.open {
            filters.push(MovementFilter::Open(open));
        }
        if let Some(from) = parse_timestamp("from", self.from.as_deref())? {
            filters.push(MovementFilter::CheckedOutFrom(from));
        }
        if let Some(until) = parse_timestamp("until", self.until.as_deref())? {
            filters.push(MovementFilter::CheckedOutUntil(until));
        }
        Ok(filters)
    }

    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Transfer list filters
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TransferQuery {
    pub item_id: Option<Uuid>,
    /// Matches either origin or destination
    pub unit_id: Option<Uuid>,
    pub from: Option<String>,
    pub until: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl TransferQuery {
    pub fn filters(&self) -> Result<Vec<TransferFilter>, ServiceError> {
        let mut filters = Vec::new();
        if let Some(id) = self.item_id {
            filters.push(TransferFilter::Item(id));
        }
        if let Some(id) = self.unit_id {
            filters.push(TransferFilter::Unit(id));
        }
        if let Some(from) = parse_timestamp("from", self.from.as_deref())? {
            filters.push(TransferFilter::From(from));
        }
        if let Some(until) = parse_timestamp("until", self.until.as_deref())? {
            filters.push(TransferFilter::Until(until));
        }
        Ok(filters)
    }

    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Check an item out to the caller or, for CONTROLLER and MANAGER, to another user
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/checkout",
    params(("id" = Uuid, Path, description = "Item ID")),
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Item checked out", body = MovementOutcome),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item or holder not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item not available", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "custody"
)]
pub async fn checkout(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    payload: Option<Json<CheckoutRequest>>,
) -> ApiResult<MovementOutcome> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let outcome = state.services.custody.checkout(&session, id, request).await?;
    Ok(Json(ApiResponse::success_with_message(outcome, "Item checked out")))
}

/// Return a checked-out item, optionally routing it to maintenance
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/return",
    params(("id" = Uuid, Path, description = "Item ID")),
    request_body = ReturnRequest,
    responses(
        (status = 200, description = "Item returned", body = MovementOutcome),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item not in use or no open movement", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "custody"
)]
pub async fn return_item(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReturnRequest>>,
) -> ApiResult<MovementOutcome> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let outcome = state.services.custody.return_item(&session, id, request).await?;
    Ok(Json(ApiResponse::success_with_message(outcome, "Item returned")))
}

#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/complete-maintenance",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Item available again", body = item::Model),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item not in maintenance", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "custody"
)]
pub async fn complete_maintenance(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<item::Model> {
    let item = state.services.custody.complete_maintenance(&session, id).await?;
    Ok(Json(ApiResponse::success_with_message(item, "Maintenance completed")))
}

#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/transfer",
    params(("id" = Uuid, Path, description = "Item ID")),
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Item transferred", body = TransferOutcome),
        (status = 400, description = "Same origin and destination", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item or destination not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item not available", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "custody"
)]
pub async fn transfer_item(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransferRequest>,
) -> ApiResult<TransferOutcome> {
    let outcome = state.services.custody.transfer_item(&session, id, payload).await?;
    Ok(Json(ApiResponse::success_with_message(outcome, "Item transferred")))
}

#[utoipa::path(
    get,
    path = "/api/v1/movements",
    params(MovementQuery),
    responses(
        (status = 200, description = "Movements in visible units", body = Page<movement::Model>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "custody"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<MovementQuery>,
) -> ApiResult<Page<movement::Model>> {
    let filters = query.filters()?;
    let page = query.pagination().to_request(&state.config);
    let movements = state
        .services
        .custody
        .list_movements(&session, filters, page)
        .await?;
    Ok(Json(ApiResponse::success(movements)))
}

#[utoipa::path(
    get,
    path = "/api/v1/transfers",
    params(TransferQuery),
    responses(
        (status = 200, description = "Transfers touching visible units", body = Page<transfer::Model>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "custody"
)]
pub async fn list_transfers(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<TransferQuery>,
) -> ApiResult<Page<transfer::Model>> {
    let filters = query.filters()?;
    let page = query.pagination().to_request(&state.config);
    let transfers = state
        .services
        .custody
        .list_transfers(&session, filters, page)
        .await?;
    Ok(Json(ApiResponse::success(transfers)))
}

/// Items currently held by the caller
#[utoipa::path(
    get,
    path = "/api/v1/my-items",
    responses((status = 200, description = "Held items", body = Vec<HeldItem>)),
    security(("bearer_auth" = [])),
    tag = "custody"
)]
pub async fn my_items(State(state): State<AppState>, session: Session) -> ApiResult<Vec<HeldItem>> {
    let held = state.services.custody.my_items(&session).await?;
    Ok(Json(ApiResponse::success(held)))
}
