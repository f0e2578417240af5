use crate::{
    auth::{Action, AuthRouterExt, Session},
    handlers::custody::{MovementQuery, TransferQuery},
    services::{
        reports::{Dashboard, HeldItemReport, MovementReportRow, TransferReportRow, UnitStock},
        Page,
    },
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};

/// `/dashboard` is open to every role; everything under `/reports` needs
/// [`Action::ViewReports`].
pub fn reports_router() -> Router<AppState> {
    let manager_reports = Router::new()
        .route("/stock", get(stock_by_unit))
        .route("/movements", get(movement_report))
        .route("/transfers", get(transfer_report))
        .route("/held-items", get(held_items))
        .with_action(Action::ViewReports);

    Router::new()
        .route("/dashboard", get(dashboard))
        .nest("/reports", manager_reports)
}

#[utoipa::path(
    get,
    path = "/api/v1/dashboard",
    responses((status = 200, description = "Item counters for visible units", body = Dashboard)),
    security(("bearer_auth" = [])),
    tag = "reports"
)]
pub async fn dashboard(State(state): State<AppState>, session: Session) -> ApiResult<Dashboard> {
    let dashboard = state.services.reports.dashboard(&session).await?;
    Ok(Json(ApiResponse::success(dashboard)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/stock",
    responses(
        (status = 200, description = "Item counts per unit and status", body = Vec<UnitStock>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reports"
)]
pub async fn stock_by_unit(State(state): State<AppState>, session: Session) -> ApiResult<Vec<UnitStock>> {
    let stock = state.services.reports.stock_by_unit(&session).await?;
    Ok(Json(ApiResponse::success(stock)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/movements",
    params(MovementQuery),
    responses(
        (status = 200, description = "Movement history", body = Page<MovementReportRow>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reports"
)]
pub async fn movement_report(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<MovementQuery>,
) -> ApiResult<Page<MovementReportRow>> {
    let filters = query.filters()?;
    let page = query.pagination().to_request(&state.config);
    let report = state
        .services
        .reports
        .movement_report(&session, filters, page)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/transfers",
    params(TransferQuery),
    responses(
        (status = 200, description = "Transfer history", body = Page<TransferReportRow>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reports"
)]
pub async fn transfer_report(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<TransferQuery>,
) -> ApiResult<Page<TransferReportRow>> {
    let filters = query.filters()?;
    let page = query.pagination().to_request(&state.config);
    let report = state
        .services
        .reports
        .transfer_report(&session, filters, page)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/held-items",
    responses(
        (status = 200, description = "Items currently checked out, with holder", body = Vec<HeldItemReport>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reports"
)]
pub async fn held_items(State(state): State<AppState>, session: Session) -> ApiResult<Vec<HeldItemReport>> {
    let held = state.services.reports.held_items(&session).await?;
    Ok(Json(ApiResponse::success(held)))
}
