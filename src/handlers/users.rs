use crate::{
    auth::Session,
    errors::ServiceError,
    handlers::common::{created_response, SearchParams},
    services::{
        users::{CreateUserRequest, ResetPasswordRequest, UpdateUserRequest, UserView},
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
use uuid::Uuid;

pub fn users_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
        .route("/:id/deactivate", post(deactivate_user))
        .route("/:id/password", post(reset_password))
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(SearchParams),
    responses(
        (status = 200, description = "Users in visible units", body = Page<UserView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<SearchParams>,
) -> ApiResult<Page<UserView>> {
    let page = params.to_request(&state.config);
    let users = state.services.users.list_users(&session, params.q, page).await?;
    Ok(Json(ApiResponse::success(users)))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = UserView),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<UserView> {
    let user = state.services.users.get_user(&session, id).await?;
    Ok(Json(ApiResponse::success(user)))
}

#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserView),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email or registration in use", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let user = state.services.users.create_user(&session, payload).await?;
    Ok(created_response(user))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserView),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email or registration in use", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn update_user(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<UserView> {
    let user = state.services.users.update_user(&session, id, payload).await?;
    Ok(Json(ApiResponse::success(user)))
}

#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/password",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset"),
        (status = 400, description = "Weak password", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<()> {
    state.services.users.reset_password(&session, id, payload).await?;
    Ok(Json(ApiResponse::message("Password reset")))
}

#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/deactivate",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deactivated", body = UserView),
        (status = 400, description = "Self-deactivation or already inactive", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn deactivate_user(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<UserView> {
    let user = state.services.users.deactivate_user(&session, id).await?;
    Ok(Json(ApiResponse::success(user)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 409, description = "User has history; deactivate instead", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn delete_user(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.services.users.delete_user(&session, id).await?;
    Ok(Json(ApiResponse::message("User deleted")))
}
