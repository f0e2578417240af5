use crate::{
    auth::{actions_for, Action, AuthError, Session, TokenResponse},
    services::users::UserView,
    ApiResponse, ApiResult, AppState,
};
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use validator::Validate;

/// Login request payload
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub token: TokenResponse,
    pub session: Session,
}

/// The caller's record plus what their role may do.
#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub user: UserView,
    pub actions: Vec<Action>,
}

/// Exchange email and password for a bearer token
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid credentials or inactive account", body = crate::errors::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, AuthError> {
    payload
        .validate()
        .map_err(|e| AuthError::Service(e.into()))?;

    let (token, session) = state.auth.login(&payload.email, &payload.password).await?;
    info!(user_id = %session.user_id, role = %session.role, "user logged in");

    Ok(Json(ApiResponse::success(LoginResponse { token, session })))
}

/// Current user and permitted actions
#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(State(state): State<AppState>, session: Session) -> ApiResult<MeResponse> {
    let user = state.services.users.me(&session).await?;
    Ok(Json(ApiResponse::success(MeResponse {
        actions: actions_for(user.role),
        user,
    })))
}
