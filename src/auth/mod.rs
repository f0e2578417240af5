/*!
 * # Authentication and Authorization Module
 *
 * Issues and validates bearer JWTs, turns a valid token into a [`Session`]
 * request extension and gates routes by [`Action`].
 *
 * A token only names the principal. Role, home unit and the active flag are
 * re-read from the database on every request so that demotions, transfers
 * between units and deactivations take effect immediately.
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{user, Role};
use crate::errors::ServiceError;

pub mod password;
mod rbac;

pub use rbac::*;

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub role: String,
    pub unit_id: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
}

/// The caller's identity, passed explicitly into every service call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
    /// Home unit.
    pub unit_id: Uuid,
    pub name: String,
}

impl Session {
    pub fn new(user_id: Uuid, role: Role, unit_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            user_id,
            role,
            unit_id,
            name: name.into(),
        }
    }

    pub fn from_user(user: &user::Model) -> Self {
        Self::new(user.id, user.role, user.unit_id, user.name.clone())
    }

    pub fn can(&self, action: Action) -> bool {
        allowed(self.role, action)
    }

    /// Gate check; must run before any scope or state check.
    pub fn require(&self, action: Action) -> Result<(), ServiceError> {
        if self.can(action) {
            Ok(())
        } else {
            debug!(user_id = %self.user_id, role = %self.role, action = %action, "action denied");
            Err(ServiceError::Forbidden(format!(
                "role {} may not {}",
                self.role, action
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or(ServiceError::Unauthenticated)
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        access_token_expiration: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            access_token_expiration,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.auth_audience.clone(),
            cfg.auth_issuer.clone(),
            cfg.jwt_ttl(),
        )
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account is inactive")]
    InactiveAccount,
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Service(inner) => inner,
            other => {
                debug!(reason = %other, "authentication rejected");
                ServiceError::Unauthenticated
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Token returned by a successful login.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Authentication service that handles token issuance and validation
#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
    db: Arc<DatabaseConnection>,
}

impl AuthService {
    pub fn new(config: AuthConfig, db: Arc<DatabaseConnection>) -> Self {
        Self { config, db }
    }

    /// Generate a JWT token for a user
    pub fn issue_token(&self, user: &user::Model) -> Result<TokenResponse, AuthError> {
        let now = Utc::now();
        let exp = now
            + ChronoDuration::from_std(self.config.access_token_expiration).map_err(|_| {
                ServiceError::InternalError("Invalid token duration".to_string())
            })?;

        let claims = Claims {
            sub: user.id.to_string(),
            name: user.name.clone(),
            role: user.role.to_string(),
            unit_id: user.unit_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("Failed to sign token: {}", e)))?;

        Ok(TokenResponse {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiration.as_secs() as i64,
        })
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }

    /// Resolves a token into a session backed by the current user record.
    pub async fn session_for_token(&self, token: &str) -> Result<Session, AuthError> {
        let claims = self.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        claims
            .role
            .parse::<Role>()
            .map_err(|_| AuthError::InvalidToken)?;

        let user = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(AuthError::InvalidToken)?;
        if !user.active {
            return Err(AuthError::InactiveAccount);
        }

        Ok(Session::from_user(&user))
    }

    /// Verifies credentials and issues a token.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(TokenResponse, Session), AuthError> {
        use sea_orm::{ColumnTrait, QueryFilter};

        let email = email.trim().to_lowercase();
        let user = user::Entity::find()
            .filter(user::Column::Email.eq(email.clone()))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let Some(user) = user else {
            warn!(email = %email, "login attempt for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify_password(password, &user.password_hash) {
            warn!(user_id = %user.id, "login attempt with wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.active {
            warn!(user_id = %user.id, "login attempt for inactive account");
            return Err(AuthError::InactiveAccount);
        }

        let token = self.issue_token(&user)?;
        Ok((token, Session::from_user(&user)))
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Authentication middleware: validates the bearer token and inserts the [`Session`].
pub async fn auth_middleware(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = match bearer_token(request.headers()) {
        Ok(token) => auth.session_for_token(token).await,
        Err(e) => Err(e),
    };

    match session {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Rejects the request unless the session's role is allowed `action`.
pub async fn action_middleware(
    State(action): State<Action>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let session = request
        .extensions()
        .get::<Session>()
        .ok_or(ServiceError::Unauthenticated)?;
    session.require(action)?;
    Ok(next.run(request).await)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self, auth: Arc<AuthService>) -> Self;
    fn with_action(self, action: Action) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self, auth: Arc<AuthService>) -> Self {
        self.layer(axum::middleware::from_fn_with_state(auth, auth_middleware))
    }

    /// Requires a session; apply [`AuthRouterExt::with_auth`] on an enclosing router.
    fn with_action(self, action: Action) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            action,
            action_middleware,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn service() -> AuthService {
        AuthService::new(
            AuthConfig::new(
                "a_sufficiently_long_and_varied_signing_key_0123456789".into(),
                "aud".into(),
                "iss".into(),
                Duration::from_secs(600),
            ),
            Arc::new(DatabaseConnection::Disconnected),
        )
    }

    fn sample_user() -> user::Model {
        user::Model {
            id: Uuid::new_v4(),
            registration: "1001".into(),
            name: "Ana".into(),
            email: "ana@example.org".into(),
            password_hash: String::new(),
            role: Role::Controller,
            unit_id: Uuid::new_v4(),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn issued_token_round_trips_claims() {
        let auth = service();
        let user = sample_user();
        let token = auth.issue_token(&user).unwrap();
        assert_eq!(token.token_type, "Bearer");

        let claims = auth.validate_token(&token.access_token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, "CONTROLLER");
        assert_eq!(claims.unit_id, user.unit_id.to_string());
    }

    #[test]
    fn token_from_other_issuer_is_rejected() {
        let auth = service();
        let token = auth.issue_token(&sample_user()).unwrap();

        let mut other_config = auth.config.clone();
        other_config.jwt_issuer = "someone-else".into();
        let other = AuthService::new(other_config, auth.db.clone());
        assert_matches!(
            other.validate_token(&token.access_token),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn auth_errors_become_unauthenticated() {
        assert_matches!(
            ServiceError::from(AuthError::TokenExpired),
            ServiceError::Unauthenticated
        );
        assert_matches!(
            ServiceError::from(AuthError::Service(ServiceError::InternalError("x".into()))),
            ServiceError::InternalError(_)
        );
    }

    #[test]
    fn session_gate_precedes_everything() {
        let session = Session::new(Uuid::new_v4(), Role::Basic, Uuid::new_v4(), "Bo");
        assert!(session.require(Action::CheckoutForSelf).is_ok());
        assert_matches!(
            session.require(Action::TransferItem),
            Err(ServiceError::Forbidden(_))
        );
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert_matches!(bearer_token(&headers), Err(AuthError::MissingToken));
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_matches!(bearer_token(&headers), Err(AuthError::MissingToken));
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc");
    }
}
