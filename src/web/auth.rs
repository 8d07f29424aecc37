//! Bearer-token authentication.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::domain::ids::UserId;
use crate::error::AppError;
use crate::services::auth::AuthError;
use crate::state::AppState;

/// The authenticated caller, taken from `Authorization: Bearer <token>`.
///
/// ```rust,ignore
/// async fn handler(CurrentUser(user): CurrentUser) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("authorization header required".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("bearer token required".into()))?;
        let claims = state.tokens.verify(token).map_err(|e: AuthError| {
            tracing::debug!(error = %e, "token rejected");
            AppError::from(e)
        })?;
        Ok(Self(claims.sub))
    }
}
