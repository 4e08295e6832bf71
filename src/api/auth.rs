/**
 * Bearer authentication for the admin endpoints.
 *
 * Handlers that take an `AdminAuth` argument reject requests without a valid
 * admin token with 401.
 */

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::services::AuthError;
use crate::types::Principal;
use crate::AppState;

/// Token part of an `Authorization: Bearer <token>` value.
pub fn strip_bearer(value: &str) -> Option<&str> {
    let token = value.trim().strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Admin principal extractor.
///
/// ```ignore
/// async fn handler(auth: AdminAuth) -> impl IntoResponse {
///     let subject = auth.principal.subject;
///     // ...
/// }
/// ```
pub struct AdminAuth {
    pub principal: Principal,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Get Authorization header
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingToken)?;

        let token = strip_bearer(header).ok_or(AuthError::MissingToken)?;

        let principal = state.tokens.verify(token).ok_or(AuthError::InvalidToken)?;
        if !principal.is_admin() {
            return Err(AuthError::Forbidden);
        }

        Ok(AdminAuth { principal })
    }
}
