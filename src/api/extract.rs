//! Request extractors: bearer authentication.

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use super::error::ApiError;
use super::AppState;
use crate::auth;
use crate::db::{self, User};

/// The authenticated principal. Extraction fails with 401 when the bearer
/// token is missing, malformed, expired, or names no user.
pub struct CurrentUser(pub User);

fn invalid_token() -> ApiError {
    ApiError::AuthFailed {
        detail: "Invalid token".to_string(),
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(invalid_token)?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(invalid_token)?;

        let user_id =
            auth::decode_access_token(token, &state.cfg.auth).map_err(|_| invalid_token())?;

        let user = db::find_user_by_id(&state.db, user_id)
            .await?
            .ok_or_else(invalid_token)?;

        Ok(CurrentUser(user))
    }
}
