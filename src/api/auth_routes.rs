//! Registration and login.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use super::error::{ApiError, FieldErrors};
use super::schemas::{LoginRequest, RegisterRequest, TokenResponse};
use super::AppState;
use crate::auth;
use crate::db;

const MIN_PASSWORD_LEN: usize = 8;

fn valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 255 {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<(), ApiError> {
    let mut field_errors = FieldErrors::new();
    if !valid_email(email) {
        field_errors.insert("email".to_string(), vec!["Invalid email address".to_string()]);
    }
    if password.len() < MIN_PASSWORD_LEN {
        field_errors.insert(
            "password".to_string(),
            vec![format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )],
        );
    }
    if field_errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation { field_errors })
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    validate_credentials(&request.email, &request.password)?;

    if db::find_user_by_email(&state.db, &request.email)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict {
            detail: "Email already registered".to_string(),
        });
    }

    // Argon2 is deliberately slow; keep it off the request executor
    let password = request.password.clone();
    let hashed = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(ApiError::internal)??;

    let user = match db::insert_user(&state.db, &request.email, &hashed).await {
        Ok(user) => user,
        Err(db::InsertError::UniqueViolation) => {
            return Err(ApiError::Conflict {
                detail: "Email already registered".to_string(),
            })
        }
        Err(db::InsertError::Database(e)) => return Err(ApiError::internal(e)),
    };

    tracing::info!(user_id = %user.id, "user registered");
    let token = auth::create_access_token(user.id, &state.cfg.auth)?;
    Ok((StatusCode::CREATED, Json(TokenResponse::new(token))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let invalid = || ApiError::AuthFailed {
        detail: "Invalid credentials".to_string(),
    };

    let user = db::find_user_by_email(&state.db, &request.email)
        .await?
        .ok_or_else(invalid)?;

    let password = request.password.clone();
    let digest = user.hashed_password.clone();
    let verified = tokio::task::spawn_blocking(move || auth::verify_password(&password, &digest))
        .await
        .map_err(ApiError::internal)??;

    if !verified {
        return Err(invalid());
    }

    let token = auth::create_access_token(user.id, &state.cfg.auth)?;
    Ok(Json(TokenResponse::new(token)))
}
