//! Account registration, login and identity.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use taskbot_auth::{hash_password, normalize_email, validate_registration, verify_password, AuthError};
use taskbot_store::NewUser;

use crate::error::ApiError;
use crate::extract::{ApiJson, AuthUser};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let reg = validate_registration(&req.name, &req.email, &req.password)?;

    let password = reg.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;

    let user = state.users.create(NewUser {
        name: reg.name,
        email: reg.email,
        password_hash,
    })?;
    info!(user_id = %user.id, "account registered");

    Ok((StatusCode::CREATED, Json(json!({ "user": user }))))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = normalize_email(&req.email);
    let Some(user) = state.users.find_by_email(&email)? else {
        warn!("login for unknown email");
        return Err(AuthError::InvalidCredentials.into());
    };

    let hash = user.password_hash.clone();
    let password = req.password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?;
    if !valid {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(AuthError::InvalidCredentials.into());
    }

    let token = state.tokens.issue(&user.id, &user.email)?;
    Ok(Json(json!({ "token": token, "user": user })))
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Value>, ApiError> {
    let user = state.users.get(&auth.id)?;
    Ok(Json(json!({ "user": user })))
}
