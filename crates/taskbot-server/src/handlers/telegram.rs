//! Webhook delivery and webhook registration.
//!
//! The dispatcher blocks its calling thread until the bridge finishes, so
//! every call goes through `spawn_blocking`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::server::{AppState, TelegramState};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Deserialize)]
pub struct SetWebhookRequest {
    pub url: String,
}

fn telegram(state: &AppState) -> Result<&TelegramState, ApiError> {
    state
        .telegram
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("telegram bot is not configured".into()))
}

/// Compare without short-circuiting on the first differing byte.
fn secrets_match(expected: &[u8], given: &[u8]) -> bool {
    expected.len() == given.len()
        && expected
            .iter()
            .zip(given)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// POST /api/telegram/webhook
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let telegram = telegram(&state)?;

    if let Some(secret) = &telegram.webhook_secret {
        let given = headers.get(SECRET_HEADER).map(|v| v.as_bytes()).unwrap_or_default();
        if !secrets_match(secret.expose_secret().as_bytes(), given) {
            warn!("webhook delivery with wrong secret token");
            return Err(ApiError::Unauthorized("invalid webhook secret".into()));
        }
    }

    let dispatcher = telegram.dispatcher.clone();
    let ok = tokio::task::spawn_blocking(move || dispatcher.dispatch_update(payload)).await?;

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(json!({ "ok": ok }))))
}

/// POST /api/telegram/set-webhook
pub async fn set_webhook(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SetWebhookRequest>,
) -> Result<Json<Value>, ApiError> {
    let telegram = telegram(&state)?;
    if req.url.trim().is_empty() {
        return Err(ApiError::BadRequest("url is required".into()));
    }

    let dispatcher = telegram.dispatcher.clone();
    let secret = telegram
        .webhook_secret
        .as_ref()
        .map(|s| s.expose_secret().to_string());
    let ok = tokio::task::spawn_blocking(move || dispatcher.set_webhook(req.url.trim(), secret.as_deref())).await?;
    Ok(Json(json!({ "ok": ok })))
}

/// POST /api/telegram/delete-webhook
pub async fn delete_webhook(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let dispatcher = telegram(&state)?.dispatcher.clone();
    let ok = tokio::task::spawn_blocking(move || dispatcher.delete_webhook()).await?;
    Ok(Json(json!({ "ok": ok })))
}
