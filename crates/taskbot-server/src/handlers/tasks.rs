//! Task CRUD scoped to the authenticated user.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use taskbot_core::{Priority, TaskId, TaskStatus};
use taskbot_store::{NewTask, TaskFilter, TaskRow, TaskUpdate};

use crate::error::ApiError;
use crate::extract::{ApiJson, AuthUser};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<TaskStatus>,
    pub completed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "tags")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "tags")]
    pub tags: Option<Vec<String>>,
}

/// Tags arrive either as a JSON array or as a JSON-encoded array string.
fn tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<String>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        List(Vec<String>),
        Encoded(String),
    }

    match Option::<Wire>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Wire::List(tags)) => Ok(Some(tags)),
        Some(Wire::Encoded(raw)) if raw.trim().is_empty() => Ok(Some(Vec::new())),
        Some(Wire::Encoded(raw)) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("tags: {e}"))),
    }
}

/// `YYYY-MM-DD` or an RFC 3339 timestamp. Blank means no date.
fn parse_due_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(date) = raw.parse::<NaiveDate>() {
        return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| Some(dt.date_naive()))
        .map_err(|_| ApiError::BadRequest(format!("invalid due_date: {raw}")))
}

/// GET /api/tasks
pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<TaskRow>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let filter = TaskFilter {
        status: query.status,
        completed: query.completed,
        limit: None,
    };
    Ok(Json(state.tasks.list(&auth.id, &filter)?))
}

/// POST /api/tasks
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskRow>), ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }

    let new = NewTask {
        title: title.to_string(),
        description: req.description.filter(|d| !d.trim().is_empty()),
        status: req.status.unwrap_or_default(),
        priority: req.priority.unwrap_or_default(),
        completed: req.completed.unwrap_or(false),
        due_date: parse_due_date(req.due_date.as_deref())?,
        tags: req.tags.unwrap_or_default(),
    };
    let task = state.tasks.create(&auth.id, new)?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/tasks/{id}
pub async fn get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<TaskRow>, ApiError> {
    Ok(Json(state.tasks.get(&auth.id, &TaskId::from_raw(id))?))
}

/// PUT /api/tasks/{id}
pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateTaskRequest>,
) -> Result<Json<TaskRow>, ApiError> {
    let title = match req.title {
        Some(t) if t.trim().is_empty() => return Err(ApiError::BadRequest("title cannot be empty".into())),
        Some(t) => Some(t.trim().to_string()),
        None => None,
    };

    let patch = TaskUpdate {
        title,
        description: req.description,
        status: req.status,
        priority: req.priority,
        completed: req.completed,
        // Absent keeps the date, an empty string clears it.
        due_date: req
            .due_date
            .as_deref()
            .map(|raw| parse_due_date(Some(raw)))
            .transpose()?,
        tags: req.tags,
    };
    Ok(Json(state.tasks.update(&auth.id, &TaskId::from_raw(id), patch)?))
}

/// DELETE /api/tasks/{id}
pub async fn delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.tasks.delete(&auth.id, &TaskId::from_raw(id))?;
    Ok(Json(json!({ "deleted": true })))
}
