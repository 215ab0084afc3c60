use chrono::{NaiveDate, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use taskbot_core::{Priority, TaskId, TaskStatus, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str = "id, user_id, title, description, status, priority, completed, due_date, tags, created_at, updated_at";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: TaskId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub completed: bool,
    pub due_date: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Insert payload. Only the title is required.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub completed: bool,
    pub due_date: Option<NaiveDate>,
    pub tags: Vec<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            priority,
            ..Default::default()
        }
    }
}

/// Partial update. `None` leaves a field unchanged; `due_date: Some(None)`
/// clears the due date.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<NaiveDate>>,
    pub tags: Option<Vec<String>>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.completed.is_none()
            && self.due_date.is_none()
            && self.tags.is_none()
    }
}

#[derive(Clone, Debug, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub completed: Option<bool>,
    pub limit: Option<u32>,
}

pub struct TaskRepo {
    db: Database,
}

impl TaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, new), fields(user_id = %user_id))]
    pub fn create(&self, user_id: &UserId, new: NewTask) -> Result<TaskRow, StoreError> {
        let id = TaskId::new();
        let now = Utc::now().to_rfc3339();
        let tags = serde_json::to_string(&new.tags)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, user_id, title, description, status, priority, completed, due_date, tags, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                rusqlite::params![
                    id.as_str(),
                    user_id.as_str(),
                    new.title,
                    new.description,
                    new.status.as_str(),
                    new.priority.as_str(),
                    new.completed,
                    new.due_date.map(|d| d.to_string()),
                    tags,
                    now,
                ],
            )?;
            Ok(())
        })?;

        debug!(task_id = %id, priority = %new.priority, "task created");
        Ok(TaskRow {
            id,
            user_id: user_id.clone(),
            title: new.title,
            description: new.description,
            status: new.status,
            priority: new.priority,
            completed: new.completed,
            due_date: new.due_date,
            tags: new.tags,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Fetch one task. Tasks owned by someone else are reported as missing.
    #[instrument(skip(self), fields(user_id = %user_id, task_id = %id))]
    pub fn get(&self, user_id: &UserId, id: &TaskId) -> Result<TaskRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
                [id.as_str(), user_id.as_str()],
                |row| Ok(map_row(row)),
            )
            .optional()?
            .transpose()?
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
        })
    }

    /// List a user's tasks, oldest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list(&self, user_id: &UserId, filter: &TaskFilter) -> Result<Vec<TaskRow>, StoreError> {
        let mut sql = format!("SELECT {COLUMNS} FROM tasks WHERE user_id = ?1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.as_str().to_string())];

        if let Some(status) = filter.status {
            params.push(Box::new(status.as_str()));
            sql.push_str(&format!(" AND status = ?{}", params.len()));
        }
        if let Some(completed) = filter.completed {
            params.push(Box::new(completed));
            sql.push_str(&format!(" AND completed = ?{}", params.len()));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.db.with_conn(|conn| {
            let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| Ok(map_row(row)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
    }

    /// Incomplete tasks, capped at `limit`.
    pub fn list_pending(&self, user_id: &UserId, limit: u32) -> Result<Vec<TaskRow>, StoreError> {
        self.list(
            user_id,
            &TaskFilter {
                completed: Some(false),
                limit: Some(limit),
                ..Default::default()
            },
        )
    }

    /// Apply a partial update and return the new row.
    #[instrument(skip(self, patch), fields(user_id = %user_id, task_id = %id))]
    pub fn update(&self, user_id: &UserId, id: &TaskId, patch: TaskUpdate) -> Result<TaskRow, StoreError> {
        let mut task = self.get(user_id, id)?;
        if patch.is_empty() {
            return Ok(task);
        }

        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(completed) = patch.completed {
            task.completed = completed;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(tags) = patch.tags {
            task.tags = tags;
        }
        task.updated_at = Utc::now().to_rfc3339();

        let tags = serde_json::to_string(&task.tags)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4,
                        completed = ?5, due_date = ?6, tags = ?7, updated_at = ?8
                 WHERE id = ?9 AND user_id = ?10",
                rusqlite::params![
                    task.title,
                    task.description,
                    task.status.as_str(),
                    task.priority.as_str(),
                    task.completed,
                    task.due_date.map(|d| d.to_string()),
                    tags,
                    task.updated_at,
                    id.as_str(),
                    user_id.as_str(),
                ],
            )?;
            Ok(())
        })?;
        Ok(task)
    }

    #[instrument(skip(self), fields(user_id = %user_id, task_id = %id))]
    pub fn delete(&self, user_id: &UserId, id: &TaskId) -> Result<(), StoreError> {
        let deleted = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
                [id.as_str(), user_id.as_str()],
            )?)
        })?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }
        Ok(())
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> Result<TaskRow, StoreError> {
    let status: String = row_helpers::get(row, 4, "tasks", "status")?;
    let priority: String = row_helpers::get(row, 5, "tasks", "priority")?;
    let due_date: Option<String> = row_helpers::get_opt(row, 7, "tasks", "due_date")?;
    let tags: String = row_helpers::get(row, 8, "tasks", "tags")?;

    Ok(TaskRow {
        id: TaskId::from_raw(row_helpers::get::<String>(row, 0, "tasks", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "tasks", "user_id")?),
        title: row_helpers::get(row, 2, "tasks", "title")?,
        description: row_helpers::get_opt(row, 3, "tasks", "description")?,
        status: row_helpers::parse_enum(&status, "tasks", "status")?,
        priority: row_helpers::parse_enum(&priority, "tasks", "priority")?,
        completed: row_helpers::get(row, 6, "tasks", "completed")?,
        due_date: due_date
            .map(|raw| {
                raw.parse::<NaiveDate>().map_err(|e| StoreError::CorruptRow {
                    table: "tasks",
                    column: "due_date",
                    detail: e.to_string(),
                })
            })
            .transpose()?,
        tags: row_helpers::parse_json(&tags, "tasks", "tags")?,
        created_at: row_helpers::get(row, 9, "tasks", "created_at")?,
        updated_at: row_helpers::get(row, 10, "tasks", "updated_at")?,
    })
}
