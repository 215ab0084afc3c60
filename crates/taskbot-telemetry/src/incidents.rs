//! Durable record of WARN and ERROR events.
//!
//! Each incident carries the account (`user_id`) and Telegram update
//! (`update_id`) it concerns, taken from the event itself or, failing that,
//! from the nearest enclosing span that names them.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS incidents (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    at        TEXT NOT NULL,
    level     TEXT NOT NULL CHECK (level IN ('WARN', 'ERROR')),
    target    TEXT NOT NULL,
    message   TEXT NOT NULL,
    user_id   TEXT,
    update_id INTEGER,
    extra     TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_incidents_user ON incidents(user_id, seq);
CREATE INDEX IF NOT EXISTS idx_incidents_update ON incidents(update_id);
";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Incident {
    pub seq: i64,
    pub at: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub user_id: Option<String>,
    pub update_id: Option<i64>,
    pub extra: Map<String, Value>,
}

/// Selects incidents, newest first.
#[derive(Clone, Debug)]
pub struct IncidentFilter {
    pub errors_only: bool,
    pub user_id: Option<String>,
    pub update_id: Option<i64>,
    pub limit: u32,
}

impl Default for IncidentFilter {
    fn default() -> Self {
        Self {
            errors_only: false,
            user_id: None,
            update_id: None,
            limit: 50,
        }
    }
}

pub struct IncidentLog {
    conn: Mutex<Connection>,
}

impl IncidentLog {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn append(&self, level: Level, target: &str, fields: EventFields) {
        let extra = Value::Object(fields.extra).to_string();
        // A failed write cannot be logged without recursing into this layer.
        let _ = self.conn.lock().execute(
            "INSERT INTO incidents (at, level, target, message, user_id, update_id, extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                level.as_str(),
                target,
                fields.message.unwrap_or_default(),
                fields.correlation.user_id,
                fields.correlation.update_id,
                extra,
            ],
        );
    }

    pub fn recent(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT seq, at, level, target, message, user_id, update_id, extra
             FROM incidents
             WHERE (?1 = 0 OR level = 'ERROR')
               AND (?2 IS NULL OR user_id = ?2)
               AND (?3 IS NULL OR update_id = ?3)
             ORDER BY seq DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![filter.errors_only, filter.user_id, filter.update_id, filter.limit],
            |row| {
                let extra: String = row.get(7)?;
                Ok(Incident {
                    seq: row.get(0)?,
                    at: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    user_id: row.get(5)?,
                    update_id: row.get(6)?,
                    extra: serde_json::from_str(&extra).unwrap_or_default(),
                })
            },
        )?;
        let incidents = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(incidents)
    }

    /// Most recent incident, if any.
    pub fn latest(&self) -> Result<Option<Incident>, rusqlite::Error> {
        let mut newest = self.recent(&IncidentFilter {
            limit: 1,
            ..Default::default()
        })?;
        Ok(newest.pop())
    }
}

/// Account and update an event belongs to.
#[derive(Clone, Debug, Default)]
struct Correlation {
    user_id: Option<String>,
    update_id: Option<i64>,
}

impl Correlation {
    fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.update_id.is_none()
    }

    fn is_complete(&self) -> bool {
        self.user_id.is_some() && self.update_id.is_some()
    }

    /// Fill ids this one lacks from an enclosing span.
    fn inherit(&mut self, outer: &Correlation) {
        if self.user_id.is_none() {
            self.user_id.clone_from(&outer.user_id);
        }
        if self.update_id.is_none() {
            self.update_id = outer.update_id;
        }
    }
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    correlation: Correlation,
    extra: Map<String, Value>,
}

impl EventFields {
    fn text(&mut self, field: &Field, text: String) {
        match field.name() {
            "message" => self.message = Some(text),
            "user_id" => self.correlation.user_id = Some(text),
            "update_id" => match text.parse() {
                Ok(id) => self.correlation.update_id = Some(id),
                Err(_) => {
                    self.extra.insert("update_id".into(), Value::String(text));
                }
            },
            name => {
                self.extra.insert(name.into(), Value::String(text));
            }
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.text(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "update_id" {
            self.correlation.update_id = Some(value);
        } else {
            self.extra.insert(field.name().into(), value.into());
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match (field.name(), i64::try_from(value)) {
            ("update_id", Ok(id)) => self.correlation.update_id = Some(id),
            (name, _) => {
                self.extra.insert(name.into(), value.into());
            }
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.extra.insert(field.name().into(), value.into());
    }
}

/// `tracing` layer that appends WARN and ERROR events to an [`IncidentLog`].
pub struct IncidentLayer {
    log: Arc<IncidentLog>,
}

impl IncidentLayer {
    pub fn new(log: Arc<IncidentLog>) -> Self {
        Self { log }
    }
}

impl<S> Layer<S> for IncidentLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        attrs.record(&mut fields);
        if fields.correlation.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields.correlation);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);

        // Innermost span first, so the closest ids win.
        for span in ctx.event_scope(event).into_iter().flatten() {
            if fields.correlation.is_complete() {
                break;
            }
            if let Some(outer) = span.extensions().get::<Correlation>() {
                fields.correlation.inherit(outer);
            }
        }

        self.log.append(level, event.metadata().target(), fields);
    }
}
