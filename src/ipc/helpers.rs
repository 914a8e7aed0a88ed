use crate::ipc::error::err;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn db(code: &'static str, e: rusqlite::Error) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn parse_time(raw: &str, key: &str) -> Result<NaiveTime, HandlerErr> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be HH:MM", key)))
}

/// Request timestamp: explicit `now` param (tests) or the wall clock.
pub fn effective_now(params: &serde_json::Value) -> Result<NaiveDateTime, HandlerErr> {
    match params.get("now").and_then(|v| v.as_str()) {
        Some(raw) => NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S")
            .map_err(|_| HandlerErr::bad_params("now must be YYYY-MM-DDTHH:MM:SS")),
        None => Ok(chrono::Local::now().naive_local()),
    }
}

pub fn now_stamp(now: NaiveDateTime) -> String {
    now.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn row_exists(
    conn: &Connection,
    sql: &str,
    id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM students WHERE id = ?", student_id)
}

pub fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    row_exists(conn, "SELECT 1 FROM teachers WHERE id = ?", teacher_id)
}

/// Best-effort notification insert for a secondary write. Failures are
/// tolerated and reported in the success payload, never as errors.
pub fn queue_notification(
    conn: &Connection,
    recipient_id: &str,
    kind: &str,
    body: &str,
    created_at: &str,
) -> bool {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notifications(id, recipient_id, kind, body, is_read, created_at)
         VALUES(?, ?, ?, ?, 0, ?)",
        (&id, recipient_id, kind, body, created_at),
    )
    .is_ok()
}

pub fn setup_section(conn: &Connection, key: &str) -> serde_json::Value {
    crate::db::settings_get_json(conn, key)
        .ok()
        .flatten()
        .unwrap_or_else(|| json!({}))
}
