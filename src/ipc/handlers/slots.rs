use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    effective_now, get_optional_str, get_required_str, now_stamp, parse_date, parse_time,
    student_exists, teacher_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub const STATUS_SCHEDULED: &str = "scheduled";
pub const STATUS_ABSENCE_REQUESTED: &str = "absence_requested";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_COMPLETED: &str = "completed";

const TYPE_LESSON: &str = "lesson";
const TYPE_INTERVIEW: &str = "interview";
const TYPE_EXTRA: &str = "extra";

fn validate_slot_type(t: &str) -> bool {
    matches!(t, TYPE_LESSON | TYPE_INTERVIEW | TYPE_EXTRA)
}

fn validate_status(s: &str) -> bool {
    matches!(
        s,
        STATUS_SCHEDULED | STATUS_ABSENCE_REQUESTED | STATUS_CANCELLED | STATUS_COMPLETED
    )
}

/// True when the student already has a non-cancelled slot overlapping the
/// half-open range [start, end) on `date`. `exclude_slot_id` lets updates
/// skip the row being edited.
pub fn has_overlapping_slot(
    conn: &Connection,
    student_id: &str,
    date: &str,
    start_time: &str,
    end_time: &str,
    exclude_slot_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM lesson_slots
             WHERE student_id = ?
               AND date = ?
               AND status != 'cancelled'
               AND start_time < ?
               AND ? < end_time
               AND id != COALESCE(?, '')
             LIMIT 1",
            (student_id, date, end_time, start_time, exclude_slot_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(found.is_some())
}

fn slot_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "teacherId": r.get::<_, Option<String>>(2)?,
        "slotType": r.get::<_, String>(3)?,
        "date": r.get::<_, String>(4)?,
        "startTime": r.get::<_, String>(5)?,
        "endTime": r.get::<_, String>(6)?,
        "status": r.get::<_, String>(7)?
    }))
}

fn slots_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId");
    let from = get_optional_str(params, "from");
    let to = get_optional_str(params, "to");
    if let Some(raw) = &from {
        parse_date(raw, "from")?;
    }
    if let Some(raw) = &to {
        parse_date(raw, "to")?;
    }

    let mut sql = String::from(
        "SELECT id, student_id, teacher_id, slot_type, date, start_time, end_time, status
         FROM lesson_slots
         WHERE 1=1",
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(sid) = student_id {
        sql.push_str(" AND student_id = ?");
        binds.push(sid);
    }
    if let Some(f) = from {
        sql.push_str(" AND date >= ?");
        binds.push(f);
    }
    if let Some(t) = to {
        sql.push_str(" AND date <= ?");
        binds.push(t);
    }
    sql.push_str(" ORDER BY date, start_time");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let slots = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), slot_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "slots": slots }))
}

fn slots_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let slot_type = get_required_str(params, "slotType")?.to_ascii_lowercase();
    let date_raw = get_required_str(params, "date")?;
    let start_raw = get_required_str(params, "startTime")?;
    let end_raw = get_required_str(params, "endTime")?;
    let teacher_id = get_optional_str(params, "teacherId");

    if !validate_slot_type(&slot_type) {
        return Err(HandlerErr::bad_params(
            "slotType must be one of: lesson, interview, extra",
        ));
    }
    parse_date(&date_raw, "date")?;
    let start = parse_time(&start_raw, "startTime")?;
    let end = parse_time(&end_raw, "endTime")?;
    if end <= start {
        return Err(HandlerErr::bad_params("endTime must be after startTime"));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    if let Some(tid) = &teacher_id {
        if !teacher_exists(conn, tid)? {
            return Err(HandlerErr::new("not_found", "teacher not found"));
        }
    }
    if has_overlapping_slot(conn, &student_id, date_raw.trim(), start_raw.trim(), end_raw.trim(), None)? {
        return Err(HandlerErr {
            code: "conflict",
            message: "student already has a slot in that time range".to_string(),
            details: Some(json!({ "date": date_raw.trim() })),
        });
    }

    let now = effective_now(params)?;
    let slot_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lesson_slots(id, student_id, teacher_id, slot_type, date, start_time, end_time, status, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'scheduled', ?)",
        (
            &slot_id,
            &student_id,
            &teacher_id,
            &slot_type,
            date_raw.trim(),
            start_raw.trim(),
            end_raw.trim(),
            now_stamp(now),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "lesson_slots" })),
    })?;

    Ok(json!({ "slotId": slot_id, "status": STATUS_SCHEDULED }))
}

struct SlotRow {
    student_id: String,
    date: String,
    start_time: String,
    end_time: String,
    status: String,
}

fn load_slot(conn: &Connection, slot_id: &str) -> Result<Option<SlotRow>, HandlerErr> {
    conn.query_row(
        "SELECT student_id, date, start_time, end_time, status FROM lesson_slots WHERE id = ?",
        [slot_id],
        |r| {
            Ok(SlotRow {
                student_id: r.get(0)?,
                date: r.get(1)?,
                start_time: r.get(2)?,
                end_time: r.get(3)?,
                status: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn slots_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let Some(current) = load_slot(conn, &slot_id)? else {
        return Err(HandlerErr::new("not_found", "slot not found"));
    };
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    let mut date = current.date.clone();
    let mut start_time = current.start_time.clone();
    let mut end_time = current.end_time.clone();
    let mut status = current.status.clone();
    let mut teacher_id: Option<Option<String>> = None;
    let mut slot_type: Option<String> = None;

    for (key, value) in patch {
        match key.as_str() {
            "date" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("date must be a string"))?;
                parse_date(raw, "date")?;
                date = raw.trim().to_string();
            }
            "startTime" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("startTime must be a string"))?;
                parse_time(raw, "startTime")?;
                start_time = raw.trim().to_string();
            }
            "endTime" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("endTime must be a string"))?;
                parse_time(raw, "endTime")?;
                end_time = raw.trim().to_string();
            }
            "status" => {
                let raw = value
                    .as_str()
                    .map(|s| s.to_ascii_lowercase())
                    .ok_or_else(|| HandlerErr::bad_params("status must be a string"))?;
                if !validate_status(&raw) {
                    return Err(HandlerErr::bad_params(
                        "status must be one of: scheduled, absence_requested, cancelled, completed",
                    ));
                }
                status = raw;
            }
            "teacherId" => {
                if value.is_null() {
                    teacher_id = Some(None);
                } else {
                    let raw = value
                        .as_str()
                        .ok_or_else(|| HandlerErr::bad_params("teacherId must be string or null"))?;
                    if !teacher_exists(conn, raw)? {
                        return Err(HandlerErr::new("not_found", "teacher not found"));
                    }
                    teacher_id = Some(Some(raw.to_string()));
                }
            }
            "slotType" => {
                let raw = value
                    .as_str()
                    .map(|s| s.to_ascii_lowercase())
                    .ok_or_else(|| HandlerErr::bad_params("slotType must be a string"))?;
                if !validate_slot_type(&raw) {
                    return Err(HandlerErr::bad_params(
                        "slotType must be one of: lesson, interview, extra",
                    ));
                }
                slot_type = Some(raw);
            }
            other => {
                return Err(HandlerErr::bad_params(format!("unknown patch field {}", other)));
            }
        }
    }

    let start = parse_time(&start_time, "startTime")?;
    let end = parse_time(&end_time, "endTime")?;
    if end <= start {
        return Err(HandlerErr::bad_params("endTime must be after startTime"));
    }
    if status != STATUS_CANCELLED
        && has_overlapping_slot(
            conn,
            &current.student_id,
            &date,
            &start_time,
            &end_time,
            Some(&slot_id),
        )?
    {
        return Err(HandlerErr {
            code: "conflict",
            message: "student already has a slot in that time range".to_string(),
            details: Some(json!({ "date": date })),
        });
    }

    let now = effective_now(params)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "UPDATE lesson_slots SET date = ?, start_time = ?, end_time = ?, status = ?, updated_at = ? WHERE id = ?",
        (&date, &start_time, &end_time, &status, now_stamp(now), &slot_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "lesson_slots" })),
    })?;
    if let Some(tid) = teacher_id {
        tx.execute(
            "UPDATE lesson_slots SET teacher_id = ? WHERE id = ?",
            (&tid, &slot_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    if let Some(st) = slot_type {
        tx.execute(
            "UPDATE lesson_slots SET slot_type = ? WHERE id = ?",
            (&st, &slot_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true, "status": status }))
}

fn slots_cancel(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let Some(current) = load_slot(conn, &slot_id)? else {
        return Err(HandlerErr::new("not_found", "slot not found"));
    };
    if current.status == STATUS_CANCELLED {
        return Ok(json!({ "ok": true, "status": STATUS_CANCELLED, "alreadyCancelled": true }));
    }
    let now = effective_now(params)?;
    conn.execute(
        "UPDATE lesson_slots SET status = 'cancelled', updated_at = ? WHERE id = ?",
        (now_stamp(now), &slot_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "lesson_slots" })),
    })?;
    Ok(json!({ "ok": true, "status": STATUS_CANCELLED }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "slots.list" | "slots.create" | "slots.update" | "slots.cancel"
    );
    if !handled {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "slots.list" => slots_list(conn, &req.params),
        "slots.create" => slots_create(conn, &req.params),
        "slots.update" => slots_update(conn, &req.params),
        _ => slots_cancel(conn, &req.params),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
