use crate::ipc::error::{err, ok};
use crate::ipc::handlers::slots::{has_overlapping_slot, STATUS_SCHEDULED};
use crate::ipc::helpers::{
    effective_now, get_optional_str, get_required_str, now_stamp, parse_date, parse_time,
    queue_notification, setup_section, student_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Duration, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const REQ_PENDING: &str = "pending";
const REQ_APPROVED: &str = "approved";
const REQ_REJECTED: &str = "rejected";

fn deadline_hours(conn: &Connection) -> i64 {
    setup_section(conn, "setup.requests")
        .get("deadlineHours")
        .and_then(|v| v.as_i64())
        .filter(|v| *v >= 0)
        .unwrap_or(24)
}

fn within_deadline(slot_start: NaiveDateTime, now: NaiveDateTime, hours: i64) -> bool {
    slot_start - now >= Duration::hours(hours)
}

fn slot_start_datetime(date: &str, start_time: &str) -> Result<NaiveDateTime, HandlerErr> {
    let d = parse_date(date, "date")?;
    let t = parse_time(start_time, "startTime")?;
    Ok(d.and_time(t))
}

fn request_status_filter(params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    match get_optional_str(params, "status") {
        None => Ok(None),
        Some(raw) => {
            let s = raw.to_ascii_lowercase();
            if !matches!(s.as_str(), REQ_PENDING | REQ_APPROVED | REQ_REJECTED) {
                return Err(HandlerErr::bad_params(
                    "status must be one of: pending, approved, rejected",
                ));
            }
            Ok(Some(s))
        }
    }
}

fn absence_request(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let reason = get_required_str(params, "reason")?;
    if reason.trim().is_empty() {
        return Err(HandlerErr::bad_params("reason must not be empty"));
    }
    let now = effective_now(params)?;

    let slot: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT student_id, date, start_time, status FROM lesson_slots WHERE id = ?",
            [&slot_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((student_id, date, start_time, status)) = slot else {
        return Err(HandlerErr::new("not_found", "slot not found"));
    };
    if status != STATUS_SCHEDULED {
        return Err(HandlerErr {
            code: "conflict",
            message: format!("slot is not scheduled (status: {})", status),
            details: Some(json!({ "status": status })),
        });
    }

    let hours = deadline_hours(conn);
    let slot_start = slot_start_datetime(&date, &start_time)?;
    if !within_deadline(slot_start, now, hours) {
        return Err(HandlerErr {
            code: "time_limit",
            message: format!(
                "absence requests close {} hours before the lesson",
                hours
            ),
            details: Some(json!({ "slotStart": format!("{}T{}", date, start_time) })),
        });
    }

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM absence_requests WHERE slot_id = ? AND status = 'pending'",
            [&slot_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if duplicate.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            "a pending absence request already exists for this slot",
        ));
    }

    let request_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO absence_requests(id, slot_id, student_id, reason, status, requested_at)
         VALUES(?, ?, ?, ?, 'pending', ?)",
        (&request_id, &slot_id, &student_id, reason.trim(), now_stamp(now)),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "absence_requests" })),
    })?;

    // Secondary write; the insert above stands even if this fails.
    let slot_status_updated = conn
        .execute(
            "UPDATE lesson_slots SET status = 'absence_requested', updated_at = ? WHERE id = ?",
            (now_stamp(now), &slot_id),
        )
        .is_ok();

    Ok(json!({
        "requestId": request_id,
        "status": REQ_PENDING,
        "slotStatusUpdated": slot_status_updated
    }))
}

fn absence_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let status = request_status_filter(params)?;
    let base = "SELECT
                  ar.id, ar.slot_id, ar.student_id, ar.reason, ar.status,
                  ar.requested_at, ar.decided_at,
                  ls.date, ls.start_time, ls.end_time,
                  s.last_name || ', ' || s.first_name AS student_name
                FROM absence_requests ar
                JOIN lesson_slots ls ON ls.id = ar.slot_id
                JOIN students s ON s.id = ar.student_id";
    let sql = match &status {
        Some(_) => format!("{} WHERE ar.status = ? ORDER BY ar.requested_at", base),
        None => format!("{} ORDER BY ar.requested_at", base),
    };
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "slotId": r.get::<_, String>(1)?,
            "studentId": r.get::<_, String>(2)?,
            "reason": r.get::<_, String>(3)?,
            "status": r.get::<_, String>(4)?,
            "requestedAt": r.get::<_, String>(5)?,
            "decidedAt": r.get::<_, Option<String>>(6)?,
            "slotDate": r.get::<_, String>(7)?,
            "slotStartTime": r.get::<_, String>(8)?,
            "slotEndTime": r.get::<_, String>(9)?,
            "studentName": r.get::<_, String>(10)?
        }))
    };
    let requests = match status {
        Some(s) => stmt
            .query_map([&s], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "requests": requests }))
}

fn absence_decide(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let request_id = get_required_str(params, "requestId")?;
    let approve = params
        .get("approve")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing approve"))?;
    let now = effective_now(params)?;

    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT slot_id, student_id, status FROM absence_requests WHERE id = ?",
            [&request_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((slot_id, student_id, status)) = row else {
        return Err(HandlerErr::new("not_found", "absence request not found"));
    };
    if status != REQ_PENDING {
        return Err(HandlerErr {
            code: "conflict",
            message: format!("request already decided ({})", status),
            details: None,
        });
    }

    let new_status = if approve { REQ_APPROVED } else { REQ_REJECTED };
    conn.execute(
        "UPDATE absence_requests SET status = ?, decided_at = ? WHERE id = ?",
        (new_status, now_stamp(now), &request_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "absence_requests" })),
    })?;

    // Approval cancels the slot; rejection restores it to scheduled.
    let slot_status = if approve { "cancelled" } else { STATUS_SCHEDULED };
    let slot_status_updated = conn
        .execute(
            "UPDATE lesson_slots SET status = ?, updated_at = ? WHERE id = ?",
            (slot_status, now_stamp(now), &slot_id),
        )
        .is_ok();

    let body = if approve {
        "Your absence request was approved."
    } else {
        "Your absence request was rejected."
    };
    let notification_queued =
        queue_notification(conn, &student_id, "absence_decision", body, &now_stamp(now));

    Ok(json!({
        "ok": true,
        "status": new_status,
        "slotStatusUpdated": slot_status_updated,
        "notificationQueued": notification_queued
    }))
}

fn additional_request(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date_raw = get_required_str(params, "date")?;
    let start_raw = get_required_str(params, "startTime")?;
    let end_raw = get_required_str(params, "endTime")?;
    let note = get_optional_str(params, "note");
    let now = effective_now(params)?;

    let date = parse_date(&date_raw, "date")?;
    let start = parse_time(&start_raw, "startTime")?;
    let end = parse_time(&end_raw, "endTime")?;
    if end <= start {
        return Err(HandlerErr::bad_params("endTime must be after startTime"));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let hours = deadline_hours(conn);
    let requested_start = date.and_time(start);
    if !within_deadline(requested_start, now, hours) {
        return Err(HandlerErr {
            code: "time_limit",
            message: format!(
                "additional lessons must be requested at least {} hours ahead",
                hours
            ),
            details: Some(json!({ "requestedStart": format!("{}T{}", date_raw.trim(), start_raw.trim()) })),
        });
    }
    if has_overlapping_slot(conn, &student_id, date_raw.trim(), start_raw.trim(), end_raw.trim(), None)? {
        return Err(HandlerErr {
            code: "conflict",
            message: "requested time overlaps an existing slot".to_string(),
            details: Some(json!({ "date": date_raw.trim() })),
        });
    }

    let request_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO additional_lesson_requests(id, student_id, date, start_time, end_time, note, status, requested_at)
         VALUES(?, ?, ?, ?, ?, ?, 'pending', ?)",
        (
            &request_id,
            &student_id,
            date_raw.trim(),
            start_raw.trim(),
            end_raw.trim(),
            &note,
            now_stamp(now),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "additional_lesson_requests" })),
    })?;

    Ok(json!({ "requestId": request_id, "status": REQ_PENDING }))
}

fn additional_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let status = request_status_filter(params)?;
    let base = "SELECT
                  alr.id, alr.student_id, alr.date, alr.start_time, alr.end_time,
                  alr.note, alr.status, alr.requested_at, alr.decided_at, alr.created_slot_id,
                  s.last_name || ', ' || s.first_name AS student_name
                FROM additional_lesson_requests alr
                JOIN students s ON s.id = alr.student_id";
    let sql = match &status {
        Some(_) => format!("{} WHERE alr.status = ? ORDER BY alr.requested_at", base),
        None => format!("{} ORDER BY alr.requested_at", base),
    };
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "studentId": r.get::<_, String>(1)?,
            "date": r.get::<_, String>(2)?,
            "startTime": r.get::<_, String>(3)?,
            "endTime": r.get::<_, String>(4)?,
            "note": r.get::<_, Option<String>>(5)?,
            "status": r.get::<_, String>(6)?,
            "requestedAt": r.get::<_, String>(7)?,
            "decidedAt": r.get::<_, Option<String>>(8)?,
            "createdSlotId": r.get::<_, Option<String>>(9)?,
            "studentName": r.get::<_, String>(10)?
        }))
    };
    let requests = match status {
        Some(s) => stmt
            .query_map([&s], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "requests": requests }))
}

fn additional_decide(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let request_id = get_required_str(params, "requestId")?;
    let approve = params
        .get("approve")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing approve"))?;
    let now = effective_now(params)?;

    let row: Option<(String, String, String, String, String)> = conn
        .query_row(
            "SELECT student_id, date, start_time, end_time, status
             FROM additional_lesson_requests WHERE id = ?",
            [&request_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((student_id, date, start_time, end_time, status)) = row else {
        return Err(HandlerErr::new("not_found", "additional lesson request not found"));
    };
    if status != REQ_PENDING {
        return Err(HandlerErr {
            code: "conflict",
            message: format!("request already decided ({})", status),
            details: None,
        });
    }

    let new_status = if approve { REQ_APPROVED } else { REQ_REJECTED };
    conn.execute(
        "UPDATE additional_lesson_requests SET status = ?, decided_at = ? WHERE id = ?",
        (new_status, now_stamp(now), &request_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "additional_lesson_requests" })),
    })?;

    // Approval creates the extra slot as a secondary write after the
    // status flip; a failure here leaves an approved request with no slot.
    // The range may have been taken since the request was filed (another
    // approved request, a new slot), so re-check overlap before inserting.
    let mut created_slot_id: Option<String> = None;
    let mut slot_created = false;
    let range_free = approve
        && matches!(
            has_overlapping_slot(conn, &student_id, &date, &start_time, &end_time, None),
            Ok(false)
        );
    if range_free {
        let slot_id = Uuid::new_v4().to_string();
        let inserted = conn
            .execute(
                "INSERT INTO lesson_slots(id, student_id, teacher_id, slot_type, date, start_time, end_time, status, updated_at)
                 VALUES(?, ?, NULL, 'extra', ?, ?, ?, 'scheduled', ?)",
                (&slot_id, &student_id, &date, &start_time, &end_time, now_stamp(now)),
            )
            .is_ok();
        if inserted {
            let _ = conn.execute(
                "UPDATE additional_lesson_requests SET created_slot_id = ? WHERE id = ?",
                (&slot_id, &request_id),
            );
            created_slot_id = Some(slot_id);
            slot_created = true;
        }
    }

    let body = if approve {
        "Your additional lesson request was approved."
    } else {
        "Your additional lesson request was rejected."
    };
    let notification_queued =
        queue_notification(conn, &student_id, "additional_decision", body, &now_stamp(now));

    Ok(json!({
        "ok": true,
        "status": new_status,
        "slotCreated": slot_created,
        "createdSlotId": created_slot_id,
        "notificationQueued": notification_queued
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "absence.request"
            | "absence.list"
            | "absence.decide"
            | "additional.request"
            | "additional.list"
            | "additional.decide"
    );
    if !handled {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "absence.request" => absence_request(conn, &req.params),
        "absence.list" => absence_list(conn, &req.params),
        "absence.decide" => absence_decide(conn, &req.params),
        "additional.request" => additional_request(conn, &req.params),
        "additional.list" => additional_list(conn, &req.params),
        _ => additional_decide(conn, &req.params),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
