use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, row_exists, student_exists, teacher_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ROLE_INTERVIEW: &str = "interview";
const ROLE_LESSON: &str = "lesson";

fn validate_role(role: &str) -> bool {
    matches!(role, ROLE_INTERVIEW | ROLE_LESSON)
}

fn assignments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId");
    let teacher_id = get_optional_str(params, "teacherId");

    let base = "SELECT
                  a.id, a.teacher_id, a.student_id, a.role,
                  t.last_name || ', ' || t.first_name AS teacher_name,
                  s.last_name || ', ' || s.first_name AS student_name
                FROM assignments a
                JOIN teachers t ON t.id = a.teacher_id
                JOIN students s ON s.id = a.student_id";
    let (sql, filter): (String, Option<String>) = match (&student_id, &teacher_id) {
        (Some(sid), _) => (
            format!("{} WHERE a.student_id = ? ORDER BY a.role, teacher_name", base),
            Some(sid.clone()),
        ),
        (None, Some(tid)) => (
            format!("{} WHERE a.teacher_id = ? ORDER BY a.role, student_name", base),
            Some(tid.clone()),
        ),
        (None, None) => (
            format!("{} ORDER BY teacher_name, student_name, a.role", base),
            None,
        ),
    };

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "teacherId": r.get::<_, String>(1)?,
            "studentId": r.get::<_, String>(2)?,
            "role": r.get::<_, String>(3)?,
            "teacherName": r.get::<_, String>(4)?,
            "studentName": r.get::<_, String>(5)?
        }))
    };
    let assignments = match filter {
        Some(id) => stmt
            .query_map([&id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "assignments": assignments }))
}

fn assignments_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let student_id = get_required_str(params, "studentId")?;
    let role = get_required_str(params, "role")?.to_ascii_lowercase();
    if !validate_role(&role) {
        return Err(HandlerErr::bad_params("role must be interview or lesson"));
    }
    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM assignments WHERE teacher_id = ? AND student_id = ? AND role = ?",
            (&teacher_id, &student_id, &role),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if let Some(id) = existing {
        return Ok(json!({ "assignmentId": id, "created": false }));
    }

    let assignment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assignments(id, teacher_id, student_id, role) VALUES(?, ?, ?, ?)",
        (&assignment_id, &teacher_id, &student_id, &role),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "assignments" })),
    })?;

    Ok(json!({ "assignmentId": assignment_id, "created": true }))
}

fn assignments_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    if !row_exists(conn, "SELECT 1 FROM assignments WHERE id = ?", &assignment_id)? {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    }
    conn.execute("DELETE FROM assignments WHERE id = ?", [&assignment_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "assignments" })),
        })?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "assignments.list" | "assignments.set" | "assignments.delete"
    );
    if !handled {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "assignments.list" => assignments_list(conn, &req.params),
        "assignments.set" => assignments_set(conn, &req.params),
        _ => assignments_delete(conn, &req.params),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
