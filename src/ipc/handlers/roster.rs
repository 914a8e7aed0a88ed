use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    effective_now, get_optional_str, get_required_str, now_stamp, row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn students_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, grade, guardian_contact, active, sort_order
             FROM students
             ORDER BY sort_order, last_name, first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "lastName": last,
                "firstName": first,
                "grade": r.get::<_, Option<String>>(3)?,
                "guardianContact": r.get::<_, Option<String>>(4)?,
                "active": r.get::<_, i64>(5)? != 0,
                "sortOrder": r.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    if last_name.trim().is_empty() || first_name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let grade = get_optional_str(params, "grade");
    let guardian_contact = get_optional_str(params, "guardianContact");
    let now = effective_now(params)?;

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
            [],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, last_name, first_name, grade, guardian_contact, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &student_id,
            last_name.trim(),
            first_name.trim(),
            &grade,
            &guardian_contact,
            next_sort,
            now_stamp(now),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": student_id }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !row_exists(conn, "SELECT 1 FROM students WHERE id = ?", &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let now = effective_now(params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (key, value) in patch {
        let column = match key.as_str() {
            "lastName" => "last_name",
            "firstName" => "first_name",
            "grade" => "grade",
            "guardianContact" => "guardian_contact",
            "active" => "active",
            "sortOrder" => "sort_order",
            _ => return Err(HandlerErr::bad_params(format!("unknown patch field {}", key))),
        };
        let result = match column {
            "active" => {
                let flag = value
                    .as_bool()
                    .ok_or_else(|| HandlerErr::bad_params("active must be boolean"))?;
                tx.execute(
                    "UPDATE students SET active = ? WHERE id = ?",
                    (flag as i64, &student_id),
                )
            }
            "sort_order" => {
                let order = value
                    .as_i64()
                    .ok_or_else(|| HandlerErr::bad_params("sortOrder must be integer"))?;
                tx.execute(
                    "UPDATE students SET sort_order = ? WHERE id = ?",
                    (order, &student_id),
                )
            }
            col => {
                let text = value.as_str().map(|s| s.trim().to_string());
                if matches!(col, "last_name" | "first_name")
                    && text.as_deref().map(|s| s.is_empty()).unwrap_or(true)
                {
                    return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
                }
                let sql = format!("UPDATE students SET {} = ? WHERE id = ?", col);
                tx.execute(&sql, (&text, &student_id))
            }
        };
        result.map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
    }
    tx.execute(
        "UPDATE students SET updated_at = ? WHERE id = ?",
        (now_stamp(now), &student_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !row_exists(conn, "SELECT 1 FROM students WHERE id = ?", &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let steps: &[(&str, &str)] = &[
        (
            "tasks",
            "DELETE FROM tasks WHERE todo_list_id IN (SELECT id FROM todo_lists WHERE student_id = ?)",
        ),
        (
            "teacher_comments",
            "DELETE FROM teacher_comments WHERE todo_list_id IN (SELECT id FROM todo_lists WHERE student_id = ?)",
        ),
        ("todo_lists", "DELETE FROM todo_lists WHERE student_id = ?"),
        (
            "absence_requests",
            "DELETE FROM absence_requests WHERE student_id = ?",
        ),
        (
            "additional_lesson_requests",
            "DELETE FROM additional_lesson_requests WHERE student_id = ?",
        ),
        ("lesson_slots", "DELETE FROM lesson_slots WHERE student_id = ?"),
        ("assignments", "DELETE FROM assignments WHERE student_id = ?"),
        (
            "notifications",
            "DELETE FROM notifications WHERE recipient_id = ?",
        ),
        (
            "chat_messages",
            "DELETE FROM chat_messages WHERE sender_id = ? OR recipient_id = ?",
        ),
        ("students", "DELETE FROM students WHERE id = ?"),
    ];
    for (table, sql) in steps {
        let result = if *table == "chat_messages" {
            tx.execute(sql, (&student_id, &student_id))
        } else {
            tx.execute(sql, [&student_id])
        };
        if let Err(e) = result {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

fn teachers_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               t.id, t.last_name, t.first_name, t.subject, t.active,
               (SELECT COUNT(*) FROM assignments a WHERE a.teacher_id = t.id) AS assignment_count
             FROM teachers t
             ORDER BY t.last_name, t.first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let teachers = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "lastName": last,
                "firstName": first,
                "subject": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
                "assignmentCount": r.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "teachers": teachers }))
}

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    if last_name.trim().is_empty() || first_name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let subject = get_optional_str(params, "subject");
    let now = effective_now(params)?;

    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, last_name, first_name, subject, active, updated_at)
         VALUES(?, ?, ?, ?, 1, ?)",
        (
            &teacher_id,
            last_name.trim(),
            first_name.trim(),
            &subject,
            now_stamp(now),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teachers" })),
    })?;

    Ok(json!({ "teacherId": teacher_id }))
}

fn teachers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    if !row_exists(conn, "SELECT 1 FROM teachers WHERE id = ?", &teacher_id)? {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let now = effective_now(params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (key, value) in patch {
        let column = match key.as_str() {
            "lastName" => "last_name",
            "firstName" => "first_name",
            "subject" => "subject",
            "active" => "active",
            _ => return Err(HandlerErr::bad_params(format!("unknown patch field {}", key))),
        };
        let result = if column == "active" {
            let flag = value
                .as_bool()
                .ok_or_else(|| HandlerErr::bad_params("active must be boolean"))?;
            tx.execute(
                "UPDATE teachers SET active = ? WHERE id = ?",
                (flag as i64, &teacher_id),
            )
        } else {
            let text = value.as_str().map(|s| s.trim().to_string());
            if matches!(column, "last_name" | "first_name")
                && text.as_deref().map(|s| s.is_empty()).unwrap_or(true)
            {
                return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
            }
            let sql = format!("UPDATE teachers SET {} = ? WHERE id = ?", column);
            tx.execute(&sql, (&text, &teacher_id))
        };
        result.map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "teachers" })),
        })?;
    }
    tx.execute(
        "UPDATE teachers SET updated_at = ? WHERE id = ?",
        (now_stamp(now), &teacher_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

fn teachers_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    if !row_exists(conn, "SELECT 1 FROM teachers WHERE id = ?", &teacher_id)? {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }
    let assignment_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM assignments WHERE teacher_id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if assignment_count > 0 {
        return Err(HandlerErr {
            code: "conflict",
            message: "teacher still has assignments".to_string(),
            details: Some(json!({ "assignmentCount": assignment_count })),
        });
    }
    conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "teachers" })),
        })?;
    Ok(json!({ "ok": true }))
}

fn admins_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, email FROM administrators ORDER BY name")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let admins = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "admins": admins }))
}

fn admins_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?;
    if name.trim().is_empty() || email.trim().is_empty() {
        return Err(HandlerErr::bad_params("name and email must not be empty"));
    }
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM administrators WHERE email = ?",
            [email.trim()],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if existing.is_some() {
        return Err(HandlerErr::new("conflict", "email already registered"));
    }
    let admin_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO administrators(id, name, email) VALUES(?, ?, ?)",
        (&admin_id, name.trim(), email.trim()),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "administrators" })),
    })?;
    Ok(json!({ "adminId": admin_id }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, |c, _| students_list(c))),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        "teachers.list" => Some(with_conn(state, req, |c, _| teachers_list(c))),
        "teachers.create" => Some(with_conn(state, req, teachers_create)),
        "teachers.update" => Some(with_conn(state, req, teachers_update)),
        "teachers.delete" => Some(with_conn(state, req, teachers_delete)),
        "admins.list" => Some(with_conn(state, req, |c, _| admins_list(c))),
        "admins.create" => Some(with_conn(state, req, admins_create)),
        _ => None,
    }
}
