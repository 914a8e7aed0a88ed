use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    effective_now, get_optional_str, get_required_str, now_stamp, parse_date, setup_section,
    student_exists, teacher_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::week;
use chrono::{Duration, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const LIST_DRAFT: &str = "draft";
const LIST_PUBLISHED: &str = "published";

fn forward_weeks(conn: &Connection) -> i64 {
    setup_section(conn, "setup.weekly")
        .get("forwardWeeks")
        .and_then(|v| v.as_i64())
        .filter(|v| *v >= 0)
        .unwrap_or(week::FORWARD_WEEKS_LIMIT)
}

fn show_draft_default(conn: &Connection) -> bool {
    setup_section(conn, "setup.weekly")
        .get("showDraftByDefault")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn load_week_tasks(conn: &Connection, todo_list_id: &str) -> Result<Vec<week::TaskItem>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, date, content, is_completed, sort_order
             FROM tasks
             WHERE todo_list_id = ?
             ORDER BY date, sort_order",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([todo_list_id], |r| {
        Ok(week::TaskItem {
            id: r.get(0)?,
            date: r.get(1)?,
            content: r.get(2)?,
            is_completed: r.get::<_, i64>(3)? != 0,
            sort_order: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn load_week_comments(
    conn: &Connection,
    todo_list_id: &str,
) -> Result<Vec<week::CommentItem>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT tc.id, tc.date, tc.teacher_id,
                    t.last_name || ', ' || t.first_name AS teacher_name,
                    tc.body
             FROM teacher_comments tc
             JOIN teachers t ON t.id = tc.teacher_id
             WHERE tc.todo_list_id = ?
             ORDER BY tc.date",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([todo_list_id], |r| {
        Ok(week::CommentItem {
            id: r.get(0)?,
            date: r.get(1)?,
            teacher_id: r.get(2)?,
            teacher_name: r.get(3)?,
            body: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn weekly_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let today = match get_optional_str(params, "today") {
        Some(raw) => parse_date(&raw, "today")?,
        None => effective_now(params)?.date(),
    };
    let reference = match (
        get_optional_str(params, "weekStart"),
        get_optional_str(params, "refDate"),
    ) {
        (Some(raw), _) => parse_date(&raw, "weekStart")?,
        (None, Some(raw)) => parse_date(&raw, "refDate")?,
        (None, None) => today,
    };
    let start = week::week_start(reference);

    let include_draft = params
        .get("includeDraft")
        .and_then(|v| v.as_bool())
        .unwrap_or_else(|| show_draft_default(conn));

    let week_key = start.format("%Y-%m-%d").to_string();
    let list: Option<(String, String)> = conn
        .query_row(
            "SELECT id, status FROM todo_lists WHERE student_id = ? AND week_start = ?",
            (&student_id, &week_key),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let visible_list = match &list {
        Some((_, status)) if status == LIST_DRAFT && !include_draft => None,
        other => other.clone(),
    };

    let (tasks, comments) = match &visible_list {
        Some((list_id, _)) => (
            load_week_tasks(conn, list_id)?,
            load_week_comments(conn, list_id)?,
        ),
        None => (Vec::new(), Vec::new()),
    };
    let view = week::aggregate_week(start, &tasks, &comments);

    let limit = forward_weeks(conn);
    let prev = start - Duration::weeks(1);
    let next = start + Duration::weeks(1);
    let todo_list = visible_list
        .map(|(id, status)| json!({ "id": id, "status": status }))
        .unwrap_or(serde_json::Value::Null);

    Ok(json!({
        "weekStart": week_key,
        "todoList": todo_list,
        "days": view.days,
        "completedCount": view.completed_count,
        "totalCount": view.total_count,
        "percent": view.percent,
        "navigation": {
            "prevWeekStart": prev.format("%Y-%m-%d").to_string(),
            "nextWeekStart": next.format("%Y-%m-%d").to_string(),
            "canGoNext": week::can_go_next_with_limit(start, today, limit)
        }
    }))
}

fn weekly_toggle_task(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let task_id = get_required_str(params, "taskId")?;
    let is_completed = params
        .get("isCompleted")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing isCompleted"))?;
    let now = effective_now(params)?;

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT todo_list_id, date FROM tasks WHERE id = ?",
            [&task_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((todo_list_id, task_date)) = row else {
        return Err(HandlerErr::new("not_found", "task not found"));
    };

    conn.execute(
        "UPDATE tasks SET is_completed = ?, updated_at = ? WHERE id = ?",
        (is_completed as i64, now_stamp(now), &task_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "tasks" })),
    })?;

    // Recompute the day and week ratios from the stored rows.
    let tasks = load_week_tasks(conn, &todo_list_id)?;
    let day_total = tasks.iter().filter(|t| t.date == task_date).count();
    let day_completed = tasks
        .iter()
        .filter(|t| t.date == task_date && t.is_completed)
        .count();
    let week_total = tasks.len();
    let week_completed = tasks.iter().filter(|t| t.is_completed).count();

    Ok(json!({
        "ok": true,
        "taskId": task_id,
        "isCompleted": is_completed,
        "date": task_date,
        "dayPercent": week::completion_percent(day_completed, day_total),
        "weekPercent": week::completion_percent(week_completed, week_total)
    }))
}

fn todo_lists_ensure(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let week_start_raw = get_required_str(params, "weekStart")?;
    let parsed = parse_date(&week_start_raw, "weekStart")?;
    let start = week::week_start(parsed);
    if start != parsed {
        return Err(HandlerErr::bad_params("weekStart must be a Monday"));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let now = effective_now(params)?;

    let week_key = start.format("%Y-%m-%d").to_string();
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT id, status FROM todo_lists WHERE student_id = ? AND week_start = ?",
            (&student_id, &week_key),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if let Some((id, status)) = existing {
        return Ok(json!({ "todoListId": id, "status": status, "created": false }));
    }

    let list_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO todo_lists(id, student_id, week_start, status, updated_at)
         VALUES(?, ?, ?, 'draft', ?)",
        (&list_id, &student_id, &week_key, now_stamp(now)),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "todo_lists" })),
    })?;

    Ok(json!({ "todoListId": list_id, "status": LIST_DRAFT, "created": true }))
}

fn todo_lists_publish(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let todo_list_id = get_required_str(params, "todoListId")?;
    let now = effective_now(params)?;
    let updated = conn
        .execute(
            "UPDATE todo_lists SET status = 'published', updated_at = ? WHERE id = ?",
            (now_stamp(now), &todo_list_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "todo_lists" })),
        })?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "todo list not found"));
    }
    Ok(json!({ "ok": true, "status": LIST_PUBLISHED }))
}

fn list_week_bounds(conn: &Connection, todo_list_id: &str) -> Result<(NaiveDate, NaiveDate), HandlerErr> {
    let week_key: Option<String> = conn
        .query_row(
            "SELECT week_start FROM todo_lists WHERE id = ?",
            [todo_list_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(week_key) = week_key else {
        return Err(HandlerErr::new("not_found", "todo list not found"));
    };
    let start = parse_date(&week_key, "weekStart")?;
    Ok((start, start + Duration::days(6)))
}

fn date_in_week(
    conn: &Connection,
    todo_list_id: &str,
    date_raw: &str,
) -> Result<NaiveDate, HandlerErr> {
    let date = parse_date(date_raw, "date")?;
    let (start, end) = list_week_bounds(conn, todo_list_id)?;
    if date < start || date > end {
        return Err(HandlerErr {
            code: "bad_params",
            message: "date falls outside the todo list's week".to_string(),
            details: Some(json!({
                "weekStart": start.format("%Y-%m-%d").to_string(),
                "weekEnd": end.format("%Y-%m-%d").to_string()
            })),
        });
    }
    Ok(date)
}

fn tasks_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let todo_list_id = get_required_str(params, "todoListId")?;
    let date_raw = get_required_str(params, "date")?;
    let content = get_required_str(params, "content")?;
    if content.trim().is_empty() {
        return Err(HandlerErr::bad_params("content must not be empty"));
    }
    date_in_week(conn, &todo_list_id, &date_raw)?;
    let now = effective_now(params)?;

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM tasks WHERE todo_list_id = ? AND date = ?",
            (&todo_list_id, date_raw.trim()),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let task_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tasks(id, todo_list_id, date, content, is_completed, sort_order, updated_at)
         VALUES(?, ?, ?, ?, 0, ?, ?)",
        (
            &task_id,
            &todo_list_id,
            date_raw.trim(),
            content.trim(),
            next_sort,
            now_stamp(now),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "tasks" })),
    })?;

    Ok(json!({ "taskId": task_id, "sortOrder": next_sort }))
}

fn tasks_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let task_id = get_required_str(params, "taskId")?;
    let todo_list_id: Option<String> = conn
        .query_row(
            "SELECT todo_list_id FROM tasks WHERE id = ?",
            [&task_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(todo_list_id) = todo_list_id else {
        return Err(HandlerErr::new("not_found", "task not found"));
    };
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let now = effective_now(params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (key, value) in patch {
        let result = match key.as_str() {
            "content" => {
                let text = value
                    .as_str()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| HandlerErr::bad_params("content must not be empty"))?;
                tx.execute("UPDATE tasks SET content = ? WHERE id = ?", (&text, &task_id))
            }
            "date" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("date must be a string"))?;
                let date = date_in_week(conn, &todo_list_id, raw)?;
                tx.execute(
                    "UPDATE tasks SET date = ? WHERE id = ?",
                    (date.format("%Y-%m-%d").to_string(), &task_id),
                )
            }
            "sortOrder" => {
                let order = value
                    .as_i64()
                    .ok_or_else(|| HandlerErr::bad_params("sortOrder must be integer"))?;
                tx.execute(
                    "UPDATE tasks SET sort_order = ? WHERE id = ?",
                    (order, &task_id),
                )
            }
            other => {
                return Err(HandlerErr::bad_params(format!("unknown patch field {}", other)));
            }
        };
        result.map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "tasks" })),
        })?;
    }
    tx.execute(
        "UPDATE tasks SET updated_at = ? WHERE id = ?",
        (now_stamp(now), &task_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

fn tasks_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let task_id = get_required_str(params, "taskId")?;
    let deleted = conn
        .execute("DELETE FROM tasks WHERE id = ?", [&task_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "tasks" })),
        })?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "task not found"));
    }
    Ok(json!({ "ok": true }))
}

fn comments_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let todo_list_id = get_required_str(params, "todoListId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let date_raw = get_required_str(params, "date")?;
    let body = get_required_str(params, "body")?;
    if body.trim().is_empty() {
        return Err(HandlerErr::bad_params("body must not be empty"));
    }
    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }
    let date = date_in_week(conn, &todo_list_id, &date_raw)?;
    let now = effective_now(params)?;

    let comment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teacher_comments(id, todo_list_id, teacher_id, date, body, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(todo_list_id, teacher_id, date) DO UPDATE SET
           body = excluded.body,
           updated_at = excluded.updated_at",
        (
            &comment_id,
            &todo_list_id,
            &teacher_id,
            date.format("%Y-%m-%d").to_string(),
            body.trim(),
            now_stamp(now),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teacher_comments" })),
    })?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "weekly.open"
            | "weekly.toggleTask"
            | "todoLists.ensure"
            | "todoLists.publish"
            | "tasks.create"
            | "tasks.update"
            | "tasks.delete"
            | "comments.upsert"
    );
    if !handled {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "weekly.open" => weekly_open(conn, &req.params),
        "weekly.toggleTask" => weekly_toggle_task(conn, &req.params),
        "todoLists.ensure" => todo_lists_ensure(conn, &req.params),
        "todoLists.publish" => todo_lists_publish(conn, &req.params),
        "tasks.create" => tasks_create(conn, &req.params),
        "tasks.update" => tasks_update(conn, &req.params),
        "tasks.delete" => tasks_delete(conn, &req.params),
        _ => comments_upsert(conn, &req.params),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
