use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{effective_now, get_required_str, now_stamp, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn notifications_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let recipient_id = get_required_str(params, "recipientId")?;
    let unread_only = params
        .get("unreadOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sql = if unread_only {
        "SELECT id, kind, body, is_read, created_at
         FROM notifications
         WHERE recipient_id = ? AND is_read = 0
         ORDER BY created_at DESC"
    } else {
        "SELECT id, kind, body, is_read, created_at
         FROM notifications
         WHERE recipient_id = ?
         ORDER BY created_at DESC"
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let notifications = stmt
        .query_map([&recipient_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "kind": r.get::<_, String>(1)?,
                "body": r.get::<_, String>(2)?,
                "isRead": r.get::<_, i64>(3)? != 0,
                "createdAt": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "notifications": notifications }))
}

fn notifications_mark_read(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let notification_id = get_required_str(params, "notificationId")?;
    let updated = conn
        .execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?",
            [&notification_id],
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "notifications" })),
        })?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "notification not found"));
    }
    Ok(json!({ "ok": true }))
}

fn chat_send(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let sender_id = get_required_str(params, "senderId")?;
    let recipient_id = get_required_str(params, "recipientId")?;
    let body = get_required_str(params, "body")?;
    if body.trim().is_empty() {
        return Err(HandlerErr::bad_params("body must not be empty"));
    }
    let now = effective_now(params)?;

    let message_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO chat_messages(id, sender_id, recipient_id, body, sent_at)
         VALUES(?, ?, ?, ?, ?)",
        (&message_id, &sender_id, &recipient_id, body.trim(), now_stamp(now)),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "chat_messages" })),
    })?;

    Ok(json!({ "messageId": message_id }))
}

fn chat_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let a = get_required_str(params, "a")?;
    let b = get_required_str(params, "b")?;
    let limit = params
        .get("limit")
        .and_then(|v| v.as_i64())
        .filter(|v| *v > 0)
        .unwrap_or(200);

    let mut stmt = conn
        .prepare(
            "SELECT id, sender_id, recipient_id, body, sent_at
             FROM chat_messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY sent_at
             LIMIT ?3",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let messages = stmt
        .query_map(rusqlite::params![a, b, limit], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "senderId": r.get::<_, String>(1)?,
                "recipientId": r.get::<_, String>(2)?,
                "body": r.get::<_, String>(3)?,
                "sentAt": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "messages": messages }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "notifications.list" | "notifications.markRead" | "chat.send" | "chat.list"
    );
    if !handled {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "notifications.list" => notifications_list(conn, &req.params),
        "notifications.markRead" => notifications_mark_read(conn, &req.params),
        "chat.send" => chat_send(conn, &req.params),
        _ => chat_list(conn, &req.params),
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    })
}
