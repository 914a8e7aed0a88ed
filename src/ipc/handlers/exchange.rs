use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{types::Value as SqlValue, Connection};
use serde_json::json;
use std::path::PathBuf;

const EXPORT_PAGE_SIZE: i64 = 500;

const EXPORTABLE_TABLES: &[&str] = &[
    "students",
    "teachers",
    "administrators",
    "assignments",
    "lesson_slots",
    "absence_requests",
    "additional_lesson_requests",
    "todo_lists",
    "tasks",
    "teacher_comments",
    "notifications",
    "chat_messages",
];

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn validate_table(raw: &str) -> Result<&'static str, HandlerErr> {
    EXPORTABLE_TABLES
        .iter()
        .find(|t| **t == raw)
        .copied()
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("table not exportable: {}", raw),
            details: Some(json!({ "tables": EXPORTABLE_TABLES })),
        })
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, HandlerErr> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([], |r| r.get::<_, String>(1))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Read one page of rows as raw SQL values, rowid-ordered for a stable dump.
fn read_page(
    conn: &Connection,
    table: &str,
    columns: &[String],
    offset: i64,
) -> Result<Vec<Vec<SqlValue>>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM {} ORDER BY rowid LIMIT {} OFFSET {}",
        columns.join(", "),
        table,
        EXPORT_PAGE_SIZE,
        offset
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([], |r| {
        let mut row = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            row.push(r.get::<_, SqlValue>(i)?);
        }
        Ok(row)
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn sql_value_text(v: &SqlValue) -> String {
    match v {
        SqlValue::Null => String::new(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Blob(_) => String::new(),
    }
}

fn sql_value_json(v: &SqlValue) -> serde_json::Value {
    match v {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(i) => json!(i),
        SqlValue::Real(f) => json!(f),
        SqlValue::Text(s) => json!(s),
        SqlValue::Blob(_) => serde_json::Value::Null,
    }
}

fn write_export(out_path: &str, body: String) -> Result<(), HandlerErr> {
    let out = PathBuf::from(out_path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
            code: "io_failed",
            message: e.to_string(),
            details: Some(json!({ "path": out_path })),
        })?;
    }
    std::fs::write(&out, body).map_err(|e| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: Some(json!({ "path": out_path })),
    })
}

fn export_table_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let table = validate_table(get_required_str(params, "table")?.trim())?;
    let out_path = get_required_str(params, "outPath")?;
    if out_path.trim().is_empty() {
        return Err(HandlerErr::bad_params("missing outPath"));
    }

    let columns = table_columns(conn, table)?;
    let mut csv = String::new();
    csv.push_str(
        &columns
            .iter()
            .map(|c| csv_quote(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    csv.push('\n');

    let mut rows_exported = 0usize;
    let mut pages = 0usize;
    let mut offset = 0i64;
    loop {
        let page = read_page(conn, table, &columns, offset)?;
        if page.is_empty() {
            break;
        }
        pages += 1;
        for row in &page {
            let line = row
                .iter()
                .map(|v| csv_quote(&sql_value_text(v)))
                .collect::<Vec<_>>()
                .join(",");
            csv.push_str(&line);
            csv.push('\n');
            rows_exported += 1;
        }
        if (page.len() as i64) < EXPORT_PAGE_SIZE {
            break;
        }
        offset += EXPORT_PAGE_SIZE;
    }

    write_export(out_path.trim(), csv)?;
    Ok(json!({
        "ok": true,
        "table": table,
        "rowsExported": rows_exported,
        "pages": pages,
        "path": out_path.trim()
    }))
}

fn export_table_json(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let table = validate_table(get_required_str(params, "table")?.trim())?;
    let out_path = get_required_str(params, "outPath")?;
    if out_path.trim().is_empty() {
        return Err(HandlerErr::bad_params("missing outPath"));
    }

    let columns = table_columns(conn, table)?;
    let mut records: Vec<serde_json::Value> = Vec::new();
    let mut pages = 0usize;
    let mut offset = 0i64;
    loop {
        let page = read_page(conn, table, &columns, offset)?;
        if page.is_empty() {
            break;
        }
        pages += 1;
        for row in &page {
            let mut obj = serde_json::Map::new();
            for (col, value) in columns.iter().zip(row.iter()) {
                obj.insert(col.clone(), sql_value_json(value));
            }
            records.push(serde_json::Value::Object(obj));
        }
        if (page.len() as i64) < EXPORT_PAGE_SIZE {
            break;
        }
        offset += EXPORT_PAGE_SIZE;
    }

    let body = serde_json::to_string_pretty(&records).map_err(|e| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: None,
    })?;
    let rows_exported = records.len();
    write_export(out_path.trim(), body)?;
    Ok(json!({
        "ok": true,
        "table": table,
        "rowsExported": rows_exported,
        "pages": pages,
        "path": out_path.trim()
    }))
}

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256
        }),
    )
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }
    if let Err(e) = std::fs::create_dir_all(&workspace_path) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": workspace_path.to_string_lossy() })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            )
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
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
        "export.tableCsv" => Some(with_conn(state, req, export_table_csv)),
        "export.tableJson" => Some(with_conn(state, req, export_table_json)),
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        _ => None,
    }
}
