use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Requests,
    Weekly,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "requests" => Some(Self::Requests),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Requests => "setup.requests",
            Self::Weekly => "setup.weekly",
        }
    }

    fn defaults(self) -> Map<String, Value> {
        let v = match self {
            Self::Requests => json!({
                "deadlineHours": 24
            }),
            Self::Weekly => json!({
                "forwardWeeks": 2,
                "showDraftByDefault": false
            }),
        };
        v.as_object().cloned().unwrap_or_default()
    }

    fn accepts(self, field: &str, value: &Value) -> bool {
        match (self, field) {
            (Self::Requests, "deadlineHours") => {
                value.as_i64().map(|v| v >= 0).unwrap_or(false)
            }
            (Self::Weekly, "forwardWeeks") => value.as_i64().map(|v| v >= 0).unwrap_or(false),
            (Self::Weekly, "showDraftByDefault") => value.is_boolean(),
            _ => false,
        }
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(&req.id, "bad_params", "section must be requests or weekly", None);
    };

    let mut merged = section.defaults();
    match db::settings_get_json(conn, section.key()) {
        Ok(Some(saved)) => {
            if let Some(obj) = saved.as_object() {
                for (k, v) in obj {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    ok(&req.id, json!({ "section": Value::Object(merged) }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section) = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .and_then(SetupSection::parse)
    else {
        return err(&req.id, "bad_params", "section must be requests or weekly", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let mut current = section.defaults();
    if let Ok(Some(saved)) = db::settings_get_json(conn, section.key()) {
        if let Some(obj) = saved.as_object() {
            for (k, v) in obj {
                current.insert(k.clone(), v.clone());
            }
        }
    }
    for (field, value) in patch {
        if !section.accepts(field, value) {
            return err(
                &req.id,
                "bad_params",
                format!("invalid field or value: {}", field),
                None,
            );
        }
        current.insert(field.clone(), value.clone());
    }

    if let Err(e) = db::settings_set_json(conn, section.key(), &Value::Object(current.clone())) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "section": Value::Object(current) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
