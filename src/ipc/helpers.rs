use crate::calc::{CategoryPolicy, DropMode, Snapshot};
use crate::ipc::error::{calc_err, err};
use crate::ipc::types::{AppState, Request};
use crate::snapshot::{self, CourseContext};
use rusqlite::Connection;
use serde_json::Value;

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing params.{}", key), None))
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("params.{} must be a boolean", key),
            None,
        )),
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn parse_mode(req: &Request) -> Result<DropMode, Value> {
    DropMode::parse(req.params.get("mode")).map_err(|e| calc_err(&req.id, e))
}

pub fn parse_policy(req: &Request) -> Result<CategoryPolicy, Value> {
    CategoryPolicy::parse(req.params.get("policy")).map_err(|e| calc_err(&req.id, e))
}

/// Snapshot from `params.snapshot` when given inline, otherwise loaded from the
/// workspace database for `params.courseId`.
pub fn resolve_snapshot(state: &AppState, req: &Request) -> Result<Snapshot, Value> {
    if let Some(raw) = req.params.get("snapshot").filter(|v| !v.is_null()) {
        return serde_json::from_value::<Snapshot>(raw.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("invalid params.snapshot: {}", e),
                None,
            )
        });
    }
    let conn = db_conn(state, req)?;
    let course_id = required_str(req, "courseId")?;
    snapshot::load_course_snapshot(&CourseContext {
        conn,
        course_id: &course_id,
    })
    .map_err(|e| calc_err(&req.id, e))
}
