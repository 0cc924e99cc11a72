use crate::calc;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{parse_mode, parse_policy, resolve_snapshot};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_calc_table(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mode = match parse_mode(req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    let policy = match parse_policy(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let snapshot = match resolve_snapshot(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match calc::build_table(&snapshot, mode, policy) {
        Ok(table) => ok(&req.id, json!(table)),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_calc_averages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mode = match parse_mode(req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    let policy = match parse_policy(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let snapshot = match resolve_snapshot(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match calc::compute_averages(&snapshot, mode, policy) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_calc_grade_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mode = match parse_mode(req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    let policy = match parse_policy(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let thresholds = match super::setup::grade_thresholds(state) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let snapshot = match resolve_snapshot(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let model = match calc::compute_averages(&snapshot, mode, policy) {
        Ok(m) => m,
        Err(e) => return calc_err(&req.id, e),
    };

    let finals: Vec<f64> = model.students.iter().map(|s| s.final_average).collect();
    let stats = calc::grade_stats(&finals, &thresholds);
    ok(
        &req.id,
        json!({
            "status": model.status,
            "thresholds": thresholds,
            "stats": stats
        }),
    )
}

fn handle_calc_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mode = match parse_mode(req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    let policy = match parse_policy(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let thresholds = match super::setup::grade_thresholds(state) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let snapshot = match resolve_snapshot(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let table = match calc::build_table(&snapshot, mode, policy) {
        Ok(t) => t,
        Err(e) => return calc_err(&req.id, e),
    };

    let rows = calc::detail_rows(&snapshot, &table, &thresholds);
    ok(
        &req.id,
        json!({
            "status": table.status,
            "rows": rows
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.table" => Some(handle_calc_table(state, req)),
        "calc.averages" => Some(handle_calc_averages(state, req)),
        "calc.gradeStats" => Some(handle_calc_grade_stats(state, req)),
        "calc.detail" => Some(handle_calc_detail(state, req)),
        _ => None,
    }
}
