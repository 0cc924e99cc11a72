use crate::calc::{self, AveragesModel};
use crate::export;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{db_conn, parse_mode, parse_policy, required_str};
use crate::ipc::types::{AppState, Request};
use crate::snapshot::{self, CourseContext};
use serde_json::json;
use std::path::PathBuf;

#[derive(Clone, Copy)]
enum CsvKind {
    Averages,
    Table,
}

fn handle_export_csv(state: &mut AppState, req: &Request, kind: CsvKind) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let mode = match parse_mode(req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    let policy = match parse_policy(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let settings = match super::setup::export_settings(state) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let ctx = CourseContext {
        conn,
        course_id: &course_id,
    };
    let course = match snapshot::load_course_header(&ctx) {
        Ok(c) => c,
        Err(e) => return calc_err(&req.id, e),
    };
    let snap = match snapshot::load_course_snapshot(&ctx) {
        Ok(s) => s,
        Err(e) => return calc_err(&req.id, e),
    };
    let table = match calc::build_table(&snap, mode, policy) {
        Ok(t) => t,
        Err(e) => return calc_err(&req.id, e),
    };
    let status = table.status;

    let written = match kind {
        CsvKind::Averages => {
            let model: AveragesModel = table.into();
            export::export_to_path(&out_path, |w| {
                export::write_averages_csv(w, &course, &model, &settings)
            })
        }
        CsvKind::Table => export::export_to_path(&out_path, |w| {
            export::write_table_csv(w, &course, &table, &settings)
        }),
    };

    match written {
        Ok(rows) => {
            tracing::info!(course_id = %course_id, path = %out_path.display(), rows, "csv exported");
            ok(
                &req.id,
                json!({
                    "path": out_path.to_string_lossy(),
                    "rows": rows,
                    "status": status
                }),
            )
        }
        Err(e) => {
            tracing::error!(path = %out_path.display(), error = %e, "csv export failed");
            err(
                &req.id,
                "export_failed",
                format!("{e:#}"),
                Some(json!({ "path": out_path.to_string_lossy() })),
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.averagesCsv" => Some(handle_export_csv(state, req, CsvKind::Averages)),
        "export.tableCsv" => Some(handle_export_csv(state, req, CsvKind::Table)),
        _ => None,
    }
}
