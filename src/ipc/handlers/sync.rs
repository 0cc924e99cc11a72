use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::sync::{self, CoursePayload};
use serde_json::json;

fn handle_sync_apply_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(course_raw) = req.params.get("course") else {
        return err(&req.id, "bad_params", "missing params.course", None);
    };
    let course: CoursePayload = match serde_json::from_value(course_raw.clone()) {
        Ok(c) => c,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid params.course: {}", e),
                None,
            )
        }
    };

    match sync::apply_course_sync(conn, &course, &req.params) {
        Ok(summary) => {
            for issue in &summary.issues {
                tracing::warn!(
                    course_id = %course.id,
                    section = %issue.section,
                    index = issue.index,
                    id = ?issue.id,
                    message = %issue.message,
                    "sync item skipped"
                );
            }
            ok(&req.id, json!(summary))
        }
        Err(e) => {
            tracing::error!(course_id = %course.id, error = %e, "sync failed");
            err(
                &req.id,
                "db_tx_failed",
                format!("{e:#}"),
                Some(json!({ "courseId": course.id })),
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sync.applyCourse" => Some(handle_sync_apply_course(state, req)),
        _ => None,
    }
}
