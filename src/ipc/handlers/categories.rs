use crate::calc::{self, CategoryRef};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

/// Accepts a JSON number or a numeric string; the result is a percentage in 0..=100.
fn parse_weight(v: Option<&Value>) -> Result<f64, String> {
    let n = match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(n) = n.filter(|n| n.is_finite()) else {
        return Err("weight must be numeric".to_string());
    };
    if !(0.0..=100.0).contains(&n) {
        return Err("weight must be in 0..=100".to_string());
    }
    Ok(calc::round_2(n))
}

fn category_course(conn: &Connection, category_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT course_id FROM categories WHERE id = ?",
        [category_id],
        |r| r.get(0),
    )
    .optional()
}

fn course_exists(conn: &Connection, course_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

fn handle_categories_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let include_manual = match optional_bool(req, "includeManual") {
        Ok(v) => v.unwrap_or(false),
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           k.id,
           k.name,
           k.weight,
           k.source_category_id,
           (SELECT COUNT(*) FROM assignments a WHERE a.category_id = k.id)
         FROM categories k
         WHERE k.course_id = ?1 AND (?2 OR k.source_category_id IS NOT NULL)
         ORDER BY k.name, k.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&course_id, include_manual), |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let weight: f64 = row.get(2)?;
            let source_id: Option<String> = row.get(3)?;
            let assignment_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "weight": weight,
                "sourceCategoryId": source_id,
                "manual": source_id.is_none(),
                "assignmentCount": assignment_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(categories) => ok(&req.id, json!({ "categories": categories })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_categories_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let weight = match parse_weight(req.params.get("weight")) {
        Ok(w) => w,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let category_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO categories(id, course_id, source_category_id, name, weight, updated_at)
         VALUES(?, ?, NULL, ?, ?, ?)",
        (&category_id, &course_id, &name, weight, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "categories" })),
        );
    }

    ok(
        &req.id,
        json!({ "categoryId": category_id, "name": name, "weight": weight }),
    )
}

fn handle_categories_update_weight(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weight = match parse_weight(req.params.get("weight")) {
        Ok(w) => w,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let now = chrono::Utc::now().to_rfc3339();
    match conn.execute(
        "UPDATE categories SET weight = ?, updated_at = ? WHERE id = ?",
        (weight, &now, &category_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "category not found", None),
        Ok(_) => ok(
            &req.id,
            json!({ "categoryId": category_id, "weight": weight }),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_categories_assignments(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, max_points
         FROM assignments
         WHERE category_id = ?
         ORDER BY title, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&category_id], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let max_points: f64 = row.get(2)?;
            Ok(json!({ "id": id, "title": title, "maxPoints": max_points }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_categories_assign_assignments(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_ids) = req.params.get("assignmentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "assignmentIds must be an array", None);
    };
    let mut assignment_ids: Vec<String> = Vec::with_capacity(raw_ids.len());
    for v in raw_ids {
        match v.as_str() {
            Some(s) => assignment_ids.push(s.to_string()),
            None => return err(&req.id, "bad_params", "assignmentIds must be strings", None),
        }
    }

    let course_id = match category_course(conn, &category_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "category not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // The request replaces the category's whole mapping.
    let cleared = match tx.execute(
        "UPDATE assignments SET category_id = NULL WHERE category_id = ?",
        [&category_id],
    ) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    };

    let mut assigned = 0_usize;
    let mut missing: Vec<String> = Vec::new();
    for assignment_id in &assignment_ids {
        match tx.execute(
            "UPDATE assignments SET category_id = ? WHERE course_id = ? AND id = ?",
            (&category_id, &course_id, assignment_id),
        ) {
            Ok(0) => missing.push(assignment_id.clone()),
            Ok(_) => assigned += 1,
            Err(e) => {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "assignmentId": assignment_id })),
                );
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    tracing::info!(category_id = %category_id, cleared, assigned, "category mapping replaced");

    ok(
        &req.id,
        json!({ "assigned": assigned, "cleared": cleared, "missing": missing }),
    )
}

fn handle_categories_unassign_assignment(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match conn.execute(
        "UPDATE assignments SET category_id = NULL WHERE id = ? AND category_id = ?",
        (&assignment_id, &category_id),
    ) {
        Ok(n) => ok(&req.id, json!({ "removed": n > 0 })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_categories_purge_manual(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let unmapped = match tx.execute(
        "UPDATE assignments SET category_id = NULL
         WHERE course_id = ?1
           AND category_id IN (
             SELECT id FROM categories WHERE course_id = ?1 AND source_category_id IS NULL
           )",
        [&course_id],
    ) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    };

    let deleted = match tx.execute(
        "DELETE FROM categories WHERE course_id = ? AND source_category_id IS NULL",
        [&course_id],
    ) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "categories" })),
            );
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    tracing::info!(course_id = %course_id, deleted, unmapped, "manual categories purged");

    ok(&req.id, json!({ "deleted": deleted, "unmapped": unmapped }))
}

fn handle_categories_validate_weights(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut stmt = match conn.prepare(
        "SELECT id, name, weight
         FROM categories
         WHERE course_id = ? AND source_category_id IS NOT NULL
         ORDER BY name, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let categories = match stmt
        .query_map([&course_id], |row| {
            Ok(CategoryRef {
                id: row.get(0)?,
                name: row.get(1)?,
                weight: row.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let validation = calc::validate_weights(&categories);
    ok(
        &req.id,
        json!({
            "totalWeight": validation.total_weight,
            "isValid": validation.is_valid,
            "difference": validation.difference,
            "message": validation.message,
            "categories": categories
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "categories.list" => Some(handle_categories_list(state, req)),
        "categories.create" => Some(handle_categories_create(state, req)),
        "categories.updateWeight" => Some(handle_categories_update_weight(state, req)),
        "categories.assignments" => Some(handle_categories_assignments(state, req)),
        "categories.assignAssignments" => Some(handle_categories_assign_assignments(state, req)),
        "categories.unassignAssignment" => Some(handle_categories_unassign_assignment(state, req)),
        "categories.purgeManual" => Some(handle_categories_purge_manual(state, req)),
        "categories.validateWeights" => Some(handle_categories_validate_weights(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_weight(Some(&json!(25))), Ok(25.0));
        assert_eq!(parse_weight(Some(&json!(" 12.5 "))), Ok(12.5));
        assert!(parse_weight(Some(&json!("abc"))).is_err());
        assert!(parse_weight(Some(&json!(101))).is_err());
        assert!(parse_weight(Some(&json!(-1))).is_err());
        assert!(parse_weight(Some(&json!(true))).is_err());
        assert!(parse_weight(None).is_err());
    }
}
