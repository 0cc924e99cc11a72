use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, required_str};
use crate::ipc::types::{AppState, Request};
use crate::snapshot::{self, CourseContext};
use serde_json::json;

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    // Correlated subqueries keep each count independent of the others.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.section,
           c.room,
           c.synced_at,
           (SELECT COUNT(*) FROM students s WHERE s.course_id = c.id AND s.active = 1),
           (SELECT COUNT(*) FROM categories k
              WHERE k.course_id = c.id AND k.source_category_id IS NOT NULL),
           (SELECT COUNT(*) FROM assignments a WHERE a.course_id = c.id)
         FROM courses c
         ORDER BY c.name, c.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let section: Option<String> = row.get(2)?;
            let room: Option<String> = row.get(3)?;
            let synced_at: Option<String> = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            let category_count: i64 = row.get(6)?;
            let assignment_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "name": name,
                "section": section,
                "room": room,
                "syncedAt": synced_at,
                "studentCount": student_count,
                "categoryCount": category_count,
                "assignmentCount": assignment_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match snapshot::load_course_stats(&CourseContext {
        conn,
        course_id: &course_id,
    }) {
        Ok(stats) => ok(&req.id, json!(stats)),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let include_inactive = match optional_bool(req, "includeInactive") {
        Ok(v) => v.unwrap_or(false),
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, full_name, email, active
         FROM students
         WHERE course_id = ?1 AND (?2 OR active = 1)
         ORDER BY full_name, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&course_id, include_inactive), |row| {
            let id: String = row.get(0)?;
            let full_name: String = row.get(1)?;
            let email: Option<String> = row.get(2)?;
            let active: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "fullName": full_name,
                "email": email,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT a.id, a.title, a.description, a.max_points, a.category_id, k.name
         FROM assignments a
         LEFT JOIN categories k ON k.id = a.category_id
         WHERE a.course_id = ?
         ORDER BY a.title, a.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let max_points: f64 = row.get(3)?;
            let category_id: Option<String> = row.get(4)?;
            let category_name: Option<String> = row.get(5)?;
            Ok(json!({
                "id": id,
                "title": title,
                "description": description,
                "maxPoints": max_points,
                "categoryId": category_id,
                "categoryName": category_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.stats" => Some(handle_courses_stats(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        _ => None,
    }
}
