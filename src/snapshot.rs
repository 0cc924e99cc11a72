use crate::calc::{AssignmentRef, CalcError, CategoryRef, ScoreRef, Snapshot, StudentRef};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Clone, Copy)]
pub struct CourseContext<'a> {
    pub conn: &'a Connection,
    pub course_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseHeader {
    pub id: String,
    pub name: String,
    pub section: Option<String>,
    pub room: Option<String>,
    pub synced_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStats {
    pub total_students: i64,
    pub total_assignments: i64,
    pub total_categories: i64,
    pub manual_categories: i64,
    pub total_scores: i64,
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

pub fn load_course_header(ctx: &CourseContext<'_>) -> Result<CourseHeader, CalcError> {
    ctx.conn
        .query_row(
            "SELECT id, name, section, room, synced_at FROM courses WHERE id = ?",
            [ctx.course_id],
            |r| {
                Ok(CourseHeader {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    section: r.get(2)?,
                    room: r.get(3)?,
                    synced_at: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| {
            CalcError::new("not_found", "course not found")
                .with_details(serde_json::json!({ "courseId": ctx.course_id }))
        })
}

fn query_rows<T, P, F>(conn: &Connection, sql: &str, params: P, f: F) -> Result<Vec<T>, CalcError>
where
    P: rusqlite::Params,
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params, f)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(rows)
}

/// Everything the engine needs for one course, read in four queries.
///
/// Only active students and only categories that came from the external grading
/// configuration are included. Students are ordered by name, categories by name,
/// assignments by title; ids break ties.
pub fn load_course_snapshot(ctx: &CourseContext<'_>) -> Result<Snapshot, CalcError> {
    load_course_header(ctx)?;
    let conn = ctx.conn;

    let students = query_rows(
        conn,
        "SELECT id, full_name, COALESCE(email, '')
         FROM students
         WHERE course_id = ? AND active = 1
         ORDER BY full_name, id",
        [ctx.course_id],
        |r| {
            Ok(StudentRef {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
            })
        },
    )?;

    let categories = query_rows(
        conn,
        "SELECT id, name, weight
         FROM categories
         WHERE course_id = ? AND source_category_id IS NOT NULL
         ORDER BY name, id",
        [ctx.course_id],
        |r| {
            Ok(CategoryRef {
                id: r.get(0)?,
                name: r.get(1)?,
                weight: r.get(2)?,
            })
        },
    )?;

    let assignments = query_rows(
        conn,
        "SELECT id, title, max_points, category_id
         FROM assignments
         WHERE course_id = ?
         ORDER BY title, id",
        [ctx.course_id],
        |r| {
            Ok(AssignmentRef {
                id: r.get(0)?,
                title: r.get(1)?,
                max_points: r.get(2)?,
                category_id: r.get(3)?,
            })
        },
    )?;

    let scores = query_rows(
        conn,
        "SELECT sc.student_id, sc.assignment_id, sc.earned, sc.max_points
         FROM scores sc
         JOIN students st ON st.course_id = sc.course_id AND st.id = sc.student_id
         WHERE sc.course_id = ? AND st.active = 1",
        [ctx.course_id],
        |r| {
            Ok(ScoreRef {
                student_id: r.get(0)?,
                assignment_id: r.get(1)?,
                earned: r.get(2)?,
                max_points: r.get(3)?,
            })
        },
    )?;

    Ok(Snapshot {
        students,
        categories,
        assignments,
        scores,
    })
}

pub fn load_course_stats(ctx: &CourseContext<'_>) -> Result<CourseStats, CalcError> {
    load_course_header(ctx)?;
    let count = |sql: &str| -> Result<i64, CalcError> {
        ctx.conn
            .query_row(sql, [ctx.course_id], |r| r.get(0))
            .map_err(db_err)
    };
    Ok(CourseStats {
        total_students: count(
            "SELECT COUNT(*) FROM students WHERE course_id = ? AND active = 1",
        )?,
        total_assignments: count("SELECT COUNT(*) FROM assignments WHERE course_id = ?")?,
        total_categories: count(
            "SELECT COUNT(*) FROM categories WHERE course_id = ? AND source_category_id IS NOT NULL",
        )?,
        manual_categories: count(
            "SELECT COUNT(*) FROM categories WHERE course_id = ? AND source_category_id IS NULL",
        )?,
        total_scores: count(
            "SELECT COUNT(*)
             FROM scores sc
             JOIN students st ON st.course_id = sc.course_id AND st.id = sc.student_id
             WHERE sc.course_id = ? AND st.active = 1",
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO courses(id, name, section) VALUES('c1', 'Algebra', '5B');
             INSERT INTO students(course_id, id, full_name, email, active) VALUES
                ('c1', 's2', 'Zapata, Eva', 'eva@example.edu', 1),
                ('c1', 's1', 'Acosta, Luis', NULL, 1),
                ('c1', 's3', 'Mora, Iris', 'iris@example.edu', 0);
             INSERT INTO categories(id, course_id, source_category_id, name, weight) VALUES
                ('k2', 'c1', 'g2', 'Quizzes', 40),
                ('k1', 'c1', 'g1', 'Exams', 60),
                ('km', 'c1', NULL, 'Manual bucket', 10);
             INSERT INTO assignments(course_id, id, title, max_points, category_id) VALUES
                ('c1', 'w2', 'Quiz 2', 10, 'k2'),
                ('c1', 'w1', 'Quiz 1', 10, 'k2'),
                ('c1', 'w3', 'Midterm', 50, 'k1');
             INSERT INTO scores(course_id, student_id, assignment_id, earned, max_points) VALUES
                ('c1', 's1', 'w1', 8, 10),
                ('c1', 's3', 'w1', 2, 10);",
        )
        .expect("seed");
        conn
    }

    #[test]
    fn snapshot_orders_and_filters_rows() {
        let conn = seeded();
        let snap = load_course_snapshot(&CourseContext {
            conn: &conn,
            course_id: "c1",
        })
        .expect("snapshot");

        let names: Vec<&str> = snap.students.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Acosta, Luis", "Zapata, Eva"]);
        assert_eq!(snap.students[0].email, "");

        let cats: Vec<&str> = snap.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(cats, vec!["Exams", "Quizzes"]);

        let titles: Vec<&str> = snap.assignments.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Midterm", "Quiz 1", "Quiz 2"]);

        // Inactive student's score is not part of the snapshot.
        assert_eq!(snap.scores.len(), 1);
        assert_eq!(snap.scores[0].student_id, "s1");
    }

    #[test]
    fn unknown_course_is_not_found() {
        let conn = seeded();
        let e = load_course_snapshot(&CourseContext {
            conn: &conn,
            course_id: "nope",
        })
        .expect_err("missing course");
        assert_eq!(e.code, "not_found");
    }

    #[test]
    fn stats_split_external_and_manual_categories() {
        let conn = seeded();
        let stats = load_course_stats(&CourseContext {
            conn: &conn,
            course_id: "c1",
        })
        .expect("stats");
        assert_eq!(stats.total_students, 2);
        assert_eq!(stats.total_assignments, 3);
        assert_eq!(stats.total_categories, 2);
        assert_eq!(stats.manual_categories, 1);
        // s3 is inactive, so its score is not counted.
        assert_eq!(stats.total_scores, 1);
    }
}
