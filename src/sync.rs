//! Applies one course's worth of data pulled from the external classroom
//! service. Items are decoded one at a time so a malformed record becomes an
//! issue in the summary instead of failing the whole course.

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

pub const WEIGHTED_CATEGORIES: &str = "WEIGHTED_CATEGORIES";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePayload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradebookPayload {
    #[serde(default)]
    calculation_type: Option<String>,
    #[serde(default)]
    grade_categories: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradeCategoryPayload {
    id: String,
    name: String,
    #[serde(default)]
    weight: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentPayload {
    user_id: String,
    full_name: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseWorkPayload {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    max_points: Option<f64>,
    #[serde(default)]
    grade_category_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionPayload {
    course_work_id: String,
    user_id: String,
    #[serde(default)]
    assigned_grade: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    pub section: String,
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub course_id: String,
    pub categories_synced: usize,
    pub categories_skipped: usize,
    pub students_synced: usize,
    pub students_deactivated: usize,
    pub assignments_synced: usize,
    pub scores_synced: usize,
    pub submissions_ungraded: usize,
    pub issues: Vec<SyncIssue>,
}

impl SyncSummary {
    fn issue(&mut self, section: &str, index: usize, id: Option<&str>, message: impl Into<String>) {
        self.issues.push(SyncIssue {
            section: section.to_string(),
            index,
            id: id.map(|s| s.to_string()),
            message: message.into(),
        });
    }
}

/// Convert an upstream category weight to a percentage.
///
/// Upstream reports weights either as percentages or in parts-per-million of
/// 100% (e.g. 300000 for 30%). Values above 1000 are taken as the latter.
/// Returns `None` when the category must be skipped.
pub fn category_weight_percent(raw: Option<f64>) -> Option<f64> {
    let raw = raw?;
    if !raw.is_finite() {
        return None;
    }
    let pct = if raw > 1000.0 { raw / 10000.0 } else { raw };
    if !(0.0..=100.0).contains(&pct) {
        return None;
    }
    Some(crate::calc::round_2(pct))
}

fn decode_item<T: DeserializeOwned>(
    summary: &mut SyncSummary,
    section: &str,
    index: usize,
    raw: &Value,
) -> Option<T> {
    match serde_json::from_value::<T>(raw.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            let id = raw
                .get("id")
                .or_else(|| raw.get("userId"))
                .and_then(|v| v.as_str());
            summary.issue(section, index, id, e.to_string());
            None
        }
    }
}

fn array_of<'a>(payload: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    payload.get(key).and_then(|v| v.as_array())
}

/// Upsert the course and everything under it in one transaction.
///
/// `payload` carries the optional `gradebook`, `students`, `courseWork` and
/// `submissions` sections. Absent sections leave stored rows untouched.
pub fn apply_course_sync(
    conn: &Connection,
    course: &CoursePayload,
    payload: &Value,
) -> anyhow::Result<SyncSummary> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .context("failed to open sync transaction")?;

    tx.execute(
        "INSERT INTO courses(id, name, section, room, synced_at) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           section = excluded.section,
           room = excluded.room,
           synced_at = excluded.synced_at",
        (&course.id, &course.name, &course.section, &course.room, &now),
    )
    .context("failed to upsert course")?;

    let mut summary = SyncSummary {
        course_id: course.id.clone(),
        ..SyncSummary::default()
    };

    if let Some(raw) = payload.get("gradebook").filter(|v| !v.is_null()) {
        sync_categories(&tx, &course.id, raw, &now, &mut summary)?;
    }
    if let Some(items) = array_of(payload, "students") {
        sync_students(&tx, &course.id, items, &now, &mut summary)?;
    }
    let mut max_by_work: HashMap<String, f64> = HashMap::new();
    if let Some(items) = array_of(payload, "courseWork") {
        sync_course_work(&tx, &course.id, items, &now, &mut summary, &mut max_by_work)?;
    }
    if let Some(items) = array_of(payload, "submissions") {
        sync_submissions(&tx, &course.id, items, &now, &mut summary, &max_by_work)?;
    }

    tx.commit().context("failed to commit sync")?;

    tracing::info!(
        course_id = %course.id,
        categories = summary.categories_synced,
        students = summary.students_synced,
        assignments = summary.assignments_synced,
        scores = summary.scores_synced,
        issues = summary.issues.len(),
        "course synced"
    );
    Ok(summary)
}

fn sync_categories(
    conn: &Connection,
    course_id: &str,
    raw: &Value,
    now: &str,
    summary: &mut SyncSummary,
) -> anyhow::Result<()> {
    let Some(gradebook) = decode_item::<GradebookPayload>(summary, "gradebook", 0, raw) else {
        return Ok(());
    };
    if !matches!(gradebook.calculation_type.as_deref(), None | Some(WEIGHTED_CATEGORIES)) {
        summary.categories_skipped += gradebook.grade_categories.len();
        tracing::debug!(
            course_id,
            calculation_type = ?gradebook.calculation_type,
            "gradebook is not weighted by category; categories not imported"
        );
        return Ok(());
    }

    let mut stmt = conn.prepare(
        "INSERT INTO categories(id, course_id, source_category_id, name, weight, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_id, source_category_id) DO UPDATE SET
           name = excluded.name,
           weight = excluded.weight,
           updated_at = excluded.updated_at",
    )?;

    for (index, item) in gradebook.grade_categories.iter().enumerate() {
        let Some(cat) = decode_item::<GradeCategoryPayload>(summary, "gradeCategories", index, item)
        else {
            continue;
        };
        let Some(weight) = category_weight_percent(cat.weight) else {
            summary.categories_skipped += 1;
            continue;
        };
        let new_id = uuid::Uuid::new_v4().to_string();
        match stmt.execute((&new_id, course_id, &cat.id, &cat.name, weight, now)) {
            Ok(_) => summary.categories_synced += 1,
            Err(e) => summary.issue("gradeCategories", index, Some(cat.id.as_str()), e.to_string()),
        }
    }
    Ok(())
}

fn sync_students(
    conn: &Connection,
    course_id: &str,
    items: &[Value],
    now: &str,
    summary: &mut SyncSummary,
) -> anyhow::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO students(course_id, id, full_name, email, active, updated_at)
         VALUES(?, ?, ?, ?, 1, ?)
         ON CONFLICT(course_id, id) DO UPDATE SET
           full_name = excluded.full_name,
           email = excluded.email,
           active = 1,
           updated_at = excluded.updated_at",
    )?;

    let mut seen: HashSet<String> = HashSet::new();
    for (index, item) in items.iter().enumerate() {
        // Listed ids stay enrolled even when their record cannot be applied.
        if let Some(user_id) = item.get("userId").and_then(Value::as_str) {
            seen.insert(user_id.to_string());
        }
        let Some(st) = decode_item::<StudentPayload>(summary, "students", index, item) else {
            continue;
        };
        match stmt.execute((course_id, &st.user_id, &st.full_name, &st.email, now)) {
            Ok(_) => {
                summary.students_synced += 1;
                seen.insert(st.user_id);
            }
            Err(e) => {
                summary.issue("students", index, Some(st.user_id.as_str()), e.to_string());
                seen.insert(st.user_id);
            }
        }
    }

    // Students no longer on the roster keep their scores but leave the tables.
    let mut active_stmt =
        conn.prepare("SELECT id FROM students WHERE course_id = ? AND active = 1")?;
    let active_ids = active_stmt
        .query_map([course_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut deactivate = conn.prepare(
        "UPDATE students SET active = 0, updated_at = ? WHERE course_id = ? AND id = ?",
    )?;
    for id in active_ids.iter().filter(|id| !seen.contains(*id)) {
        deactivate.execute((now, course_id, id))?;
        summary.students_deactivated += 1;
    }
    Ok(())
}

fn sync_course_work(
    conn: &Connection,
    course_id: &str,
    items: &[Value],
    now: &str,
    summary: &mut SyncSummary,
    max_by_work: &mut HashMap<String, f64>,
) -> anyhow::Result<()> {
    // An already established category mapping survives a sync without one.
    let mut stmt = conn.prepare(
        "INSERT INTO assignments(course_id, id, title, description, max_points, category_id, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5,
                (SELECT id FROM categories WHERE course_id = ?1 AND source_category_id = ?6),
                ?7)
         ON CONFLICT(course_id, id) DO UPDATE SET
           title = excluded.title,
           description = excluded.description,
           max_points = excluded.max_points,
           category_id = COALESCE(excluded.category_id, assignments.category_id),
           updated_at = excluded.updated_at",
    )?;

    for (index, item) in items.iter().enumerate() {
        let Some(work) = decode_item::<CourseWorkPayload>(summary, "courseWork", index, item) else {
            continue;
        };
        let max_points = work.max_points.filter(|m| m.is_finite()).unwrap_or(0.0);
        match stmt.execute((
            course_id,
            &work.id,
            &work.title,
            &work.description,
            max_points,
            &work.grade_category_id,
            now,
        )) {
            Ok(_) => {
                summary.assignments_synced += 1;
                max_by_work.insert(work.id, max_points);
            }
            Err(e) => summary.issue("courseWork", index, Some(work.id.as_str()), e.to_string()),
        }
    }
    Ok(())
}

fn sync_submissions(
    conn: &Connection,
    course_id: &str,
    items: &[Value],
    now: &str,
    summary: &mut SyncSummary,
    max_by_work: &HashMap<String, f64>,
) -> anyhow::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO scores(course_id, student_id, assignment_id, earned, max_points, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_id, student_id, assignment_id) DO UPDATE SET
           earned = excluded.earned,
           max_points = excluded.max_points,
           updated_at = excluded.updated_at",
    )?;
    let mut stored_max = conn.prepare(
        "SELECT max_points FROM assignments WHERE course_id = ? AND id = ?",
    )?;

    for (index, item) in items.iter().enumerate() {
        let Some(sub) = decode_item::<SubmissionPayload>(summary, "submissions", index, item) else {
            continue;
        };
        let Some(earned) = sub.assigned_grade else {
            summary.submissions_ungraded += 1;
            continue;
        };
        if !earned.is_finite() {
            summary.issue("submissions", index, Some(sub.course_work_id.as_str()), "assignedGrade is not finite");
            continue;
        }
        let max_points = match max_by_work.get(&sub.course_work_id) {
            Some(m) => *m,
            None => match stored_max
                .query_row((course_id, &sub.course_work_id), |r| r.get::<_, f64>(0))
                .optional()?
            {
                Some(m) => m,
                None => {
                    summary.issue(
                        "submissions",
                        index,
                        Some(sub.course_work_id.as_str()),
                        "unknown course work",
                    );
                    continue;
                }
            },
        };
        match stmt.execute((course_id, &sub.user_id, &sub.course_work_id, earned, max_points, now)) {
            Ok(_) => summary.scores_synced += 1,
            Err(e) => summary.issue("submissions", index, Some(sub.course_work_id.as_str()), e.to_string()),
        }
    }
    Ok(())
}
