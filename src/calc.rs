use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Top of the grading scale every raw score is rescaled to.
pub const SCALE_MAX: f64 = 20.0;
/// Allowed deviation (in percentage points) of a course's weight total from 100.
pub const WEIGHT_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Lowest-grade-drop strategy. The two drop variants are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropMode {
    #[default]
    None,
    /// Drop the single lowest grade inside every category holding more than one grade.
    DropPerCategory,
    /// Drop one assignment per student, the course-wide minimum among categories
    /// with at least two assignments.
    DropGlobal,
}

impl DropMode {
    pub fn parse(raw: Option<&serde_json::Value>) -> Result<Self, CalcError> {
        let Some(raw) = raw else {
            return Ok(Self::None);
        };
        if raw.is_null() {
            return Ok(Self::None);
        }
        let Some(s) = raw.as_str() else {
            return Err(CalcError::new("bad_params", "mode must be a string")
                .with_details(serde_json::json!({ "mode": raw })));
        };
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "drop-per-category" => Ok(Self::DropPerCategory),
            "drop-global" => Ok(Self::DropGlobal),
            other => Err(CalcError::new(
                "bad_params",
                "mode must be one of: none, drop-per-category, drop-global",
            )
            .with_details(serde_json::json!({ "mode": other }))),
        }
    }
}

/// How a category treats assignments the student has no recorded score for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CategoryPolicy {
    /// Missing scores count as 0 out of the assignment's max. A category where the
    /// student has no recorded score at all averages 0 with count 0.
    #[default]
    ZeroFilled,
    /// Historical behavior: only recorded scores enter the mean and the per-category drop.
    RecordedOnly,
}

impl CategoryPolicy {
    pub fn parse(raw: Option<&serde_json::Value>) -> Result<Self, CalcError> {
        let Some(raw) = raw else {
            return Ok(Self::ZeroFilled);
        };
        if raw.is_null() {
            return Ok(Self::ZeroFilled);
        }
        match raw.as_str().map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("") | Some("zero-filled") => Ok(Self::ZeroFilled),
            Some("recorded-only") => Ok(Self::RecordedOnly),
            _ => Err(CalcError::new(
                "bad_params",
                "policy must be one of: zero-filled, recorded-only",
            )
            .with_details(serde_json::json!({ "policy": raw }))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRef {
    pub id: String,
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRef {
    pub id: String,
    pub title: String,
    pub max_points: f64,
    #[serde(default)]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRef {
    pub student_id: String,
    pub assignment_id: String,
    pub earned: f64,
    pub max_points: f64,
}

/// Immutable input of one aggregation call. Categories are expected to be
/// pre-filtered to the ones coming from the external grading configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub students: Vec<StudentRef>,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
    #[serde(default)]
    pub assignments: Vec<AssignmentRef>,
    #[serde(default)]
    pub scores: Vec<ScoreRef>,
}

/// Rescale `earned / max` onto 0..=20. No clamping and no rounding.
pub fn normalize(earned: f64, max: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    (earned / max) * SCALE_MAX
}

/// Half-away-from-zero rounding to 2 decimals.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// One assignment's normalized grade for one student.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeCell<'a> {
    pub assignment_id: &'a str,
    pub grade: f64,
    pub recorded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryAverage {
    pub average: f64,
    pub count: usize,
}

/// Mean of the category's grades, rounded to 2 decimals. `excluded` names an
/// assignment left out of both the sum and the count.
pub fn average_category(
    cells: &[GradeCell<'_>],
    policy: CategoryPolicy,
    excluded: Option<&str>,
) -> CategoryAverage {
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    // Judged before the drop: dropping the only recorded grade still leaves n-1 cells.
    let any_recorded = cells.iter().any(|c| c.recorded);

    for cell in cells {
        if excluded == Some(cell.assignment_id) {
            continue;
        }
        if policy == CategoryPolicy::RecordedOnly && !cell.recorded {
            continue;
        }
        sum += cell.grade;
        count += 1;
    }

    if count == 0 || !any_recorded {
        return CategoryAverage {
            average: 0.0,
            count: 0,
        };
    }
    CategoryAverage {
        average: round_2(sum / count as f64),
        count,
    }
}

/// `sum(round(avg, 2) * weight / 100)`, rounded to 2 decimals. Weights are not
/// renormalized when they do not total 100.
pub fn final_average<I>(parts: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let total: f64 = parts
        .into_iter()
        .map(|(average, weight)| round_2(average) * weight / 100.0)
        .sum();
    round_2(total)
}

/// Lowest grade of a category, if it holds more than one candidate.
/// Ties resolve to the first cell in enumeration order.
pub fn lowest_in_category<'a>(cells: &[GradeCell<'a>], policy: CategoryPolicy) -> Option<&'a str> {
    let candidates: Vec<&GradeCell<'a>> = cells
        .iter()
        .filter(|c| policy == CategoryPolicy::ZeroFilled || c.recorded)
        .collect();
    if candidates.len() < 2 {
        return None;
    }
    first_minimum(candidates.into_iter())
}

/// Course-wide minimum across categories holding at least two assignments.
/// `per_category` holds one entry per mapped assignment, missing scores as 0.
pub fn select_global_drop<'a>(per_category: &[Vec<GradeCell<'a>>]) -> Option<&'a str> {
    first_minimum(
        per_category
            .iter()
            .filter(|cells| cells.len() >= 2)
            .flat_map(|cells| cells.iter()),
    )
}

fn first_minimum<'a, 'b, I>(cells: I) -> Option<&'a str>
where
    'a: 'b,
    I: Iterator<Item = &'b GradeCell<'a>>,
{
    let mut best: Option<&GradeCell<'a>> = None;
    for cell in cells {
        if best.map(|b| cell.grade < b.grade).unwrap_or(true) {
            best = Some(cell);
        }
    }
    best.map(|c| c.assignment_id)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeightValidation {
    pub total_weight: f64,
    pub is_valid: bool,
    /// `100 - totalWeight`; negative when the weights overshoot.
    pub difference: f64,
    pub message: String,
}

pub fn validate_weights(categories: &[CategoryRef]) -> WeightValidation {
    let total = round_2(categories.iter().map(|c| c.weight).sum::<f64>());
    let difference = round_2(100.0 - total);
    let is_valid = difference.abs() <= WEIGHT_TOLERANCE;
    let message = if is_valid {
        "category weights are correctly distributed".to_string()
    } else {
        format!("category weights add up to {}%; they must add up to 100%", total)
    };
    WeightValidation {
        total_weight: total,
        is_valid,
        difference,
        message,
    }
}

struct ScoreIndex<'a> {
    by_student: HashMap<&'a str, HashMap<&'a str, &'a ScoreRef>>,
}

impl<'a> ScoreIndex<'a> {
    fn new(scores: &'a [ScoreRef]) -> Self {
        let mut by_student: HashMap<&'a str, HashMap<&'a str, &'a ScoreRef>> = HashMap::new();
        for s in scores {
            by_student
                .entry(s.student_id.as_str())
                .or_default()
                .insert(s.assignment_id.as_str(), s);
        }
        Self { by_student }
    }

    fn get(&self, student_id: &str, assignment_id: &str) -> Option<&'a ScoreRef> {
        self.by_student
            .get(student_id)
            .and_then(|m| m.get(assignment_id))
            .copied()
    }
}

fn grade_cell<'a>(index: &ScoreIndex<'a>, student_id: &str, a: &'a AssignmentRef) -> GradeCell<'a> {
    match index.get(student_id, &a.id) {
        Some(score) => GradeCell {
            assignment_id: a.id.as_str(),
            grade: normalize(score.earned, score.max_points),
            recorded: true,
        },
        None => GradeCell {
            assignment_id: a.id.as_str(),
            grade: normalize(0.0, a.max_points),
            recorded: false,
        },
    }
}

fn validate_snapshot(snapshot: &Snapshot) -> Result<(), CalcError> {
    for c in &snapshot.categories {
        if !c.weight.is_finite() || c.weight < 0.0 {
            return Err(CalcError::new(
                "bad_params",
                "category weight must be a non-negative number",
            )
            .with_details(serde_json::json!({ "categoryId": c.id })));
        }
    }
    for a in &snapshot.assignments {
        if !a.max_points.is_finite() {
            return Err(CalcError::new("bad_params", "assignment maxPoints must be finite")
                .with_details(serde_json::json!({ "assignmentId": a.id })));
        }
    }
    for s in &snapshot.scores {
        if !s.earned.is_finite() || !s.max_points.is_finite() {
            return Err(CalcError::new("bad_params", "scores must be finite numbers")
                .with_details(serde_json::json!({
                    "studentId": s.student_id,
                    "assignmentId": s.assignment_id
                })));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Ok,
    NoCategories,
    NoStudents,
    NoScores,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentColumn {
    pub id: String,
    pub title: String,
    pub max_points: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryColumn {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub assignments: Vec<AssignmentColumn>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(rename = "perAssignmentGrade")]
    pub per_assignment: BTreeMap<String, f64>,
    #[serde(rename = "perCategoryAverage")]
    pub per_category: BTreeMap<String, f64>,
    pub category_counts: BTreeMap<String, usize>,
    pub final_average: f64,
    pub omitted_assignment_id: Option<String>,
    pub dropped_assignment_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableModel {
    pub status: TableStatus,
    pub mode: DropMode,
    pub policy: CategoryPolicy,
    pub categories: Vec<CategoryColumn>,
    pub students: Vec<StudentRow>,
    pub weights: WeightValidation,
}

struct Column<'a> {
    category: &'a CategoryRef,
    assignments: Vec<&'a AssignmentRef>,
}

fn columns(snapshot: &Snapshot) -> Vec<Column<'_>> {
    let mut by_category: HashMap<&str, Vec<&AssignmentRef>> = HashMap::new();
    for a in &snapshot.assignments {
        if let Some(cid) = a.category_id.as_deref() {
            by_category.entry(cid).or_default().push(a);
        }
    }
    snapshot
        .categories
        .iter()
        .map(|c| Column {
            category: c,
            assignments: by_category.remove(c.id.as_str()).unwrap_or_default(),
        })
        .collect()
}

fn tabulate_student(
    student: &StudentRef,
    columns: &[Column<'_>],
    index: &ScoreIndex<'_>,
    mode: DropMode,
    policy: CategoryPolicy,
) -> StudentRow {
    let cells: Vec<Vec<GradeCell<'_>>> = columns
        .iter()
        .map(|col| {
            col.assignments
                .iter()
                .map(|a| grade_cell(index, &student.id, *a))
                .collect()
        })
        .collect();

    let omitted = if mode == DropMode::DropGlobal {
        select_global_drop(&cells)
    } else {
        None
    };

    let mut per_assignment = BTreeMap::new();
    let mut per_category = BTreeMap::new();
    let mut category_counts = BTreeMap::new();
    let mut dropped = Vec::new();
    let mut parts = Vec::with_capacity(columns.len());

    for (col, cat_cells) in columns.iter().zip(&cells) {
        for cell in cat_cells {
            per_assignment.insert(cell.assignment_id.to_string(), round_2(cell.grade));
        }
        let excluded = match mode {
            DropMode::None => None,
            DropMode::DropGlobal => omitted,
            DropMode::DropPerCategory => {
                let lowest = lowest_in_category(cat_cells, policy);
                if let Some(id) = lowest {
                    dropped.push(id.to_string());
                }
                lowest
            }
        };
        let avg = average_category(cat_cells, policy, excluded);
        per_category.insert(col.category.id.clone(), avg.average);
        category_counts.insert(col.category.id.clone(), avg.count);
        parts.push((avg.average, col.category.weight));
    }

    StudentRow {
        id: student.id.clone(),
        name: student.name.clone(),
        email: student.email.clone(),
        per_assignment,
        per_category,
        category_counts,
        final_average: final_average(parts),
        omitted_assignment_id: omitted.map(|s| s.to_string()),
        dropped_assignment_ids: dropped,
    }
}

/// Per-student, per-assignment, per-category and final table for one course.
/// Runs in a single pass over a pre-indexed score lookup.
pub fn build_table(
    snapshot: &Snapshot,
    mode: DropMode,
    policy: CategoryPolicy,
) -> Result<TableModel, CalcError> {
    validate_snapshot(snapshot)?;
    let weights = validate_weights(&snapshot.categories);

    if snapshot.categories.is_empty() {
        return Ok(TableModel {
            status: TableStatus::NoCategories,
            mode,
            policy,
            categories: Vec::new(),
            students: Vec::new(),
            weights,
        });
    }

    let columns = columns(snapshot);
    let categories: Vec<CategoryColumn> = columns
        .iter()
        .map(|col| CategoryColumn {
            id: col.category.id.clone(),
            name: col.category.name.clone(),
            weight: col.category.weight,
            assignments: col
                .assignments
                .iter()
                .map(|a| AssignmentColumn {
                    id: a.id.clone(),
                    title: a.title.clone(),
                    max_points: a.max_points,
                })
                .collect(),
        })
        .collect();

    if snapshot.students.is_empty() {
        return Ok(TableModel {
            status: TableStatus::NoStudents,
            mode,
            policy,
            categories,
            students: Vec::new(),
            weights,
        });
    }

    let index = ScoreIndex::new(&snapshot.scores);
    let students: Vec<StudentRow> = snapshot
        .students
        .iter()
        .map(|s| tabulate_student(s, &columns, &index, mode, policy))
        .collect();

    let status = if snapshot.scores.is_empty() {
        TableStatus::NoScores
    } else {
        TableStatus::Ok
    };

    Ok(TableModel {
        status,
        mode,
        policy,
        categories,
        students,
        weights,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDef {
    pub id: String,
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAverages {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(rename = "perCategoryAverage")]
    pub per_category: BTreeMap<String, f64>,
    pub final_average: f64,
}

/// Lighter result: category and final averages only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AveragesModel {
    pub status: TableStatus,
    pub mode: DropMode,
    pub policy: CategoryPolicy,
    pub categories: Vec<CategoryDef>,
    pub students: Vec<StudentAverages>,
    pub weights: WeightValidation,
}

impl From<TableModel> for AveragesModel {
    fn from(table: TableModel) -> Self {
        Self {
            status: table.status,
            mode: table.mode,
            policy: table.policy,
            categories: table
                .categories
                .into_iter()
                .map(|c| CategoryDef {
                    id: c.id,
                    name: c.name,
                    weight: c.weight,
                })
                .collect(),
            students: table
                .students
                .into_iter()
                .map(|s| StudentAverages {
                    id: s.id,
                    name: s.name,
                    email: s.email,
                    per_category: s.per_category,
                    final_average: s.final_average,
                })
                .collect(),
            weights: table.weights,
        }
    }
}

pub fn compute_averages(
    snapshot: &Snapshot,
    mode: DropMode,
    policy: CategoryPolicy,
) -> Result<AveragesModel, CalcError> {
    Ok(build_table(snapshot, mode, policy)?.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeThresholds {
    #[serde(rename = "passThreshold")]
    pub pass: f64,
    #[serde(rename = "excellenceThreshold")]
    pub excellence: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            pass: 11.0,
            excellence: 17.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeBand {
    Excellent,
    Passed,
    Failed,
    Ungraded,
}

pub fn grade_band(value: f64, thresholds: &GradeThresholds) -> GradeBand {
    if value >= thresholds.excellence {
        GradeBand::Excellent
    } else if value >= thresholds.pass {
        GradeBand::Passed
    } else {
        GradeBand::Failed
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradeStats {
    pub total: usize,
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub passed: usize,
    pub failed: usize,
    pub excellent: usize,
    pub pass_rate: f64,
    pub excellence_rate: f64,
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_2(part as f64 / total as f64 * 100.0)
}

pub fn grade_stats(values: &[f64], thresholds: &GradeThresholds) -> GradeStats {
    if values.is_empty() {
        return GradeStats {
            total: 0,
            average: 0.0,
            minimum: 0.0,
            maximum: 0.0,
            passed: 0,
            failed: 0,
            excellent: 0,
            pass_rate: 0.0,
            excellence_rate: 0.0,
        };
    }
    let total = values.len();
    let sum: f64 = values.iter().sum();
    let minimum = values.iter().copied().fold(f64::INFINITY, f64::min);
    let maximum = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let passed = values.iter().filter(|v| **v >= thresholds.pass).count();
    let excellent = values.iter().filter(|v| **v >= thresholds.excellence).count();

    GradeStats {
        total,
        average: round_2(sum / total as f64),
        minimum,
        maximum,
        passed,
        failed: total - passed,
        excellent,
        pass_rate: percentage(passed, total),
        excellence_rate: percentage(excellent, total),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRow {
    pub student_id: String,
    pub student_name: String,
    pub email: String,
    pub category_id: String,
    pub category_name: String,
    pub weight: f64,
    pub assignment_id: String,
    pub assignment_title: String,
    pub earned: Option<f64>,
    pub max_points: f64,
    pub grade: f64,
    pub band: GradeBand,
    pub omitted: bool,
}

/// Flat student × category × assignment listing of a table.
pub fn detail_rows(
    snapshot: &Snapshot,
    table: &TableModel,
    thresholds: &GradeThresholds,
) -> Vec<DetailRow> {
    let index = ScoreIndex::new(&snapshot.scores);
    let mut rows = Vec::new();

    for student in &table.students {
        for category in &table.categories {
            for a in &category.assignments {
                let score = index.get(&student.id, &a.id);
                let grade = student.per_assignment.get(&a.id).copied().unwrap_or(0.0);
                let band = match score {
                    Some(_) => grade_band(grade, thresholds),
                    None => GradeBand::Ungraded,
                };
                let omitted = student.omitted_assignment_id.as_deref() == Some(a.id.as_str())
                    || student.dropped_assignment_ids.iter().any(|d| *d == a.id);
                rows.push(DetailRow {
                    student_id: student.id.clone(),
                    student_name: student.name.clone(),
                    email: student.email.clone(),
                    category_id: category.id.clone(),
                    category_name: category.name.clone(),
                    weight: category.weight,
                    assignment_id: a.id.clone(),
                    assignment_title: a.title.clone(),
                    earned: score.map(|s| s.earned),
                    max_points: score.map(|s| s.max_points).unwrap_or(a.max_points),
                    grade,
                    band,
                    omitted,
                });
            }
        }
    }
    rows
}
