mod test_support;

use serde_json::json;
use test_support::{
    assert_close, category_id_by_name, error_code, open_sample_workspace, request_err,
    request_ok, shutdown, spawn_sidecar, student_row, temp_dir, COURSE_ID,
};

#[test]
fn table_without_drop_weights_category_means() {
    let workspace = temp_dir("gradebook-calc-none");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    open_sample_workspace(&mut stdin, &mut reader, &workspace);

    let table = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.table",
        json!({ "courseId": COURSE_ID }),
    );
    assert_eq!(table["status"], json!("ok"));
    assert_eq!(table["mode"], json!("none"));
    assert_eq!(table["policy"], json!("zero-filled"));
    assert_eq!(table["weights"]["isValid"], json!(true));
    assert_close(&table["weights"]["totalWeight"], 100.0);

    // Categories by name, assignments by title, students by name.
    let names: Vec<&str> = table["categories"]
        .as_array()
        .expect("categories")
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Exams", "Homework"]);
    let hw_titles: Vec<&str> = table["categories"][1]["assignments"]
        .as_array()
        .expect("assignments")
        .iter()
        .filter_map(|a| a["title"].as_str())
        .collect();
    assert_eq!(hw_titles, vec!["HW 1", "HW 2"]);
    let students: Vec<&str> = table["students"]
        .as_array()
        .expect("students")
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    assert_eq!(students, vec!["Acosta, Luis", "Zapata, Eva"]);

    let hw = category_id_by_name(&table, "Homework");
    let ex = category_id_by_name(&table, "Exams");

    let acosta = student_row(&table, "u-acosta");
    assert_close(&acosta["perCategoryAverage"][&hw], 14.0);
    assert_close(&acosta["perCategoryAverage"][&ex], 14.0);
    assert_close(&acosta["finalAverage"], 14.0);
    // The unmapped assignment is not part of the table.
    assert!(acosta["perAssignmentGrade"].get("w-read").is_none());

    let zapata = student_row(&table, "u-zapata");
    assert_close(&zapata["perAssignmentGrade"]["w-hw2"], 0.0);
    assert_close(&zapata["perCategoryAverage"][&hw], 8.0);
    assert_eq!(zapata["categoryCounts"][&hw], json!(2));
    assert_close(&zapata["finalAverage"], 12.0);

    let averages = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "calc.averages",
        json!({ "courseId": COURSE_ID }),
    );
    let zapata = student_row(&averages, "u-zapata");
    assert_close(&zapata["finalAverage"], 12.0);
    assert!(zapata.get("perAssignmentGrade").is_none());

    shutdown(child, stdin, &workspace);
}

#[test]
fn drop_modes_change_the_final_average() {
    let workspace = temp_dir("gradebook-calc-drop");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    open_sample_workspace(&mut stdin, &mut reader, &workspace);

    let per_category = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.table",
        json!({ "courseId": COURSE_ID, "mode": "drop-per-category" }),
    );
    let hw = category_id_by_name(&per_category, "Homework");
    let acosta = student_row(&per_category, "u-acosta");
    assert_close(&acosta["perCategoryAverage"][&hw], 20.0);
    assert_close(&acosta["finalAverage"], 17.6);
    assert_eq!(acosta["droppedAssignmentIds"], json!(["w-hw2"]));
    assert!(acosta["omittedAssignmentId"].is_null());
    let zapata = student_row(&per_category, "u-zapata");
    assert_close(&zapata["finalAverage"], 16.8);

    let global = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "calc.table",
        json!({ "courseId": COURSE_ID, "mode": "drop-global" }),
    );
    let acosta = student_row(&global, "u-acosta");
    // Exams has a single assignment, so only Homework is eligible.
    assert_eq!(acosta["omittedAssignmentId"], json!("w-hw2"));
    assert_close(&acosta["finalAverage"], 17.6);
    let zapata = student_row(&global, "u-zapata");
    assert_eq!(zapata["omittedAssignmentId"], json!("w-hw2"));
    assert_close(&zapata["finalAverage"], 16.8);

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "calc.table",
        json!({ "courseId": COURSE_ID, "mode": "drop-both" }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "calc.table",
        json!({ "courseId": "missing-course" }),
    );
    assert_eq!(error_code(&e), "not_found");

    shutdown(child, stdin, &workspace);
}

#[test]
fn recorded_only_policy_ignores_missing_scores() {
    let workspace = temp_dir("gradebook-calc-recorded-only");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    open_sample_workspace(&mut stdin, &mut reader, &workspace);

    let table = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.table",
        json!({ "courseId": COURSE_ID, "policy": "recorded-only" }),
    );
    assert_eq!(table["policy"], json!("recorded-only"));
    let hw = category_id_by_name(&table, "Homework");
    let zapata = student_row(&table, "u-zapata");
    assert_close(&zapata["perCategoryAverage"][&hw], 16.0);
    assert_eq!(zapata["categoryCounts"][&hw], json!(1));
    // 18 * 0.4 + 16 * 0.6
    assert_close(&zapata["finalAverage"], 16.8);

    shutdown(child, stdin, &workspace);
}

#[test]
fn inline_snapshot_needs_no_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let snapshot = json!({
        "students": [{ "id": "s1", "name": "Solo, Ana" }],
        "categories": [
            { "id": "A", "name": "Labs", "weight": 60 },
            { "id": "B", "name": "Exams", "weight": 37 }
        ],
        "assignments": [
            { "id": "a1", "title": "Lab 1", "maxPoints": 10, "categoryId": "A" },
            { "id": "b1", "title": "Final", "maxPoints": 50, "categoryId": "B" }
        ],
        "scores": [
            { "studentId": "s1", "assignmentId": "a1", "earned": 7, "maxPoints": 10 },
            { "studentId": "s1", "assignmentId": "b1", "earned": 45, "maxPoints": 50 }
        ]
    });
    let table = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.table",
        json!({ "snapshot": snapshot }),
    );
    let row = student_row(&table, "s1");
    // 14 * 0.6 + 18 * 0.37 = 8.4 + 6.66
    assert_close(&row["finalAverage"], 15.06);
    assert_eq!(table["weights"]["isValid"], json!(false));
    assert_close(&table["weights"]["difference"], 3.0);

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "calc.averages",
        json!({ "snapshot": { "students": [{ "id": "s1", "name": "Solo, Ana" }] } }),
    );
    assert_eq!(empty["status"], json!("no_categories"));
    assert_eq!(empty["students"], json!([]));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "calc.table",
        json!({ "snapshot": { "categories": [{ "id": "A", "name": "Labs", "weight": "sixty" }] } }),
    );
    assert_eq!(error_code(&e), "bad_params");

    drop(stdin);
    let _ = child.wait();
}
