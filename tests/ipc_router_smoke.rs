mod test_support;

use serde_json::json;
use test_support::{
    error_code, request, request_err, request_ok, send_line, shutdown, spawn_sidecar, temp_dir,
    COURSE_ID,
};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").expect("workspacePath").is_null());

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "calc.table",
        json!({ "courseId": COURSE_ID }),
    );
    assert_eq!(error_code(&e), "no_workspace");

    let e = request_err(&mut stdin, &mut reader, "3", "grades.magic", json!({}));
    assert_eq!(error_code(&e), "not_implemented");

    let bad = send_line(&mut stdin, &mut reader, "{not json");
    assert_eq!(bad.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(bad.get("error").expect("error")), "bad_json");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("gradebook.sqlite3").is_file());

    let courses = request_ok(&mut stdin, &mut reader, "5", "courses.list", json!({}));
    assert_eq!(courses["courses"], json!([]));

    // Every family answers something other than not_implemented.
    let methods = [
        ("sync.applyCourse", json!({})),
        ("courses.stats", json!({ "courseId": COURSE_ID })),
        ("students.list", json!({ "courseId": COURSE_ID })),
        ("assignments.list", json!({ "courseId": COURSE_ID })),
        ("categories.list", json!({ "courseId": COURSE_ID })),
        ("categories.validateWeights", json!({ "courseId": COURSE_ID })),
        ("calc.averages", json!({ "courseId": COURSE_ID })),
        ("calc.gradeStats", json!({ "courseId": COURSE_ID })),
        ("calc.detail", json!({ "courseId": COURSE_ID })),
        ("export.averagesCsv", json!({ "courseId": COURSE_ID })),
        ("export.tableCsv", json!({ "courseId": COURSE_ID })),
        ("setup.get", json!({})),
    ];
    for (i, (method, params)) in methods.into_iter().enumerate() {
        let id = format!("m{}", i);
        let resp = request(&mut stdin, &mut reader, &id, method, params);
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            assert_ne!(
                error_code(resp.get("error").expect("error")),
                "not_implemented",
                "{} not routed",
                method
            );
        }
    }

    shutdown(child, stdin, &workspace);
}
