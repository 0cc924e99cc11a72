#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const COURSE_ID: &str = "course-algebra";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with(&[], &[])
}

pub fn spawn_sidecar_with(
    args: &[&str],
    envs: &[(&str, &str)],
) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut cmd = Command::new(exe);
    cmd.args(args)
        .env_remove("GRADEBOOK_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn send_line(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, line: &str) -> Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");

    let mut resp = String::new();
    reader.read_line(&mut resp).expect("read response line");
    assert!(!resp.trim().is_empty(), "empty response for {}", line);
    serde_json::from_str(resp.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Returns the error object of a request that is expected to fail.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or(Value::Null)
}

pub fn error_code(error: &Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn assert_close(v: &Value, expected: f64) {
    let n = v.as_f64().unwrap_or_else(|| panic!("expected number, got {}", v));
    assert!(
        (n - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        n
    );
}

/// Two weighted categories (Homework 60%, sent as 600000; Exams 40%), two
/// students, three mapped assignments and one unmapped.
///
/// Acosta: HW 1 10/10, HW 2 4/10, Midterm 14/20.
/// Zapata: HW 1 8/10, HW 2 missing, Midterm 18/20.
pub fn sample_course_payload() -> Value {
    json!({
        "course": { "id": COURSE_ID, "name": "Algebra", "section": "5B", "room": "204" },
        "gradebook": {
            "calculationType": "WEIGHTED_CATEGORIES",
            "gradeCategories": [
                { "id": "gc-hw", "name": "Homework", "weight": 600000 },
                { "id": "gc-ex", "name": "Exams", "weight": 40 }
            ]
        },
        "students": [
            { "userId": "u-zapata", "fullName": "Zapata, Eva", "email": "eva@example.edu" },
            { "userId": "u-acosta", "fullName": "Acosta, Luis", "email": "luis@example.edu" }
        ],
        "courseWork": [
            { "id": "w-hw1", "title": "HW 1", "maxPoints": 10, "gradeCategoryId": "gc-hw" },
            { "id": "w-hw2", "title": "HW 2", "maxPoints": 10, "gradeCategoryId": "gc-hw" },
            { "id": "w-mid", "title": "Midterm", "maxPoints": 20, "gradeCategoryId": "gc-ex" },
            { "id": "w-read", "title": "Reading", "maxPoints": 10 }
        ],
        "submissions": [
            { "courseWorkId": "w-hw1", "userId": "u-acosta", "assignedGrade": 10 },
            { "courseWorkId": "w-hw2", "userId": "u-acosta", "assignedGrade": 4 },
            { "courseWorkId": "w-mid", "userId": "u-acosta", "assignedGrade": 14 },
            { "courseWorkId": "w-read", "userId": "u-acosta", "assignedGrade": 1 },
            { "courseWorkId": "w-hw1", "userId": "u-zapata", "assignedGrade": 8 },
            { "courseWorkId": "w-hw2", "userId": "u-zapata" },
            { "courseWorkId": "w-mid", "userId": "u-zapata", "assignedGrade": 18 }
        ]
    })
}

/// Select `workspace` and sync the sample course into it.
pub fn open_sample_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Value {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(stdin, reader, "sync", "sync.applyCourse", sample_course_payload())
}

pub fn category_id_by_name(table: &Value, name: &str) -> String {
    table
        .get("categories")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|c| c.get("name").and_then(|v| v.as_str()) == Some(name))
        })
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("category {} not in {}", name, table))
        .to_string()
}

pub fn student_row<'a>(table: &'a Value, id: &str) -> &'a Value {
    table
        .get("students")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|s| s.get("id").and_then(|v| v.as_str()) == Some(id))
        })
        .unwrap_or_else(|| panic!("student {} not in {}", id, table))
}

pub fn shutdown(mut child: Child, stdin: ChildStdin, workspace: &std::path::Path) {
    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
