mod test_support;

use serde_json::json;
use test_support::{request_ok, shutdown, spawn_sidecar_with, temp_dir};

#[test]
fn workspace_flag_preselects_the_workspace() {
    let workspace = temp_dir("gradebook-cli-flag");
    let path = workspace.to_string_lossy().to_string();
    let (child, mut stdin, mut reader) = spawn_sidecar_with(&["--workspace", &path], &[]);

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["workspacePath"], json!(path));
    let courses = request_ok(&mut stdin, &mut reader, "2", "courses.list", json!({}));
    assert_eq!(courses["courses"], json!([]));
    assert!(workspace.join("gradebook.sqlite3").is_file());

    shutdown(child, stdin, &workspace);
}

#[test]
fn workspace_env_var_is_honored() {
    let workspace = temp_dir("gradebook-cli-env");
    let path = workspace.to_string_lossy().to_string();
    let (child, mut stdin, mut reader) =
        spawn_sidecar_with(&["--log-json"], &[("GRADEBOOK_WORKSPACE", &path)]);

    let setup = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert!(setup.get("grading").is_some());

    shutdown(child, stdin, &workspace);
}
