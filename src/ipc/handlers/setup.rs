use crate::calc::GradeThresholds;
use crate::db;
use crate::export::ExportSettings;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

const SCALE_MAX: f64 = crate::calc::SCALE_MAX;

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => {
            let t = GradeThresholds::default();
            json!({
                "passThreshold": t.pass,
                "excellenceThreshold": t.excellence,
                "csvBom": ExportSettings::default().csv_bom
            })
        }
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "passThreshold" | "excellenceThreshold" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, SCALE_MAX)?));
                }
                "csvBom" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }

    match section {
        SetupSection::Grading => {
            let pass = obj.get("passThreshold").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let excellence = obj
                .get("excellenceThreshold")
                .and_then(|v| v.as_f64())
                .unwrap_or(SCALE_MAX);
            if excellence < pass {
                return Err("excellenceThreshold must be >= passThreshold".to_string());
            }
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort: a bad stored value falls back to defaults.
            let mut merged = current.clone();
            if merge_section_patch(section, &mut merged, saved_obj).is_ok() {
                current = merged;
            } else {
                tracing::warn!(key = section.key(), "ignoring malformed stored settings");
            }
        }
    }
    Ok(current)
}

/// Thresholds for the workspace, or the defaults when none is selected.
pub fn grade_thresholds(state: &AppState) -> anyhow::Result<GradeThresholds> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(GradeThresholds::default());
    };
    let section = load_section(conn, SetupSection::Grading)?;
    Ok(serde_json::from_value::<GradeThresholds>(section).unwrap_or_default())
}

pub fn export_settings(state: &AppState) -> anyhow::Result<ExportSettings> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(ExportSettings::default());
    };
    let section = load_section(conn, SetupSection::Grading)?;
    Ok(ExportSettings {
        csv_bom: section
            .get("csvBom")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "grading": grading }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(key = section.key(), "settings updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
