use crate::analysis::recency::DEFAULT_TIMEZONE;
use crate::error::{EngineError, Result};
use chrono_tz::Tz;
use log::warn;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_SCHEMA_VERSION: i64 = 1;
const SETTINGS_FILE: &str = "settings.json";
/// Keys `update_setting` accepts.
pub const SETTING_KEYS: [&str; 8] = [
    "timezone",
    "maxBoxes",
    "minScore",
    "ledgerBackend",
    "catalogFile",
    "stateFile",
    "databaseFile",
    "visitLogFile",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Json,
    Sqlite,
}

/// Typed view of `settings.json`, with paths resolved against the data directory.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub data_dir: PathBuf,
    pub timezone: Tz,
    pub max_boxes: usize,
    pub min_score: f64,
    pub ledger_backend: LedgerBackend,
    pub catalog_file: PathBuf,
    pub state_file: PathBuf,
    pub database_file: PathBuf,
    pub visit_log_file: PathBuf,
}

pub fn load_engine_settings(data_dir: &Path) -> Result<EngineSettings> {
    let settings = load_settings_from_disk(data_dir)?;
    Ok(effective_settings(&settings, data_dir))
}

fn effective_settings(settings: &Value, data_dir: &Path) -> EngineSettings {
    let timezone = settings
        .get("timezone")
        .and_then(Value::as_str)
        .and_then(|name| match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                warn!("Unknown timezone '{name}', using {DEFAULT_TIMEZONE}");
                None
            }
        })
        .unwrap_or(DEFAULT_TIMEZONE);

    let ledger_backend = match settings.get("ledgerBackend").and_then(Value::as_str) {
        Some("sqlite") => LedgerBackend::Sqlite,
        _ => LedgerBackend::Json,
    };

    let path = |key: &str, default: &str| {
        data_dir.join(settings.get(key).and_then(Value::as_str).unwrap_or(default))
    };

    EngineSettings {
        data_dir: data_dir.to_path_buf(),
        timezone,
        max_boxes: settings.get("maxBoxes").and_then(Value::as_u64).unwrap_or(20) as usize,
        min_score: settings.get("minScore").and_then(Value::as_f64).unwrap_or(30.0),
        ledger_backend,
        catalog_file: path("catalogFile", "ml_boxes_ready.csv"),
        state_file: path("stateFile", "optimizer_state.json"),
        database_file: path("databaseFile", "ledger.db"),
        visit_log_file: path("visitLogFile", "visits_log.csv"),
    }
}

pub fn load_settings_from_disk(data_dir: &Path) -> Result<Value> {
    let path = settings_path(data_dir);

    let original = if path.exists() {
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
            warn!("Malformed {SETTINGS_FILE}, falling back to defaults: {e}");
            json!({})
        })
    } else {
        json!({})
    };

    let migrated = migrate_settings(original.clone());
    if migrated != original || !path.exists() {
        fs::create_dir_all(data_dir)?;
        write_settings_file(&path, &migrated)?;
    }

    Ok(migrated)
}

/// Set one setting and write the sanitized document back. Returns the value
/// actually stored, which may have been clamped or reset to its default.
pub fn update_setting(data_dir: &Path, key: &str, value: Value) -> Result<Value> {
    if !SETTING_KEYS.contains(&key) {
        return Err(EngineError::InvalidInput(format!(
            "unknown setting '{key}', expected one of: {}",
            SETTING_KEYS.join(", ")
        )));
    }

    let mut settings = load_settings_from_disk(data_dir)?;
    if let Some(obj) = settings.as_object_mut() {
        obj.insert(key.to_string(), value);
    }

    let migrated = migrate_settings(settings);
    write_settings_file(&settings_path(data_dir), &migrated)?;
    Ok(migrated.get(key).cloned().unwrap_or(Value::Null))
}

fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE)
}

fn write_settings_file(path: &Path, settings: &Value) -> Result<()> {
    let raw = serde_json::to_string_pretty(settings)?;
    fs::write(path, raw)?;
    Ok(())
}

fn migrate_settings(input: Value) -> Value {
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    deep_merge_defaults(&mut out, &default_settings());
    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "timezone": DEFAULT_TIMEZONE.name(),
        "maxBoxes": 20,
        "minScore": 30.0,
        "ledgerBackend": "json",
        "catalogFile": "ml_boxes_ready.csv",
        "stateFile": "optimizer_state.json",
        "databaseFile": "ledger.db",
        "visitLogFile": "visits_log.csv"
    })
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object())
    else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    clamp_u64(obj, "maxBoxes", 1, 500, 20);
    clamp_f64(obj, "minScore", 0.0, 130.0, 30.0);
    sanitize_enum(obj, "ledgerBackend", &["json", "sqlite"], "json");

    for (key, default) in [
        ("catalogFile", "ml_boxes_ready.csv"),
        ("stateFile", "optimizer_state.json"),
        ("databaseFile", "ledger.db"),
        ("visitLogFile", "visits_log.csv"),
    ] {
        ensure_file_name(obj, key, default);
    }

    let timezone_valid = obj
        .get("timezone")
        .and_then(Value::as_str)
        .is_some_and(|name| name.parse::<Tz>().is_ok());
    if !timezone_valid {
        obj.insert("timezone".to_string(), json!(DEFAULT_TIMEZONE.name()));
    }
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn clamp_f64(map: &mut Map<String, Value>, key: &str, min: f64, max: f64, default: f64) {
    let raw = map
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn sanitize_enum(map: &mut Map<String, Value>, key: &str, allowed: &[&str], default: &str) {
    let valid = map
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| allowed.contains(value))
        .unwrap_or(default);
    map.insert(key.to_string(), json!(valid));
}

fn ensure_file_name(map: &mut Map<String, Value>, key: &str, default: &str) {
    let value = map
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string();
    map.insert(key.to_string(), json!(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_defaults_and_stamps_version() {
        let migrated = migrate_settings(json!({ "maxBoxes": 5 }));

        assert_eq!(migrated["maxBoxes"], json!(5));
        assert_eq!(migrated["minScore"], json!(30.0));
        assert_eq!(migrated["timezone"], json!("Europe/Zurich"));
        assert_eq!(migrated["schema_version"], json!(SETTINGS_SCHEMA_VERSION));
    }

    #[test]
    fn sanitizes_out_of_range_and_unknown_values() {
        let migrated = migrate_settings(json!({
            "maxBoxes": 100000,
            "minScore": -4.0,
            "ledgerBackend": "postgres",
            "timezone": "Mars/Olympus",
            "stateFile": "  "
        }));

        assert_eq!(migrated["maxBoxes"], json!(500));
        assert_eq!(migrated["minScore"], json!(0.0));
        assert_eq!(migrated["ledgerBackend"], json!("json"));
        assert_eq!(migrated["timezone"], json!("Europe/Zurich"));
        assert_eq!(migrated["stateFile"], json!("optimizer_state.json"));
    }

    #[test]
    fn non_object_input_becomes_defaults() {
        let migrated = migrate_settings(json!([1, 2, 3]));
        assert_eq!(migrated["ledgerBackend"], json!("json"));
    }

    #[test]
    fn update_setting_stores_sanitized_value() {
        let dir = tempfile::tempdir().expect("temp dir");

        assert_eq!(update_setting(dir.path(), "maxBoxes", json!(9999)).expect("update"), json!(500));
        assert_eq!(
            update_setting(dir.path(), "ledgerBackend", json!("sqlite")).expect("update"),
            json!("sqlite")
        );
        assert_eq!(
            update_setting(dir.path(), "timezone", json!("Europe/Paris")).expect("update"),
            json!("Europe/Paris")
        );

        let effective = load_engine_settings(dir.path()).expect("load settings");
        assert_eq!(effective.max_boxes, 500);
        assert_eq!(effective.ledger_backend, LedgerBackend::Sqlite);
        assert_eq!(effective.timezone, chrono_tz::Europe::Paris);
        assert_eq!(effective.database_file, dir.path().join("ledger.db"));
    }

    #[test]
    fn update_setting_rejects_unknown_keys() {
        let dir = tempfile::tempdir().expect("temp dir");

        let result = update_setting(dir.path(), "scoreWeights", json!(1));

        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        let stored = load_settings_from_disk(dir.path()).expect("load");
        assert!(stored.get("scoreWeights").is_none());
    }
}
