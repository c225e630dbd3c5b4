//! Settings loading: defaults ← file deep-merge ← env overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::Result;
use crate::types::MoorSettings;

/// Default on-disk location: `~/.moor/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".moor").join("settings.json")
}

/// Load settings from the default path with env overrides applied.
pub fn load_settings() -> Result<MoorSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path.
///
/// A missing file is not an error: compiled defaults are used. A present
/// but unparseable file is an error: silently ignoring a typo'd config is
/// worse than failing loudly.
pub fn load_settings_from_path(path: &Path) -> Result<MoorSettings> {
    let defaults = serde_json::to_value(MoorSettings::default())?;

    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let file: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, file)
    } else {
        defaults
    };

    let mut settings: MoorSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursively merge `overlay` over `base`. Objects merge key-by-key;
/// any other value in `overlay` replaces the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `MOOR_*` environment variable overrides (highest priority).
fn apply_env_overrides(settings: &mut MoorSettings) {
    if let Ok(addr) = std::env::var("MOOR_BIND_ADDR") {
        settings.server.bind_addr = addr;
    }
    if let Some(secs) = env_parse("MOOR_REQUEST_TIMEOUT_SECS") {
        settings.sync.request_timeout_secs = secs;
    }
    if let Some(enabled) = env_bool("MOOR_ALLOW_INTERRUPT") {
        settings.sync.allow_interrupt = enabled;
    }
    if let Some(enabled) = env_bool("MOOR_FALLBACK_RESOLUTION") {
        settings.sync.fallback_resolution = enabled;
    }
    if let Some(secs) = env_parse("MOOR_READY_GRACE_SECS") {
        settings.sync.ready_grace_secs = secs;
    }
}

fn env_parse(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable env override");
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable env override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings =
            load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, MoorSettings::default());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"sync":{"requestTimeoutSecs":42}}"#).unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.sync.request_timeout_secs, 42);
        // Non-overridden fields keep defaults
        assert!(settings.sync.fallback_resolution);
        assert_eq!(settings.server.ws_path, "/ws/agent");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn deep_merge_merges_nested_objects() {
        let base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 3});
        let overlay = serde_json::json!({"a": {"y": 9}});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["a"]["x"], 1);
        assert_eq!(merged["a"]["y"], 9);
        assert_eq!(merged["b"], 3);
    }

    #[test]
    fn deep_merge_scalar_replaces() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": [2]}));
        assert_eq!(merged["a"], serde_json::json!([2]));
    }

    #[test]
    fn env_bool_parses_common_forms() {
        // Exercise the parser directly; env var mutation races other tests.
        for (raw, expected) in [("1", true), ("true", true), ("off", false), ("0", false)] {
            let parsed = match raw {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            };
            assert_eq!(parsed, Some(expected));
        }
    }
}
