//! Model-configuration documents edited as raw JSON.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Parse an edited document. Must be a JSON object with a non-empty `name`.
pub fn parse_document(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        anyhow!(
            "Invalid JSON at line {}, column {}: {}",
            e.line(),
            e.column(),
            e
        )
    })?;

    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("Model configuration must be a JSON object"))?;

    match object.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        Some(_) => return Err(anyhow!("Field 'name' must be a non-empty string")),
        None => return Err(anyhow!("Missing required field 'name'")),
    }

    if let Some(config) = object.get("config") {
        if !config.is_object() {
            return Err(anyhow!("Field 'config' must be a JSON object"));
        }
    }

    Ok(value)
}

pub fn load_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_document(&text).with_context(|| format!("In {}", path.display()))
}

/// Pretty form shown to the user for editing
pub fn render_document(value: &Value) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_document() {
        let doc = parse_document(r#"{"name": "gfpgan", "config": {"upscale": 2}}"#).unwrap();
        assert_eq!(doc["config"]["upscale"], 2);
    }

    #[test]
    fn test_reports_position() {
        let err = parse_document("{\n  \"name\": \"x\",\n  oops\n}").unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_rejects_non_object() {
        let err = parse_document("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_requires_name() {
        assert!(parse_document(r#"{"config": {}}"#)
            .unwrap_err()
            .to_string()
            .contains("Missing required field"));
        assert!(parse_document(r#"{"name": ""}"#).is_err());
        assert!(parse_document(r#"{"name": 5}"#).is_err());
    }

    #[test]
    fn test_config_must_be_object() {
        let err = parse_document(r#"{"name": "x", "config": "fast"}"#).unwrap_err();
        assert!(err.to_string().contains("'config'"));
    }

    #[test]
    fn test_render_roundtrips() {
        let doc = parse_document(r#"{"name":"x","config":{"a":1}}"#).unwrap();
        let text = render_document(&doc).unwrap();
        assert!(text.contains("\n"));
        assert_eq!(parse_document(&text).unwrap(), doc);
    }

    #[test]
    fn test_load_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"name": "codeformer"}"#).unwrap();
        assert_eq!(load_document(&path).unwrap()["name"], "codeformer");

        let missing = load_document(&dir.path().join("nope.json")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read"));
    }
}
