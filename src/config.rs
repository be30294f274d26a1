//! Config file loading and validation.
//!
//! Ported from `config.py`: every missing required field is collected
//! into a human-readable violation list rather than failing on the
//! first one, so a user fixing their config sees everything wrong in
//! one pass.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::asset::Asset;
use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct HomeAssistantConfig {
    pub discovery_prefix: String,
    pub client_id: String,
    pub broker_host: String,
    pub device_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeletaskConfig {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub home_assistant: HomeAssistantConfig,
    pub teletask: TeletaskConfig,
    pub assets: Vec<Asset>,
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    tracing::info!(path = %path.display(), "loading config");
    let data = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(vec![format!("cannot read {}: {}", path.display(), e)]))?;
    let raw: Value = serde_json::from_str(&data)
        .map_err(|e| ConfigError::Invalid(vec![format!("invalid json: {}", e)]))?;

    let violations = validate(&raw);
    if !violations.is_empty() {
        return Err(ConfigError::Invalid(violations));
    }

    serde_json::from_value(raw)
        .map_err(|e| ConfigError::Invalid(vec![format!("config did not match expected shape: {}", e)]))
}

fn validate(config: &Value) -> Vec<String> {
    let mut violations = Vec::new();

    match config.get("home_assistant") {
        None => violations.push("missing home_assistant section".to_string()),
        Some(section) => validate_ha_section(section, &mut violations),
    }

    match config.get("teletask") {
        None => violations.push("missing teletask section".to_string()),
        Some(section) => validate_teletask_section(section, &mut violations),
    }

    match config.get("assets") {
        None => violations.push("missing assets section".to_string()),
        Some(section) => validate_assets_section(section, &mut violations),
    }

    violations
}

fn validate_ha_section(section: &Value, violations: &mut Vec<String>) {
    for field in ["discovery_prefix", "client_id", "broker_host", "device_id"] {
        if section.get(field).is_none() {
            violations.push(format!("missing {} field in home_assistant section", field));
        }
    }
}

fn validate_teletask_section(section: &Value, violations: &mut Vec<String>) {
    for field in ["ip", "port"] {
        if section.get(field).is_none() {
            violations.push(format!("missing {} field in teletask section", field));
        }
    }
}

fn validate_assets_section(section: &Value, violations: &mut Vec<String>) {
    let Some(assets) = section.as_array() else {
        violations.push("assets section must be an array".to_string());
        return;
    };
    for (index, asset) in assets.iter().enumerate() {
        let label = match asset.get("name").and_then(Value::as_str) {
            Some(name) => format!("{}.{}", index + 1, name),
            None => {
                violations.push(format!("missing name field in asset section, {}", index + 1));
                (index + 1).to_string()
            }
        };
        for field in ["component", "teletask_type", "central_unit", "teletask_id"] {
            if asset.get(field).is_none() {
                violations.push(format!("missing {} field in asset section, {}", field, label));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_all_violations_at_once() {
        let raw: Value = serde_json::json!({
            "assets": [{"name": "incomplete"}]
        });
        let violations = validate(&raw);
        assert!(violations.contains(&"missing home_assistant section".to_string()));
        assert!(violations.contains(&"missing teletask section".to_string()));
        assert!(violations
            .iter()
            .any(|v| v.contains("missing component field in asset section, 1.incomplete")));
    }

    #[test]
    fn accepts_well_formed_config() {
        let raw: Value = serde_json::json!({
            "home_assistant": {
                "discovery_prefix": "homeassistant",
                "client_id": "teletask",
                "broker_host": "localhost",
                "device_id": "teletask_1"
            },
            "teletask": { "ip": "10.0.0.5", "port": 55957 },
            "assets": [{
                "name": "Living room",
                "component": "light",
                "teletask_type": "relay",
                "central_unit": 1,
                "teletask_id": 1
            }]
        });
        assert!(validate(&raw).is_empty());
    }
}
