//! Cover position/duration persistence (`covers.json`-equivalent).
//!
//! Ported from `roller_shutters.py::load_config`/`save_config`: missing
//! file resets to an empty map rather than erroring, and the file is
//! pretty-printed with a 4-space indent to match `json.dump(...,
//! indent=4)`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

/// One cover's durable state. `move_start_at` is the only field not
/// persisted: it is live bookkeeping for an in-progress move or
/// calibration step, meaningless across a restart.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoverState {
    #[serde(default)]
    pub position: u8,
    #[serde(default)]
    pub duration_up: Option<f64>,
    #[serde(default)]
    pub duration_down: Option<f64>,
    #[serde(skip)]
    pub move_start_at: Option<Instant>,
}

pub fn load(path: &Path) -> anyhow::Result<HashMap<String, CoverState>> {
    if !path.exists() {
        info!(path = %path.display(), "no cover state file found, starting empty");
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let covers = serde_json::from_str(&data)?;
    Ok(covers)
}

pub fn save(path: &Path, covers: &HashMap<String, CoverState>) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(covers, &mut ser)?;
    std::fs::write(path, buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_empty() {
        let covers = load(Path::new("/nonexistent/covers.json")).unwrap();
        assert!(covers.is_empty());
    }

    #[test]
    fn round_trips_through_disk() {
        let mut covers = HashMap::new();
        covers.insert(
            "1_motor_3".to_string(),
            CoverState { position: 42, duration_up: Some(12.3), duration_down: Some(11.8), move_start_at: None },
        );
        let path = std::env::temp_dir().join(format!("covers_test_{}.json", std::process::id()));
        save(&path, &covers).unwrap();
        let loaded = load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.get("1_motor_3").unwrap().position, 42);
        assert_eq!(loaded.get("1_motor_3").unwrap().duration_up, Some(12.3));
    }
}
