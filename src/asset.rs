//! Asset descriptors and the (unit, type, id) <-> asset registry.
//!
//! Grounded on `home_assistant.py::load_assets` (synthetic calibrate
//! button generation) and `teletask.py::build_key_from_asset`.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

/// Home-Assistant-side entity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Light,
    Switch,
    Sensor,
    Cover,
    Button,
    BinarySensor,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Light => "light",
            Component::Switch => "switch",
            Component::Sensor => "sensor",
            Component::Cover => "cover",
            Component::Button => "button",
            Component::BinarySensor => "binary_sensor",
        }
    }
}

/// Teletask-side function classification. Bijective with the wire
/// function byte (see `teletask::codec`). `Calibrate` is synthetic:
/// it never appears on the wire, only as the teletask_type of the
/// button assets this bridge manufactures for calibration triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeletaskType {
    Relay,
    Dimmer,
    Motor,
    Locmood,
    Timedmood,
    Genmood,
    Flag,
    Sensor,
    Process,
    Regime,
    Service,
    Cond,
    Calibrate,
}

impl TeletaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeletaskType::Relay => "relay",
            TeletaskType::Dimmer => "dimmer",
            TeletaskType::Motor => "motor",
            TeletaskType::Locmood => "locmood",
            TeletaskType::Timedmood => "timedmood",
            TeletaskType::Genmood => "genmood",
            TeletaskType::Flag => "flag",
            TeletaskType::Sensor => "sensor",
            TeletaskType::Process => "process",
            TeletaskType::Regime => "regime",
            TeletaskType::Service => "service",
            TeletaskType::Cond => "cond",
            TeletaskType::Calibrate => "calibrate",
        }
    }
}

impl fmt::Display for TeletaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable asset descriptor loaded once from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub name: String,
    pub component: Component,
    pub teletask_type: TeletaskType,
    pub central_unit: u8,
    /// Signed so the `-1` "all covers" sentinel used by the synthetic
    /// calibrate-all button fits in the same field as a real id.
    pub teletask_id: i32,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
}

impl Asset {
    /// The asset key: `"{unit}_{type}_{id}"`. Identical on both the
    /// Teletask REPORT-decoding side and the MQTT topic-segment side,
    /// byte for byte, per the wire-surface invariant in the spec.
    pub fn key(&self) -> String {
        build_key(self.central_unit, self.teletask_type.as_str(), self.teletask_id)
    }

    fn calibrate_button(name: String, teletask_id: i32) -> Asset {
        Asset {
            name,
            component: Component::Button,
            teletask_type: TeletaskType::Calibrate,
            central_unit: 1,
            teletask_id,
            device_class: None,
            unit_of_measurement: None,
        }
    }
}

pub fn build_key(unit: u8, type_name: &str, id: i32) -> String {
    format!("{}_{}_{}", unit, type_name, id)
}

/// Read-only mapping from asset key to asset, built once at startup.
/// Also carries the synthetic calibrate-button assets so that C2's
/// priming and C4's discovery publish can iterate consistent lists
/// without either one special-casing covers.
pub struct AssetRegistry {
    by_key: HashMap<String, Asset>,
    /// Keys of assets that are genuinely backed by the Teletask bus
    /// (excludes the synthetic calibrate buttons), in configuration
    /// order — this is what gets primed with GET and what discovery
    /// publishes first, matching the Python source's iteration order.
    wire_keys: Vec<String>,
    /// Every key (wire assets plus synthetic calibrate buttons) in a
    /// fixed, deterministic order — a cover's own key immediately
    /// followed by its calibrate button, then the "calibrate all"
    /// button last. `HashMap` iteration order isn't stable across runs,
    /// so discovery publish (which needs exactly one first asset to
    /// carry the device identity fields) walks this instead of
    /// `by_key.values()`.
    all_keys: Vec<String>,
}

impl AssetRegistry {
    pub fn build(assets: Vec<Asset>) -> AssetRegistry {
        let mut by_key = HashMap::with_capacity(assets.len() * 2);
        let mut wire_keys = Vec::with_capacity(assets.len());
        let mut all_keys = Vec::with_capacity(assets.len() * 2);
        let mut has_covers = false;

        for asset in &assets {
            wire_keys.push(asset.key());
        }

        for asset in assets {
            let is_cover = asset.component == Component::Cover;
            has_covers |= is_cover;
            let key = asset.key();
            all_keys.push(key.clone());
            if is_cover {
                let button = Asset::calibrate_button(
                    format!("calibrate cover {}", asset.name),
                    asset.teletask_id,
                );
                all_keys.push(button.key());
                by_key.insert(button.key(), button);
            }
            by_key.insert(key, asset);
        }

        if has_covers {
            let all_button = Asset::calibrate_button("calibrate covers".to_string(), -1);
            all_keys.push(all_button.key());
            by_key.insert(all_button.key(), all_button);
        }

        AssetRegistry { by_key, wire_keys, all_keys }
    }

    pub fn get(&self, key: &str) -> Option<&Asset> {
        self.by_key.get(key)
    }

    pub fn lookup(&self, unit: u8, type_name: &str, id: i32) -> Option<&Asset> {
        self.get(&build_key(unit, type_name, id))
    }

    /// Assets in configuration order, synthetic ones excluded — for
    /// Teletask LOG/GET priming.
    pub fn wire_assets(&self) -> impl Iterator<Item = &Asset> {
        self.wire_keys.iter().filter_map(move |k| self.by_key.get(k))
    }

    /// All assets including the synthetic calibrate buttons, in
    /// discovery-publish order (wire assets first, synthetic assets
    /// discovered alongside their owning cover).
    pub fn all(&self) -> impl Iterator<Item = &Asset> {
        self.all_keys.iter().filter_map(move |k| self.by_key.get(k))
    }

    pub fn covers(&self) -> impl Iterator<Item = &Asset> {
        self.wire_assets().filter(|a| a.component == Component::Cover)
    }

    pub fn has_covers(&self) -> bool {
        self.covers().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_asset(name: &str, component: Component, id: i32) -> Asset {
        Asset {
            name: name.to_string(),
            component,
            teletask_type: TeletaskType::Motor,
            central_unit: 1,
            teletask_id: id,
            device_class: None,
            unit_of_measurement: None,
        }
    }

    #[test]
    fn key_format_matches_wire_surface() {
        let asset = sample_asset("Living room blind", Component::Cover, 5);
        assert_eq!(asset.key(), "1_motor_5");
    }

    #[test]
    fn registry_adds_calibrate_buttons_for_covers() {
        let registry = AssetRegistry::build(vec![sample_asset("Blind", Component::Cover, 3)]);
        assert!(registry.get("1_motor_3").is_some());
        assert!(registry.get("1_calibrate_3").is_some());
        assert!(registry.get("1_calibrate_-1").is_some());
        assert!(registry.has_covers());
    }

    #[test]
    fn registry_skips_all_button_without_covers() {
        let registry = AssetRegistry::build(vec![sample_asset("Relay", Component::Switch, 1)]);
        assert!(registry.get("1_calibrate_-1").is_none());
        assert!(!registry.has_covers());
    }

    #[test]
    fn wire_assets_excludes_synthetic_buttons() {
        let registry = AssetRegistry::build(vec![sample_asset("Blind", Component::Cover, 3)]);
        let wire: Vec<_> = registry.wire_assets().map(|a| a.key()).collect();
        assert_eq!(wire, vec!["1_motor_3".to_string()]);
    }
}
