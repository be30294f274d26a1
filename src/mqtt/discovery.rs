//! MQTT discovery payload construction.
//!
//! Ported field-for-field from `home_assistant.py::build_asset_def`.

use serde_json::{json, Map, Value};

use crate::asset::{Asset, Component, TeletaskType};

pub fn base_topic(discovery_prefix: &str, asset: &Asset, node_id: &str) -> String {
    format!("{}/{}/{}/{}", discovery_prefix, asset.component.as_str(), node_id, asset.key())
}

pub fn config_topic(discovery_prefix: &str, asset: &Asset, node_id: &str) -> String {
    format!("{}/config", base_topic(discovery_prefix, asset, node_id))
}

/// Builds the discovery payload for one asset. `is_first` carries the
/// device manufacturer/model fields — only the first asset published
/// needs to, since Home Assistant merges all assets under the shared
/// `"teletask"` device id.
pub fn build_payload(asset: &Asset, base_topic: &str, is_first: bool) -> Value {
    let mut payload = Map::new();
    payload.insert("~".into(), json!(base_topic));
    payload.insert("name".into(), json!(asset.name));
    payload.insert("unique_id".into(), json!(asset.key()));
    payload.insert("stat_t".into(), json!("~/state"));

    let mut device = Map::new();
    device.insert("ids".into(), json!(["teletask"]));
    if is_first {
        device.insert("mf".into(), json!("teletask"));
        device.insert("mdl".into(), json!("micros+"));
    }
    payload.insert("dev".into(), Value::Object(device));

    if asset.component == Component::Button {
        payload.insert("command_topic".into(), json!("~/exec"));
    } else {
        if !matches!(asset.teletask_type, TeletaskType::Flag | TeletaskType::Sensor) {
            payload.insert("cmd_t".into(), json!("~/set"));
        }
        if let Some(device_class) = &asset.device_class {
            payload.insert("device_class".into(), json!(device_class));
        }
        if let Some(unit) = &asset.unit_of_measurement {
            payload.insert("unit_of_measurement".into(), json!(unit));
        }
        if asset.teletask_type == TeletaskType::Dimmer {
            payload.insert("bri_cmd_t".into(), json!("~/setbri"));
            payload.insert("bri_stat_t".into(), json!("~/statebri"));
            payload.insert("on_command_type".into(), json!("brightness"));
        }
        if asset.component == Component::Cover {
            payload.insert("position_topic".into(), json!("~/pos"));
            payload.insert("set_position_topic".into(), json!("~/setpos"));
        }
    }

    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;

    fn cover_asset() -> Asset {
        Asset {
            name: "Living room blind".into(),
            component: Component::Cover,
            teletask_type: TeletaskType::Motor,
            central_unit: 1,
            teletask_id: 3,
            device_class: None,
            unit_of_measurement: None,
        }
    }

    #[test]
    fn cover_payload_has_position_topics() {
        let asset = cover_asset();
        let base = base_topic("homeassistant", &asset, "teletask_1");
        let payload = build_payload(&asset, &base, true);
        assert_eq!(payload["cmd_t"], "~/set");
        assert_eq!(payload["position_topic"], "~/pos");
        assert_eq!(payload["set_position_topic"], "~/setpos");
        assert_eq!(payload["dev"]["mf"], "teletask");
    }

    #[test]
    fn sensor_has_no_command_topic() {
        let asset = Asset {
            teletask_type: TeletaskType::Sensor,
            component: Component::Sensor,
            ..cover_asset()
        };
        let base = base_topic("homeassistant", &asset, "teletask_1");
        let payload = build_payload(&asset, &base, false);
        assert!(payload.get("cmd_t").is_none());
        assert!(payload["dev"].get("mf").is_none());
    }

    #[test]
    fn dimmer_has_brightness_channel() {
        let asset = Asset {
            teletask_type: TeletaskType::Dimmer,
            component: Component::Light,
            ..cover_asset()
        };
        let base = base_topic("homeassistant", &asset, "teletask_1");
        let payload = build_payload(&asset, &base, false);
        assert_eq!(payload["on_command_type"], "brightness");
        assert_eq!(payload["bri_stat_t"], "~/statebri");
    }

    #[test]
    fn button_uses_exec_topic() {
        let asset = Asset {
            teletask_type: TeletaskType::Calibrate,
            component: Component::Button,
            ..cover_asset()
        };
        let base = base_topic("homeassistant", &asset, "teletask_1");
        let payload = build_payload(&asset, &base, false);
        assert_eq!(payload["command_topic"], "~/exec");
        assert!(payload.get("cmd_t").is_none());
    }
}
