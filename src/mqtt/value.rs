//! Value coding in both directions and topic routing.
//!
//! Ported from `home_assistant.py::get_value`/`send` (Teletask → MQTT)
//! and `teletask.py::value_to_number` plus the topic-splitting logic
//! inlined in `home_assistant.py::on_message` (MQTT → Teletask).

use crate::asset::{Asset, Component, TeletaskType};
use crate::error::{CommandError, TopicError};
use crate::teletask::codec::{self, Value};

/// An MQTT publish payload. Most component kinds resolve to a short
/// text state; the fallback case publishes the raw byte array, same
/// as the Python source's `bytearray` passthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(s) => s.into_bytes(),
            Payload::Bytes(b) => b,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateMessage {
    pub topic_suffix: &'static str,
    pub payload: Payload,
}

/// Encodes a decoded Teletask value into the MQTT state message(s) for
/// one asset. A dimmer publishes two messages in parallel: the on/off
/// view on `~/state` and the raw brightness byte on `~/statebri`.
pub fn encode_state(asset: &Asset, value: &Value) -> Vec<StateMessage> {
    if asset.teletask_type == TeletaskType::Dimmer {
        let raw = match value {
            Value::Raw(bytes) => bytes.clone(),
            _ => Vec::new(),
        };
        let onoff = if raw.first().copied().unwrap_or(0) == 0 { "OFF" } else { "ON" };
        return vec![
            StateMessage { topic_suffix: "state", payload: Payload::Text(onoff.to_string()) },
            StateMessage { topic_suffix: "statebri", payload: Payload::Bytes(raw) },
        ];
    }

    match asset.component {
        Component::Light => {
            let onoff = match value {
                Value::Raw(bytes) if bytes.first().copied().unwrap_or(1) == 0 => "OFF",
                _ => "ON",
            };
            vec![StateMessage { topic_suffix: "state", payload: Payload::Text(onoff.to_string()) }]
        }
        Component::Cover => {
            let state = match value {
                Value::Motor { moving, .. } if !moving => "stopped",
                Value::Motor { up, .. } if !up => "closing",
                Value::Motor { .. } => "opening",
                _ => "stopped",
            };
            vec![StateMessage { topic_suffix: "state", payload: Payload::Text(state.to_string()) }]
        }
        Component::Sensor => {
            let text = match value {
                Value::Sensor(celsius) => format!("{}", celsius),
                _ => String::new(),
            };
            vec![StateMessage { topic_suffix: "state", payload: Payload::Text(text) }]
        }
        _ => {
            let bytes = match value {
                Value::Raw(b) => b.clone(),
                Value::Motor { up, moving } => vec![if *up { 1 } else { 2 }, if *moving { 1 } else { 0 }],
                Value::Sensor(celsius) => celsius.to_string().into_bytes(),
            };
            vec![StateMessage { topic_suffix: "state", payload: Payload::Bytes(bytes) }]
        }
    }
}

/// `value_to_number`: fixed string verbs map to fixed Teletask value
/// bytes, bare digit strings pass through as integers.
pub fn decode_command_value(payload: &str) -> Result<u8, CommandError> {
    match payload {
        "ON" => Ok(codec::setvalue::ON),
        "OFF" => Ok(codec::setvalue::OFF),
        "OPEN" => Ok(codec::setvalue::MTR_UP),
        "STOP" => Ok(codec::setvalue::MTR_STOP),
        "CLOSE" => Ok(codec::setvalue::MTR_DOWN),
        other => other
            .parse::<u8>()
            .map_err(|_| CommandError::InvalidValue(other.to_string())),
    }
}

/// A command routed off an MQTT topic: `{prefix}/{component}/{node}/{key}/{verb}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedCommand {
    pub key: String,
    pub verb: String,
    pub payload: String,
}

pub fn route(topic: &str, payload: &str) -> Result<RoutedCommand, TopicError> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() != 5 {
        return Err(TopicError::Malformed(topic.to_string()));
    }
    Ok(RoutedCommand {
        key: parts[3].to_string(),
        verb: parts[4].to_string(),
        payload: payload.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(component: Component, teletask_type: TeletaskType) -> Asset {
        Asset {
            name: "x".into(),
            component,
            teletask_type,
            central_unit: 1,
            teletask_id: 1,
            device_class: None,
            unit_of_measurement: None,
        }
    }

    #[test]
    fn cover_closing_state() {
        let a = asset(Component::Cover, TeletaskType::Motor);
        let msgs = encode_state(&a, &Value::Motor { up: false, moving: true });
        assert_eq!(msgs, vec![StateMessage { topic_suffix: "state", payload: Payload::Text("closing".into()) }]);
    }

    #[test]
    fn cover_stopped_state_wins_over_direction() {
        let a = asset(Component::Cover, TeletaskType::Motor);
        let msgs = encode_state(&a, &Value::Motor { up: true, moving: false });
        assert_eq!(msgs[0].payload, Payload::Text("stopped".into()));
    }

    #[test]
    fn dimmer_publishes_state_and_bri_in_parallel() {
        let a = asset(Component::Light, TeletaskType::Dimmer);
        let msgs = encode_state(&a, &Value::Raw(vec![0x40]));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], StateMessage { topic_suffix: "state", payload: Payload::Text("ON".into()) });
        assert_eq!(msgs[1], StateMessage { topic_suffix: "statebri", payload: Payload::Bytes(vec![0x40]) });
    }

    #[test]
    fn sensor_is_decimal_string() {
        let a = asset(Component::Sensor, TeletaskType::Sensor);
        let msgs = encode_state(&a, &Value::Sensor(22.5));
        assert_eq!(msgs[0].payload, Payload::Text("22.5".into()));
    }

    #[test]
    fn command_values_map_fixed_verbs() {
        assert_eq!(decode_command_value("ON").unwrap(), codec::setvalue::ON);
        assert_eq!(decode_command_value("CLOSE").unwrap(), codec::setvalue::MTR_DOWN);
        assert_eq!(decode_command_value("42").unwrap(), 42);
        assert!(decode_command_value("bogus").is_err());
    }

    #[test]
    fn routes_topic_into_key_verb_payload() {
        let routed = route("homeassistant/cover/teletask_1/1_motor_3/setpos", "40").unwrap();
        assert_eq!(routed.key, "1_motor_3");
        assert_eq!(routed.verb, "setpos");
        assert_eq!(routed.payload, "40");
    }

    #[test]
    fn rejects_malformed_topic() {
        assert!(route("too/short", "x").is_err());
    }
}
