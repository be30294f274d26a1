//! Teletask wire framing, checksum, and REPORT decoding.
//!
//! Ported from `teletask.py` (`get_checksum`, `verify_checksum`,
//! `convert_sensor`, `process_message`, `read_messages`). Command and
//! function byte values are a pass-through dictionary in the original
//! source (`teletask_const`, which was not part of the kept original
//! files) — the constants below preserve the bijective/total mapping
//! contract the spec requires without claiming to reproduce the exact
//! vendor byte table, which this codebase never had access to.

use crate::asset::TeletaskType;
use crate::error::CodecError;

pub const START_BYTE: u8 = 0x02;
pub const ACK_BYTE: u8 = 0x0A;

/// Outbound/inbound command codes (first byte of the frame payload).
pub mod command {
    pub const REPORT: u8 = 0x02;
    pub const SET: u8 = 0x04;
    pub const GET: u8 = 0x05;
    pub const LOG: u8 = 0x06;
    pub const KEEP_ALIVE: u8 = 0x16;
}

/// Value bytes used in SET frames and reflected in MOTOR REPORTs.
pub mod setvalue {
    pub const OFF: u8 = 0x00;
    pub const ON: u8 = 0x01;
    pub const MTR_STOP: u8 = 0x00;
    pub const MTR_UP: u8 = 0x01;
    pub const MTR_DOWN: u8 = 0x02;
}

impl TeletaskType {
    /// The single byte this function class is reported and addressed
    /// as on the wire. Bijective and total over every variant except
    /// `Calibrate`, which is a synthetic, MQTT-only type that never
    /// appears in a Teletask frame.
    pub fn to_function_byte(self) -> Option<u8> {
        use TeletaskType::*;
        Some(match self {
            Relay => 0x01,
            Dimmer => 0x02,
            Motor => 0x05,
            Locmood => 0x06,
            Timedmood => 0x07,
            Genmood => 0x08,
            Flag => 0x41,
            Sensor => 0x14,
            Process => 0x42,
            Regime => 0x43,
            Service => 0x44,
            Cond => 0x45,
            Calibrate => return None,
        })
    }

    pub fn from_function_byte(byte: u8) -> Result<TeletaskType, CodecError> {
        use TeletaskType::*;
        Ok(match byte {
            0x01 => Relay,
            0x02 => Dimmer,
            0x05 => Motor,
            0x06 => Locmood,
            0x07 => Timedmood,
            0x08 => Genmood,
            0x41 => Flag,
            0x14 => Sensor,
            0x42 => Process,
            0x43 => Regime,
            0x44 => Service,
            0x45 => Cond,
            other => return Err(CodecError::UnknownFunction(other)),
        })
    }
}

/// The set of function classes monitored via `LOG fnc ON` at startup.
pub const MONITORED_FUNCTIONS: &[TeletaskType] = &[
    TeletaskType::Relay,
    TeletaskType::Dimmer,
    TeletaskType::Motor,
    TeletaskType::Locmood,
    TeletaskType::Timedmood,
    TeletaskType::Genmood,
    TeletaskType::Flag,
    TeletaskType::Sensor,
    TeletaskType::Process,
    TeletaskType::Regime,
    TeletaskType::Service,
    TeletaskType::Cond,
];

/// A decoded REPORT value. The generic `Raw` shape is resolved further
/// by the MQTT translation layer, whose interpretation depends on the
/// HA component, not just the Teletask function (see `mqtt::value`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Motor { up: bool, moving: bool },
    Sensor(f64),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportEvent {
    pub unit: u8,
    pub teletask_type: TeletaskType,
    pub id: u16,
    pub value: Value,
}

/// checksum = sum of all preceding bytes mod 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Wraps a payload (command byte + arguments) in the start/length/
/// checksum envelope. `payload.len()` must leave room for the 3
/// envelope bytes within a `u8` length field (vendor frames are short;
/// this never approaches the 255-byte ceiling in practice).
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let total_len = payload.len() + 3;
    let mut frame = Vec::with_capacity(total_len);
    frame.push(START_BYTE);
    frame.push(total_len as u8);
    frame.extend_from_slice(payload);
    let sum = checksum(&frame);
    frame.push(sum);
    frame
}

/// Verifies and strips the envelope, returning the payload
/// (`cmd, unit, fnc, id_hi, id_lo, ...`).
pub fn decode_frame(frame: &[u8]) -> Result<&[u8], CodecError> {
    if frame.len() < 4 {
        return Err(CodecError::TooShort(frame.len()));
    }
    let expected = checksum(&frame[..frame.len() - 1]);
    if expected != frame[frame.len() - 1] {
        return Err(CodecError::ChecksumMismatch);
    }
    Ok(&frame[2..frame.len() - 1])
}

/// One item recovered while greedily parsing a read buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RawItem {
    Ack,
    Frame(Vec<u8>),
}

/// Greedily parses ACKs and framed messages out of a raw read buffer,
/// skipping resync garbage (any byte that isn't `0x02` or `0x0A` at an
/// expected frame start) without error. A frame whose declared length
/// runs past the end of the buffer is left unconsumed (the original
/// source has no cross-read carry-over buffer either; a message
/// spanning two reads is a known limitation inherited from it).
pub fn parse_buffer(buf: &[u8]) -> Vec<RawItem> {
    let mut items = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        match buf[pos] {
            ACK_BYTE => {
                items.push(RawItem::Ack);
                pos += 1;
            }
            START_BYTE => {
                if pos + 1 >= buf.len() {
                    break;
                }
                let len = buf[pos + 1] as usize;
                if len < 3 || pos + len > buf.len() {
                    break;
                }
                items.push(RawItem::Frame(buf[pos..pos + len].to_vec()));
                pos += len;
            }
            _ => {
                pos += 1;
            }
        }
    }
    items
}

/// `decode_sensor`: raw big-endian 0.1 K value at offsets 6..8 of the
/// payload, converted to Celsius and rounded to 2 decimals. Other
/// Teletask sensor subtypes (day/night setpoints, occupying offsets
/// 8..14) are present in the frame but intentionally not decoded —
/// same limitation the original source carries (those fields are
/// commented out there too).
fn decode_sensor(payload: &[u8]) -> Result<f64, CodecError> {
    if payload.len() < 8 {
        return Err(CodecError::TooShort(payload.len()));
    }
    let raw = u16::from_be_bytes([payload[6], payload[7]]);
    let celsius = raw as f64 / 10.0 - 273.0;
    Ok((celsius * 100.0).round() / 100.0)
}

/// Decodes a REPORT payload (`cmd, unit, fnc, id_hi, id_lo, v0, v1,
/// ...`). `payload[0]` must already be `command::REPORT`.
pub fn decode_report(payload: &[u8]) -> Result<ReportEvent, CodecError> {
    if payload.len() < 6 {
        return Err(CodecError::TooShort(payload.len()));
    }
    let unit = payload[1];
    let fnc_byte = payload[2];
    let teletask_type = TeletaskType::from_function_byte(fnc_byte)?;
    let id = u16::from_be_bytes([payload[3], payload[4]]);

    let value = match teletask_type {
        TeletaskType::Motor => {
            if payload.len() < 8 {
                return Err(CodecError::TooShort(payload.len()));
            }
            Value::Motor {
                up: payload[6] == setvalue::MTR_UP,
                moving: payload[7] != 0,
            }
        }
        TeletaskType::Sensor => Value::Sensor(decode_sensor(payload)?),
        _ => {
            if payload.len() < 7 {
                return Err(CodecError::TooShort(payload.len()));
            }
            Value::Raw(vec![payload[6]])
        }
    };

    Ok(ReportEvent { unit, teletask_type, id, value })
}

/// Builds a `SET unit fnc id_hi id_lo value` payload (pre-envelope).
pub fn build_set(unit: u8, teletask_type: TeletaskType, id: u16, value: u8) -> Vec<u8> {
    let fnc = teletask_type.to_function_byte().expect("non-synthetic type");
    let [id_hi, id_lo] = id.to_be_bytes();
    vec![command::SET, unit, fnc, id_hi, id_lo, value]
}

/// Builds a `GET unit fnc id_hi id_lo` payload.
pub fn build_get(unit: u8, teletask_type: TeletaskType, id: u16) -> Vec<u8> {
    let fnc = teletask_type.to_function_byte().expect("non-synthetic type");
    let [id_hi, id_lo] = id.to_be_bytes();
    vec![command::GET, unit, fnc, id_hi, id_lo]
}

/// Builds a `LOG fnc ON` payload used to subscribe to a function class.
pub fn build_log_subscribe(teletask_type: TeletaskType) -> Vec<u8> {
    let fnc = teletask_type.to_function_byte().expect("non-synthetic type");
    vec![command::LOG, fnc, setvalue::ON]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let payload = build_set(1, TeletaskType::Relay, 5, setvalue::ON);
        let frame = encode_frame(&payload);
        assert_eq!(frame[1] as usize, frame.len());
        assert_eq!(*frame.last().unwrap(), checksum(&frame[..frame.len() - 1]));
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded, payload.as_slice());
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let payload = build_set(1, TeletaskType::Relay, 5, setvalue::ON);
        let mut frame = encode_frame(&payload);
        *frame.last_mut().unwrap() ^= 0xFF;
        assert!(matches!(decode_frame(&frame), Err(CodecError::ChecksumMismatch)));
    }

    #[test]
    fn unknown_function_byte_errors() {
        let err = TeletaskType::from_function_byte(0xFE).unwrap_err();
        assert!(matches!(err, CodecError::UnknownFunction(0xFE)));
    }

    #[test]
    fn decode_report_dimmer() {
        let payload = vec![command::REPORT, 1, 0x02, 0x00, 0x03, 0x00, 0x40];
        let event = decode_report(&payload).unwrap();
        assert_eq!(event.unit, 1);
        assert_eq!(event.teletask_type, TeletaskType::Dimmer);
        assert_eq!(event.id, 3);
        assert_eq!(event.value, Value::Raw(vec![0x40]));
    }

    #[test]
    fn decode_report_motor_closing() {
        let payload = vec![command::REPORT, 1, 0x05, 0x00, 0x02, 0x00, 0x02, 0x01];
        let event = decode_report(&payload).unwrap();
        assert_eq!(event.value, Value::Motor { up: false, moving: true });
    }

    #[test]
    fn decode_report_sensor_temperature() {
        let payload = vec![command::REPORT, 1, 0x14, 0x00, 0x01, 0x00, 0x0B, 0x8B];
        let event = decode_report(&payload).unwrap();
        assert_eq!(event.value, Value::Sensor(22.5));
    }

    #[test]
    fn parse_buffer_finds_ack_and_frame_and_skips_garbage() {
        let payload = build_set(1, TeletaskType::Relay, 5, setvalue::ON);
        let frame = encode_frame(&payload);
        let mut buf = vec![0xFF, ACK_BYTE];
        buf.extend_from_slice(&frame);
        buf.push(0xEE);
        let items = parse_buffer(&buf);
        assert_eq!(items[0], RawItem::Ack);
        assert_eq!(items[1], RawItem::Frame(frame));
    }

    #[test]
    fn parse_buffer_leaves_incomplete_trailing_frame() {
        let payload = build_set(1, TeletaskType::Relay, 5, setvalue::ON);
        let frame = encode_frame(&payload);
        let partial = &frame[..frame.len() - 1];
        let items = parse_buffer(partial);
        assert!(items.is_empty());
    }
}
