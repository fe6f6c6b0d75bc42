//! RFLink text protocol: decoding inbound lines into [`Event`]s and encoding commands.
//!
//! Inbound (gateway → host) lines start with node `20`, a rolling sequence number and a
//! protocol name, followed by `KEY=VALUE` attributes:
//!
//! ```text
//! 20;2D;NewKaku;ID=31c42a;SWITCH=1;CMD=ON;
//! 20;0A;Alecto V1;ID=0334;TEMP=00cb;HUM=32;BAT=OK;
//! 20;1F;OK;
//! ```
//!
//! Outbound (host → gateway) commands use node `10`:
//!
//! ```text
//! 10;newkaku;31c42a;1;ON;
//! ```

use crate::bridge::event::{Event, SensorValue};
use crate::error::ProtocolError;

const NODE_GATEWAY: &str = "20";
const NODE_MASTER: &str = "10";

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Gateway accepted the last command.
    Ack,
    /// Gateway rejected the last command.
    Nack(String),
    /// Device traffic. Banner and debug lines decode to a single unclassified event.
    Events(Vec<Event>),
}

struct SensorKind {
    key: &'static str,
    name: &'static str,
    unit: Option<&'static str>,
    parse: fn(&str) -> Option<SensorValue>,
}

const SENSORS: &[SensorKind] = &[
    SensorKind { key: "TEMP", name: "temperature", unit: Some("°C"), parse: signed_hex_tenths },
    SensorKind { key: "HUM", name: "humidity", unit: Some("%"), parse: decimal },
    SensorKind { key: "BARO", name: "barometric_pressure", unit: Some("hPa"), parse: hex },
    SensorKind { key: "BAT", name: "battery", unit: None, parse: lower_text },
    SensorKind { key: "RAIN", name: "total_rain", unit: Some("mm"), parse: hex_tenths },
    SensorKind { key: "RAINRATE", name: "rain_rate", unit: Some("mm"), parse: hex_tenths },
    SensorKind { key: "WINSP", name: "windspeed", unit: Some("km/h"), parse: hex_tenths },
    SensorKind { key: "WINGS", name: "windgusts", unit: Some("km/h"), parse: hex_tenths },
    SensorKind { key: "WINDIR", name: "winddirection", unit: Some("°"), parse: wind_direction },
    SensorKind { key: "UV", name: "uv_intensity", unit: Some("UV"), parse: hex_tenths },
    SensorKind { key: "LUX", name: "light_intensity", unit: Some("lux"), parse: hex },
    SensorKind { key: "WATT", name: "watt", unit: Some("W"), parse: hex },
    SensorKind { key: "KWATT", name: "kilowatt", unit: Some("kWh"), parse: hex },
];

fn hex(v: &str) -> Option<SensorValue> {
    u32::from_str_radix(v, 16).ok().map(|n| SensorValue::Number(n as f64))
}

fn hex_tenths(v: &str) -> Option<SensorValue> {
    u32::from_str_radix(v, 16)
        .ok()
        .map(|n| SensorValue::Number(n as f64 / 10.0))
}

/// High bit set means negative; the rest is tenths of a degree.
fn signed_hex_tenths(v: &str) -> Option<SensorValue> {
    let raw = u16::from_str_radix(v, 16).ok()?;
    let magnitude = (raw & 0x7FFF) as f64 / 10.0;
    let value = if raw & 0x8000 != 0 { -magnitude } else { magnitude };
    Some(SensorValue::Number(value))
}

fn decimal(v: &str) -> Option<SensorValue> {
    v.parse::<f64>().ok().map(SensorValue::Number)
}

fn wind_direction(v: &str) -> Option<SensorValue> {
    v.parse::<u8>()
        .ok()
        .map(|n| SensorValue::Number(n as f64 * 22.5))
}

fn lower_text(v: &str) -> Option<SensorValue> {
    Some(SensorValue::Text(v.to_ascii_lowercase()))
}

fn normalize_protocol(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Map a `CMD=` value to the bridge's command vocabulary.
fn normalize_command(raw: &str) -> String {
    match raw.split_once('=') {
        Some((key, level)) if key.eq_ignore_ascii_case("SET_LEVEL") => level.to_string(),
        _ => raw.to_ascii_lowercase(),
    }
}

/// Decode one line (without terminator).
pub fn parse_line(line: &str) -> Result<Packet, ProtocolError> {
    let mut fields: Vec<&str> = line.trim().split(';').collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    if fields.len() < 3 {
        return Err(ProtocolError::Truncated(line.to_string()));
    }
    if fields[0] != NODE_GATEWAY {
        return Err(ProtocolError::UnknownNode(fields[0].to_string()));
    }
    let name = fields[2];
    if name == "OK" {
        return Ok(Packet::Ack);
    }
    if name.starts_with("CMD UNKNOWN") {
        return Ok(Packet::Nack(name.to_string()));
    }

    let attrs: Vec<(&str, &str)> = fields[3..]
        .iter()
        .filter_map(|f| f.split_once('='))
        .collect();
    let attr = |key: &str| attrs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

    let Some(id) = attr("ID") else {
        return Ok(Packet::Events(vec![Event::default()]));
    };

    let mut device_id = format!("{}_{}", normalize_protocol(name), id.to_ascii_lowercase());
    if let Some(switch) = attr("SWITCH") {
        device_id.push('_');
        device_id.push_str(&switch.to_ascii_lowercase());
    }

    let mut events = Vec::new();
    if let Some(cmd) = attr("CMD") {
        events.push(Event::command(device_id.clone(), normalize_command(cmd)));
    }
    for &(key, value) in &attrs {
        let Some(kind) = SENSORS.iter().find(|s| s.key == key) else {
            continue;
        };
        match (kind.parse)(value) {
            Some(v) => events.push(Event::sensor(
                format!("{}_{}", device_id, kind.key.to_ascii_lowercase()),
                kind.name,
                v,
                kind.unit,
            )),
            None => log::debug!("unparseable {}={} for {}", key, value, device_id),
        }
    }
    if events.is_empty() {
        events.push(Event {
            id: Some(device_id),
            ..Default::default()
        });
    }
    Ok(Packet::Events(events))
}

/// Encode a command for `device_id` (`protocol_id[_switch]`) as an outbound line.
pub fn encode_command(device_id: &str, action: &str) -> Result<String, ProtocolError> {
    let parts: Vec<&str> = device_id.split('_').collect();
    if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(ProtocolError::BadDeviceId(device_id.to_string()));
    }
    let bad = |s: &str| s.is_empty() || s.contains([';', '\r', '\n']);
    if bad(action) || parts.iter().any(|p| bad(*p)) {
        return Err(ProtocolError::BadDeviceId(format!("{} {}", device_id, action)));
    }
    Ok(format!(
        "{};{};{};\r\n",
        NODE_MASTER,
        parts.join(";"),
        action.to_ascii_uppercase()
    ))
}
