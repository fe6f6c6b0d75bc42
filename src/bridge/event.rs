//! Inbound gateway events and their classification.
//!
//! Events arrive from the transport as small key/value records. Only a handful of keys
//! are meaningful to the bridge; everything device specific stays inside the handler
//! that receives the event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing class of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventClass {
    Command,
    Sensor,
    Unknown,
}

impl EventClass {
    /// Classes that take part in routing. `Unknown` events are never dispatched.
    pub const ROUTED: [EventClass; 2] = [EventClass::Command, EventClass::Sensor];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::Command => "command",
            EventClass::Sensor => "sensor",
            EventClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor reading carried by a sensor event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(n) => write!(f, "{}", n),
            SensorValue::Text(s) => f.write_str(s),
        }
    }
}

/// A decoded inbound packet. Absent keys mean "not applicable".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<SensorValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Event {
    pub fn command(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn sensor(
        id: impl Into<String>,
        sensor: impl Into<String>,
        value: SensorValue,
        unit: Option<&str>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            sensor: Some(sensor.into()),
            value: Some(value),
            unit: unit.map(str::to_string),
            ..Default::default()
        }
    }

    /// Command wins over sensor; anything else is unknown.
    pub fn class(&self) -> EventClass {
        if self.command.is_some() {
            EventClass::Command
        } else if self.sensor.is_some() {
            EventClass::Sensor
        } else {
            EventClass::Unknown
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        let mut field = |f: &mut fmt::Formatter<'_>, k: &str, v: &dyn fmt::Display| {
            let sep = if first { "" } else { ", " };
            first = false;
            write!(f, "{}{}: {}", sep, k, v)
        };
        if let Some(v) = &self.id {
            field(f, "id", v)?;
        }
        if let Some(v) = &self.command {
            field(f, "command", v)?;
        }
        if let Some(v) = &self.sensor {
            field(f, "sensor", v)?;
        }
        if let Some(v) = &self.value {
            field(f, "value", v)?;
        }
        if let Some(v) = &self.unit {
            field(f, "unit", v)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_takes_priority_over_sensor() {
        let mut ev = Event::sensor("x", "temperature", SensorValue::Number(1.0), Some("°C"));
        assert_eq!(ev.class(), EventClass::Sensor);
        ev.command = Some("on".into());
        assert_eq!(ev.class(), EventClass::Command);
    }

    #[test]
    fn bare_event_is_unknown() {
        let ev = Event {
            id: Some("nodo_radiofrequencylink".into()),
            ..Default::default()
        };
        assert_eq!(ev.class(), EventClass::Unknown);
        assert_eq!(Event::default().class(), EventClass::Unknown);
    }

    #[test]
    fn serializes_only_present_keys() {
        let ev = Event::command("newkaku_00_1", "off");
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"id":"newkaku_00_1","command":"off"}"#);

        let back: Event = serde_json::from_str(r#"{"id":"a","sensor":"humidity","value":41,"unit":"%"}"#).unwrap();
        assert_eq!(back.class(), EventClass::Sensor);
        assert_eq!(back.value, Some(SensorValue::Number(41.0)));
    }

    #[test]
    fn display_lists_fields() {
        let ev = Event::command("d1", "on");
        assert_eq!(ev.to_string(), "{id: d1, command: on}");
    }
}
