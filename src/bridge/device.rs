//! Device handlers: the contract the router calls into, and the two generic device
//! classes the bridge ships with.
//!
//! A [`SwitchableDevice`] (switch or dimmable light) both receives remote commands and
//! sends commands of its own through a [`CommandDispatcher`]. A [`SensorDevice`] only
//! records the latest reading.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use log::debug;
use serde::{Deserialize, Serialize};

use super::connection::ConnectionContext;
use super::dispatch::CommandDispatcher;
use super::event::{Event, EventClass, SensorValue};
use super::notify::{Notification, Notifier};
use super::registry::HandlerRef;
use crate::error::SendError;

/// Anything the router can deliver events to.
///
/// `handle_event` runs on the routing task and must not block. Errors are logged by
/// the router and never stop delivery to other handlers.
pub trait DeviceHandler: Send + Sync {
    fn device_id(&self) -> &str;

    fn aliases(&self) -> &[String] {
        &[]
    }

    fn event_class(&self) -> EventClass;

    fn handle_event(&self, event: &Event) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Switch,
    Light,
    Sensor,
}

impl DeviceKind {
    pub fn event_class(&self) -> EventClass {
        match self {
            DeviceKind::Switch | DeviceKind::Light => EventClass::Command,
            DeviceKind::Sensor => EventClass::Sensor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub id: String,
    pub name: Option<String>,
    pub kind: DeviceKind,
    pub aliases: Vec<String>,
    pub fire_event: bool,
    pub signal_repetitions: u32,
}

impl DeviceSettings {
    pub fn new(id: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            aliases: Vec::new(),
            fire_event: false,
            signal_repetitions: 1,
        }
    }

    /// Display name, falling back to the device id.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    /// Nothing sent or received yet.
    #[default]
    Unknown,
    On,
    Off,
}

/// Snapshot carried by [`Notification::StateChanged`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceState {
    Switch {
        power: Power,
        #[serde(skip_serializing_if = "Option::is_none")]
        level: Option<u8>,
    },
    Sensor {
        sensor: String,
        value: SensorValue,
        #[serde(skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
}

/// Logical command for a switchable device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    On,
    Off,
    /// Gateway dim level, 0..=15.
    Dim(u8),
}

impl Command {
    pub fn payload(&self) -> String {
        match self {
            Command::On => "on".to_string(),
            Command::Off => "off".to_string(),
            Command::Dim(level) => level.to_string(),
        }
    }

    /// Interpret a command picked up from a remote or another controller.
    pub fn from_remote(command: &str) -> Option<Self> {
        match command {
            "on" | "allon" => Some(Command::On),
            "off" | "alloff" => Some(Command::Off),
            n => n.parse::<u8>().ok().map(Command::Dim),
        }
    }
}

/// 0..=255 brightness to the gateway's 0..=15 dim level.
pub fn brightness_to_dim_level(brightness: u8) -> u8 {
    brightness / 17
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SwitchStatus {
    power: Power,
    level: Option<u8>,
}

pub struct SwitchableDevice {
    settings: DeviceSettings,
    status: Mutex<SwitchStatus>,
    dispatcher: CommandDispatcher,
    notifier: Notifier,
}

impl SwitchableDevice {
    pub fn new(
        settings: DeviceSettings,
        context: ConnectionContext,
        notifier: Notifier,
    ) -> Arc<Self> {
        let dispatcher =
            CommandDispatcher::new(settings.id.clone(), settings.signal_repetitions, context);
        Arc::new(Self {
            settings,
            status: Mutex::new(SwitchStatus::default()),
            dispatcher,
            notifier,
        })
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn name(&self) -> &str {
        self.settings.name()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    fn status(&self) -> SwitchStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn power(&self) -> Power {
        self.status().power
    }

    /// True until the first command is sent or received.
    pub fn assumed_state(&self) -> bool {
        self.power() == Power::Unknown
    }

    pub fn is_on(&self) -> bool {
        self.power() == Power::On
    }

    pub fn dim_level(&self) -> Option<u8> {
        self.status().level
    }

    pub fn state(&self) -> DeviceState {
        let status = self.status();
        DeviceState::Switch {
            power: status.power,
            level: status.level,
        }
    }

    pub async fn turn_on(&self) -> Result<(), SendError> {
        self.send_command(Command::On).await
    }

    pub async fn turn_off(&self) -> Result<(), SendError> {
        self.send_command(Command::Off).await
    }

    pub async fn dim(&self, brightness: u8) -> Result<(), SendError> {
        self.send_command(Command::Dim(brightness_to_dim_level(brightness))).await
    }

    /// Apply `command` locally, then transmit it with the configured repetitions.
    ///
    /// The local state is optimistic: a failed send leaves it as is.
    pub async fn send_command(&self, command: Command) -> Result<(), SendError> {
        if matches!(command, Command::Dim(_)) && self.settings.kind != DeviceKind::Light {
            return Err(SendError::UnsupportedCommand(format!(
                "{} cannot dim",
                self.settings.id
            )));
        }
        let payload = command.payload();
        self.apply(command);
        self.dispatcher.send(&payload).await
    }

    fn apply(&self, command: Command) {
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            match command {
                Command::On => status.power = Power::On,
                Command::Off => status.power = Power::Off,
                Command::Dim(level) => {
                    status.power = Power::On;
                    status.level = Some(level);
                }
            }
        }
        self.notifier.publish(Notification::StateChanged {
            device_id: self.settings.id.clone(),
            state: self.state(),
        });
    }
}

impl DeviceHandler for SwitchableDevice {
    fn device_id(&self) -> &str {
        &self.settings.id
    }

    fn aliases(&self) -> &[String] {
        &self.settings.aliases
    }

    fn event_class(&self) -> EventClass {
        EventClass::Command
    }

    fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        let command = event
            .command
            .as_deref()
            .ok_or_else(|| anyhow!("event for {} carries no command", self.settings.id))?;

        // A remote changed the device; our queued repeats are now stale.
        self.dispatcher.cancel_pending();

        match Command::from_remote(command) {
            Some(c) => self.apply(c),
            None => debug!("{}: ignoring remote command {:?}", self.settings.id, command),
        }

        if self.settings.fire_event {
            self.notifier.publish(Notification::ButtonPressed {
                device_id: self.settings.id.clone(),
                command: command.to_string(),
            });
            debug!("fired bus event for {}: {}", self.settings.id, command);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Reading {
    sensor: String,
    value: SensorValue,
    unit: Option<String>,
}

pub struct SensorDevice {
    settings: DeviceSettings,
    reading: Mutex<Option<Reading>>,
    notifier: Notifier,
}

impl SensorDevice {
    pub fn new(settings: DeviceSettings, notifier: Notifier) -> Arc<Self> {
        Arc::new(Self {
            settings,
            reading: Mutex::new(None),
            notifier,
        })
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn name(&self) -> &str {
        self.settings.name()
    }

    pub fn value(&self) -> Option<SensorValue> {
        self.lock_reading().as_ref().map(|r| r.value.clone())
    }

    pub fn unit(&self) -> Option<String> {
        self.lock_reading().as_ref().and_then(|r| r.unit.clone())
    }

    pub fn state(&self) -> Option<DeviceState> {
        self.lock_reading().as_ref().map(|r| DeviceState::Sensor {
            sensor: r.sensor.clone(),
            value: r.value.clone(),
            unit: r.unit.clone(),
        })
    }

    fn lock_reading(&self) -> std::sync::MutexGuard<'_, Option<Reading>> {
        self.reading.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceHandler for SensorDevice {
    fn device_id(&self) -> &str {
        &self.settings.id
    }

    fn aliases(&self) -> &[String] {
        &self.settings.aliases
    }

    fn event_class(&self) -> EventClass {
        EventClass::Sensor
    }

    fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        let (Some(sensor), Some(value)) = (&event.sensor, &event.value) else {
            return Err(anyhow!("sensor event for {} without a value", self.settings.id));
        };
        *self.lock_reading() = Some(Reading {
            sensor: sensor.clone(),
            value: value.clone(),
            unit: event.unit.clone(),
        });
        if let Some(state) = self.state() {
            self.notifier.publish(Notification::StateChanged {
                device_id: self.settings.id.clone(),
                state,
            });
        }
        Ok(())
    }
}

/// A device owned by the bridge, by class.
#[derive(Clone)]
pub enum Device {
    Switchable(Arc<SwitchableDevice>),
    Sensor(Arc<SensorDevice>),
}

impl Device {
    pub fn build(
        settings: DeviceSettings,
        context: &ConnectionContext,
        notifier: &Notifier,
    ) -> Self {
        match settings.kind {
            DeviceKind::Switch | DeviceKind::Light => Device::Switchable(SwitchableDevice::new(
                settings,
                context.clone(),
                notifier.clone(),
            )),
            DeviceKind::Sensor => Device::Sensor(SensorDevice::new(settings, notifier.clone())),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Device::Switchable(d) => d.device_id(),
            Device::Sensor(d) => d.device_id(),
        }
    }

    pub fn handler(&self) -> HandlerRef {
        match self {
            Device::Switchable(d) => d.clone(),
            Device::Sensor(d) => d.clone(),
        }
    }

    pub fn as_switchable(&self) -> Option<&Arc<SwitchableDevice>> {
        match self {
            Device::Switchable(d) => Some(d),
            Device::Sensor(_) => None,
        }
    }
}
