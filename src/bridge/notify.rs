//! Notification bus for state changes, button presses and newly added devices.
//!
//! Publishing never blocks. Subscribers that fall behind lose the oldest messages
//! (`RecvError::Lagged`) rather than slowing down event routing.

use serde::Serialize;
use tokio::sync::broadcast;

use super::device::DeviceState;
use super::event::EventClass;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    StateChanged { device_id: String, state: DeviceState },
    ButtonPressed { device_id: String, command: String },
    DeviceAdded { device_id: String, class: EventClass },
}

impl Notification {
    pub fn device_id(&self) -> &str {
        match self {
            Notification::StateChanged { device_id, .. }
            | Notification::ButtonPressed { device_id, .. }
            | Notification::DeviceAdded { device_id, .. } => device_id,
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers reached; zero is not an error.
    pub fn publish(&self, notification: Notification) -> usize {
        log::trace!("notify {:?}", notification);
        self.tx.send(notification).unwrap_or(0)
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}
