//! # Bridge Core
//!
//! Everything between the gateway binding and the devices:
//!
//! - [`connection`]: connection manager and the shared connection context
//! - [`registry`]: (event class, device id) to handler lookup and unknown-device hooks
//! - [`router`]: classifies inbound events and dispatches them
//! - [`dispatch`]: per-device command sending with cancellable repeats
//! - [`device`]: the handler contract and the generic switch, light and sensor devices
//! - [`notify`]: broadcast bus for state changes and button presses
//! - [`server`]: the [`Bridge`] that owns all of the above
//!
//! ```text
//! gateway link ──events──▶ router ──▶ registry ──▶ device handlers
//!      ▲                                                │
//!      └──────────── connection context ◀── dispatcher ◀┘
//! ```

pub mod connection;
pub mod device;
pub mod dispatch;
pub mod event;
pub mod notify;
pub mod registry;
pub mod router;
pub mod server;

pub use connection::{ConnectionContext, ConnectionState};
pub use device::{Command, Device, DeviceHandler, DeviceKind, DeviceSettings};
pub use event::{Event, EventClass, SensorValue};
pub use notify::Notification;
pub use server::Bridge;
