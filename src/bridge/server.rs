//! The bridge: wires the connection manager, router, registry and devices together and
//! owns their background tasks.
//!
//! ```rust,no_run
//! use rfbridge::bridge::Bridge;
//! use rfbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut bridge = Bridge::new(config)?;
//!     bridge.run().await
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::connection::{ConnectionContext, ConnectionHandle, ConnectionManager};
use super::device::{Device, DeviceKind, DeviceSettings};
use super::event::{Event, EventClass};
use super::notify::{Notification, Notifier};
use super::registry::SharedRegistry;
use super::router::EventRouter;
use crate::config::{Config, DeviceDefaults};
use crate::gateway::link::LinkConnector;
use crate::gateway::Connector;
use crate::metrics;

type DeviceMap = Arc<RwLock<BTreeMap<String, Device>>>;

struct Running {
    connection: ConnectionHandle,
    router: JoinHandle<()>,
    stats: Option<JoinHandle<()>>,
}

pub struct Bridge {
    config: Config,
    registry: SharedRegistry,
    context: ConnectionContext,
    notifier: Notifier,
    events_tap: broadcast::Sender<Event>,
    connector: Arc<dyn Connector>,
    devices: DeviceMap,
    running: Option<Running>,
}

impl Bridge {
    /// Bridge talking to the gateway configured in `config.gateway`.
    pub fn new(config: Config) -> Result<Self> {
        let connector = Arc::new(LinkConnector::new(config.gateway.link_settings()));
        Self::with_connector(config, connector)
    }

    /// Bridge using a caller-supplied transport binding.
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let (events_tap, _) = broadcast::channel(config.bridge.event_queue);
        let bridge = Self {
            registry: SharedRegistry::new(),
            context: ConnectionContext::new(config.gateway.wait_for_ack),
            notifier: Notifier::new(config.bridge.event_queue),
            events_tap,
            connector,
            devices: Arc::new(RwLock::new(BTreeMap::new())),
            running: None,
            config,
        };

        for settings in bridge.config.device_settings() {
            bridge.add_device(settings);
        }
        if bridge.config.bridge.automatic_add {
            for class in EventClass::ROUTED {
                bridge.install_automatic_add(class);
            }
        }
        info!(
            "bridge ready with {} configured devices (automatic add {})",
            bridge.config.devices.len(),
            if bridge.config.bridge.automatic_add { "on" } else { "off" }
        );
        Ok(bridge)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// State changes, button presses and newly added devices.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Every inbound event as it reaches the router.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events_tap.subscribe()
    }

    pub fn device(&self, id: &str) -> Option<Device> {
        read_devices(&self.devices).get(id).cloned()
    }

    pub fn device_ids(&self) -> Vec<String> {
        read_devices(&self.devices).keys().cloned().collect()
    }

    /// Build a device, register it for routing and keep it.
    pub fn add_device(&self, settings: DeviceSettings) -> Device {
        add_device(&self.devices, &self.registry, &self.context, &self.notifier, settings)
    }

    /// Unregister and drop a device, cancelling any queued repeats.
    pub fn remove_device(&self, id: &str) -> bool {
        let removed = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(device) => {
                if let Some(switch) = device.as_switchable() {
                    switch.dispatcher().cancel_pending();
                }
                self.registry.unregister(&device.handler());
                info!("removed device {}", id);
                true
            }
            None => false,
        }
    }

    /// Hand events for unknown ids of `class` to a freshly created device.
    fn install_automatic_add(&self, class: EventClass) {
        let devices = self.devices.clone();
        let registry = self.registry.clone();
        let context = self.context.clone();
        let notifier = self.notifier.clone();
        let defaults: DeviceDefaults = self.config.device_defaults.clone();
        let kind = match class {
            EventClass::Sensor => DeviceKind::Sensor,
            _ => DeviceKind::Light,
        };

        self.registry.set_unknown_device_hook(
            class,
            Arc::new(move |event: &Event| {
                let Some(id) = event.id() else {
                    debug!("{} event without id, nothing to add", class);
                    return;
                };
                if read_devices(&devices).contains_key(id) {
                    debug!("{} already known under another class, not adding", id);
                    return;
                }
                info!("adding new {} device {}", class, id);
                let device = add_device(
                    &devices,
                    &registry,
                    &context,
                    &notifier,
                    defaults.settings_for(id, kind),
                );
                notifier.publish(Notification::DeviceAdded {
                    device_id: id.to_string(),
                    class,
                });
                let handler = device.handler();
                if let Err(e) = handler.handle_event(event) {
                    warn!("new device {} failed on its first event: {:#}", id, e);
                }
            }),
        );
    }

    /// Start the connection manager and router. Returns once the first connection
    /// attempt has finished; a failed attempt is retried in the background.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(anyhow!("bridge already started"));
        }
        let (events_tx, events_rx) = mpsc::channel(self.config.bridge.event_queue);
        let router = EventRouter::new(self.registry.clone())
            .with_tap(self.events_tap.clone())
            .spawn(events_rx);

        let manager = ConnectionManager::new(
            self.connector.clone(),
            self.config.gateway.manager_settings()?,
            self.context.clone(),
            events_tx,
        );
        let (connection, first) = manager.start().await;
        if let Err(e) = first {
            warn!("gateway not reachable yet, will keep retrying: {}", e);
        }

        let stats = match self.config.bridge.stats_interval_secs {
            0 => None,
            secs => Some(tokio::spawn(log_stats(Duration::from_secs(secs)))),
        };

        self.running = Some(Running {
            connection,
            router,
            stats,
        });
        info!("bridge started");
        Ok(())
    }

    /// Stop reconnecting, close the gateway link and stop background tasks.
    /// Does nothing if the bridge is not running.
    pub async fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("bridge shutting down");
        running.connection.shutdown().await;
        if let Some(stats) = running.stats {
            stats.abort();
        }
        for device in read_devices(&self.devices).values() {
            if let Some(switch) = device.as_switchable() {
                switch.dispatcher().cancel_pending();
            }
        }

        // The router ends once the last link drops its event sender.
        let mut router = running.router;
        if tokio::time::timeout(Duration::from_secs(1), &mut router).await.is_err() {
            debug!("router still draining, aborting it");
            router.abort();
        }
        info!("bridge stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start, wait for Ctrl-C, shut down.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {}", e);
        } else {
            info!("Received shutdown signal");
        }
        self.shutdown().await;
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // The hooks hold clones of the registry they live in.
        let mut registry = self.registry.write();
        for class in EventClass::ROUTED {
            registry.clear_unknown_device_hook(class);
        }
    }
}

fn read_devices(devices: &DeviceMap) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Device>> {
    devices.read().unwrap_or_else(PoisonError::into_inner)
}

fn add_device(
    devices: &DeviceMap,
    registry: &SharedRegistry,
    context: &ConnectionContext,
    notifier: &Notifier,
    settings: DeviceSettings,
) -> Device {
    let device = Device::build(settings, context, notifier);
    let previous = devices
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(device.id().to_string(), device.clone());
    if let Some(previous) = previous {
        registry.unregister(&previous.handler());
    }
    registry.register_handler(device.handler());
    device
}

async fn log_stats(every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let s = metrics::snapshot();
        debug!(
            "stats: events rx={} dispatched={} unclassified={} unknown_device={} handler_errors={} | tx={} tx_failed={} repeats_cancelled={} | connects={} connect_failures={} disconnects={}",
            s.events_received,
            s.events_dispatched,
            s.events_unclassified,
            s.events_unknown_device,
            s.handler_errors,
            s.transmissions,
            s.transmissions_failed,
            s.repetitions_cancelled,
            s.connect_attempts,
            s.connect_failures,
            s.disconnects
        );
    }
}
