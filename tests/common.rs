//! Test utilities & fixtures.
//! A scriptable in-memory gateway binding plus helpers for building bridges on top of it.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use rfbridge::bridge::device::{DeviceKind, DeviceSettings};
use rfbridge::bridge::Event;
use rfbridge::config::{Config, DeviceConfig};
use rfbridge::error::{ConnectError, TransportError};
use rfbridge::gateway::{ConnectTarget, Connector, GatewayConnection, LinkChannels};

/// One bound mock link. Records every command handed to it.
pub struct MockConnection {
    sent: Mutex<Vec<(String, String)>>,
    gate: Option<Arc<Semaphore>>,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_payloads(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, p)| p).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, device_id: &str, action: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent
            .lock()
            .unwrap()
            .push((device_id.to_string(), action.to_string()));
        Ok(())
    }
}

#[async_trait]
impl GatewayConnection for MockConnection {
    fn send_command(&self, device_id: &str, action: &str) -> Result<(), TransportError> {
        self.record(device_id, action)
    }

    async fn send_command_ack(&self, device_id: &str, action: &str) -> Result<(), TransportError> {
        self.record(device_id, action)?;
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| TransportError::Closed)?
                .forget();
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Attempt {
    Refuse,
    Hang,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Attempt>,
    attempts: usize,
    links: Vec<(Arc<MockConnection>, LinkChannels)>,
}

/// Connector handing out [`MockConnection`]s. Attempts can be scripted to fail or hang.
pub struct MockConnector {
    state: Mutex<MockState>,
    gate: Option<Arc<Semaphore>>,
}

impl MockConnector {
    /// Acknowledged sends complete at once.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
            gate: None,
        })
    }

    /// Acknowledged sends wait until [`release_acks`](Self::release_acks) is called.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
            gate: Some(Arc::new(Semaphore::new(0))),
        })
    }

    pub fn script(&self, attempts: impl IntoIterator<Item = Attempt>) {
        self.state.lock().unwrap().script.extend(attempts);
    }

    pub fn release_acks(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().unwrap().links.len()
    }

    pub fn connection(&self, index: usize) -> Arc<MockConnection> {
        self.state.lock().unwrap().links[index].0.clone()
    }

    pub fn latest(&self) -> Arc<MockConnection> {
        let state = self.state.lock().unwrap();
        state.links.last().expect("no link yet").0.clone()
    }

    pub fn channels(&self, index: usize) -> LinkChannels {
        self.state.lock().unwrap().links[index].1.clone()
    }

    /// Deliver an inbound event through the newest link.
    pub async fn inject(&self, event: Event) {
        let channels = {
            let state = self.state.lock().unwrap();
            state.links.last().expect("no link yet").1.clone()
        };
        channels.events.send(event).await.expect("router gone");
    }

    /// Report that link `index` dropped.
    pub fn drop_link(&self, index: usize, reason: &str) {
        self.channels(index).notify_disconnect(reason);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _target: &ConnectTarget,
        channels: LinkChannels,
    ) -> Result<Arc<dyn GatewayConnection>, ConnectError> {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            state.script.pop_front()
        };
        match next {
            Some(Attempt::Refuse) => Err(ConnectError::Refused("mock".into())),
            Some(Attempt::Hang) => std::future::pending().await,
            None => {
                let conn = Arc::new(MockConnection {
                    sent: Mutex::new(Vec::new()),
                    gate: self.gate.clone(),
                    closed: AtomicBool::new(false),
                });
                self.state
                    .lock()
                    .unwrap()
                    .links
                    .push((conn.clone(), channels));
                Ok(conn)
            }
        }
    }
}

/// Default config with the given devices, quiet stats and a 1 s reconnect interval.
pub fn config_with(devices: &[(&str, DeviceKind, u32)]) -> Config {
    let mut config = Config::default();
    config.logging.file = None;
    config.bridge.stats_interval_secs = 0;
    config.gateway.reconnect_interval = 1;
    for (id, kind, repetitions) in devices {
        config.devices.insert(
            id.to_string(),
            DeviceConfig {
                kind: *kind,
                signal_repetitions: Some(*repetitions),
                ..Default::default()
            },
        );
    }
    config
}

pub fn settings(id: &str, kind: DeviceKind, repetitions: u32) -> DeviceSettings {
    let mut settings = DeviceSettings::new(id, kind);
    settings.signal_repetitions = repetitions;
    settings
}

/// Poll `cond` until it holds, panicking with `what` after two seconds.
pub async fn eventually<F>(what: &str, mut cond: F)
where
    F: FnMut() -> bool,
{
    let wait = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

/// Await `fut` with a two second cap.
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}
