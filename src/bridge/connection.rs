//! Connection manager and the shared connection context.
//!
//! The [`ConnectionContext`] is the one place every command dispatcher looks for the
//! live gateway connection and the acknowledgment policy. The [`ConnectionManager`]
//! is the only writer: it publishes a fresh handle after each successful connect and
//! clears it the moment the link drops, so a send can never reach a dead link.
//!
//! Reconnect policy:
//!
//! - a failed connect schedules the next attempt after `reconnect_interval`;
//! - an unexpected disconnect schedules one immediate attempt;
//! - nothing is retried once shutdown has started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::event::Event;
use crate::error::ConnectError;
use crate::gateway::{ConnectTarget, Connector, Disconnect, GatewayConnection, LinkChannels};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct ContextInner {
    active: RwLock<Option<Arc<dyn GatewayConnection>>>,
    wait_for_ack: AtomicBool,
    state: watch::Sender<ConnectionState>,
}

/// Process-wide view of the gateway connection, shared by every dispatcher.
#[derive(Clone)]
pub struct ConnectionContext {
    inner: Arc<ContextInner>,
}

impl ConnectionContext {
    pub fn new(wait_for_ack: bool) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ContextInner {
                active: RwLock::new(None),
                wait_for_ack: AtomicBool::new(wait_for_ack),
                state,
            }),
        }
    }

    /// The connection bound right now, if any.
    pub fn current(&self) -> Option<Arc<dyn GatewayConnection>> {
        self.inner
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn wait_for_ack(&self) -> bool {
        self.inner.wait_for_ack.load(Ordering::SeqCst)
    }

    pub fn set_wait_for_ack(&self, wait: bool) {
        self.inner.wait_for_ack.store(wait, Ordering::SeqCst);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the context reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| *s == state).await;
    }

    /// Swap in a new connection, returning the one it replaces.
    pub(crate) fn publish(
        &self,
        conn: Arc<dyn GatewayConnection>,
    ) -> Option<Arc<dyn GatewayConnection>> {
        let old = self
            .inner
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(conn);
        self.set_state(ConnectionState::Connected);
        old
    }

    /// Drop the current connection so new sends fail fast.
    pub(crate) fn invalidate(&self) -> Option<Arc<dyn GatewayConnection>> {
        let old = self
            .inner
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.set_state(ConnectionState::Disconnected);
        old
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
    }
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub target: ConnectTarget,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    settings: ManagerSettings,
    context: ConnectionContext,
    events: mpsc::Sender<Event>,
    disconnect_tx: mpsc::UnboundedSender<Disconnect>,
    disconnect_rx: mpsc::UnboundedReceiver<Disconnect>,
    generation: u64,
    retry_at: Option<Instant>,
    stopping: bool,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: ManagerSettings,
        context: ConnectionContext,
        events: mpsc::Sender<Event>,
    ) -> Self {
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            settings,
            context,
            events,
            disconnect_tx,
            disconnect_rx,
            generation: 0,
            retry_at: None,
            stopping: false,
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// When the next reconnect attempt is due, if one is scheduled.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// One connection attempt. Failures are not retried here; a retry is scheduled and
    /// the error handed back for logging.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.stopping {
            return Ok(());
        }
        metrics::inc_connect_attempts();
        self.retry_at = None;
        self.generation += 1;
        self.context.set_state(ConnectionState::Connecting);
        info!("initiating gateway connection to {}", self.settings.target);

        let channels = LinkChannels {
            generation: self.generation,
            events: self.events.clone(),
            disconnects: self.disconnect_tx.clone(),
        };
        let attempt = self.connector.connect(&self.settings.target, channels);
        let result = match tokio::time::timeout(self.settings.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(self.settings.connect_timeout)),
        };

        match result {
            Ok(conn) => {
                if let Some(old) = self.context.publish(conn) {
                    old.close();
                }
                info!("connected to gateway at {}", self.settings.target);
                Ok(())
            }
            Err(e) => {
                metrics::inc_connect_failures();
                self.context.set_state(ConnectionState::Disconnected);
                error!(
                    "error connecting to gateway, reconnecting in {:?}: {}",
                    self.settings.reconnect_interval, e
                );
                self.schedule_reconnect(self.settings.reconnect_interval);
                Err(e)
            }
        }
    }

    /// Link dropped underneath us.
    pub fn on_disconnect(&mut self, disconnect: Disconnect) {
        if disconnect.generation != self.generation {
            debug!(
                "ignoring disconnect from replaced link (generation {} != {})",
                disconnect.generation, self.generation
            );
            return;
        }
        metrics::inc_disconnects();
        if let Some(old) = self.context.invalidate() {
            old.close();
        }
        if self.stopping {
            return;
        }
        warn!("disconnected from gateway ({}), reconnecting", disconnect.reason);
        self.schedule_reconnect(Duration::ZERO);
    }

    /// Stop reconnecting and close the active link. Safe to call at any time.
    pub fn shutdown(&mut self) {
        self.stopping = true;
        self.retry_at = None;
        if let Some(conn) = self.context.invalidate() {
            conn.close();
        }
        info!("gateway connection shut down");
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        if self.stopping || self.retry_at.is_some() {
            return;
        }
        self.retry_at = Some(Instant::now() + delay);
    }

    /// Connect once, then keep the connection alive from a background task.
    ///
    /// The result of the first attempt is returned alongside the handle; a failure has
    /// already scheduled a retry.
    pub async fn start(mut self) -> (ConnectionHandle, Result<(), ConnectError>) {
        let first = self.connect().await;
        let context = self.context.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        (
            ConnectionHandle {
                shutdown_tx,
                task,
                context,
            },
            first,
        )
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(disconnect) = self.disconnect_rx.recv() => self.on_disconnect(disconnect),
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    let _ = self.connect().await;
                }
            }
        }
        self.shutdown();
    }
}

/// Owner's handle on a running [`ConnectionManager`]. Dropping it also stops the manager.
pub struct ConnectionHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    context: ConnectionContext,
}

impl ConnectionHandle {
    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Suppress reconnects, close the link and wait for the manager task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("connection manager task ended abnormally: {}", e);
        }
    }
}
