//! Event router: classifies inbound events and hands them to registered handlers.

use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::event::{Event, EventClass};
use super::registry::SharedRegistry;
use crate::metrics;

/// What happened to one routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Neither command nor sensor; logged and dropped.
    Unclassified,
    /// Delivered to this many handlers (some may have returned errors).
    Dispatched(usize),
    /// No handler matched; the class hook was invoked.
    HookInvoked,
    /// No handler matched and no hook is installed.
    Dropped,
}

#[derive(Clone)]
pub struct EventRouter {
    registry: SharedRegistry,
    tap: Option<broadcast::Sender<Event>>,
}

impl EventRouter {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            tap: None,
        }
    }

    /// Copy every inbound event, routed or not, to `tap` before routing it.
    pub fn with_tap(mut self, tap: broadcast::Sender<Event>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Route one event.
    ///
    /// Handlers run in registration order. The registry lock is released before any
    /// handler or hook is called.
    pub fn route(&self, event: &Event) -> RouteOutcome {
        metrics::inc_events_received();
        if let Some(tap) = &self.tap {
            let _ = tap.send(event.clone());
        }
        let class = event.class();
        debug!("event of type {}: {}", class, event);

        if class == EventClass::Unknown {
            metrics::inc_events_unclassified();
            debug!("unhandled event of type: {}", class);
            return RouteOutcome::Unclassified;
        }

        let handlers = match event.id() {
            Some(id) => self.registry.lookup(class, id),
            None => Vec::new(),
        };

        if !handlers.is_empty() {
            for handler in &handlers {
                debug!("passing event to {}", handler.device_id());
                if let Err(e) = handler.handle_event(event) {
                    metrics::inc_handler_errors();
                    warn!(
                        "handler {} failed on event {}: {:#}",
                        handler.device_id(),
                        event,
                        e
                    );
                }
            }
            metrics::inc_events_dispatched();
            return RouteOutcome::Dispatched(handlers.len());
        }

        metrics::inc_events_unknown_device();
        let hook = self.registry.read().unknown_device_hook(class);
        match hook {
            Some(hook) => {
                debug!("device id {:?} not known, passing to new device hook", event.id());
                hook(event);
                RouteOutcome::HookInvoked
            }
            None => {
                debug!("device id {:?} not known and no hook for {}", event.id(), class);
                RouteOutcome::Dropped
            }
        }
    }

    /// Consume events from the transport channel until every sender is gone.
    ///
    /// A single task means events are handled strictly one at a time, in arrival
    /// order.
    pub fn spawn(self, mut events: mpsc::Receiver<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("event router started");
            while let Some(event) = events.recv().await {
                self.route(&event);
            }
            info!("event channel closed, router stopping");
        })
    }
}
