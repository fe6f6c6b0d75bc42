//! Device registry: which handlers want which identifiers.
//!
//! Two levels of lookup, event class first and identifier second, each ending in an
//! ordered list of handlers. Aliases are stored as extra identifiers pointing at the
//! same handler. A per-class hook catches events nobody registered for.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};

use super::device::DeviceHandler;
use super::event::{Event, EventClass};

pub type HandlerRef = Arc<dyn DeviceHandler>;

/// Called with the raw event when no handler matches its identifier.
pub type UnknownDeviceHook = Arc<dyn Fn(&Event) + Send + Sync>;

fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Default)]
pub struct DeviceRegistry {
    lookup: HashMap<EventClass, HashMap<String, Vec<HandlerRef>>>,
    hooks: HashMap<EventClass, UnknownDeviceHook>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `identifier` and every alias for one event class.
    ///
    /// Returns how many new (identifier, handler) entries were added; registering the
    /// same handler twice under an identifier adds nothing.
    pub fn register(
        &mut self,
        class: EventClass,
        identifier: &str,
        aliases: &[String],
        handler: HandlerRef,
    ) -> usize {
        if class == EventClass::Unknown {
            warn!("refusing to register {} for unroutable event class", identifier);
            return 0;
        }
        let by_id = self.lookup.entry(class).or_default();
        let mut added = 0;
        for id in std::iter::once(identifier).chain(aliases.iter().map(String::as_str)) {
            let handlers = by_id.entry(id.to_string()).or_default();
            if handlers.iter().any(|h| same_handler(h, &handler)) {
                continue;
            }
            handlers.push(handler.clone());
            added += 1;
        }
        debug!(
            "registered {} ({} aliases) for {} events, {} new entries",
            identifier,
            aliases.len(),
            class,
            added
        );
        added
    }

    /// Remove every identifier and alias entry of `handler`, across all classes.
    pub fn unregister(&mut self, handler: &HandlerRef) -> usize {
        let mut removed = 0;
        for by_id in self.lookup.values_mut() {
            by_id.retain(|_, handlers| {
                let before = handlers.len();
                handlers.retain(|h| !same_handler(h, handler));
                removed += before - handlers.len();
                !handlers.is_empty()
            });
        }
        debug!("unregistered {}: {} entries removed", handler.device_id(), removed);
        removed
    }

    /// Install the hook for a class, replacing any previous one.
    pub fn set_unknown_device_hook(&mut self, class: EventClass, hook: UnknownDeviceHook) {
        if self.hooks.insert(class, hook).is_some() {
            debug!("replaced unknown device hook for {} events", class);
        }
    }

    pub fn clear_unknown_device_hook(&mut self, class: EventClass) {
        self.hooks.remove(&class);
    }

    pub fn unknown_device_hook(&self, class: EventClass) -> Option<UnknownDeviceHook> {
        self.hooks.get(&class).cloned()
    }

    /// Handlers registered for (class, identifier), in registration order.
    pub fn lookup(&self, class: EventClass, identifier: &str) -> Vec<HandlerRef> {
        self.lookup
            .get(&class)
            .and_then(|by_id| by_id.get(identifier))
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, class: EventClass, identifier: &str) -> bool {
        self.lookup
            .get(&class)
            .is_some_and(|by_id| by_id.contains_key(identifier))
    }

    /// Number of distinct identifiers (primary ids and aliases) for a class.
    pub fn identifier_count(&self, class: EventClass) -> usize {
        self.lookup.get(&class).map_or(0, HashMap::len)
    }
}

/// Cloneable handle to one registry shared by the router, hooks and the host.
///
/// The lock is only held while the map is read or edited, never while a handler runs,
/// so handlers and hooks may register or unregister from inside a dispatch.
#[derive(Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<DeviceRegistry>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, DeviceRegistry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, DeviceRegistry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler under its own id, aliases and event class.
    pub fn register_handler(&self, handler: HandlerRef) -> usize {
        let class = handler.event_class();
        let id = handler.device_id().to_string();
        let aliases = handler.aliases().to_vec();
        self.write().register(class, &id, &aliases, handler)
    }

    pub fn unregister(&self, handler: &HandlerRef) -> usize {
        self.write().unregister(handler)
    }

    pub fn set_unknown_device_hook(&self, class: EventClass, hook: UnknownDeviceHook) {
        self.write().set_unknown_device_hook(class, hook)
    }

    pub fn lookup(&self, class: EventClass, identifier: &str) -> Vec<HandlerRef> {
        self.read().lookup(class, identifier)
    }
}
