//! Event bus shared by the host and all plugins.
//!
//! Dispatch is synchronous: `emit` calls every subscriber registered at the
//! time of the call, in registration order, before returning. A panicking
//! subscriber is logged and skipped.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{PluginError, Result};

/// Events defined by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEvent {
    // Server lifecycle
    ServerStart,
    ServerStop,
    ServerRestart,
    ServerStatus,
    // File operations
    FileUpload,
    FileDelete,
    FileRename,
    // Navigation
    NavigationChange,
    // Auth
    AuthLogin,
    AuthLogout,
}

impl HostEvent {
    /// Every host event.
    pub const ALL: [HostEvent; 10] = [
        HostEvent::ServerStart,
        HostEvent::ServerStop,
        HostEvent::ServerRestart,
        HostEvent::ServerStatus,
        HostEvent::FileUpload,
        HostEvent::FileDelete,
        HostEvent::FileRename,
        HostEvent::NavigationChange,
        HostEvent::AuthLogin,
        HostEvent::AuthLogout,
    ];

    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerStart => "server:start",
            Self::ServerStop => "server:stop",
            Self::ServerRestart => "server:restart",
            Self::ServerStatus => "server:status",
            Self::FileUpload => "file:upload",
            Self::FileDelete => "file:delete",
            Self::FileRename => "file:rename",
            Self::NavigationChange => "navigation:change",
            Self::AuthLogin => "auth:login",
            Self::AuthLogout => "auth:logout",
        }
    }
}

/// Name of an event channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    /// A host-defined event.
    Host(HostEvent),
    /// A plugin-private channel, `plugin:<id>` or `plugin:<id>:<channel>`.
    Plugin {
        plugin_id: String,
        channel: Option<String>,
    },
}

impl EventName {
    /// The default private channel of a plugin.
    pub fn plugin(plugin_id: impl Into<String>) -> Self {
        Self::Plugin {
            plugin_id: plugin_id.into(),
            channel: None,
        }
    }

    /// A named sub-channel of a plugin.
    pub fn plugin_channel(plugin_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::Plugin {
            plugin_id: plugin_id.into(),
            channel: Some(channel.into()),
        }
    }

    /// Owning plugin of a plugin channel.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Plugin { plugin_id, .. } => Some(plugin_id),
            Self::Host(_) => None,
        }
    }
}

impl From<HostEvent> for EventName {
    fn from(event: HostEvent) -> Self {
        Self::Host(event)
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host(event) => write!(f, "{}", event.as_str()),
            Self::Plugin {
                plugin_id,
                channel: None,
            } => write!(f, "plugin:{}", plugin_id),
            Self::Plugin {
                plugin_id,
                channel: Some(channel),
            } => write!(f, "plugin:{}:{}", plugin_id, channel),
        }
    }
}

impl std::str::FromStr for EventName {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("plugin:") {
            let (plugin_id, channel) = match rest.split_once(':') {
                Some((id, channel)) => (id, Some(channel)),
                None => (rest, None),
            };
            if plugin_id.is_empty() || channel.is_some_and(str::is_empty) {
                return Err(PluginError::NotFound(format!("event '{}'", s)));
            }
            return Ok(Self::Plugin {
                plugin_id: plugin_id.to_string(),
                channel: channel.map(str::to_string),
            });
        }

        HostEvent::ALL
            .iter()
            .find(|e| e.as_str() == s)
            .map(|e| Self::Host(*e))
            .ok_or_else(|| PluginError::NotFound(format!("event '{}'", s)))
    }
}

/// Subscriber callback.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Listener {
    id: Uuid,
    once: bool,
    callback: EventCallback,
}

/// Event bus for publishing and subscribing to events.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventName, Vec<Listener>>>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to an event. The returned handle unsubscribes.
    pub fn on<F>(self: &Arc<Self>, event: impl Into<EventName>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add_listener(event.into(), Arc::new(callback), false)
    }

    /// Subscribe for a single delivery.
    pub fn once<F>(self: &Arc<Self>, event: impl Into<EventName>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add_listener(event.into(), Arc::new(callback), true)
    }

    fn add_listener(
        self: &Arc<Self>,
        event: EventName,
        callback: EventCallback,
        once: bool,
    ) -> Subscription {
        let id = Uuid::new_v4();
        self.listeners
            .write()
            .entry(event.clone())
            .or_default()
            .push(Listener { id, once, callback });

        Subscription {
            id,
            event,
            bus: Arc::downgrade(self),
        }
    }

    /// Remove one subscription. Returns whether it was still registered.
    pub fn off(&self, event: &EventName, subscription_id: Uuid) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };

        let before = list.len();
        list.retain(|l| l.id != subscription_id);
        let removed = list.len() != before;

        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Deliver `payload` to every current subscriber of `event`.
    ///
    /// Returns the number of subscribers invoked.
    pub fn emit(&self, event: &EventName, payload: &Value) -> usize {
        let snapshot: Vec<(Uuid, EventCallback)> = {
            let mut listeners = self.listeners.write();
            let Some(list) = listeners.get_mut(event) else {
                return 0;
            };

            let snapshot = list.iter().map(|l| (l.id, l.callback.clone())).collect();
            list.retain(|l| !l.once);
            if list.is_empty() {
                listeners.remove(event);
            }
            snapshot
        };

        // Lock released: callbacks may subscribe, unsubscribe or emit.
        for (id, callback) in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                tracing::error!(
                    event = %event,
                    subscription = %id,
                    "Event subscriber panicked"
                );
            }
        }

        snapshot.len()
    }

    /// Serialize `payload` and emit it.
    pub fn emit_json<T: Serialize>(&self, event: &EventName, payload: &T) -> Result<usize> {
        let value = serde_json::to_value(payload)?;
        Ok(self.emit(event, &value))
    }

    /// Drop the subscribers of one event, or of every event.
    pub fn clear(&self, event: Option<&EventName>) {
        let mut listeners = self.listeners.write();
        match event {
            Some(event) => {
                listeners.remove(event);
            }
            None => listeners.clear(),
        }
    }

    /// Number of subscribers for an event.
    pub fn listener_count(&self, event: &EventName) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }
}

/// Handle returned by [`EventBus::on`] and [`EventBus::once`].
///
/// Dropping the handle does not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    id: Uuid,
    event: EventName,
    bus: Weak<EventBus>,
}

impl Subscription {
    /// Get the subscription ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the event this subscription listens to.
    pub fn event(&self) -> &EventName {
        &self.event
    }

    /// Unsubscribe. Idempotent; a no-op once the bus is gone.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.off(&self.event, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event", &self.event)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter(bus: &Arc<EventBus>, event: EventName) -> (Arc<AtomicU32>, Subscription) {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let sub = bus.on(event, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn test_parse_event_names() {
        assert_eq!(
            "server:start".parse::<EventName>().unwrap(),
            EventName::Host(HostEvent::ServerStart)
        );
        assert_eq!(
            "plugin:weather".parse::<EventName>().unwrap(),
            EventName::plugin("weather")
        );
        assert_eq!(
            "plugin:weather:refresh".parse::<EventName>().unwrap(),
            EventName::plugin_channel("weather", "refresh")
        );
        assert!("plugin:".parse::<EventName>().is_err());
        assert!("server:explode".parse::<EventName>().is_err());
    }

    #[test]
    fn test_event_name_round_trips_through_display() {
        for event in HostEvent::ALL {
            let name = EventName::Host(event);
            assert_eq!(name.to_string().parse::<EventName>().unwrap(), name);
        }
    }

    #[test]
    fn test_emit_reaches_subscribers_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let seen = seen.clone();
            bus.on(HostEvent::ServerStatus, move |payload| {
                seen.lock().unwrap().push((n, payload["state"].clone()));
            });
        }

        let delivered = bus.emit(
            &HostEvent::ServerStatus.into(),
            &json!({ "state": "running" }),
        );

        assert_eq!(delivered, 3);
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(seen.iter().all(|(_, s)| s == "running"));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (count, sub) = counter(&bus, EventName::plugin("weather"));

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());

        bus.emit(&EventName::plugin("weather"), &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(&EventName::plugin("weather")), 0);
    }

    #[test]
    fn test_off_by_id() {
        let bus = EventBus::new();
        let event = EventName::Host(HostEvent::FileUpload);
        let (count, sub) = counter(&bus, event.clone());

        assert!(bus.off(&event, sub.id()));
        bus.emit(&event, &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        bus.once(HostEvent::AuthLogin, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let event = EventName::Host(HostEvent::AuthLogin);
        bus.emit(&event, &Value::Null);
        bus.emit(&event, &Value::Null);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(&event), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let event = EventName::Host(HostEvent::ServerStop);

        bus.on(event.clone(), |_| panic!("subscriber bug"));
        let (count, _sub) = counter(&bus, event.clone());

        let delivered = bus.emit(&event, &Value::Null);

        assert_eq!(delivered, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_plugin_channels_are_isolated() {
        let bus = EventBus::new();
        let (weather, _a) = counter(&bus, EventName::plugin("weather"));
        let (tools, _b) = counter(&bus, EventName::plugin("admin-tools"));

        bus.emit(&EventName::plugin("weather"), &Value::Null);

        assert_eq!(weather.load(Ordering::SeqCst), 1);
        assert_eq!(tools.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscriber_may_emit_reentrantly() {
        let bus = EventBus::new();
        let (count, _sub) = counter(&bus, EventName::plugin("b"));

        let inner = bus.clone();
        bus.on(EventName::plugin("a"), move |payload| {
            inner.emit(&EventName::plugin("b"), payload);
        });

        bus.emit(&EventName::plugin("a"), &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        let (_c1, _s1) = counter(&bus, EventName::plugin("a"));
        let (_c2, _s2) = counter(&bus, EventName::plugin("b"));

        bus.clear(Some(&EventName::plugin("a")));
        assert_eq!(bus.listener_count(&EventName::plugin("a")), 0);
        assert_eq!(bus.listener_count(&EventName::plugin("b")), 1);

        bus.clear(None);
        assert_eq!(bus.listener_count(&EventName::plugin("b")), 0);
    }

    #[test]
    fn test_emit_json() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Value::Null));
        let s = seen.clone();
        bus.on(HostEvent::FileRename, move |payload| {
            *s.lock().unwrap() = payload.clone();
        });

        #[derive(Serialize)]
        struct Rename {
            from: String,
            to: String,
        }

        bus.emit_json(
            &HostEvent::FileRename.into(),
            &Rename {
                from: "a.txt".to_string(),
                to: "b.txt".to_string(),
            },
        )
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), json!({ "from": "a.txt", "to": "b.txt" }));
    }
}
