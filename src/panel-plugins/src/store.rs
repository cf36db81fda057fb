//! Completed and in-flight plugin stores.
//!
//! Both maps sit behind one lock so that "is it done, is it loading, or do I
//! start it" is a single atomic decision. Only the coordinator mutates the
//! store; everything else reads completed results.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::plugin::LoadedPlugin;

/// A load that other callers can await.
pub type PendingLoad = Shared<BoxFuture<'static, Arc<LoadedPlugin>>>;

/// Outcome of [`PluginStore::claim`].
pub enum Claim {
    /// Already loaded.
    Completed(Arc<LoadedPlugin>),
    /// Another caller started the load; await it.
    Joined(PendingLoad),
    /// This caller started the load.
    Started(PendingLoad),
}

#[derive(Default)]
struct Stores {
    completed: HashMap<String, Arc<LoadedPlugin>>,
    in_flight: HashMap<String, PendingLoad>,
}

/// Process-scoped plugin store.
#[derive(Default)]
pub struct PluginStore {
    inner: Mutex<Stores>,
}

impl PluginStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed plugin by id.
    pub fn get(&self, plugin_id: &str) -> Option<Arc<LoadedPlugin>> {
        self.inner.lock().completed.get(plugin_id).cloned()
    }

    /// All completed plugins, ordered by id.
    pub fn all(&self) -> Vec<Arc<LoadedPlugin>> {
        let mut plugins: Vec<_> = self.inner.lock().completed.values().cloned().collect();
        plugins.sort_by(|a, b| a.id().cmp(b.id()));
        plugins
    }

    /// Whether a load for `plugin_id` is still running.
    pub fn is_loading(&self, plugin_id: &str) -> bool {
        self.inner.lock().in_flight.contains_key(plugin_id)
    }

    /// Number of completed plugins.
    pub fn len(&self) -> usize {
        self.inner.lock().completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the completed result, join the in-flight load, or register
    /// the load produced by `start`. `start` runs under the store lock and
    /// must not block.
    pub(crate) fn claim(&self, plugin_id: &str, start: impl FnOnce() -> PendingLoad) -> Claim {
        let mut stores = self.inner.lock();

        if let Some(plugin) = stores.completed.get(plugin_id) {
            return Claim::Completed(plugin.clone());
        }
        if let Some(pending) = stores.in_flight.get(plugin_id) {
            return Claim::Joined(pending.clone());
        }

        let pending = start();
        stores
            .in_flight
            .insert(plugin_id.to_string(), pending.clone());
        Claim::Started(pending)
    }

    /// Move a finished load from in-flight to completed.
    ///
    /// The first completed result for an id wins.
    pub(crate) fn complete(&self, plugin: Arc<LoadedPlugin>) -> Arc<LoadedPlugin> {
        let mut stores = self.inner.lock();
        stores.in_flight.remove(plugin.id());
        stores
            .completed
            .entry(plugin.id().to_string())
            .or_insert(plugin)
            .clone()
    }
}

impl std::fmt::Debug for PluginStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stores = self.inner.lock();
        f.debug_struct("PluginStore")
            .field("completed", &stores.completed.len())
            .field("in_flight", &stores.in_flight.len())
            .finish()
    }
}
