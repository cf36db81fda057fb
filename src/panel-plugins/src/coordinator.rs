//! Plugin load coordinator.
//!
//! Loads each plugin at most once per session. Concurrent requests for the
//! same id share one in-flight load; the load itself runs as a spawned task
//! so it finishes and populates the store even if every caller goes away.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;

use crate::bundle::BundleLoader;
use crate::config::RuntimeConfig;
use crate::guard::{Identity, check_guard};
use crate::manifest::{PluginManifest, SidebarItem};
use crate::plugin::LoadedPlugin;
use crate::registry::UiRegistry;
use crate::session::HostServices;
use crate::source::ManifestSource;
use crate::store::{Claim, PendingLoad, PluginStore};

/// Orchestrates manifest and bundle loading.
#[derive(Clone)]
pub struct PluginLoadCoordinator {
    config: Arc<RuntimeConfig>,
    source: ManifestSource,
    bundles: BundleLoader,
    store: Arc<PluginStore>,
    registry: Arc<UiRegistry>,
    services: Arc<dyn HostServices>,
}

impl PluginLoadCoordinator {
    pub fn new(
        config: Arc<RuntimeConfig>,
        source: ManifestSource,
        bundles: BundleLoader,
        store: Arc<PluginStore>,
        registry: Arc<UiRegistry>,
        services: Arc<dyn HostServices>,
    ) -> Self {
        Self {
            config,
            source,
            bundles,
            store,
            registry,
            services,
        }
    }

    /// Load a plugin, or return the existing / in-flight result for its id.
    pub async fn load_plugin(&self, manifest: PluginManifest) -> Arc<LoadedPlugin> {
        let plugin_id = manifest.id.clone();
        let manifest = Arc::new(manifest);

        let pending = match self.store.claim(&plugin_id, || self.spawn_load(manifest)) {
            Claim::Completed(plugin) => {
                tracing::debug!(plugin_id = %plugin_id, "Plugin already loaded");
                return plugin;
            }
            Claim::Joined(pending) => {
                tracing::debug!(plugin_id = %plugin_id, "Joining in-flight plugin load");
                pending
            }
            Claim::Started(pending) => pending,
        };

        pending.await
    }

    /// Fetch manifests and load every enabled plugin in parallel.
    pub async fn load_all_plugins(&self) -> Vec<Arc<LoadedPlugin>> {
        let manifests = self.source.fetch_manifests().await;

        let loads = manifests
            .into_iter()
            .filter(|manifest| {
                let enabled = self.config.is_plugin_enabled(&manifest.id);
                if !enabled {
                    tracing::debug!(plugin_id = %manifest.id, "Plugin disabled by configuration");
                }
                enabled
            })
            .map(|manifest| self.load_plugin(manifest));

        join_all(loads).await
    }

    fn spawn_load(&self, manifest: Arc<PluginManifest>) -> PendingLoad {
        let this = self.clone();
        let fallback = manifest.clone();

        let handle = tokio::spawn(async move {
            let plugin = match AssertUnwindSafe(this.run_load(manifest.clone()))
                .catch_unwind()
                .await
            {
                Ok(plugin) => plugin,
                Err(_) => {
                    tracing::error!(plugin_id = %manifest.id, "Plugin load panicked");
                    LoadedPlugin::failed(manifest, "Plugin load panicked")
                }
            };
            this.store.complete(Arc::new(plugin))
        });

        async move {
            match handle.await {
                Ok(plugin) => plugin,
                Err(e) => {
                    tracing::error!(plugin_id = %fallback.id, error = %e, "Plugin load task failed");
                    Arc::new(LoadedPlugin::failed(fallback, e.to_string()))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_load(&self, manifest: Arc<PluginManifest>) -> LoadedPlugin {
        let plugin_id = manifest.id.as_str();

        let plugin = if manifest.has_bundle {
            match self.bundles.try_load_bundle(plugin_id).await {
                Ok(module) => LoadedPlugin::new(manifest.clone(), Some(module)),
                Err(e) => {
                    tracing::warn!(plugin_id = %plugin_id, error = %e, "Failed to load plugin bundle");
                    LoadedPlugin::failed(manifest.clone(), e.to_string())
                }
            }
        } else {
            LoadedPlugin::new(manifest.clone(), None)
        };

        let identity = Identity::current(self.services.as_ref());
        let items = filter_sidebar_items(&manifest.sidebar_items, &identity, &plugin);
        let inserted = self.registry.add_plugin_sidebar_items(plugin_id, items);

        tracing::info!(
            plugin_id = %plugin_id,
            version = %manifest.version,
            state = %plugin.state(),
            sidebar_items = inserted,
            "Loaded plugin"
        );

        plugin
    }
}

/// Drop items (and children) whose guard fails for `identity`.
fn filter_sidebar_items(
    items: &[SidebarItem],
    identity: &Identity,
    plugin: &LoadedPlugin,
) -> Vec<SidebarItem> {
    items
        .iter()
        .filter(|item| {
            let allowed = check_guard(item.guard.as_deref(), identity, plugin.guard_evaluator());
            if !allowed {
                tracing::debug!(plugin_id = %plugin.id(), item = %item.id, "Sidebar item hidden by guard");
            }
            allowed
        })
        .map(|item| SidebarItem {
            children: filter_sidebar_items(&item.children, identity, plugin),
            ..item.clone()
        })
        .collect()
}

impl std::fmt::Debug for PluginLoadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoadCoordinator")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .finish()
    }
}
