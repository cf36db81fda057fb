//! Plugin host.
//!
//! The process-scoped service object that owns the plugin store, registry,
//! event bus and renderer. Create one at application boot and pass it by
//! reference; consumers never touch the stores directly.

use std::sync::Arc;

use serde_json::Value;

use crate::Result;
use crate::api::{HostApi, create_host_api};
use crate::bundle::{BundleExecutor, BundleLoader};
use crate::client::PanelClient;
use crate::component::PluginComponent;
use crate::config::RuntimeConfig;
use crate::coordinator::PluginLoadCoordinator;
use crate::events::EventBus;
use crate::guard::{Identity, check_guard};
use crate::manifest::{PluginManifest, PluginPage, PluginTab, SidebarItem, TabTarget};
use crate::plugin::{LoadedPlugin, PluginStatus};
use crate::registry::{PageEntry, SidebarEntry, TabEntry, UiRegistry};
use crate::renderer::{PluginRenderer, RenderOutcome};
use crate::runtime::WasmRuntime;
use crate::session::{HostServices, Navigator, logging_navigator};
use crate::source::ManifestSource;
use crate::store::PluginStore;

/// Entry point to the plugin runtime.
pub struct PluginHost {
    config: Arc<RuntimeConfig>,
    client: PanelClient,
    services: Arc<dyn HostServices>,
    events: Arc<EventBus>,
    store: Arc<PluginStore>,
    registry: Arc<UiRegistry>,
    coordinator: PluginLoadCoordinator,
    renderer: PluginRenderer,
}

impl PluginHost {
    /// Create a host that executes bundles with the WASM runtime.
    pub fn new(config: RuntimeConfig, services: Arc<dyn HostServices>) -> Result<Self> {
        let runtime = WasmRuntime::new(&config)?;
        Self::with_executor(config, services, Arc::new(runtime), logging_navigator())
    }

    /// Create a host with a custom bundle executor and navigator.
    pub fn with_executor(
        config: RuntimeConfig,
        services: Arc<dyn HostServices>,
        executor: Arc<dyn BundleExecutor>,
        navigator: Navigator,
    ) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let client = PanelClient::new(&config)?;
        let events = EventBus::new();
        let store = Arc::new(PluginStore::new());
        let registry = Arc::new(UiRegistry::new(store.clone(), services.clone()));

        let coordinator = PluginLoadCoordinator::new(
            config.clone(),
            ManifestSource::new(client.clone()),
            BundleLoader::new(client.clone(), executor),
            store.clone(),
            registry.clone(),
            services.clone(),
        );

        let renderer = PluginRenderer::new(
            store.clone(),
            services.clone(),
            client.clone(),
            events.clone(),
            navigator,
        );

        Ok(Self {
            config,
            client,
            services,
            events,
            store,
            registry,
            coordinator,
            renderer,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Fetch manifests and load every enabled plugin.
    pub async fn load_all_plugins(&self) -> Vec<Arc<LoadedPlugin>> {
        self.coordinator.load_all_plugins().await
    }

    /// Load one plugin (deduplicated by id).
    pub async fn load_plugin(&self, manifest: PluginManifest) -> Arc<LoadedPlugin> {
        self.coordinator.load_plugin(manifest).await
    }

    /// Completed plugin by id.
    pub fn plugin(&self, plugin_id: &str) -> Option<Arc<LoadedPlugin>> {
        self.store.get(plugin_id)
    }

    /// Status of every completed plugin, ordered by id.
    pub fn plugin_statuses(&self) -> Vec<PluginStatus> {
        self.store.all().iter().map(|p| p.status()).collect()
    }

    pub fn get_pages(&self) -> Vec<PageEntry> {
        self.registry.get_pages()
    }

    pub fn get_tabs(&self, target: TabTarget) -> Vec<TabEntry> {
        self.registry.get_tabs(target)
    }

    pub fn get_sidebar_items(&self) -> Vec<SidebarEntry> {
        self.registry.get_sidebar_items()
    }

    pub fn register_native_page(&self, page: PluginPage) {
        self.registry.register_native_page(page);
    }

    pub fn register_native_tab(&self, tab: PluginTab) {
        self.registry.register_native_tab(tab);
    }

    pub fn register_native_sidebar_item(&self, item: SidebarItem) -> bool {
        self.registry.register_native_sidebar_item(item)
    }

    /// Exported component of a loaded plugin.
    pub fn get_plugin_component(&self, plugin_id: &str, name: &str) -> Option<Arc<dyn PluginComponent>> {
        self.store.get(plugin_id)?.component(name)
    }

    /// Check `guard` for the current user, delegating non-admin tokens to
    /// the plugin's evaluator. Unknown plugins have no evaluator.
    pub fn evaluate_plugin_guard(&self, plugin_id: &str, guard: Option<&str>) -> bool {
        let identity = Identity::current(self.services.as_ref());
        match self.store.get(plugin_id) {
            Some(plugin) => plugin.evaluate_guard(guard, &identity),
            None => check_guard(guard, &identity, None),
        }
    }

    /// Host API bound to `plugin_id`.
    pub fn create_host_api(&self, plugin_id: &str, navigate: Navigator) -> HostApi {
        create_host_api(
            plugin_id,
            navigate,
            self.client.clone(),
            self.services.clone(),
            self.events.clone(),
        )
    }

    /// Render the plugin page at `route`.
    pub async fn render_path(&self, route: &str, props: Value) -> RenderOutcome {
        self.renderer.render_path(route, props).await
    }

    /// Render a plugin tab.
    pub async fn render_tab(&self, plugin_id: &str, tab_id: &str, props: Value) -> RenderOutcome {
        self.renderer.render_tab(plugin_id, tab_id, props).await
    }

    /// Render a component by name.
    pub async fn render_component(&self, plugin_id: &str, component: &str, props: Value) -> RenderOutcome {
        self.renderer.render_component(plugin_id, component, props).await
    }

    /// Shared event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<UiRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("registry", &self.registry)
            .finish()
    }
}
