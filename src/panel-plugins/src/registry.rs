//! UI injection registry.
//!
//! Aggregates the pages, tabs and sidebar entries contributed by loaded
//! plugins and by the host itself. Sidebar entries are filtered by guard
//! before they are inserted; pages and tabs are derived from the plugin
//! store on every read so they always reflect the current user.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::guard::{Identity, check_guard};
use crate::manifest::{PluginPage, PluginTab, SidebarItem, TabTarget};
use crate::session::HostServices;
use crate::store::PluginStore;

/// A sidebar entry with a host-unique key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SidebarEntry {
    /// `plugin-<pluginId>-<itemId>` for plugin entries, the raw id otherwise
    pub key: String,

    /// Owning plugin; `None` for host-native entries
    pub plugin_id: Option<String>,

    /// The item, children already guard-filtered
    pub item: SidebarItem,
}

/// A routable page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageEntry {
    pub plugin_id: Option<String>,

    /// Absolute route, `/plugins/<id><path>` for plugin pages
    pub route: String,

    pub page: PluginPage,
}

/// A tab injected into a host screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabEntry {
    pub plugin_id: Option<String>,
    pub key: String,
    pub tab: PluginTab,
}

/// Composite registry key for a plugin contribution.
pub fn plugin_key(plugin_id: &str, item_id: &str) -> String {
    format!("plugin-{}-{}", plugin_id, item_id)
}

/// Route of a plugin page.
pub fn plugin_route(plugin_id: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    format!("/plugins/{}/{}", plugin_id, path)
}

#[derive(Default)]
struct Contributions {
    sidebar: Vec<SidebarEntry>,
    /// Sidebar key -> owning plugin (`None` for host entries)
    sidebar_keys: HashMap<String, Option<String>>,
    native_pages: Vec<PageEntry>,
    native_tabs: Vec<TabEntry>,
}

/// Registry of UI contributions. Additive only: entries are never removed.
pub struct UiRegistry {
    store: Arc<PluginStore>,
    services: Arc<dyn HostServices>,
    inner: RwLock<Contributions>,
}

impl UiRegistry {
    /// Create a registry reading completed plugins from `store`.
    pub fn new(store: Arc<PluginStore>, services: Arc<dyn HostServices>) -> Self {
        Self {
            store,
            services,
            inner: RwLock::new(Contributions::default()),
        }
    }

    /// Insert already filtered sidebar items for a plugin.
    ///
    /// Returns the number inserted; keys already present are skipped.
    pub fn add_plugin_sidebar_items(&self, plugin_id: &str, items: Vec<SidebarItem>) -> usize {
        let mut inner = self.inner.write();
        let mut inserted = 0;

        for item in items {
            let key = plugin_key(plugin_id, &item.id);
            if let Some(owner) = inner.sidebar_keys.get(&key) {
                tracing::warn!(
                    plugin_id = %plugin_id,
                    item = %item.id,
                    key = %key,
                    owner = owner.as_deref().unwrap_or("host"),
                    "Sidebar key already taken, skipping"
                );
                continue;
            }
            inner
                .sidebar_keys
                .insert(key.clone(), Some(plugin_id.to_string()));
            inner.sidebar.push(SidebarEntry {
                key,
                plugin_id: Some(plugin_id.to_string()),
                item,
            });
            inserted += 1;
        }

        inserted
    }

    /// Register a host-owned sidebar item. Returns `false` on a key clash.
    pub fn register_native_sidebar_item(&self, item: SidebarItem) -> bool {
        let mut inner = self.inner.write();
        if inner.sidebar_keys.contains_key(&item.id) {
            return false;
        }
        inner.sidebar_keys.insert(item.id.clone(), None);
        inner.sidebar.push(SidebarEntry {
            key: item.id.clone(),
            plugin_id: None,
            item,
        });
        true
    }

    /// Register a host-owned page. Its path is used as the route.
    pub fn register_native_page(&self, page: PluginPage) {
        self.inner.write().native_pages.push(PageEntry {
            plugin_id: None,
            route: page.path.clone(),
            page,
        });
    }

    /// Register a host-owned tab.
    pub fn register_native_tab(&self, tab: PluginTab) {
        self.inner.write().native_tabs.push(TabEntry {
            plugin_id: None,
            key: tab.id.clone(),
            tab,
        });
    }

    /// All routable pages. Guards are checked at route resolution.
    pub fn get_pages(&self) -> Vec<PageEntry> {
        let mut pages = self.inner.read().native_pages.clone();

        for plugin in self.store.all() {
            pages.extend(plugin.manifest.pages.iter().map(|page| PageEntry {
                plugin_id: Some(plugin.id().to_string()),
                route: plugin_route(plugin.id(), &page.path),
                page: page.clone(),
            }));
        }

        pages
    }

    /// Tabs for `target` the current user may see, ordered by `order`.
    pub fn get_tabs(&self, target: TabTarget) -> Vec<TabEntry> {
        let identity = Identity::current(self.services.as_ref());

        let mut tabs: Vec<TabEntry> = self
            .inner
            .read()
            .native_tabs
            .iter()
            .filter(|entry| entry.tab.target == target)
            .filter(|entry| check_guard(entry.tab.guard.as_deref(), &identity, None))
            .cloned()
            .collect();

        for plugin in self.store.all() {
            for tab in plugin.manifest.tabs.iter().filter(|t| t.target == target) {
                if !plugin.evaluate_guard(tab.guard.as_deref(), &identity) {
                    tracing::debug!(plugin_id = %plugin.id(), tab = %tab.id, "Tab hidden by guard");
                    continue;
                }
                tabs.push(TabEntry {
                    plugin_id: Some(plugin.id().to_string()),
                    key: plugin_key(plugin.id(), &tab.id),
                    tab: tab.clone(),
                });
            }
        }

        tabs.sort_by_key(|entry| entry.tab.order.unwrap_or(0));
        tabs
    }

    /// Sidebar entries ordered by `order`, children included.
    pub fn get_sidebar_items(&self) -> Vec<SidebarEntry> {
        let mut entries = self.inner.read().sidebar.clone();
        entries.sort_by_key(|entry| entry.item.order.unwrap_or(0));
        for entry in &mut entries {
            sort_children(&mut entry.item.children);
        }
        entries
    }
}

fn sort_children(items: &mut [SidebarItem]) {
    items.sort_by_key(|item| item.order.unwrap_or(0));
    for item in items {
        sort_children(&mut item.children);
    }
}

impl std::fmt::Debug for UiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("UiRegistry")
            .field("sidebar", &inner.sidebar.len())
            .field("native_pages", &inner.native_pages.len())
            .field("native_tabs", &inner.native_tabs.len())
            .finish()
    }
}
