//! Plugin renderer.
//!
//! Resolves a route or tab to a plugin component and renders it under a
//! supervisor. Each render runs on its own blocking worker; an error or a
//! panic there becomes [`RenderOutcome::Crashed`] and never escapes.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::api::create_host_api;
use crate::client::PanelClient;
use crate::component::RenderScope;
use crate::events::EventBus;
use crate::guard::Identity;
use crate::plugin::LoadedPlugin;
use crate::session::{HostServices, Navigator};
use crate::store::PluginStore;
use crate::view::{PlaceholderKind, Render, View};

/// Why nothing could be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotFoundReason {
    UnknownPlugin { plugin_id: String },
    NoSuchPage { plugin_id: String, path: String },
    MissingComponent { plugin_id: String, component: String },
}

/// Details of a component that failed while rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashReport {
    pub plugin_id: String,
    pub component: String,
    pub message: String,
}

/// Terminal state of one render attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    NotFound(NotFoundReason),
    AccessDenied { plugin_id: String, guard: String },
    Loading,
    Ready(View),
    Crashed(CrashReport),
}

impl RenderOutcome {
    /// The view to show: the rendered tree or a placeholder.
    pub fn into_view(self) -> View {
        match self {
            Self::Ready(view) => view,
            Self::Loading => View::placeholder(PlaceholderKind::Spinner, "Loading", ""),
            Self::NotFound(NotFoundReason::UnknownPlugin { plugin_id }) => View::placeholder(
                PlaceholderKind::NotFound,
                "Plugin Not Found",
                format!("No plugin named '{}' is installed.", plugin_id),
            ),
            Self::NotFound(NotFoundReason::NoSuchPage { plugin_id, path }) => View::placeholder(
                PlaceholderKind::NotFound,
                "Page Not Found",
                format!("Plugin '{}' has no page at '{}'.", plugin_id, path),
            ),
            Self::NotFound(NotFoundReason::MissingComponent {
                plugin_id,
                component,
            }) => View::placeholder(
                PlaceholderKind::Error,
                "Plugin Error",
                format!(
                    "Component '{}' is not available from plugin '{}'.",
                    component, plugin_id
                ),
            ),
            Self::AccessDenied { .. } => View::placeholder(
                PlaceholderKind::AccessDenied,
                "Access Denied",
                "You do not have permission to view this page.",
            ),
            Self::Crashed(report) => View::placeholder(
                PlaceholderKind::Error,
                "Plugin Error",
                format!(
                    "{} in plugin '{}' failed: {}",
                    report.component, report.plugin_id, report.message
                ),
            ),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Split `/plugins/<id>/<rest>` into id and page path.
pub fn parse_plugin_route(route: &str) -> Option<(&str, String)> {
    let rest = route.strip_prefix("/plugins/")?;
    let (plugin_id, path) = match rest.split_once('/') {
        Some((id, path)) => (id, format!("/{}", path)),
        None => (rest, "/".to_string()),
    };
    if plugin_id.is_empty() {
        return None;
    }
    Some((plugin_id, path))
}

/// Renders plugin components.
#[derive(Clone)]
pub struct PluginRenderer {
    store: Arc<PluginStore>,
    services: Arc<dyn HostServices>,
    client: PanelClient,
    events: Arc<EventBus>,
    navigator: Navigator,
}

impl PluginRenderer {
    pub fn new(
        store: Arc<PluginStore>,
        services: Arc<dyn HostServices>,
        client: PanelClient,
        events: Arc<EventBus>,
        navigator: Navigator,
    ) -> Self {
        Self {
            store,
            services,
            client,
            events,
            navigator,
        }
    }

    fn lookup(&self, plugin_id: &str) -> std::result::Result<Arc<LoadedPlugin>, RenderOutcome> {
        match self.store.get(plugin_id) {
            Some(plugin) => Ok(plugin),
            None if self.store.is_loading(plugin_id) => Err(RenderOutcome::Loading),
            None => Err(RenderOutcome::NotFound(NotFoundReason::UnknownPlugin {
                plugin_id: plugin_id.to_string(),
            })),
        }
    }

    fn check_access(&self, plugin: &LoadedPlugin, guard: Option<&str>) -> Option<RenderOutcome> {
        let identity = Identity::current(self.services.as_ref());
        if plugin.evaluate_guard(guard, &identity) {
            return None;
        }
        tracing::debug!(plugin_id = %plugin.id(), guard = ?guard, "Render denied by guard");
        Some(RenderOutcome::AccessDenied {
            plugin_id: plugin.id().to_string(),
            guard: guard.unwrap_or_default().to_string(),
        })
    }

    /// Render the page at `route` (`/plugins/<id>/<path>`).
    pub async fn render_path(&self, route: &str, props: Value) -> RenderOutcome {
        let Some((plugin_id, path)) = parse_plugin_route(route) else {
            return RenderOutcome::NotFound(NotFoundReason::NoSuchPage {
                plugin_id: String::new(),
                path: route.to_string(),
            });
        };

        let plugin = match self.lookup(plugin_id) {
            Ok(plugin) => plugin,
            Err(outcome) => return outcome,
        };

        let Some(page) = plugin.manifest.find_page(&path).cloned() else {
            return RenderOutcome::NotFound(NotFoundReason::NoSuchPage {
                plugin_id: plugin_id.to_string(),
                path,
            });
        };

        if let Some(denied) = self.check_access(&plugin, page.guard.as_deref()) {
            return denied;
        }

        self.render(plugin, &page.component, props).await
    }

    /// Render a plugin tab.
    pub async fn render_tab(&self, plugin_id: &str, tab_id: &str, props: Value) -> RenderOutcome {
        let plugin = match self.lookup(plugin_id) {
            Ok(plugin) => plugin,
            Err(outcome) => return outcome,
        };

        let Some(tab) = plugin.manifest.find_tab(tab_id).cloned() else {
            return RenderOutcome::NotFound(NotFoundReason::NoSuchPage {
                plugin_id: plugin_id.to_string(),
                path: format!("tab:{}", tab_id),
            });
        };

        if let Some(denied) = self.check_access(&plugin, tab.guard.as_deref()) {
            return denied;
        }

        self.render(plugin, &tab.component, props).await
    }

    /// Render a named component without route or guard resolution.
    pub async fn render_component(&self, plugin_id: &str, component: &str, props: Value) -> RenderOutcome {
        match self.lookup(plugin_id) {
            Ok(plugin) => self.render(plugin, component, props).await,
            Err(outcome) => outcome,
        }
    }

    async fn render(&self, plugin: Arc<LoadedPlugin>, name: &str, props: Value) -> RenderOutcome {
        let plugin_id = plugin.id().to_string();

        let Some(component) = plugin.component(name) else {
            return RenderOutcome::NotFound(NotFoundReason::MissingComponent {
                plugin_id,
                component: name.to_string(),
            });
        };

        let scope = RenderScope {
            plugin_id: plugin_id.clone(),
            component: name.to_string(),
            props,
            user: self.services.current_user(),
            is_admin: self.services.is_admin(),
            host: create_host_api(
                plugin_id.clone(),
                self.navigator.clone(),
                self.client.clone(),
                self.services.clone(),
                self.events.clone(),
            ),
            events: self.events.clone(),
        };

        let result = tokio::task::spawn_blocking(move || component.render(&scope)).await;

        let message = match result {
            Ok(Ok(Render::Ready(view))) => return RenderOutcome::Ready(view),
            Ok(Ok(Render::Pending)) => return RenderOutcome::Loading,
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => panic_message(e.into_panic()),
            Err(e) => e.to_string(),
        };

        tracing::error!(
            plugin_id = %plugin_id,
            component = %name,
            error = %message,
            "Plugin component crashed"
        );

        RenderOutcome::Crashed(CrashReport {
            plugin_id,
            component: name.to_string(),
            message,
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "component panicked".to_string()
    }
}

impl std::fmt::Debug for PluginRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRenderer")
            .field("store", &self.store)
            .finish()
    }
}
