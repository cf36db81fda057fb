//! Host API facade handed to plugin code.
//!
//! A [`HostApi`] is bound to one plugin id. Every network call it makes is
//! routed under `/plugins/<id>/`, the plugin's private backend namespace.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;

use crate::client::PanelClient;
use crate::events::{EventBus, EventName};
use crate::session::{HostServices, Navigator, Notification, NotificationKind, User};
use crate::{PluginError, Result};

/// The capability object given to plugin code.
#[derive(Clone)]
pub struct HostApi {
    plugin_id: String,
    client: PanelClient,
    services: Arc<dyn HostServices>,
    navigator: Navigator,
    events: Arc<EventBus>,
}

/// Create a Host API bound to `plugin_id`.
pub fn create_host_api(
    plugin_id: impl Into<String>,
    navigate: Navigator,
    client: PanelClient,
    services: Arc<dyn HostServices>,
    events: Arc<EventBus>,
) -> HostApi {
    HostApi {
        plugin_id: plugin_id.into(),
        client,
        services,
        navigator: navigate,
        events,
    }
}

impl HostApi {
    /// Plugin this API is bound to.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Resolve a plugin-relative path into the plugin's namespace.
    ///
    /// Absolute URLs and `..` segments (literal or percent-encoded) are
    /// refused, and the resolved URL must still lie below `/plugins/<id>/`.
    pub fn scoped_path(&self, path: &str) -> Result<String> {
        if path.contains("://") || path.starts_with("//") {
            return Err(PluginError::PermissionDenied(format!(
                "Plugin '{}' cannot address absolute URL '{}'",
                self.plugin_id, path
            )));
        }

        let relative = path.trim_start_matches('/');
        let path_only = relative.split(['?', '#']).next().unwrap_or_default();
        if path_only.split('/').any(is_unsafe_segment) {
            return Err(self.escape_denied(path));
        }

        let scoped = format!("/plugins/{}/{}", self.plugin_id, relative);
        if !self.stays_in_namespace(&scoped) {
            return Err(self.escape_denied(path));
        }

        Ok(scoped)
    }

    fn escape_denied(&self, path: &str) -> PluginError {
        PluginError::PermissionDenied(format!(
            "Plugin '{}' cannot escape its namespace with '{}'",
            self.plugin_id, path
        ))
    }

    /// Resolve `scoped` the way the HTTP client will and check the
    /// normalised path against the namespace prefix.
    fn stays_in_namespace(&self, scoped: &str) -> bool {
        let (Ok(base), Ok(resolved)) = (
            url::Url::parse(self.client.base_url()),
            url::Url::parse(&self.client.url(scoped)),
        ) else {
            return false;
        };

        let prefix = format!(
            "{}/plugins/{}/",
            base.path().trim_end_matches('/'),
            self.plugin_id
        );
        resolved.origin() == base.origin() && resolved.path().starts_with(&prefix)
    }

    /// Send a request inside the plugin namespace and unwrap the envelope.
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let scoped = self.scoped_path(path)?;
        tracing::debug!(plugin = %self.plugin_id, method = %method, path = %scoped, "Plugin API request");

        self.client
            .request(method, &scoped, body)
            .await
            .inspect_err(|e| {
                tracing::debug!(plugin = %self.plugin_id, path = %scoped, error = %e, "Plugin API request failed");
            })
    }

    /// GET `path`.
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path, None).await
    }

    /// POST `body` to `path`.
    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.request(Method::POST, path, body).await
    }

    /// PUT `body` to `path`.
    pub async fn put(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.request(Method::PUT, path, body).await
    }

    /// DELETE `path`.
    pub async fn delete(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.request(Method::DELETE, path, body).await
    }

    /// Show a transient notification through the host.
    pub fn notify(&self, title: &str, message: &str, kind: NotificationKind) {
        self.services.notify(Notification {
            title: title.to_string(),
            message: message.to_string(),
            kind,
        });
    }

    /// Current user.
    pub fn get_user(&self) -> Option<User> {
        self.services.current_user()
    }

    /// Whether the current user is a host administrator.
    pub fn is_admin(&self) -> bool {
        self.services.is_admin()
    }

    /// Ask the host to navigate.
    pub fn navigate(&self, path: &str) {
        (self.navigator)(path);
    }

    /// Shared event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Emit on this plugin's private channel (`plugin:<id>` or `plugin:<id>:<channel>`).
    pub fn emit_private(&self, channel: Option<&str>, payload: &Value) -> usize {
        let event = match channel {
            Some(channel) => EventName::plugin_channel(&self.plugin_id, channel),
            None => EventName::plugin(&self.plugin_id),
        };
        self.events.emit(&event, payload)
    }
}

/// A path segment that is a dot segment or hides a separator once decoded.
fn is_unsafe_segment(segment: &str) -> bool {
    let lowered = segment.to_ascii_lowercase();
    if lowered.contains('\\') || lowered.contains("%5c") || lowered.contains("%2f") {
        return true;
    }
    let decoded = lowered.replace("%2e", ".");
    decoded == "." || decoded == ".."
}

impl std::fmt::Debug for HostApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostApi")
            .field("plugin_id", &self.plugin_id)
            .field("client", &self.client)
            .finish()
    }
}
