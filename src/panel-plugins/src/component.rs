//! Plugin components and the module table a bundle exports.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::Result;
use crate::api::HostApi;
use crate::events::EventBus;
use crate::guard::GuardEvaluator;
use crate::session::User;
use crate::view::Render;

/// Everything a component receives for one render.
#[derive(Clone)]
pub struct RenderScope {
    /// Owning plugin
    pub plugin_id: String,

    /// Component being rendered
    pub component: String,

    /// Props supplied by the host (route params, server id, ...)
    pub props: Value,

    /// User at the time of the render
    pub user: Option<User>,

    pub is_admin: bool,

    /// Host API bound to `plugin_id`
    pub host: HostApi,

    /// Shared event bus
    pub events: Arc<EventBus>,
}

/// A UI component exported by a plugin bundle.
///
/// `render` runs on a supervised worker thread; returning an error or
/// panicking crashes only the component's own subtree.
pub trait PluginComponent: Send + Sync {
    fn render(&self, scope: &RenderScope) -> Result<Render>;
}

impl<F> PluginComponent for F
where
    F: Fn(&RenderScope) -> Result<Render> + Send + Sync,
{
    fn render(&self, scope: &RenderScope) -> Result<Render> {
        self(scope)
    }
}

/// Exported component name -> component.
pub type ComponentTable = HashMap<String, Arc<dyn PluginComponent>>;

/// What executing a bundle yields.
#[derive(Clone, Default)]
pub struct PluginModule {
    components: ComponentTable,
    guard_evaluator: Option<Arc<dyn GuardEvaluator>>,
}

impl PluginModule {
    /// Create an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component.
    pub fn with_component(
        mut self,
        name: impl Into<String>,
        component: impl PluginComponent + 'static,
    ) -> Self {
        self.components.insert(name.into(), Arc::new(component));
        self
    }

    /// Add an already shared component.
    pub fn insert_component(&mut self, name: impl Into<String>, component: Arc<dyn PluginComponent>) {
        self.components.insert(name.into(), component);
    }

    /// Set the guard evaluator.
    pub fn with_guard_evaluator(mut self, evaluator: impl GuardEvaluator + 'static) -> Self {
        self.guard_evaluator = Some(Arc::new(evaluator));
        self
    }

    /// Set an already shared guard evaluator.
    pub fn set_guard_evaluator(&mut self, evaluator: Arc<dyn GuardEvaluator>) {
        self.guard_evaluator = Some(evaluator);
    }

    /// Look up a component by exported name.
    pub fn component(&self, name: &str) -> Option<Arc<dyn PluginComponent>> {
        self.components.get(name).cloned()
    }

    /// Exported component names, sorted.
    pub fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.keys().cloned().collect();
        names.sort();
        names
    }

    /// The component table.
    pub fn components(&self) -> &ComponentTable {
        &self.components
    }

    /// The bundle's own guard evaluator, if it exports one.
    pub fn guard_evaluator(&self) -> Option<&dyn GuardEvaluator> {
        self.guard_evaluator.as_deref()
    }
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("components", &self.component_names())
            .field("guard_evaluator", &self.guard_evaluator.is_some())
            .finish()
    }
}
