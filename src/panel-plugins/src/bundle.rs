//! Bundle loader.
//!
//! Fetches a plugin's compiled UI code from the backend and executes it to
//! obtain its [`PluginModule`]. Failures are logged and reported as `None`;
//! this layer does not cache (see the coordinator for load-once semantics).

use std::sync::Arc;

use crate::client::PanelClient;
use crate::component::PluginModule;
use crate::{PluginError, Result};

/// Backend path of a plugin bundle.
pub fn bundle_path(plugin_id: &str) -> String {
    format!("/plugins/{}/ui/bundle.js", plugin_id)
}

/// Turns bundle source into a module table.
///
/// Runs on a blocking worker thread.
pub trait BundleExecutor: Send + Sync {
    fn execute(&self, plugin_id: &str, source: &[u8]) -> Result<PluginModule>;
}

/// Fetches and executes plugin bundles.
#[derive(Clone)]
pub struct BundleLoader {
    client: PanelClient,
    executor: Arc<dyn BundleExecutor>,
}

impl BundleLoader {
    /// Create a new bundle loader.
    pub fn new(client: PanelClient, executor: Arc<dyn BundleExecutor>) -> Self {
        Self { client, executor }
    }

    /// Fetch and execute a bundle, degrading every failure to `None`.
    pub async fn load_bundle(&self, plugin_id: &str) -> Option<PluginModule> {
        match self.try_load_bundle(plugin_id).await {
            Ok(module) => {
                tracing::debug!(
                    plugin_id = %plugin_id,
                    components = ?module.component_names(),
                    "Bundle executed"
                );
                Some(module)
            }
            Err(e) => {
                tracing::warn!(plugin_id = %plugin_id, error = %e, "Failed to load plugin bundle");
                None
            }
        }
    }

    /// Fetch and execute a bundle, reporting why it failed.
    pub async fn try_load_bundle(&self, plugin_id: &str) -> Result<PluginModule> {
        let source = self
            .client
            .get_bytes(&bundle_path(plugin_id))
            .await
            .map_err(|e| PluginError::load_error(plugin_id, e.to_string()))?;

        if source.is_empty() {
            return Err(PluginError::load_error(plugin_id, "Bundle is empty"));
        }

        let executor = self.executor.clone();
        let id = plugin_id.to_string();
        let module = tokio::task::spawn_blocking(move || executor.execute(&id, &source))
            .await
            .map_err(|e| {
                PluginError::execution_error(plugin_id, format!("Bundle execution panicked: {}", e))
            })??;

        if module.components().is_empty() && module.guard_evaluator().is_none() {
            return Err(PluginError::load_error(plugin_id, "Bundle exported nothing"));
        }

        Ok(module)
    }
}
