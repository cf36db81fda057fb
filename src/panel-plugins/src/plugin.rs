//! Loaded plugin types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::component::{PluginComponent, PluginModule};
use crate::guard::{GuardEvaluator, Identity, check_guard};
use crate::manifest::PluginManifest;

/// Plugin runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Bundle executed and module available
    Ready,
    /// Plugin declares no bundle
    ManifestOnly,
    /// Plugin declares a bundle but it could not be loaded
    Failed,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::ManifestOnly => write!(f, "manifest-only"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The result of loading one plugin. Created once per plugin id.
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    /// Shared, read-only manifest
    pub manifest: Arc<PluginManifest>,

    /// Component table, absent when the bundle failed or there is none
    pub module: Option<PluginModule>,

    /// Load completion timestamp
    pub loaded_at: DateTime<Utc>,

    /// Why the bundle failed to load
    pub load_error: Option<String>,
}

impl LoadedPlugin {
    /// Create a loaded plugin.
    pub fn new(manifest: Arc<PluginManifest>, module: Option<PluginModule>) -> Self {
        Self {
            manifest,
            module,
            loaded_at: Utc::now(),
            load_error: None,
        }
    }

    /// Create a plugin whose bundle failed.
    pub fn failed(manifest: Arc<PluginManifest>, error: impl Into<String>) -> Self {
        Self {
            load_error: Some(error.into()),
            ..Self::new(manifest, None)
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Current state.
    pub fn state(&self) -> PluginState {
        match (&self.module, self.manifest.has_bundle) {
            (Some(_), _) => PluginState::Ready,
            (None, false) => PluginState::ManifestOnly,
            (None, true) => PluginState::Failed,
        }
    }

    /// Look up an exported component.
    pub fn component(&self, name: &str) -> Option<Arc<dyn PluginComponent>> {
        self.module.as_ref().and_then(|m| m.component(name))
    }

    /// The bundle's guard evaluator, if any.
    pub fn guard_evaluator(&self) -> Option<&dyn GuardEvaluator> {
        self.module.as_ref().and_then(PluginModule::guard_evaluator)
    }

    /// Check a guard for this plugin against `identity`.
    pub fn evaluate_guard(&self, guard: Option<&str>, identity: &Identity) -> bool {
        check_guard(guard, identity, self.guard_evaluator())
    }

    /// Summarise for listings.
    pub fn status(&self) -> PluginStatus {
        PluginStatus {
            id: self.manifest.id.clone(),
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            state: self.state(),
            components: self
                .module
                .as_ref()
                .map(PluginModule::component_names)
                .unwrap_or_default(),
            has_guard_evaluator: self.guard_evaluator().is_some(),
            error: self.load_error.clone(),
            loaded_at: self.loaded_at,
        }
    }
}

/// Plugin status with detailed information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatus {
    pub id: String,
    pub name: String,
    pub version: String,

    /// Current state
    pub state: PluginState,

    /// Exported component names
    pub components: Vec<String>,

    pub has_guard_evaluator: bool,

    /// Error message if in failed state
    pub error: Option<String>,

    pub loaded_at: DateTime<Utc>,
}
