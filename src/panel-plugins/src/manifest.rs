//! Plugin manifest definitions.
//!
//! Manifests are served by the backend as JSON and describe every UI surface
//! a plugin contributes: routable pages, tabs and sidebar entries. They are
//! immutable once fetched.

use serde::{Deserialize, Serialize};

use crate::{PluginError, Result};

/// Plugin manifest - the declarative description of a plugin's UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin identifier, stable across reloads
    pub id: String,

    /// Human-readable plugin name
    pub name: String,

    /// Plugin version, display only
    pub version: String,

    /// Whether the plugin ships executable UI code
    #[serde(default)]
    pub has_bundle: bool,

    /// Routable pages, scoped under `/plugins/<id>`
    #[serde(default)]
    pub pages: Vec<PluginPage>,

    /// Tabs injected into host screens
    #[serde(default)]
    pub tabs: Vec<PluginTab>,

    /// Sidebar navigation entries
    #[serde(default)]
    pub sidebar_items: Vec<SidebarItem>,
}

impl PluginManifest {
    /// Create a manifest with no UI contributions.
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            has_bundle: false,
            pages: Vec::new(),
            tabs: Vec::new(),
            sidebar_items: Vec::new(),
        }
    }

    /// Parse a manifest from JSON.
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            PluginError::invalid_manifest("unknown", format!("Failed to parse JSON: {}", e))
        })
    }

    /// Validate the manifest.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PluginError::invalid_manifest(
                &self.id,
                "Plugin ID cannot be empty",
            ));
        }

        // Plugin IDs end up in URLs and composite keys
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PluginError::invalid_manifest(
                &self.id,
                "Plugin ID can only contain alphanumeric characters, hyphens, and underscores",
            ));
        }

        for page in &self.pages {
            if page.component.is_empty() {
                return Err(PluginError::invalid_manifest(
                    &self.id,
                    format!("Page {} has no component", page.path),
                ));
            }
        }

        for tab in &self.tabs {
            if tab.id.is_empty() || tab.component.is_empty() {
                return Err(PluginError::invalid_manifest(
                    &self.id,
                    "Tab id and component cannot be empty",
                ));
            }
        }

        for item in &self.sidebar_items {
            if item.id.is_empty() {
                return Err(PluginError::invalid_manifest(
                    &self.id,
                    "Sidebar item id cannot be empty",
                ));
            }
        }

        Ok(())
    }

    /// Find the page registered for a path relative to the plugin namespace.
    ///
    /// `""` and `"/"` both address the root page; trailing slashes are
    /// ignored.
    pub fn find_page(&self, path: &str) -> Option<&PluginPage> {
        let wanted = normalize_path(path);
        self.pages.iter().find(|p| normalize_path(&p.path) == wanted)
    }

    /// Find a tab by id.
    pub fn find_tab(&self, tab_id: &str) -> Option<&PluginTab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

/// A routable page contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginPage {
    /// Path relative to `/plugins/<id>`
    pub path: String,

    /// Exported component name
    pub component: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    /// Guard token re-checked on every route resolution
    #[serde(default)]
    pub guard: Option<String>,
}

/// Where a tab is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TabTarget {
    /// Server detail screen
    Server,
    /// User settings screen
    UserSettings,
}

impl std::fmt::Display for TabTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::UserSettings => write!(f, "user-settings"),
        }
    }
}

impl std::str::FromStr for TabTarget {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "server" => Ok(Self::Server),
            "user-settings" => Ok(Self::UserSettings),
            other => Err(PluginError::NotFound(format!("tab target '{}'", other))),
        }
    }
}

/// A tab contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginTab {
    pub id: String,

    /// Exported component name
    pub component: String,

    pub target: TabTarget,

    pub label: String,

    #[serde(default)]
    pub icon: Option<String>,

    /// Sort key, ascending; defaults to 0
    #[serde(default)]
    pub order: Option<i32>,

    #[serde(default)]
    pub guard: Option<String>,
}

/// Sidebar section an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidebarSection {
    Nav,
    Platform,
    Admin,
}

/// A sidebar entry, possibly with nested children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidebarItem {
    pub id: String,

    pub label: String,

    #[serde(default)]
    pub icon: Option<String>,

    pub href: String,

    pub section: SidebarSection,

    /// Sort key, ascending; defaults to 0
    #[serde(default)]
    pub order: Option<i32>,

    #[serde(default)]
    pub guard: Option<String>,

    #[serde(default)]
    pub children: Vec<SidebarItem>,
}
