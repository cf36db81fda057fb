//! # Panel Plugin Runtime
//!
//! Runtime extension system for the Panel operations console. Third-party UI
//! bundles are discovered, fetched, executed, authorized and rendered inside
//! the host at runtime, without rebuilding the host.
//!
//! ## Features
//!
//! - **Manifests**: Plugins declare pages, tabs and sidebar items; the backend serves them
//! - **WASM Bundles**: Plugin UI code is a WebAssembly module with a fixed export contract
//! - **Load Once**: Concurrent loads of one plugin share a single fetch
//! - **Guards**: `"admin"` is host-reserved; other tokens are decided by the plugin
//! - **Host API**: Plugin HTTP calls are confined to `/plugins/<id>/`
//! - **Event Bus**: Host events plus private `plugin:<id>` channels
//! - **Crash Isolation**: A failing component only replaces its own subtree
//!
//! ## Bundle Contract
//!
//! ```text
//! exports:  memory, panel_alloc(len) -> ptr, panel_exports() -> packed
//!           panel_render(ptr, len) -> packed          (optional)
//!           panel_evaluate_guard(ptr, len) -> i32     (optional)
//! imports:  panel.log, panel.notify, panel.navigate, panel.emit, panel.request
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use panel_plugins::{PluginHost, RuntimeConfig, SessionState, User};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Arc::new(SessionState::with_user(User::new("u-1", "alice")));
//!     let host = PluginHost::new(RuntimeConfig::default(), session)?;
//!
//!     host.load_all_plugins().await;
//!     for entry in host.get_sidebar_items() {
//!         println!("{}: {}", entry.key, entry.item.label);
//!     }
//!
//!     let view = host.render_path("/plugins/weather/", serde_json::Value::Null).await.into_view();
//!     println!("{}", serde_json::to_string_pretty(&view)?);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bundle;
pub mod client;
pub mod component;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod guard;
pub mod host;
pub mod manifest;
pub mod plugin;
pub mod registry;
pub mod renderer;
pub mod runtime;
pub mod session;
pub mod source;
pub mod store;
pub mod view;

// Re-exports for convenience
pub use api::{HostApi, create_host_api};
pub use bundle::{BundleExecutor, BundleLoader};
pub use client::PanelClient;
pub use component::{ComponentTable, PluginComponent, PluginModule, RenderScope};
pub use config::RuntimeConfig;
pub use coordinator::PluginLoadCoordinator;
pub use error::{PluginError, Result};
pub use events::{EventBus, EventName, HostEvent, Subscription};
pub use guard::{ADMIN_GUARD, GuardEvaluator, Identity, check_guard};
pub use host::PluginHost;
pub use manifest::{
    PluginManifest, PluginPage, PluginTab, SidebarItem, SidebarSection, TabTarget,
};
pub use plugin::{LoadedPlugin, PluginState, PluginStatus};
pub use registry::{PageEntry, SidebarEntry, TabEntry, UiRegistry};
pub use renderer::{CrashReport, NotFoundReason, PluginRenderer, RenderOutcome};
pub use runtime::WasmRuntime;
pub use session::{
    HostServices, MAX_NOTIFICATIONS, Navigator, Notification, NotificationKind, SessionState, User,
    logging_navigator,
};
pub use source::ManifestSource;
pub use store::PluginStore;
pub use view::{PlaceholderKind, Render, View};

/// Plugin runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Backend path listing installed plugin manifests
pub const MANIFESTS_PATH: &str = "/plugins/ui/manifests";
