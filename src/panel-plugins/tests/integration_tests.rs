//! Integration tests for the panel-plugins crate.
//!
//! These run the whole runtime against a mocked backend:
//! - manifest discovery and boot
//! - load-once deduplication
//! - guard filtering of sidebar contributions
//! - rendering, including failed and crashing plugins

mod common;

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use panel_plugins::{
    NotFoundReason, PlaceholderKind, PluginHost, PluginManifest, PluginState, RenderOutcome,
    RuntimeConfig, SessionState, SidebarItem, SidebarSection, TabTarget, User, View,
};

use common::{BundleWat, RenderBody, mount_bundle, mount_manifests};

fn host_for(server: &MockServer, user: Option<User>) -> (PluginHost, Arc<SessionState>) {
    let session = Arc::new(SessionState::new());
    session.set_user(user);
    let host = PluginHost::new(RuntimeConfig::with_base_url(server.uri()), session.clone()).unwrap();
    (host, session)
}

fn weather_manifest() -> Value {
    json!({
        "id": "weather",
        "name": "Weather",
        "version": "1.0.0",
        "hasBundle": true,
        "pages": [{ "path": "/", "component": "Home", "guard": null }],
        "tabs": [{ "id": "forecast", "component": "Home", "target": "server", "label": "Forecast" }],
        "sidebarItems": [{ "id": "weather", "label": "Weather", "href": "/plugins/weather/", "section": "nav" }]
    })
}

fn weather_bundle() -> String {
    BundleWat::new(&["Home"])
        .view(json!({ "type": "text", "text": "Sunny" }))
        .build()
}

// ============================================================================
// SCENARIO TESTS
// ============================================================================

mod scenario_tests {
    use super::*;

    #[tokio::test]
    async fn test_weather_page_renders_ready() {
        let server = MockServer::start().await;
        mount_manifests(&server, json!([weather_manifest()])).await;
        mount_bundle(&server, "weather", weather_bundle(), 1).await;

        let (host, _) = host_for(&server, Some(User::new("1", "alice")));
        let loaded = host.load_all_plugins().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state(), PluginState::Ready);

        let outcome = host.render_path("/plugins/weather/", Value::Null).await;
        assert_eq!(outcome, RenderOutcome::Ready(View::text("Sunny")));

        let tab = host.render_tab("weather", "forecast", Value::Null).await;
        assert_eq!(tab, RenderOutcome::Ready(View::text("Sunny")));
    }

    #[tokio::test]
    async fn test_admin_tools_sidebar_for_non_admin() {
        let server = MockServer::start().await;
        mount_manifests(
            &server,
            json!([{
                "id": "admin-tools",
                "name": "Admin Tools",
                "version": "1.0.0",
                "sidebarItems": [
                    { "id": "audit", "label": "Audit", "href": "/plugins/admin-tools/audit",
                      "section": "admin", "guard": "admin" }
                ]
            }]),
        )
        .await;

        let (host, _) = host_for(&server, Some(User::new("1", "alice")));
        host.load_all_plugins().await;

        assert!(host.get_sidebar_items().is_empty());
    }

    #[tokio::test]
    async fn test_admin_tools_sidebar_for_admin() {
        let server = MockServer::start().await;
        mount_manifests(
            &server,
            json!([{
                "id": "admin-tools",
                "name": "Admin Tools",
                "version": "1.0.0",
                "sidebarItems": [
                    { "id": "audit", "label": "Audit", "href": "/plugins/admin-tools/audit",
                      "section": "admin", "guard": "admin" }
                ]
            }]),
        )
        .await;

        let (host, _) = host_for(&server, Some(User::admin("2", "root")));
        host.load_all_plugins().await;

        let items = host.get_sidebar_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "plugin-admin-tools-audit");
        assert_eq!(items[0].plugin_id.as_deref(), Some("admin-tools"));
        assert_eq!(items[0].item.section, SidebarSection::Admin);
    }

    #[tokio::test]
    async fn test_broken_bundle_shows_plugin_error() {
        let server = MockServer::start().await;
        mount_manifests(
            &server,
            json!([{
                "id": "broken",
                "name": "Broken",
                "version": "1.0.0",
                "hasBundle": true,
                "pages": [{ "path": "/", "component": "Home" }]
            }]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/plugins/broken/ui/bundle.js"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let (host, _) = host_for(&server, None);
        let loaded = host.load_all_plugins().await;

        assert_eq!(loaded[0].state(), PluginState::Failed);
        assert!(loaded[0].module.is_none());
        assert!(host.get_plugin_component("broken", "Home").is_none());

        // The page is still listed.
        assert_eq!(host.get_pages()[0].route, "/plugins/broken/");

        let outcome = host.render_path("/plugins/broken/", Value::Null).await;
        assert!(matches!(
            outcome,
            RenderOutcome::NotFound(NotFoundReason::MissingComponent { .. })
        ));
        match outcome.into_view() {
            View::Placeholder { kind, title, .. } => {
                assert_eq!(kind, PlaceholderKind::Error);
                assert_eq!(title, "Plugin Error");
            }
            other => panic!("unexpected view: {:?}", other),
        }
    }
}

// ============================================================================
// LOADING TESTS
// ============================================================================

mod loading_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_loads_fetch_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins/weather/ui/bundle.js"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(weather_bundle().into_bytes(), "text/plain")
                    .set_delay(std::time::Duration::from_millis(150)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (host, _) = host_for(&server, None);
        let manifest: PluginManifest = serde_json::from_value(weather_manifest()).unwrap();

        let loads = (0..8).map(|_| host.load_plugin(manifest.clone()));
        let results = join_all(loads).await;

        for plugin in &results {
            assert!(Arc::ptr_eq(plugin, &results[0]));
        }
        assert_eq!(host.plugin_statuses().len(), 1);
        assert_eq!(host.get_sidebar_items().len(), 1);
    }

    #[tokio::test]
    async fn test_load_survives_dropped_callers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins/weather/ui/bundle.js"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(weather_bundle().into_bytes(), "text/plain")
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (host, _) = host_for(&server, None);
        let manifest: PluginManifest = serde_json::from_value(weather_manifest()).unwrap();

        // Start a load and abandon it before it completes.
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            host.load_plugin(manifest.clone()),
        )
        .await;
        assert!(abandoned.is_err());

        let plugin = host.load_plugin(manifest).await;
        assert!(plugin.module.is_some());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let server = MockServer::start().await;
        mount_manifests(
            &server,
            json!([
                weather_manifest(),
                { "id": "broken", "name": "Broken", "version": "1.0.0", "hasBundle": true },
                { "id": "garbage", "name": "Garbage", "version": "1.0.0", "hasBundle": true }
            ]),
        )
        .await;
        mount_bundle(&server, "weather", weather_bundle(), 1).await;
        mount_bundle(&server, "garbage", "(module (func".to_string(), 1).await;
        Mock::given(method("GET"))
            .and(path("/plugins/broken/ui/bundle.js"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (host, _) = host_for(&server, None);
        let loaded = host.load_all_plugins().await;
        assert_eq!(loaded.len(), 3);

        let states: Vec<_> = host
            .plugin_statuses()
            .into_iter()
            .map(|s| (s.id, s.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("broken".to_string(), PluginState::Failed),
                ("garbage".to_string(), PluginState::Failed),
                ("weather".to_string(), PluginState::Ready),
            ]
        );
    }

    #[tokio::test]
    async fn test_manifest_failure_boots_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins/ui/manifests"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (host, _) = host_for(&server, None);
        assert!(host.load_all_plugins().await.is_empty());
        assert!(host.get_pages().is_empty());
    }
}

// ============================================================================
// REGISTRY TESTS
// ============================================================================

mod registry_tests {
    use super::*;

    #[tokio::test]
    async fn test_same_item_id_from_two_plugins() {
        let server = MockServer::start().await;
        let item = json!({ "id": "home", "label": "Home", "href": "/", "section": "nav" });
        mount_manifests(
            &server,
            json!([
                { "id": "alpha", "name": "Alpha", "version": "1.0.0", "sidebarItems": [item] },
                { "id": "beta", "name": "Beta", "version": "1.0.0", "sidebarItems": [item] }
            ]),
        )
        .await;

        let (host, _) = host_for(&server, None);
        host.register_native_sidebar_item(SidebarItem {
            id: "home".to_string(),
            label: "Dashboard".to_string(),
            icon: None,
            href: "/".to_string(),
            section: SidebarSection::Nav,
            order: Some(-10),
            guard: None,
            children: Vec::new(),
        });
        host.load_all_plugins().await;

        let mut keys: Vec<_> = host.get_sidebar_items().into_iter().map(|e| e.key).collect();
        assert_eq!(keys[0], "home");
        keys.sort();
        keys.dedup();
        assert_eq!(keys, vec!["home", "plugin-alpha-home", "plugin-beta-home"]);
    }

    #[tokio::test]
    async fn test_plugin_guard_evaluator_filters_tabs() {
        let server = MockServer::start().await;
        mount_manifests(
            &server,
            json!([{
                "id": "beta",
                "name": "Beta",
                "version": "1.0.0",
                "hasBundle": true,
                "tabs": [
                    { "id": "preview", "component": "Preview", "target": "server", "label": "Preview", "guard": "beta-tester" }
                ],
                "sidebarItems": [
                    { "id": "preview", "label": "Preview", "href": "/", "section": "nav", "guard": "beta-tester" }
                ]
            }]),
        )
        .await;
        mount_bundle(&server, "beta", BundleWat::new(&[]).guard(1).build(), 1).await;

        let (host, _) = host_for(&server, Some(User::new("1", "alice")));
        host.load_all_plugins().await;

        assert_eq!(host.get_tabs(TabTarget::Server).len(), 1);
        assert_eq!(host.get_sidebar_items().len(), 1);
        assert!(host.evaluate_plugin_guard("beta", Some("beta-tester")));
        // The bundle cannot grant the reserved admin token.
        assert!(!host.evaluate_plugin_guard("beta", Some("admin")));
    }

    #[tokio::test]
    async fn test_tab_guards_follow_current_user() {
        let server = MockServer::start().await;
        mount_manifests(
            &server,
            json!([{
                "id": "ops",
                "name": "Ops",
                "version": "1.0.0",
                "tabs": [
                    { "id": "danger", "component": "Danger", "target": "server", "label": "Danger", "guard": "admin" }
                ]
            }]),
        )
        .await;

        let (host, session) = host_for(&server, Some(User::new("1", "alice")));
        host.load_all_plugins().await;
        assert!(host.get_tabs(TabTarget::Server).is_empty());

        session.set_user(Some(User::admin("1", "alice")));
        assert_eq!(host.get_tabs(TabTarget::Server).len(), 1);
    }
}

// ============================================================================
// ISOLATION TESTS
// ============================================================================

mod isolation_tests {
    use super::*;

    #[tokio::test]
    async fn test_trapping_component_is_isolated() {
        let server = MockServer::start().await;
        mount_manifests(
            &server,
            json!([
                weather_manifest(),
                { "id": "crashy", "name": "Crashy", "version": "1.0.0", "hasBundle": true,
                  "pages": [{ "path": "/", "component": "Home" }],
                  "sidebarItems": [{ "id": "crashy", "label": "Crashy", "href": "/plugins/crashy/", "section": "nav" }] }
            ]),
        )
        .await;
        mount_bundle(&server, "weather", weather_bundle(), 1).await;
        mount_bundle(
            &server,
            "crashy",
            BundleWat::new(&["Home"]).render(RenderBody::Trap).build(),
            1,
        )
        .await;

        let (host, _) = host_for(&server, None);
        host.load_all_plugins().await;

        match host.render_path("/plugins/crashy/", Value::Null).await {
            RenderOutcome::Crashed(report) => {
                assert_eq!(report.plugin_id, "crashy");
                assert_eq!(report.component, "Home");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Everything else keeps working.
        assert_eq!(host.get_sidebar_items().len(), 2);
        assert!(host.render_path("/plugins/weather/", Value::Null).await.is_ready());

        // A fresh attempt is a fresh render; the crash is not cached.
        assert!(matches!(
            host.render_path("/plugins/crashy/", Value::Null).await,
            RenderOutcome::Crashed(_)
        ));
    }

    #[tokio::test]
    async fn test_runaway_component_runs_out_of_fuel() {
        let server = MockServer::start().await;
        mount_bundle(
            &server,
            "spin",
            BundleWat::new(&["Home"]).render(RenderBody::Spin).build(),
            1,
        )
        .await;

        let config = RuntimeConfig {
            fuel_limit: 100_000,
            ..RuntimeConfig::with_base_url(server.uri())
        };
        let host = PluginHost::new(config, Arc::new(SessionState::new())).unwrap();
        let mut manifest = PluginManifest::new("spin", "Spin", "1.0.0");
        manifest.has_bundle = true;
        host.load_plugin(manifest).await;

        assert!(matches!(
            host.render_component("spin", "Home", Value::Null).await,
            RenderOutcome::Crashed(_)
        ));
    }
}
