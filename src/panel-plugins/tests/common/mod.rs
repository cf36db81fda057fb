//! Shared fixtures: WAT bundle builder and backend mocks.

#![allow(dead_code)]

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOTIFY_OFFSET: usize = 1024;
const REQUEST_OFFSET: usize = 1536;
const EMIT_OFFSET: usize = 2048;
const NAVIGATE_OFFSET: usize = 2560;
const LOG_OFFSET: usize = 3072;
const RENDER_OFFSET: usize = 4096;
const HEAP_START: usize = 16384;

/// What `panel_render` does.
pub enum RenderBody {
    /// Return this JSON document.
    Output(Value),
    /// Execute `unreachable`.
    Trap,
    /// Loop until fuel runs out.
    Spin,
}

/// Builds a WAT bundle following the panel export contract.
pub struct BundleWat {
    components: Vec<String>,
    render: Option<RenderBody>,
    guard: Option<i32>,
    notify: Option<Value>,
    request: Option<Value>,
    emit: Option<Value>,
    navigate: Option<String>,
}

impl BundleWat {
    pub fn new(components: &[&str]) -> Self {
        Self {
            components: components.iter().map(|c| c.to_string()).collect(),
            render: None,
            guard: None,
            notify: None,
            request: None,
            emit: None,
            navigate: None,
        }
    }

    /// Render a fixed view.
    pub fn view(self, view: Value) -> Self {
        self.render(RenderBody::Output(json!({ "status": "ready", "view": view })))
    }

    pub fn render(mut self, body: RenderBody) -> Self {
        self.render = Some(body);
        self
    }

    /// Export `panel_evaluate_guard` returning `result`.
    pub fn guard(mut self, result: i32) -> Self {
        self.guard = Some(result);
        self
    }

    pub fn notify(mut self, notification: Value) -> Self {
        self.notify = Some(notification);
        self
    }

    pub fn request(mut self, request: Value) -> Self {
        self.request = Some(request);
        self
    }

    pub fn emit(mut self, event: Value) -> Self {
        self.emit = Some(event);
        self
    }

    pub fn navigate(mut self, path: &str) -> Self {
        self.navigate = Some(path.to_string());
        self
    }

    pub fn build(&self) -> String {
        let exports = json!({ "components": self.components }).to_string();
        let log_message = "rendering";

        let mut wat = String::from("(module\n");
        wat.push_str("  (import \"panel\" \"log\" (func $log (param i32 i32 i32)))\n");
        wat.push_str("  (import \"panel\" \"notify\" (func $notify (param i32 i32)))\n");
        wat.push_str("  (import \"panel\" \"navigate\" (func $navigate (param i32 i32)))\n");
        wat.push_str("  (import \"panel\" \"emit\" (func $emit (param i32 i32) (result i32)))\n");
        wat.push_str("  (import \"panel\" \"request\" (func $request (param i32 i32) (result i64)))\n");
        wat.push_str("  (memory (export \"memory\") 1)\n");
        wat.push_str(&format!("  (global $next (mut i32) (i32.const {}))\n", HEAP_START));
        wat.push_str(
            "  (func (export \"panel_alloc\") (param $len i32) (result i32)\n\
             \x20   (local $ptr i32)\n\
             \x20   (local.set $ptr (global.get $next))\n\
             \x20   (global.set $next (i32.add (global.get $next) (local.get $len)))\n\
             \x20   (local.get $ptr))\n",
        );

        wat.push_str(&data(0, &exports));
        wat.push_str(&format!(
            "  (func (export \"panel_exports\") (result i64) (i64.const {}))\n",
            exports.len()
        ));
        wat.push_str(&data(LOG_OFFSET, log_message));

        if let Some(render) = &self.render {
            let mut body = format!(
                "    (call $log (i32.const 2) (i32.const {}) (i32.const {}))\n",
                LOG_OFFSET,
                log_message.len()
            );

            if let Some(notification) = &self.notify {
                let text = notification.to_string();
                wat.push_str(&data(NOTIFY_OFFSET, &text));
                body.push_str(&format!(
                    "    (call $notify (i32.const {}) (i32.const {}))\n",
                    NOTIFY_OFFSET,
                    text.len()
                ));
            }
            if let Some(request) = &self.request {
                let text = request.to_string();
                wat.push_str(&data(REQUEST_OFFSET, &text));
                body.push_str(&format!(
                    "    (drop (call $request (i32.const {}) (i32.const {})))\n",
                    REQUEST_OFFSET,
                    text.len()
                ));
            }
            if let Some(event) = &self.emit {
                let text = event.to_string();
                wat.push_str(&data(EMIT_OFFSET, &text));
                body.push_str(&format!(
                    "    (drop (call $emit (i32.const {}) (i32.const {})))\n",
                    EMIT_OFFSET,
                    text.len()
                ));
            }
            if let Some(path) = &self.navigate {
                wat.push_str(&data(NAVIGATE_OFFSET, path));
                body.push_str(&format!(
                    "    (call $navigate (i32.const {}) (i32.const {}))\n",
                    NAVIGATE_OFFSET,
                    path.len()
                ));
            }

            match render {
                RenderBody::Output(output) => {
                    let text = output.to_string();
                    wat.push_str(&data(RENDER_OFFSET, &text));
                    let packed = ((RENDER_OFFSET as i64) << 32) | text.len() as i64;
                    body.push_str(&format!("    (i64.const {})\n", packed));
                }
                RenderBody::Trap => body.push_str("    unreachable\n"),
                RenderBody::Spin => body.push_str("    (loop $spin (br $spin))\n    (i64.const 0)\n"),
            }

            wat.push_str("  (func (export \"panel_render\") (param i32 i32) (result i64)\n");
            wat.push_str(&body);
            wat.push_str("  )\n");
        }

        if let Some(result) = self.guard {
            wat.push_str(&format!(
                "  (func (export \"panel_evaluate_guard\") (param i32 i32) (result i32) (i32.const {}))\n",
                result
            ));
        }

        wat.push_str(")\n");
        wat
    }
}

/// A data segment with every byte escaped.
fn data(offset: usize, text: &str) -> String {
    let escaped: String = text.bytes().map(|b| format!("\\{:02x}", b)).collect();
    format!("  (data (i32.const {}) \"{}\")\n", offset, escaped)
}

/// Serve `manifests` from the manifest endpoint.
pub async fn mount_manifests(server: &MockServer, manifests: Value) {
    Mock::given(method("GET"))
        .and(path("/plugins/ui/manifests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "plugins": manifests })))
        .mount(server)
        .await;
}

/// Serve a bundle for `plugin_id`, expecting exactly `calls` fetches.
pub async fn mount_bundle(server: &MockServer, plugin_id: &str, wat: String, calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/plugins/{}/ui/bundle.js", plugin_id)))
        .respond_with(ResponseTemplate::new(200).set_body_raw(wat.into_bytes(), "text/plain"))
        .expect(calls)
        .mount(server)
        .await;
}
