//! WASM runtime for plugin bundles.
//!
//! Bundles are WebAssembly modules that follow one export contract:
//!
//! - `memory`, `panel_alloc(len) -> ptr` and `panel_exports() -> packed`
//!   are required;
//! - `panel_render(ptr, len) -> packed` renders a component;
//! - `panel_evaluate_guard(ptr, len) -> i32` decides plugin guards.
//!
//! Strings cross the boundary as UTF-8 JSON. A packed value is
//! `(ptr << 32) | len`. Host functions are imported from the `panel` module.
//!
//! # Security
//!
//! Every call runs in a fresh store with resource limits:
//! - CPU: fuel budget per call
//! - Memory: configurable linear memory cap per instance

use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use wasmtime::*;

use crate::api::HostApi;
use crate::bundle::BundleExecutor;
use crate::component::{PluginComponent, PluginModule, RenderScope};
use crate::config::RuntimeConfig;
use crate::events::EventName;
use crate::guard::GuardEvaluator;
use crate::session::{Notification, User};
use crate::view::{Render, View};
use crate::{PluginError, Result};

/// Module name host functions are imported from.
pub const IMPORT_MODULE: &str = "panel";

const MEMORY_EXPORT: &str = "memory";
const ALLOC_EXPORT: &str = "panel_alloc";
const EXPORTS_EXPORT: &str = "panel_exports";
const RENDER_EXPORT: &str = "panel_render";
const GUARD_EXPORT: &str = "panel_evaluate_guard";

/// Maximum number of table elements.
const MAX_TABLE_ELEMENTS: usize = 10_000;

/// Maximum number of instances per store.
const MAX_INSTANCES: usize = 10;

/// Maximum number of tables per instance.
const MAX_TABLES: usize = 10;

/// Maximum number of memories per instance.
const MAX_MEMORIES: usize = 1;

/// Per-store state visible to host functions.
struct GuestState {
    plugin_id: String,
    limits: StoreLimits,
    /// Present while rendering; guard checks run without host access.
    host: Option<HostApi>,
}

struct Shared {
    engine: Engine,
    linker: Linker<GuestState>,
    fuel_limit: u64,
    max_memory_bytes: usize,
}

/// WASM runtime executing plugin bundles.
#[derive(Clone)]
pub struct WasmRuntime {
    shared: Arc<Shared>,
}

impl WasmRuntime {
    /// Create a new WASM runtime with the configured limits.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let mut wasm_config = Config::new();
        wasm_config.consume_fuel(true);

        let engine = Engine::new(&wasm_config)?;
        let mut linker = Linker::new(&engine);
        register_host_functions(&mut linker)?;

        Ok(Self {
            shared: Arc::new(Shared {
                engine,
                linker,
                fuel_limit: config.fuel_limit,
                max_memory_bytes: config.max_memory_bytes,
            }),
        })
    }

    /// Compile a bundle and read its export table.
    pub fn compile(&self, plugin_id: &str, source: &[u8]) -> Result<PluginModule> {
        let module = Module::new(&self.shared.engine, source)
            .map_err(|e| PluginError::compilation_error(plugin_id, e.to_string()))?;

        let bundle = Arc::new(WasmBundle {
            plugin_id: plugin_id.to_string(),
            module,
            shared: self.shared.clone(),
        });

        let exports = bundle.read_exports()?;
        if !exports.components.is_empty() && !bundle.exports_function(RENDER_EXPORT) {
            return Err(PluginError::execution_error(
                plugin_id,
                format!("Bundle lists components but does not export '{}'", RENDER_EXPORT),
            ));
        }

        let mut table = PluginModule::new();
        for name in exports.components {
            let component = WasmComponent {
                bundle: bundle.clone(),
                name: name.clone(),
            };
            table.insert_component(name, Arc::new(component));
        }

        if bundle.exports_function(GUARD_EXPORT) {
            table.set_guard_evaluator(Arc::new(WasmGuardEvaluator { bundle }));
        }

        Ok(table)
    }
}

impl BundleExecutor for WasmRuntime {
    fn execute(&self, plugin_id: &str, source: &[u8]) -> Result<PluginModule> {
        self.compile(plugin_id, source)
    }
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime")
            .field("fuel_limit", &self.shared.fuel_limit)
            .field("max_memory_bytes", &self.shared.max_memory_bytes)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ExportTable {
    #[serde(default)]
    components: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum RenderOutput {
    Ready { view: View },
    Pending,
    Error { message: String },
}

/// A compiled bundle. Instances are never reused between calls.
struct WasmBundle {
    plugin_id: String,
    module: Module,
    shared: Arc<Shared>,
}

impl WasmBundle {
    fn exports_function(&self, name: &str) -> bool {
        matches!(
            self.module.get_export(name),
            Some(ExternType::Func(_))
        )
    }

    fn error(&self, message: impl std::fmt::Display) -> PluginError {
        PluginError::execution_error(&self.plugin_id, message.to_string())
    }

    fn instantiate(&self, host: Option<HostApi>) -> Result<(Store<GuestState>, Instance)> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.shared.max_memory_bytes)
            .table_elements(MAX_TABLE_ELEMENTS)
            .instances(MAX_INSTANCES)
            .tables(MAX_TABLES)
            .memories(MAX_MEMORIES)
            .build();

        let mut store = Store::new(
            &self.shared.engine,
            GuestState {
                plugin_id: self.plugin_id.clone(),
                limits,
                host,
            },
        );
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(self.shared.fuel_limit)
            .map_err(|e| self.error(format!("Failed to set fuel: {}", e)))?;

        let instance = self
            .shared
            .linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| self.error(e))?;

        Ok((store, instance))
    }

    fn read_exports(&self) -> Result<ExportTable> {
        let (mut store, instance) = self.instantiate(None)?;
        let exports = instance
            .get_typed_func::<(), i64>(&mut store, EXPORTS_EXPORT)
            .map_err(|e| self.error(format!("Missing '{}': {}", EXPORTS_EXPORT, e)))?;
        let packed = exports.call(&mut store, ()).map_err(|e| self.error(e))?;
        let bytes = self.read_packed(&mut store, &instance, packed)?;

        serde_json::from_slice(&bytes)
            .map_err(|e| self.error(format!("Invalid export table: {}", e)))
    }

    /// Write `input` into guest memory and call `export(ptr, len)`.
    fn call_with_input<R: WasmResults>(
        &self,
        store: &mut Store<GuestState>,
        instance: &Instance,
        export: &str,
        input: &[u8],
    ) -> Result<R> {
        let len = i32::try_from(input.len()).map_err(|_| self.error("Input too large"))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut *store, ALLOC_EXPORT)
            .map_err(|e| self.error(format!("Missing '{}': {}", ALLOC_EXPORT, e)))?;
        let ptr = alloc.call(&mut *store, len).map_err(|e| self.error(e))?;

        let memory = self.memory(store, instance)?;
        memory
            .write(&mut *store, ptr as u32 as usize, input)
            .map_err(|e| self.error(e))?;

        let func = instance
            .get_typed_func::<(i32, i32), R>(&mut *store, export)
            .map_err(|e| self.error(format!("Missing '{}': {}", export, e)))?;
        func.call(&mut *store, (ptr, len)).map_err(|e| self.error(e))
    }

    fn memory(&self, store: &mut Store<GuestState>, instance: &Instance) -> Result<Memory> {
        instance
            .get_memory(&mut *store, MEMORY_EXPORT)
            .ok_or_else(|| self.error("Bundle does not export memory"))
    }

    fn read_packed(
        &self,
        store: &mut Store<GuestState>,
        instance: &Instance,
        packed: i64,
    ) -> Result<Vec<u8>> {
        let memory = self.memory(store, instance)?;
        let (ptr, len) = unpack(packed);
        memory
            .data(&*store)
            .get(ptr..ptr.saturating_add(len))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| self.error("Guest returned an out-of-bounds buffer"))
    }

    fn render(&self, component: &str, scope: &RenderScope) -> Result<Render> {
        let input = serde_json::to_vec(&json!({
            "component": component,
            "props": scope.props,
            "plugin_id": scope.plugin_id,
            "user": scope.user,
            "is_admin": scope.is_admin,
        }))?;

        let (mut store, instance) = self.instantiate(Some(scope.host.clone()))?;
        let packed: i64 = self.call_with_input(&mut store, &instance, RENDER_EXPORT, &input)?;
        let output = self.read_packed(&mut store, &instance, packed)?;

        let output: RenderOutput = serde_json::from_slice(&output)
            .map_err(|e| self.error(format!("Invalid render output: {}", e)))?;

        match output {
            RenderOutput::Ready { view } => Ok(Render::Ready(view)),
            RenderOutput::Pending => Ok(Render::Pending),
            RenderOutput::Error { message } => Err(self.error(message)),
        }
    }

    fn evaluate_guard(&self, guard: &str, user: Option<&User>) -> Result<bool> {
        let input = serde_json::to_vec(&json!({ "guard": guard, "user": user }))?;
        let (mut store, instance) = self.instantiate(None)?;
        let allowed: i32 = self.call_with_input(&mut store, &instance, GUARD_EXPORT, &input)?;
        Ok(allowed != 0)
    }
}

/// A component exported by a WASM bundle.
struct WasmComponent {
    bundle: Arc<WasmBundle>,
    name: String,
}

impl PluginComponent for WasmComponent {
    /// Host `request` calls block on the ambient tokio runtime, so this must
    /// run on a blocking worker thread.
    fn render(&self, scope: &RenderScope) -> Result<Render> {
        self.bundle.render(&self.name, scope)
    }
}

/// Guard evaluator exported by a WASM bundle. Fails closed.
struct WasmGuardEvaluator {
    bundle: Arc<WasmBundle>,
}

impl GuardEvaluator for WasmGuardEvaluator {
    fn evaluate(&self, guard: &str, user: Option<&User>) -> bool {
        match self.bundle.evaluate_guard(guard, user) {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(
                    plugin_id = %self.bundle.plugin_id,
                    guard = %guard,
                    error = %e,
                    "Plugin guard evaluation failed, denying"
                );
                false
            }
        }
    }
}

fn unpack(packed: i64) -> (usize, usize) {
    let packed = packed as u64;
    ((packed >> 32) as usize, (packed & 0xffff_ffff) as usize)
}

fn pack(ptr: i32, len: i32) -> i64 {
    (((ptr as u32 as u64) << 32) | len as u32 as u64) as i64
}

fn guest_memory(caller: &mut Caller<'_, GuestState>) -> anyhow::Result<Memory> {
    caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow::anyhow!("bundle does not export memory"))
}

fn guest_bytes(caller: &mut Caller<'_, GuestState>, ptr: i32, len: i32) -> anyhow::Result<Vec<u8>> {
    let memory = guest_memory(caller)?;
    let start = ptr as u32 as usize;
    let end = start.saturating_add(len as u32 as usize);
    memory
        .data(&*caller)
        .get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| anyhow::anyhow!("guest buffer out of bounds"))
}

fn write_guest(caller: &mut Caller<'_, GuestState>, bytes: &[u8]) -> anyhow::Result<i64> {
    let alloc = caller
        .get_export(ALLOC_EXPORT)
        .and_then(Extern::into_func)
        .ok_or_else(|| anyhow::anyhow!("bundle does not export {}", ALLOC_EXPORT))?
        .typed::<i32, i32>(&*caller)?;

    let len = i32::try_from(bytes.len())?;
    let ptr = alloc.call(&mut *caller, len)?;
    let memory = guest_memory(caller)?;
    memory.write(&mut *caller, ptr as u32 as usize, bytes)?;
    Ok(pack(ptr, len))
}

#[derive(Debug, Deserialize)]
struct GuestEmit {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct GuestRequest {
    method: String,
    path: String,
    #[serde(default)]
    body: Option<Value>,
}

fn guest_request(host: &HostApi, input: &[u8]) -> Result<Value> {
    let request: GuestRequest = serde_json::from_slice(input)?;
    let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
        PluginError::execution_error(
            host.plugin_id(),
            format!("Unsupported method '{}'", request.method),
        )
    })?;

    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        PluginError::execution_error(host.plugin_id(), "No async runtime available for request")
    })?;

    handle.block_on(host.request(method, &request.path, request.body.as_ref()))
}

fn register_host_functions(linker: &mut Linker<GuestState>) -> Result<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "log",
        |mut caller: Caller<'_, GuestState>, level: i32, ptr: i32, len: i32| -> anyhow::Result<()> {
            let bytes = guest_bytes(&mut caller, ptr, len)?;
            let message = String::from_utf8_lossy(&bytes);
            let plugin = caller.data().plugin_id.as_str();
            match level {
                0 => tracing::trace!(plugin = %plugin, "{}", message),
                1 => tracing::debug!(plugin = %plugin, "{}", message),
                2 => tracing::info!(plugin = %plugin, "{}", message),
                3 => tracing::warn!(plugin = %plugin, "{}", message),
                _ => tracing::error!(plugin = %plugin, "{}", message),
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "notify",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let bytes = guest_bytes(&mut caller, ptr, len)?;
            let notification: Notification = serde_json::from_slice(&bytes)?;
            match &caller.data().host {
                Some(host) => host.notify(&notification.title, &notification.message, notification.kind),
                None => tracing::debug!(plugin = %caller.data().plugin_id, "Notification outside render ignored"),
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "navigate",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let bytes = guest_bytes(&mut caller, ptr, len)?;
            let path = String::from_utf8(bytes)?;
            match &caller.data().host {
                Some(host) => host.navigate(&path),
                None => tracing::debug!(plugin = %caller.data().plugin_id, "Navigation outside render ignored"),
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "emit",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let bytes = guest_bytes(&mut caller, ptr, len)?;
            let emit: GuestEmit = serde_json::from_slice(&bytes)?;
            let event: EventName = emit.event.parse()?;
            let delivered = match &caller.data().host {
                Some(host) => host.events().emit(&event, &emit.payload),
                None => 0,
            };
            Ok(i32::try_from(delivered).unwrap_or(i32::MAX))
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "request",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<i64> {
            let bytes = guest_bytes(&mut caller, ptr, len)?;
            let reply = match caller.data().host.clone() {
                Some(host) => match guest_request(&host, &bytes) {
                    Ok(value) => json!({ "ok": value }),
                    Err(e) => json!({ "error": e.to_string() }),
                },
                None => json!({ "error": "requests are only available while rendering" }),
            };
            write_guest(&mut caller, &serde_json::to_vec(&reply)?)
        },
    )?;

    Ok(())
}
