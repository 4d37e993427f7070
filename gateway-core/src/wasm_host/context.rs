//! Per-middleware plugin instance: one compiled module, one WASI
//! environment, one guest `Instance`. Calls into the guest are serialized
//! with a blocking mutex (§4.10: "a single plugin instance handles one
//! request at a time"); the instance is cheap to construct so middlewares
//! that need concurrency create one `PluginInstance` per worker rather than
//! sharing one across tasks.

use std::sync::{Arc, Mutex};

use wasmer::{FunctionEnv, Instance, Module, Store};
use wasmer_wasix::WasiEnv;

use super::abi::{build_imports, HostEnv};
use super::buffers::{BufferKind, MapKind};
use crate::config::{WasmAbiVersion, WasmMiddlewareSpec};
use crate::error::{GatewayError, Result};

/// Guest-reported continuation decision (proxy-wasm `Action`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Pause,
}

impl Action {
    fn from_i32(v: i32) -> Self {
        if v == 1 {
            Action::Pause
        } else {
            Action::Continue
        }
    }
}

struct Guest {
    store: Store,
    instance: Instance,
    abi_env: FunctionEnv<HostEnv>,
}

pub struct PluginInstance {
    guest: Mutex<Guest>,
    next_context_id: std::sync::atomic::AtomicI32,
    abi: WasmAbiVersion,
}

impl PluginInstance {
    pub fn new(mut store: Store, module: Module, spec: &WasmMiddlewareSpec) -> Result<Self> {
        let mut wasi_builder = WasiEnv::builder(spec.module.clone());
        if !spec.argv.is_empty() {
            wasi_builder = wasi_builder.args(&spec.argv);
        }
        for (k, v) in &spec.env {
            wasi_builder = wasi_builder.env(k, v);
        }
        for dir in &spec.preopens {
            wasi_builder = wasi_builder
                .preopen_dir(dir)
                .map_err(|e| GatewayError::WasmGuest(format!("preopen {dir}: {e}")))?;
        }
        if spec.inherit_stdio {
            wasi_builder = wasi_builder.inherit_stdio();
        }

        let mut wasi_env = wasi_builder
            .finalize(&mut store)
            .map_err(|e| GatewayError::WasmGuest(format!("building wasi env: {e}")))?;

        let mut wasi_imports = wasi_env
            .import_object(&mut store, &module)
            .map_err(|e| GatewayError::WasmGuest(format!("wasi imports: {e}")))?;

        let abi_env = FunctionEnv::new(
            &mut store,
            HostEnv::new(spec.abi, spec.module.clone()),
        );
        let abi_imports = build_imports(&mut store, &abi_env);
        for ((ns, name), ext) in abi_imports.into_iter() {
            wasi_imports.define(&ns, &name, ext);
        }

        let instance = Instance::new(&mut store, &module, &wasi_imports)
            .map_err(|e| GatewayError::WasmGuest(format!("instantiating {}: {e}", spec.module)))?;

        wasi_env
            .initialize(&mut store, instance.clone())
            .map_err(|e| GatewayError::WasmGuest(format!("initializing wasi: {e}")))?;

        if let Ok(memory) = instance.exports.get_memory("memory") {
            abi_env.as_mut(&mut store).memory = Some(memory.clone());
        }

        if !spec.config.is_null() {
            let cfg_bytes = serde_json::to_vec(&spec.config).unwrap_or_default();
            abi_env
                .as_mut(&mut store)
                .buffers
                .lock()
                .unwrap()
                .set_buffer(BufferKind::PluginConfiguration, cfg_bytes);
        }

        Ok(Self {
            guest: Mutex::new(Guest {
                store,
                instance,
                abi_env,
            }),
            next_context_id: std::sync::atomic::AtomicI32::new(1),
            abi: spec.abi,
        })
    }

    pub fn abi(&self) -> WasmAbiVersion {
        self.abi
    }

    /// Allocates a new HTTP context id and runs `proxy_on_context_create`
    /// (if exported); root context id is always `0` in this host.
    pub fn create_context(&self) -> i32 {
        let id = self
            .next_context_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut guest = self.guest.lock().unwrap();
        call_optional(&mut guest, "proxy_on_context_create", &[id, 0]);
        id
    }

    pub fn set_request_headers(&self, context_id: i32, headers: Vec<(String, String)>) -> Action {
        let mut guest = self.guest.lock().unwrap();
        let count = headers.len();
        guest
            .abi_env
            .as_mut(&mut guest.store)
            .buffers
            .lock()
            .unwrap()
            .set_map(MapKind::HttpRequestHeaders, headers);
        call_action(
            &mut guest,
            "proxy_on_http_request_headers",
            &[context_id, count as i32, 0],
        )
    }

    pub fn set_response_headers(&self, context_id: i32, headers: Vec<(String, String)>) -> Action {
        let mut guest = self.guest.lock().unwrap();
        let count = headers.len();
        guest
            .abi_env
            .as_mut(&mut guest.store)
            .buffers
            .lock()
            .unwrap()
            .set_map(MapKind::HttpResponseHeaders, headers);
        call_action(
            &mut guest,
            "proxy_on_http_response_headers",
            &[context_id, count as i32, 0],
        )
    }

    /// Reads back whatever the guest last wrote to the request-header map
    /// (guests mutate headers in place via `proxy_set_header_map_pairs`).
    pub fn request_headers(&self, _context_id: i32) -> Vec<(String, String)> {
        let guest = self.guest.lock().unwrap();
        guest
            .abi_env
            .as_ref(&guest.store)
            .buffers
            .lock()
            .unwrap()
            .map(MapKind::HttpRequestHeaders)
            .map(|p| p.to_vec())
            .unwrap_or_default()
    }

    /// Reads back whatever the guest last wrote to the response-header map
    /// (guests mutate headers in place via `proxy_set_header_map_pairs`).
    pub fn response_headers(&self, _context_id: i32) -> Vec<(String, String)> {
        let guest = self.guest.lock().unwrap();
        guest
            .abi_env
            .as_ref(&guest.store)
            .buffers
            .lock()
            .unwrap()
            .map(MapKind::HttpResponseHeaders)
            .map(|p| p.to_vec())
            .unwrap_or_default()
    }

    pub fn finalize_context(&self, context_id: i32) {
        let mut guest = self.guest.lock().unwrap();
        call_optional(&mut guest, "proxy_on_context_finalize", &[context_id]);
        guest
            .abi_env
            .as_mut(&mut guest.store)
            .buffers
            .lock()
            .unwrap()
            .reset();
    }
}

fn call_optional(guest: &mut Guest, name: &str, args: &[i32]) -> Option<i32> {
    let func = guest.instance.exports.get_function(name).ok()?;
    let wasm_args: Vec<wasmer::Value> = args.iter().map(|v| wasmer::Value::I32(*v)).collect();
    match func.call(&mut guest.store, &wasm_args) {
        Ok(results) => results.first().and_then(|v| v.i32()),
        Err(e) => {
            log::warn!(target: "wasm_host", "guest call {name} trapped: {e}");
            None
        }
    }
}

fn call_action(guest: &mut Guest, name: &str, args: &[i32]) -> Action {
    match call_optional(guest, name, args) {
        Some(v) => Action::from_i32(v),
        None => Action::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_decodes_pause_only_on_one() {
        assert_eq!(Action::from_i32(0), Action::Continue);
        assert_eq!(Action::from_i32(1), Action::Pause);
        assert_eq!(Action::from_i32(7), Action::Continue);
    }
}
