//! Wasm middleware host (§4.10). A module is compiled once per configured
//! plugin name, cached by base filename; each middleware creates one
//! instance bound to a WASI environment shaped by the plugin's
//! configuration. Two ABI surfaces (`V1`, `V2`) are supported; guest calls
//! the host isn't ready to implement return `Unimplemented` rather than
//! trapping (§6).

pub mod abi;
pub mod buffers;
pub mod context;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use wasmer::Module;

use crate::config::WasmMiddlewareSpec;
use crate::error::{GatewayError, Result};

pub use context::PluginInstance;

/// Process-wide compiled-module cache, keyed by base filename (without
/// extension). Shared across every route that references the same plugin.
pub struct WasmHost {
    modules_dir: PathBuf,
    cache: Mutex<HashMap<String, Module>>,
}

impl WasmHost {
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Compiles (or returns the cached compilation of) `spec.module`, then
    /// creates a fresh instance bound to a WASI environment built from the
    /// plugin's configuration.
    pub fn instantiate(&self, spec: &WasmMiddlewareSpec) -> Result<PluginInstance> {
        let store = wasmer::Store::default();
        let module = self.compiled_module(&store, &spec.module)?;
        PluginInstance::new(store, module, spec)
    }

    fn compiled_module(&self, store: &wasmer::Store, name: &str) -> Result<Module> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(m) = cache.get(name) {
                return Ok(m.clone());
            }
        }
        let bytes = self.read_module_bytes(name)?;
        let module = Module::new(store, &bytes)
            .map_err(|e| GatewayError::WasmGuest(format!("compiling {name}: {e}")))?;
        self.cache
            .lock()
            .unwrap()
            .insert(name.to_string(), module.clone());
        Ok(module)
    }

    fn read_module_bytes(&self, name: &str) -> Result<Vec<u8>> {
        for ext in ["wasm", "wat"] {
            let candidate: PathBuf = self.module_path(name, ext);
            if candidate.exists() {
                let raw = std::fs::read(&candidate)?;
                if ext == "wat" {
                    return wasmer::wat2wasm(&raw)
                        .map(|bytes| bytes.into_owned())
                        .map_err(|e| GatewayError::WasmGuest(format!("parsing wat {name}: {e}")));
                }
                return Ok(raw);
            }
        }
        Err(GatewayError::WasmGuest(format!(
            "no .wasm/.wat module named {name:?} found under {}",
            self.modules_dir.display()
        )))
    }

    fn module_path(&self, name: &str, ext: &str) -> PathBuf {
        self.modules_dir.join(format!("{name}.{ext}"))
    }
}

impl std::fmt::Debug for WasmHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmHost")
            .field("modules_dir", &self.modules_dir)
            .field("cached", &self.cache.lock().unwrap().len())
            .finish()
    }
}

pub fn canonical_modules_dir(configured: &str) -> PathBuf {
    Path::new(configured).to_path_buf()
}
