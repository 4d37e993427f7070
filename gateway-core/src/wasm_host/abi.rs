//! Host-side import table for the guest ABI (§4.10). Status codes follow the
//! proxy-wasm convention (`Ok = 0`, ..., `Unimplemented = 12`); any call this
//! host doesn't wire up yet returns `Unimplemented` rather than trapping, so
//! a guest built against a richer host still runs degraded instead of
//! crashing the connection (§6).

use std::sync::{Arc, Mutex};

use wasmer::{
    imports, Function, FunctionEnv, FunctionEnvMut, Imports, Memory, MemoryView, Store,
};

use super::buffers::{BufferKind, MapKind, ScratchBuffers};
use crate::config::WasmAbiVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    NotFound = 1,
    BadArgument = 2,
    SerializationFailure = 3,
    InvalidMemoryAccess = 4,
    Empty = 7,
    InternalFailure = 10,
    Unimplemented = 12,
}

/// State reachable from every host import, shared (via `FunctionEnv`) across
/// every call a single guest instance makes.
pub struct HostEnv {
    pub memory: Option<Memory>,
    pub buffers: Arc<Mutex<ScratchBuffers>>,
    pub abi: WasmAbiVersion,
    pub plugin_name: String,
}

impl HostEnv {
    pub fn new(abi: WasmAbiVersion, plugin_name: String) -> Self {
        Self {
            memory: None,
            buffers: Arc::new(Mutex::new(ScratchBuffers::new())),
            abi,
            plugin_name,
        }
    }

    fn view<'a>(&self, store: &'a impl wasmer::AsStoreRef) -> Option<MemoryView<'a>> {
        self.memory.as_ref().map(|m| m.view(store))
    }
}

fn read_guest_string(env: &FunctionEnvMut<HostEnv>, ptr: i32, len: i32) -> Option<String> {
    let view = env.data().view(&env)?;
    let mut buf = vec![0u8; len.max(0) as usize];
    view.read(ptr as u64, &mut buf).ok()?;
    String::from_utf8(buf).ok()
}

fn write_guest_bytes(env: &FunctionEnvMut<HostEnv>, ptr: i32, data: &[u8]) -> StatusCode {
    match env.data().view(&env) {
        Some(view) => match view.write(ptr as u64, data) {
            Ok(()) => StatusCode::Ok,
            Err(_) => StatusCode::InvalidMemoryAccess,
        },
        None => StatusCode::InvalidMemoryAccess,
    }
}

fn buffer_kind_from_i32(v: i32) -> Option<BufferKind> {
    match v {
        0 => Some(BufferKind::HttpRequestBody),
        1 => Some(BufferKind::HttpResponseBody),
        6 => Some(BufferKind::VmConfiguration),
        7 => Some(BufferKind::PluginConfiguration),
        8 => Some(BufferKind::CallData),
        _ => None,
    }
}

fn map_kind_from_i32(v: i32) -> Option<MapKind> {
    match v {
        0 => Some(MapKind::HttpRequestHeaders),
        1 => Some(MapKind::HttpRequestTrailers),
        2 => Some(MapKind::HttpResponseHeaders),
        3 => Some(MapKind::HttpResponseTrailers),
        _ => None,
    }
}

fn proxy_log(env: FunctionEnvMut<HostEnv>, level: i32, msg_ptr: i32, msg_len: i32) -> i32 {
    let plugin = env.data().plugin_name.clone();
    match read_guest_string(&env, msg_ptr, msg_len) {
        Some(msg) => {
            log::debug!(target: "wasm_host", "[{plugin}] guest log (level={level}): {msg}");
            StatusCode::Ok as i32
        }
        None => StatusCode::InvalidMemoryAccess as i32,
    }
}

fn proxy_get_current_time_nanoseconds(env: FunctionEnvMut<HostEnv>, out_ptr: i32) -> i32 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    write_guest_bytes(&env, out_ptr, &now.to_le_bytes()) as i32
}

fn proxy_get_buffer_bytes(
    mut env: FunctionEnvMut<HostEnv>,
    buffer_type: i32,
    start: i32,
    max_size: i32,
    return_ptr: i32,
    return_size_ptr: i32,
) -> i32 {
    let Some(kind) = buffer_kind_from_i32(buffer_type) else {
        return StatusCode::Unimplemented as i32;
    };
    let data = {
        let buffers = env.data_mut().buffers.clone();
        let guard = buffers.lock().unwrap();
        guard.buffer(kind).map(|b| b.to_vec())
    };
    let Some(data) = data else {
        return StatusCode::Empty as i32;
    };
    let start = start.max(0) as usize;
    let end = (start + max_size.max(0) as usize).min(data.len());
    let slice = if start <= data.len() { &data[start..end] } else { &[] };
    if write_guest_bytes(&env, return_size_ptr, &(slice.len() as u32).to_le_bytes()) != StatusCode::Ok
    {
        return StatusCode::InvalidMemoryAccess as i32;
    }
    write_guest_bytes(&env, return_ptr, slice) as i32
}

fn proxy_set_buffer_bytes(
    mut env: FunctionEnvMut<HostEnv>,
    buffer_type: i32,
    data_ptr: i32,
    data_len: i32,
) -> i32 {
    let Some(kind) = buffer_kind_from_i32(buffer_type) else {
        return StatusCode::Unimplemented as i32;
    };
    let Some(view) = env.data().view(&env) else {
        return StatusCode::InvalidMemoryAccess as i32;
    };
    let mut buf = vec![0u8; data_len.max(0) as usize];
    if view.read(data_ptr as u64, &mut buf).is_err() {
        return StatusCode::InvalidMemoryAccess as i32;
    }
    env.data_mut().buffers.lock().unwrap().set_buffer(kind, buf);
    StatusCode::Ok as i32
}

fn proxy_get_header_map_pairs(
    mut env: FunctionEnvMut<HostEnv>,
    map_type: i32,
    return_ptr: i32,
    return_size_ptr: i32,
) -> i32 {
    let Some(kind) = map_kind_from_i32(map_type) else {
        return StatusCode::Unimplemented as i32;
    };
    let encoded = {
        let buffers = env.data_mut().buffers.clone();
        let guard = buffers.lock().unwrap();
        guard.map(kind).map(encode_header_pairs)
    };
    let Some(encoded) = encoded else {
        return StatusCode::Empty as i32;
    };
    if write_guest_bytes(&env, return_size_ptr, &(encoded.len() as u32).to_le_bytes())
        != StatusCode::Ok
    {
        return StatusCode::InvalidMemoryAccess as i32;
    }
    write_guest_bytes(&env, return_ptr, &encoded) as i32
}

fn proxy_set_header_map_pairs(
    mut env: FunctionEnvMut<HostEnv>,
    map_type: i32,
    data_ptr: i32,
    data_len: i32,
) -> i32 {
    let Some(kind) = map_kind_from_i32(map_type) else {
        return StatusCode::Unimplemented as i32;
    };
    let Some(view) = env.data().view(&env) else {
        return StatusCode::InvalidMemoryAccess as i32;
    };
    let mut buf = vec![0u8; data_len.max(0) as usize];
    if view.read(data_ptr as u64, &mut buf).is_err() {
        return StatusCode::InvalidMemoryAccess as i32;
    }
    let Some(pairs) = decode_header_pairs(&buf) else {
        return StatusCode::BadArgument as i32;
    };
    env.data_mut().buffers.lock().unwrap().set_map(kind, pairs);
    StatusCode::Ok as i32
}

/// Length-prefixed key/value encoding, matching the proxy-wasm ABI's
/// `u32 count`, then per-pair `u32 key_len, u32 val_len`, then the
/// concatenated key/value bytes (each NUL-terminated).
fn encode_header_pairs(pairs: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
    for (k, v) in pairs {
        out.extend_from_slice(&(k.len() as u32).to_le_bytes());
        out.extend_from_slice(&(v.len() as u32).to_le_bytes());
    }
    for (k, v) in pairs {
        out.extend_from_slice(k.as_bytes());
        out.push(0);
        out.extend_from_slice(v.as_bytes());
        out.push(0);
    }
    out
}

fn decode_header_pairs(buf: &[u8]) -> Option<Vec<(String, String)>> {
    if buf.len() < 4 {
        return None;
    }
    let count = u32::from_le_bytes(buf[0..4].try_into().ok()?) as usize;
    let mut lens = Vec::with_capacity(count);
    let mut off = 4;
    for _ in 0..count {
        let k = u32::from_le_bytes(buf.get(off..off + 4)?.try_into().ok()?) as usize;
        let v = u32::from_le_bytes(buf.get(off + 4..off + 8)?.try_into().ok()?) as usize;
        lens.push((k, v));
        off += 8;
    }
    let mut pairs = Vec::with_capacity(count);
    for (klen, vlen) in lens {
        let key = String::from_utf8(buf.get(off..off + klen)?.to_vec()).ok()?;
        off += klen + 1;
        let val = String::from_utf8(buf.get(off..off + vlen)?.to_vec()).ok()?;
        off += vlen + 1;
        pairs.push((key, val));
    }
    Some(pairs)
}

fn proxy_unimplemented(_env: FunctionEnvMut<HostEnv>) -> i32 {
    StatusCode::Unimplemented as i32
}

/// Builds the `env` import namespace the guest links against. Names follow
/// the proxy-wasm ABI; calls not listed individually fall back to
/// `proxy_unimplemented` registered under their own name by the caller when
/// module resolution demands it (wasmer requires every imported name to
/// resolve, so `context::PluginInstance` only registers the subset the
/// compiled module actually imports).
pub fn build_imports(store: &mut Store, env: &FunctionEnv<HostEnv>) -> Imports {
    imports! {
        "env" => {
            "proxy_log" => Function::new_typed_with_env(store, env, proxy_log),
            "proxy_get_current_time_nanoseconds" => Function::new_typed_with_env(store, env, proxy_get_current_time_nanoseconds),
            "proxy_get_buffer_bytes" => Function::new_typed_with_env(store, env, proxy_get_buffer_bytes),
            "proxy_set_buffer_bytes" => Function::new_typed_with_env(store, env, proxy_set_buffer_bytes),
            "proxy_get_header_map_pairs" => Function::new_typed_with_env(store, env, proxy_get_header_map_pairs),
            "proxy_set_header_map_pairs" => Function::new_typed_with_env(store, env, proxy_set_header_map_pairs),
            "proxy_done" => Function::new_typed_with_env(store, env, proxy_unimplemented),
            "proxy_set_tick_period_milliseconds" => Function::new_typed_with_env(store, env, proxy_unimplemented),
            "proxy_get_property" => Function::new_typed_with_env(store, env, proxy_unimplemented),
            "proxy_set_effective_context" => Function::new_typed_with_env(store, env, proxy_unimplemented),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_pairs_round_trip_through_encoding() {
        let pairs = vec![
            ("content-type".to_string(), "application/json".to_string()),
            (":path".to_string(), "/get".to_string()),
        ];
        let encoded = encode_header_pairs(&pairs);
        let decoded = decode_header_pairs(&encoded).unwrap();
        assert_eq!(decoded, pairs);
    }

    #[test]
    fn decode_rejects_truncated_buffers() {
        assert!(decode_header_pairs(&[1, 2]).is_none());
    }
}
