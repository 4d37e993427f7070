//! Per-context scratch storage: named byte buffers and header maps that the
//! ABI's `get_buffer`/`get_header_map_*` calls read and write. Cleared at
//! `proxy_on_context_finalize` and returned to a small free-list so repeated
//! requests on a hot instance don't reallocate every hop.

use std::collections::HashMap;

/// Buffer type discriminants used by the proxy-wasm style ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    HttpRequestBody,
    HttpResponseBody,
    PluginConfiguration,
    VmConfiguration,
    CallData,
}

/// Map type discriminants for `get_header_map_pairs`/`set_header_map_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKind {
    HttpRequestHeaders,
    HttpRequestTrailers,
    HttpResponseHeaders,
    HttpResponseTrailers,
}

#[derive(Debug, Default)]
pub struct ScratchBuffers {
    buffers: HashMap<BufferKind, Vec<u8>>,
    maps: HashMap<MapKind, Vec<(String, String)>>,
    free_bufs: Vec<Vec<u8>>,
}

impl ScratchBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_buffer(&mut self, kind: BufferKind, data: Vec<u8>) {
        self.buffers.insert(kind, data);
    }

    pub fn buffer(&self, kind: BufferKind) -> Option<&[u8]> {
        self.buffers.get(&kind).map(Vec::as_slice)
    }

    pub fn set_map(&mut self, kind: MapKind, pairs: Vec<(String, String)>) {
        self.maps.insert(kind, pairs);
    }

    pub fn map(&self, kind: MapKind) -> Option<&[(String, String)]> {
        self.maps.get(&kind).map(Vec::as_slice)
    }

    pub fn map_mut(&mut self, kind: MapKind) -> &mut Vec<(String, String)> {
        self.maps.entry(kind).or_default()
    }

    /// Reclaims allocations for reuse, leaving the context ready for the next
    /// request without dropping the backing `Vec` capacity.
    pub fn reset(&mut self) {
        for (_, mut buf) in self.buffers.drain() {
            buf.clear();
            if self.free_bufs.len() < 8 {
                self.free_bufs.push(buf);
            }
        }
        self.maps.clear();
    }

    pub fn take_scratch_vec(&mut self) -> Vec<u8> {
        self.free_bufs.pop().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_contents_and_recycles_capacity() {
        let mut b = ScratchBuffers::new();
        b.set_buffer(BufferKind::HttpRequestBody, vec![1, 2, 3]);
        b.set_map(
            MapKind::HttpRequestHeaders,
            vec![("x".into(), "y".into())],
        );
        b.reset();
        assert!(b.buffer(BufferKind::HttpRequestBody).is_none());
        assert!(b.map(MapKind::HttpRequestHeaders).is_none());
        assert_eq!(b.take_scratch_vec().capacity() >= 3, true);
    }
}
