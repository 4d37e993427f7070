use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Protocol observed by the matcher for a given connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedProtocol {
    RawTcp,
    Tls,
    Dtls,
    Http,
    Websocket,
    Unknown,
}

/// Per-direction byte/second cap. `0.0` means unlimited.
///
/// Convention (resolved against the upstream project's `proxy/meta.go`):
/// `downstream` caps bytes *read from the client* (an upload cap, since the
/// proxy is the reader on that side); `upstream` caps bytes *read from the
/// upstream* (a download cap). Both directions use this same naming
/// throughout the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeedCaps {
    pub downstream_bytes_per_sec: f64,
    pub upstream_bytes_per_sec: f64,
}

/// Per-connection mutable record, created at accept and finalized at close.
///
/// Byte counters are atomics because the two copy directions run as
/// independent tasks against the same `ConnectionMeta`.
#[derive(Debug)]
pub struct ConnectionMeta {
    pub id: u64,
    pub local_addr: String,
    pub remote_addr: String,
    pub protocol: std::sync::Mutex<ObservedProtocol>,
    pub server_name: std::sync::Mutex<Option<String>>,
    pub acme: std::sync::atomic::AtomicBool,
    pub fixed: std::sync::atomic::AtomicBool,
    pub no_match: std::sync::atomic::AtomicBool,

    pub downstream_read: AtomicU64,
    pub downstream_written: AtomicU64,
    pub upstream_read: AtomicU64,
    pub upstream_written: AtomicU64,

    pub speed: std::sync::Mutex<SpeedCaps>,

    pub start_unix_nanos: i64,
    pub end_unix_nanos: AtomicI64,

    pub labels: std::sync::Mutex<HashMap<String, String>>,
    pub route_name: std::sync::Mutex<Option<String>>,
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionMeta {
    pub fn new(local_addr: String, remote_addr: String) -> Arc<Self> {
        let start = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        Arc::new(Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            local_addr,
            remote_addr,
            protocol: std::sync::Mutex::new(ObservedProtocol::Unknown),
            server_name: std::sync::Mutex::new(None),
            acme: std::sync::atomic::AtomicBool::new(false),
            fixed: std::sync::atomic::AtomicBool::new(false),
            no_match: std::sync::atomic::AtomicBool::new(false),
            downstream_read: AtomicU64::new(0),
            downstream_written: AtomicU64::new(0),
            upstream_read: AtomicU64::new(0),
            upstream_written: AtomicU64::new(0),
            speed: std::sync::Mutex::new(SpeedCaps::default()),
            start_unix_nanos: start,
            end_unix_nanos: AtomicI64::new(0),
            labels: std::sync::Mutex::new(HashMap::new()),
            route_name: std::sync::Mutex::new(None),
        })
    }

    pub fn set_protocol(&self, p: ObservedProtocol) {
        *self.protocol.lock().unwrap() = p;
    }

    pub fn set_server_name(&self, name: impl Into<String>) {
        *self.server_name.lock().unwrap() = Some(name.into());
    }

    pub fn set_route_name(&self, name: impl Into<String>) {
        *self.route_name.lock().unwrap() = Some(name.into());
    }

    pub fn merge_labels(&self, extra: &HashMap<String, String>) {
        let mut labels = self.labels.lock().unwrap();
        for (k, v) in extra {
            labels.insert(k.clone(), v.clone());
        }
    }

    /// Finalizes the meta: records the end timestamp. Idempotent.
    pub fn finalize(&self) {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        self.end_unix_nanos.store(now, Ordering::Relaxed);
    }

    pub fn is_finalized(&self) -> bool {
        self.end_unix_nanos.load(Ordering::Relaxed) != 0
    }
}
