use thiserror::Error;

/// Closed error taxonomy for the engine. Every fallible boundary returns one
/// of these instead of panicking; per-connection variants never propagate
/// past the task that produced them (they're logged and the connection
/// closes).
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("port {0} is not in the allowed-ports whitelist")]
    PortNotAllowed(u16),

    #[error("bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream dial error for {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stream error: {0}")]
    Stream(#[source] std::io::Error),

    #[error("short input: needed {needed} bytes, got {got}")]
    ShortInput { needed: usize, got: usize },

    #[error("wasm guest fault: {0}")]
    WasmGuest(String),

    #[error("cluster join error: {0}")]
    ClusterJoin(String),

    #[error("rpc protocol error: {0}")]
    Rpc(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
