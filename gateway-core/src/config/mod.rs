//! Route/Configuration data model, duration/size parsing, and the
//! file-based configuration loader.

pub mod duration;
pub mod loader;
pub mod route;
pub mod size;

pub use route::{
    Condition, Configuration, HttpCondition, LoadBalanceAlgo, MiddlewareSpec, PathMatch, Protocol,
    Route, SpeedConfig, TcpCondition, ValueMatchKind, ValuePredicate, WasmAbiVersion,
    WasmInvokeOrder, WasmMiddlewareSpec, WeightedAddr,
};
