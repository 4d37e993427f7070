//! Raw TCP/TLS/DTLS proxying (§4.8): listener accept loops, route matching,
//! and the terminal dial target.

pub mod proxy;
pub mod target;

pub use proxy::{is_port_allowed, run_listener, L4RouteTable};
pub use target::DialTarget;
