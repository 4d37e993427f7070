//! Admin RPC surface (§4.12): Get / Put / Post / Delete / Join over a small
//! framed protocol, one request per connection.

pub mod client;
pub mod protocol;
pub mod server;

pub use protocol::{JoinRequest, Request, Response};
pub use server::run;
