//! Middleware chain (§4.7): ordered transformers of `Target → Target` (L4)
//! or `Handler → Handler` (L7). Composition is wrapped so that request-time
//! order matches list order — the first-listed middleware observes the
//! request first (§8 invariant 8) — which means the chain is built by
//! folding in *reverse* list order (each new wrap becomes the new outermost
//! layer), the opposite of how §4.7 phrases its nesting notation; this is a
//! deliberate resolution in favor of the testable invariant (see
//! DESIGN.md).

pub mod metrics_labels;
pub mod strip_prefix;
pub mod wasm;

use async_trait::async_trait;
use std::sync::Arc;

use crate::meta::ConnectionMeta;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Blanket marker for any type usable as a boxed duplex connection.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedConn = Box<dyn AsyncStream>;

pub struct L4Context {
    pub meta: Arc<ConnectionMeta>,
    pub conn: BoxedConn,
    pub client_local_addr: std::net::SocketAddr,
    pub client_remote_addr: std::net::SocketAddr,
    pub cancel: CancellationToken,
}

/// A terminal or intermediate handler for a matched L4 connection.
#[async_trait]
pub trait L4Target: Send + Sync {
    async fn handle(&self, ctx: L4Context);
}

/// An L4 middleware: wraps an inner target, running its own logic before
/// delegating.
pub trait L4Middleware: Send + Sync {
    fn wrap(self: Arc<Self>, inner: Arc<dyn L4Target>) -> Arc<dyn L4Target>;
}

/// Builds the composed target from `middlewares` (in configured/list order)
/// around `base`, preserving request-time list order.
pub fn compose_l4(
    middlewares: &[Arc<dyn L4Middleware>],
    base: Arc<dyn L4Target>,
) -> Arc<dyn L4Target> {
    let mut handler = base;
    for m in middlewares.iter().rev() {
        handler = m.clone().wrap(handler);
    }
    handler
}

pub type HttpRequest = http::Request<hyper::body::Incoming>;
pub type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, std::convert::Infallible>;
pub type HttpResponse = http::Response<BoxBody>;

/// A terminal or intermediate handler for an L7 (HTTP) request.
#[async_trait]
pub trait L7Handler: Send + Sync {
    async fn handle(&self, req: HttpRequest) -> HttpResponse;
}

pub trait L7Middleware: Send + Sync {
    fn wrap(self: Arc<Self>, inner: Arc<dyn L7Handler>) -> Arc<dyn L7Handler>;
}

pub fn compose_l7(
    middlewares: &[Arc<dyn L7Middleware>],
    base: Arc<dyn L7Handler>,
) -> Arc<dyn L7Handler> {
    let mut handler = base;
    for m in middlewares.iter().rev() {
        handler = m.clone().wrap(handler);
    }
    handler
}
