//! HTTP(S) reverse proxying (§4.9): one listener per `host:port` group,
//! an immutable `Router` swapped atomically through a single-slot channel,
//! and a connection-serving loop built directly on `hyper` (the pingora
//! `ProxyHttp` service this module replaces handled routing, director, and
//! access logging together; here those concerns are split into composable
//! `L7Handler` layers instead).

pub mod access_log;
pub mod health;
pub mod reverse_proxy;
pub mod router;

pub use access_log::AccessLoggingHandler;
pub use health::HealthEndpoint;
pub use reverse_proxy::ReverseProxy;
pub use router::{http_priority, RouteRule, Router};

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::middleware::{BoxBody, HttpRequest, HttpResponse};

/// Routing table for one `host:port` listener, published through a
/// single-slot channel and read fresh on every accepted connection.
pub struct L7RouteTable {
    pub router: Router,
}

impl L7RouteTable {
    pub fn empty() -> Self {
        Self {
            router: Router::new(Vec::new()),
        }
    }
}

fn not_found() -> HttpResponse {
    http::Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(
            http_body_util::Empty::<Bytes>::new()
                .map_err(|never: Infallible| match never {})
                .boxed() as BoxBody,
        )
        .unwrap()
}

async fn dispatch(
    table_rx: watch::Receiver<Arc<L7RouteTable>>,
    remote_addr: SocketAddr,
    mut req: HttpRequest,
) -> std::result::Result<HttpResponse, Infallible> {
    req.extensions_mut().insert(remote_addr);
    // Read fresh per request (spec: "atomic load per request"), not once
    // per connection — a keep-alive connection must see route changes
    // applied mid-connection, not just on its next accept.
    let table = table_rx.borrow().clone();
    let rule = table.router.route(&req).map(|r| r.handler.clone());
    let resp = match rule {
        Some(handler) => handler.handle(req).await,
        None => not_found(),
    };
    Ok(resp)
}

/// Runs the accept loop for one already-bound HTTP listener. Each connection
/// gets its own `hyper` http1 connection task; the current `L7RouteTable` is
/// re-read from `table_rx` for every accepted connection, so route changes
/// apply to new connections without restarting the listener. Binding happens
/// in the caller (the reconciler) so bind failures surface before any task
/// is spawned.
pub async fn run_listener(
    bind_addr: String,
    listener: TcpListener,
    table_rx: watch::Receiver<Arc<L7RouteTable>>,
    cancel: CancellationToken,
) -> Result<()> {
    log::info!("l7 listener bound on {bind_addr}");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("l7 listener {bind_addr} shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        if crate::l4::proxy::is_closed_network_error(&e) {
                            break;
                        }
                        log::warn!("l7 accept error on {bind_addr}: {e}");
                        continue;
                    }
                };
                let table_rx = table_rx.clone();
                let conn_cancel = cancel.child_token();
                tokio::spawn(async move {
                    serve_connection(stream, remote_addr, table_rx, conn_cancel).await;
                });
            }
        }
    }
    Ok(())
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    table_rx: watch::Receiver<Arc<L7RouteTable>>,
    cancel: CancellationToken,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| dispatch(table_rx.clone(), remote_addr, req));
    let conn = hyper::server::conn::http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);
    tokio::select! {
        res = conn.as_mut() => {
            if let Err(e) = res {
                log::debug!("l7 connection from {remote_addr} ended with error: {e}");
            }
        }
        _ = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_route_table_has_no_rules() {
        let table = L7RouteTable::empty();
        assert!(table.router.route_count() == 0);
    }
}
