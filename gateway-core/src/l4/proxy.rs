//! Per-listener accept loop (§4.8). One task per bound address; each
//! accepted connection gets its own `ConnectionMeta`, is peeked, matched
//! against the listener's route table, and handed to the matched target on
//! a fresh task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::meta::ConnectionMeta;
use crate::middleware::{L4Context, L4Target};
use crate::peek::PeekReader;
use crate::route_match::{match_route, MatchOutcome, RouteEntry};

/// The route set bound to one listener address, swapped atomically on
/// reconfiguration via a `watch` channel (§4.9's "single-slot channel").
pub struct L4RouteTable {
    pub entries: Vec<RouteEntry<Arc<dyn L4Target>>>,
    pub acme_candidates: Vec<(String, Arc<dyn L4Target>)>,
}

impl L4RouteTable {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            acme_candidates: Vec::new(),
        }
    }
}

/// `true` unless `allowed_ports` is non-empty and excludes `port` (§4.8,
/// §6: empty list means "no restriction").
pub fn is_port_allowed(port: u16, allowed_ports: &[u16]) -> bool {
    allowed_ports.is_empty() || allowed_ports.contains(&port)
}

/// Runs the accept loop for an already-bound listener until `cancel` fires
/// or the socket closes. Binding happens in the caller (the reconciler) so
/// bind failures surface before any task is spawned, not after.
pub async fn run_listener(
    bind_addr: String,
    listener: TcpListener,
    table_rx: tokio::sync::watch::Receiver<Arc<L4RouteTable>>,
    cancel: CancellationToken,
) -> Result<()> {
    log::info!("l4 listener bound on {bind_addr}");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("l4 listener {bind_addr} cancelled");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote_addr)) => {
                        let local_addr = stream.local_addr().unwrap_or(remote_addr);
                        let table = table_rx.borrow().clone();
                        let conn_cancel = cancel.child_token();
                        tokio::spawn(async move {
                            handle_connection(stream, local_addr, remote_addr, table, conn_cancel).await;
                        });
                    }
                    Err(e) => {
                        if is_closed_network_error(&e) {
                            log::info!("l4 listener {bind_addr} closed");
                            break;
                        }
                        log::warn!("accept error on {bind_addr}: {e}");
                    }
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn is_closed_network_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe
    ) || e.to_string().contains("use of closed network connection")
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    table: Arc<L4RouteTable>,
    cancel: CancellationToken,
) {
    let meta = ConnectionMeta::new(local_addr.to_string(), remote_addr.to_string());
    let mut peek = PeekReader::new(stream);

    let outcome = match_route(&table.entries, &mut peek, &meta, &table.acme_candidates).await;
    match outcome {
        MatchOutcome::Matched { target, .. } => {
            let target = target.clone();
            let ctx = L4Context {
                meta: meta.clone(),
                conn: Box::new(peek),
                client_local_addr: local_addr,
                client_remote_addr: remote_addr,
                cancel,
            };
            target.handle(ctx).await;
        }
        MatchOutcome::NoMatch => {
            log::debug!("no route matched connection from {remote_addr}");
            meta.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowed_ports_permits_everything() {
        assert!(is_port_allowed(80, &[]));
        assert!(is_port_allowed(5700, &[]));
    }

    #[test]
    fn non_empty_allowed_ports_restricts() {
        assert!(is_port_allowed(5700, &[5500, 5700]));
        assert!(!is_port_allowed(22, &[5500, 5700]));
    }
}
