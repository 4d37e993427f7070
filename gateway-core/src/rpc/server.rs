//! Async admin RPC server (§4.12). One `Request` per connection, same shape
//! as the teacher's `system/prottp` (bind, accept, handle, close) but built
//! on `tokio::net::TcpListener` instead of a thread-per-connection
//! `std::net::TcpListener`.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};
use crate::reconcile::Reconciler;

use super::protocol::{read_request, write_response, Request, Response};

/// Runs the RPC accept loop until `cancel` fires. Each connection is
/// handled to completion (one request, one response) on its own task.
pub async fn run(bind_addr: String, reconciler: Arc<Reconciler>, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| GatewayError::Bind { addr: bind_addr.clone(), source: e })?;
    log::info!("rpc admin listener bound on {bind_addr}");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("rpc listener {bind_addr} shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let reconciler = reconciler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, reconciler).await {
                                log::warn!("rpc connection from {peer} failed: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        log::warn!("rpc accept error on {bind_addr}: {e}");
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_connection(mut stream: tokio::net::TcpStream, reconciler: Arc<Reconciler>) -> Result<()> {
    let request = read_request(&mut stream).await?;
    let response = dispatch(&reconciler, request).await;
    write_response(&mut stream, &response).await
}

async fn dispatch(reconciler: &Arc<Reconciler>, request: Request) -> Response {
    let result = match request {
        Request::Get => {
            return match serde_json::to_value(reconciler.current_configuration()) {
                Ok(v) => Response::Ok(v),
                Err(e) => Response::Err(e.to_string()),
            };
        }
        Request::Put(new_config) => reconciler.apply(new_config).await,
        Request::Post(routes) => {
            let mut config = reconciler.current_configuration();
            config.merge(routes);
            reconciler.apply(config).await
        }
        Request::Delete(names) => {
            let mut config = reconciler.current_configuration();
            config.delete(&names);
            reconciler.apply(config).await
        }
        Request::Join(join) => {
            // Cluster membership is delegated to an external consensus
            // collaborator (§4.12); there's nothing to reconcile locally.
            log::info!(
                "cluster join request for node {} at {} (suffrage={}) delegated to the consensus layer",
                join.node_id, join.address, join.suffrage
            );
            Ok(())
        }
    };

    match result {
        Ok(()) => Response::Ok(serde_json::Value::Null),
        Err(e) => Response::Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accesslog::RingAccessLog;
    use crate::reconcile::ServiceIdentity;
    use crate::wasm_host::WasmHost;
    use std::sync::Arc;

    fn test_reconciler() -> Arc<Reconciler> {
        Arc::new(Reconciler::new(
            "127.0.0.1:0".to_string(),
            "127.0.0.1:0".to_string(),
            Vec::new(),
            WasmHost::new("."),
            false,
            ServiceIdentity {
                version: "0.0.1".into(),
                release_id: "0.0.1".into(),
                service_id: "node-test".into(),
            },
            Arc::new(RingAccessLog::new(4)),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn get_returns_current_configuration_as_json() {
        let reconciler = test_reconciler();
        let resp = dispatch(&reconciler, Request::Get).await;
        match resp {
            Response::Ok(v) => assert!(v.get("routes").is_some()),
            Response::Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn join_is_acknowledged_without_touching_configuration() {
        let reconciler = test_reconciler();
        let before = reconciler.current_configuration();
        let resp = dispatch(
            &reconciler,
            Request::Join(super::super::protocol::JoinRequest {
                node_id: "node-1".into(),
                address: "127.0.0.1:5800".into(),
                suffrage: "voter".into(),
            }),
        )
        .await;
        assert!(matches!(resp, Response::Ok(_)));
        assert_eq!(before, reconciler.current_configuration());
    }
}
