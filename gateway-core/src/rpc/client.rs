//! Minimal async client for the admin RPC surface (§4.12). Used by
//! operator tooling and integration tests; `gateway-cli` itself talks to
//! the reconciler in-process and doesn't need this.

use tokio::net::TcpStream;

use crate::config::{Configuration, Route};
use crate::error::{GatewayError, Result};

use super::protocol::{read_response, write_request, JoinRequest, Request, Response};

async fn round_trip(addr: &str, request: Request) -> Result<Response> {
    let mut stream = TcpStream::connect(addr).await.map_err(GatewayError::Io)?;
    write_request(&mut stream, &request).await?;
    read_response(&mut stream).await
}

fn ok_or_err(resp: Response) -> Result<serde_json::Value> {
    match resp {
        Response::Ok(v) => Ok(v),
        Response::Err(e) => Err(GatewayError::Rpc(e)),
    }
}

pub async fn get(addr: &str) -> Result<Configuration> {
    let value = ok_or_err(round_trip(addr, Request::Get).await?)?;
    Ok(serde_json::from_value(value)?)
}

pub async fn put(addr: &str, config: Configuration) -> Result<()> {
    ok_or_err(round_trip(addr, Request::Put(config)).await?).map(|_| ())
}

pub async fn post(addr: &str, routes: Vec<Route>) -> Result<()> {
    ok_or_err(round_trip(addr, Request::Post(routes)).await?).map(|_| ())
}

pub async fn delete(addr: &str, names: Vec<String>) -> Result<()> {
    ok_or_err(round_trip(addr, Request::Delete(names)).await?).map(|_| ())
}

pub async fn join(addr: &str, node_id: String, address: String, suffrage: String) -> Result<()> {
    ok_or_err(round_trip(addr, Request::Join(JoinRequest { node_id, address, suffrage })).await?).map(|_| ())
}
