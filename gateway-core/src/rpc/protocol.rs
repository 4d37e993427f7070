//! Wire framing for the admin RPC surface (§4.12), grounded on the
//! teacher's `system/prottp` verb+path+JSON-body protocol but made async
//! and binary-framed: 1-byte op code + 4-byte big-endian length + JSON
//! payload; responses mirror that with a 1-byte status instead of an op
//! code.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{Configuration, Route};
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Get = 0,
    Put = 1,
    Post = 2,
    Delete = 3,
    Join = 4,
}

impl OpCode {
    fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(OpCode::Get),
            1 => Ok(OpCode::Put),
            2 => Ok(OpCode::Post),
            3 => Ok(OpCode::Delete),
            4 => Ok(OpCode::Join),
            other => Err(GatewayError::Rpc(format!("unknown op code {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub node_id: String,
    pub address: String,
    #[serde(default)]
    pub suffrage: String,
}

/// One request per connection (§4.12's five operations).
#[derive(Debug, Clone)]
pub enum Request {
    Get,
    Put(Configuration),
    Post(Vec<Route>),
    Delete(Vec<String>),
    Join(JoinRequest),
}

impl Request {
    fn op_code(&self) -> OpCode {
        match self {
            Request::Get => OpCode::Get,
            Request::Put(_) => OpCode::Put,
            Request::Post(_) => OpCode::Post,
            Request::Delete(_) => OpCode::Delete,
            Request::Join(_) => OpCode::Join,
        }
    }
}

/// Response payload: `Ok` carries a JSON value (the current configuration
/// for `Get`, `null` otherwise); `Err` carries a plain error string.
#[derive(Debug, Clone)]
pub enum Response {
    Ok(serde_json::Value),
    Err(String),
}

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, tag: u8, payload: &[u8]) -> Result<()> {
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(GatewayError::Rpc("frame too large".to_string()));
    }
    w.write_u8(tag).await.map_err(GatewayError::Io)?;
    w.write_u32(payload.len() as u32).await.map_err(GatewayError::Io)?;
    w.write_all(payload).await.map_err(GatewayError::Io)?;
    w.flush().await.map_err(GatewayError::Io)?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<(u8, Vec<u8>)> {
    let tag = r.read_u8().await.map_err(GatewayError::Io)?;
    let len = r.read_u32().await.map_err(GatewayError::Io)?;
    if len > MAX_FRAME_LEN {
        return Err(GatewayError::Rpc(format!("frame length {len} exceeds limit")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await.map_err(GatewayError::Io)?;
    Ok((tag, buf))
}

pub async fn write_request<W: AsyncWrite + Unpin>(w: &mut W, req: &Request) -> Result<()> {
    let op = req.op_code();
    let payload = match req {
        Request::Get => Vec::new(),
        Request::Put(cfg) => serde_json::to_vec(cfg)?,
        Request::Post(routes) => serde_json::to_vec(routes)?,
        Request::Delete(names) => serde_json::to_vec(names)?,
        Request::Join(join) => serde_json::to_vec(join)?,
    };
    write_frame(w, op as u8, &payload).await
}

pub async fn read_request<R: AsyncRead + Unpin>(r: &mut R) -> Result<Request> {
    let (tag, payload) = read_frame(r).await?;
    Ok(match OpCode::from_u8(tag)? {
        OpCode::Get => Request::Get,
        OpCode::Put => Request::Put(serde_json::from_slice(&payload)?),
        OpCode::Post => Request::Post(serde_json::from_slice(&payload)?),
        OpCode::Delete => Request::Delete(serde_json::from_slice(&payload)?),
        OpCode::Join => Request::Join(serde_json::from_slice(&payload)?),
    })
}

pub async fn write_response<W: AsyncWrite + Unpin>(w: &mut W, resp: &Response) -> Result<()> {
    match resp {
        Response::Ok(value) => write_frame(w, 0, &serde_json::to_vec(value)?).await,
        Response::Err(msg) => write_frame(w, 1, msg.as_bytes()).await,
    }
}

pub async fn read_response<R: AsyncRead + Unpin>(r: &mut R) -> Result<Response> {
    let (status, payload) = read_frame(r).await?;
    Ok(match status {
        0 => Response::Ok(serde_json::from_slice(&payload)?),
        _ => Response::Err(String::from_utf8_lossy(&payload).into_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn get_request_round_trips_through_the_wire() {
        let (mut a, mut b) = duplex(1024);
        write_request(&mut a, &Request::Get).await.unwrap();
        let req = read_request(&mut b).await.unwrap();
        assert!(matches!(req, Request::Get));
    }

    #[tokio::test]
    async fn delete_request_carries_names() {
        let (mut a, mut b) = duplex(1024);
        let names = vec!["a".to_string(), "b".to_string()];
        write_request(&mut a, &Request::Delete(names.clone())).await.unwrap();
        match read_request(&mut b).await.unwrap() {
            Request::Delete(got) => assert_eq!(got, names),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_response_round_trips() {
        let (mut a, mut b) = duplex(1024);
        write_response(&mut a, &Response::Err("boom".to_string())).await.unwrap();
        match read_response(&mut b).await.unwrap() {
            Response::Err(msg) => assert_eq!(msg, "boom"),
            other => panic!("expected error response, got {other:?}"),
        }
    }
}
