//! Bidirectional rate-limited byte pump (§4.4). Two cooperative copy tasks
//! run per connection; each touches exactly one read-counter and one
//! write-counter on the shared [`ConnectionMeta`], per the direction
//! convention documented there.

use crate::meta::ConnectionMeta;
use crate::ratelimit::RateLimiter;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Clone, Copy)]
enum Direction {
    /// Client → upstream: touches `downstream_read` / `upstream_written`.
    DownstreamToUpstream,
    /// Upstream → client: touches `upstream_read` / `downstream_written`.
    UpstreamToDownstream,
}

/// Runs both copy directions to completion (or until `cancel` fires) and
/// finalizes `meta`. Never returns an error to the caller: I/O failures
/// terminate the affected direction, which cancels the other, but the
/// connection itself doesn't "fail" (§4.4, §7).
pub async fn copy_bidirectional<A, B>(a: A, b: B, meta: Arc<ConnectionMeta>, cancel: CancellationToken)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let speed = *meta.speed.lock().unwrap();
    let downstream_limiter = RateLimiter::new(speed.downstream_bytes_per_sec);
    let upstream_limiter = RateLimiter::new(speed.upstream_bytes_per_sec);

    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let a_to_b = tokio::spawn(pump(
        a_read,
        b_write,
        downstream_limiter,
        meta.clone(),
        Direction::DownstreamToUpstream,
        cancel.clone(),
    ));

    let b_to_a = tokio::spawn(pump(
        b_read,
        a_write,
        upstream_limiter,
        meta.clone(),
        Direction::UpstreamToDownstream,
        cancel.clone(),
    ));

    // Either direction finishing (EOF or error) cancels the other so it
    // doesn't wait forever on a half-closed peer.
    tokio::select! {
        _ = a_to_b => cancel.cancel(),
        _ = b_to_a => cancel.cancel(),
    }

    meta.finalize();
}

async fn pump<R, W>(
    mut reader: tokio::io::ReadHalf<R>,
    mut writer: tokio::io::WriteHalf<W>,
    limiter: RateLimiter,
    meta: Arc<ConnectionMeta>,
    direction: Direction,
    cancel: CancellationToken,
) where
    R: AsyncRead,
    W: AsyncWrite,
{
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            },
        };

        record_read(&meta, direction, n as u64);
        limiter.acquire(n).await;

        if writer.write_all(&buf[..n]).await.is_err() {
            break;
        }
        record_write(&meta, direction, n as u64);
    }
    let _ = writer.flush().await;
}

fn record_read(meta: &ConnectionMeta, direction: Direction, n: u64) {
    let counter = match direction {
        Direction::DownstreamToUpstream => &meta.downstream_read,
        Direction::UpstreamToDownstream => &meta.upstream_read,
    };
    counter.fetch_add(n, Ordering::Relaxed);
}

fn record_write(meta: &ConnectionMeta, direction: Direction, n: u64) {
    let counter = match direction {
        Direction::DownstreamToUpstream => &meta.upstream_written,
        Direction::UpstreamToDownstream => &meta.downstream_written,
    };
    counter.fetch_add(n, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn byte_conservation_and_pass_through_on_clean_close() {
        let (client_ours, client_proxy_side) = duplex(4096);
        let (upstream_proxy_side, upstream_ours) = duplex(4096);

        let meta = ConnectionMeta::new("l".into(), "r".into());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(copy_bidirectional(
            client_proxy_side,
            upstream_proxy_side,
            meta.clone(),
            cancel,
        ));

        let (mut client_ours, mut upstream_ours) = (client_ours, upstream_ours);
        client_ours.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream_ours.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream_ours.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client_ours.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client_ours);
        drop(upstream_ours);
        let _ = handle.await;

        assert_eq!(
            meta.downstream_read.load(Ordering::Relaxed),
            meta.upstream_written.load(Ordering::Relaxed)
        );
        assert_eq!(
            meta.upstream_read.load(Ordering::Relaxed),
            meta.downstream_written.load(Ordering::Relaxed)
        );
        assert!(meta.is_finalized());
    }
}
