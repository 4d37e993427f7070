//! Buffered adapter exposing a lookahead window without consuming bytes from
//! the underlying connection (§4.1). Sniffers call `peek`; nothing else
//! downstream of the matcher is allowed to.

use crate::error::{GatewayError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Minimum size bump used each time the buffer must grow to satisfy a
/// `peek(n)` that exceeds what's already buffered.
const GROWTH_STEP: usize = 4096;

/// Wraps an `AsyncRead` stream, buffering bytes read during `peek` so they
/// can be replayed to a later reader (see [`PrefixedConn`]).
pub struct PeekReader<S> {
    inner: S,
    buf: Vec<u8>,
    /// Bytes in `buf[..filled]` are valid; bytes in `buf[consumed..filled]`
    /// have been peeked but not yet delivered to a `read`.
    filled: usize,
    consumed: usize,
}

impl<S: AsyncRead + Unpin> PeekReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            filled: 0,
            consumed: 0,
        }
    }

    /// Returns a view of at least `n` bytes without consuming them. Fails
    /// with `ShortInput` if EOF is reached first.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8]> {
        while self.filled - self.consumed < n {
            if self.buf.len() < self.consumed + n.max(GROWTH_STEP) {
                self.buf.resize(self.consumed + n.max(GROWTH_STEP), 0);
            }
            let read = self
                .inner
                .read(&mut self.buf[self.filled..])
                .await
                .map_err(GatewayError::Stream)?;
            if read == 0 {
                return Err(GatewayError::ShortInput {
                    needed: n,
                    got: self.filled - self.consumed,
                });
            }
            self.filled += read;
        }
        Ok(&self.buf[self.consumed..self.consumed + n])
    }

    /// All bytes peeked but not yet consumed by a `read`.
    pub fn peeked_remainder(&self) -> &[u8] {
        &self.buf[self.consumed..self.filled]
    }

    /// Splits this reader into its remaining buffered prefix and the raw
    /// underlying stream, for handing off to the rate-limited copier as a
    /// "prefixed connection".
    pub fn into_prefixed(self) -> (Vec<u8>, S) {
        (self.buf[self.consumed..self.filled].to_vec(), self.inner)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekReader<S> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        out: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.consumed < self.filled {
            let avail = &self.buf[self.consumed..self.filled];
            let n = avail.len().min(out.remaining());
            out.put_slice(&avail[..n]);
            self.consumed += n;
            return std::task::Poll::Ready(Ok(()));
        }
        let inner = std::pin::Pin::new(&mut self.inner);
        inner.poll_read(cx, out)
    }
}

/// `PeekReader` is the "prefixed connection" itself for the write half: it
/// delegates writes straight through, and reads drain the peeked prefix
/// first. Callers that only have `S: AsyncWrite` need this passthrough to
/// keep treating the wrapped value as a single duplex connection.
impl<S: AsyncWrite + Unpin> AsyncWrite for PeekReader<S> {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn peek_preserves_bytes_for_subsequent_read() {
        let (mut client, server) = duplex(64);
        client.write_all(b"hello world").await.unwrap();
        drop(client);

        let mut reader = PeekReader::new(server);
        let peeked = reader.peek(5).await.unwrap().to_vec();
        assert_eq!(&peeked, b"hello");

        let mut full = Vec::new();
        reader.read_to_end(&mut full).await.unwrap();
        assert_eq!(&full, b"hello world");
    }

    #[tokio::test]
    async fn short_input_on_eof_before_n_bytes() {
        let (client, server) = duplex(64);
        drop(client);
        let mut reader = PeekReader::new(server);
        let err = reader.peek(5).await.unwrap_err();
        assert!(matches!(err, GatewayError::ShortInput { .. }));
    }
}
