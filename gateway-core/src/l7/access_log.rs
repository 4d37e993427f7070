//! Access-log wrapper (§4.9): an `L7Handler` middleware that times the
//! inner handler and submits a synthesized `AccessLogEntry` to the
//! configured sink once the response is ready.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use hyper::body::Body;

use crate::accesslog::{AccessLogEntry, AccessLogSink};
use crate::middleware::{HttpRequest, HttpResponse, L7Handler};

pub struct AccessLoggingHandler {
    pub route_name: String,
    pub inner: Arc<dyn L7Handler>,
    pub sink: Arc<dyn AccessLogSink>,
}

#[async_trait]
impl L7Handler for AccessLoggingHandler {
    async fn handle(&self, req: HttpRequest) -> HttpResponse {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let user_agent = req
            .headers()
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let remote_addr = req
            .extensions()
            .get::<std::net::SocketAddr>()
            .map(|a| a.to_string())
            .unwrap_or_default();

        let start = Instant::now();
        let resp = self.inner.handle(req).await;
        // The handler returns headers and body together, so we can't observe
        // a true time-to-first-byte here; it's reported equal to the total
        // handler duration, which is the best approximation available
        // without a streaming response API.
        let duration = start.elapsed();
        let time_to_write_headers = duration;

        let bytes_written = resp.body().size_hint().exact().unwrap_or(0);
        let status = resp.status().as_u16();

        self.sink.submit(AccessLogEntry {
            route_name: self.route_name.clone(),
            method,
            path,
            status,
            bytes_written,
            duration,
            time_to_write_headers,
            user_agent,
            remote_addr,
        });

        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accesslog::RingAccessLog;

    // `HttpRequest` is `http::Request<hyper::body::Incoming>`, and
    // `Incoming` has no public constructor outside of a live connection, so
    // this handler is exercised end-to-end through the serving loop rather
    // than with a hand-built request here.
    #[test]
    fn sink_starts_empty() {
        let sink = RingAccessLog::new(4);
        assert!(sink.is_empty());
    }
}
