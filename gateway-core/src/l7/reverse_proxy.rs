//! The reverse-proxy director (§4.9): picks a target via the load balancer,
//! rewrites scheme/host/path/query, and forwards the request with a plain
//! `hyper-util` client. TLS to the upstream is out of scope here (the L4
//! layer handles TLS termination/passthrough); this director speaks h1
//! plaintext to upstreams, matching the teacher's own TCP-proxy posture of
//! not re-terminating TLS twice.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use url::Url;

use crate::lb::LoadBalancer;
use crate::middleware::{BoxBody, HttpRequest, HttpResponse, L7Handler};

pub struct ReverseProxy {
    pub route_name: String,
    pub lb: Arc<LoadBalancer>,
    client: Client<HttpConnector, hyper::body::Incoming>,
}

impl ReverseProxy {
    pub fn new(route_name: String, lb: Arc<LoadBalancer>) -> Self {
        Self {
            route_name,
            lb,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }
}

/// Joins a base path and a request path with single-slash policy: exactly
/// one `/` ends up between them regardless of how many either side has.
pub fn join_paths(base: &str, request_path: &str) -> String {
    let base_trimmed = base.trim_end_matches('/');
    let request_trimmed = request_path.trim_start_matches('/');
    if base_trimmed.is_empty() {
        format!("/{request_trimmed}")
    } else {
        format!("{base_trimmed}/{request_trimmed}")
    }
}

/// Concatenates two query strings with `&`, skipping empty ones.
pub fn join_queries(base: Option<&str>, request: Option<&str>) -> Option<String> {
    match (base.filter(|s| !s.is_empty()), request.filter(|s| !s.is_empty())) {
        (Some(b), Some(r)) => Some(format!("{b}&{r}")),
        (Some(b), None) => Some(b.to_string()),
        (None, Some(r)) => Some(r.to_string()),
        (None, None) => None,
    }
}

/// Splits an upstream address into scheme, host:port authority, base path,
/// and base query the way the original director's `url.Parse(w.Addr.Address)`
/// does: a scheme is only recognized when followed by `://` (so a bare
/// hostname containing dots before a port, e.g. `api.internal:8443`, is
/// never mistaken for a scheme); scheme defaults to `http` when absent.
fn split_upstream_addr(upstream_addr: &str) -> (String, String, String, Option<String>) {
    if let Ok(parsed) = Url::parse(upstream_addr) {
        if let Some(host) = parsed.host_str() {
            let authority = match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            let query = parsed.query().filter(|q| !q.is_empty()).map(str::to_string);
            return (parsed.scheme().to_string(), authority, parsed.path().to_string(), query);
        }
    }
    let (host, base_path) = match upstream_addr.split_once('/') {
        Some((host, rest)) => (host.to_string(), format!("/{rest}")),
        None => (upstream_addr.to_string(), String::new()),
    };
    ("http".to_string(), host, base_path, None)
}

fn rewrite_uri(req_uri: &http::Uri, upstream_addr: &str) -> http::Uri {
    let (scheme, upstream_host, base_path, base_query) = split_upstream_addr(upstream_addr);
    let path = join_paths(&base_path, req_uri.path());
    let query = join_queries(base_query.as_deref(), req_uri.query());
    let path_and_query = match query {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };
    http::Uri::builder()
        .scheme(scheme.as_str())
        .authority(upstream_host)
        .path_and_query(path_and_query)
        .build()
        .unwrap_or_else(|_| req_uri.clone())
}

#[async_trait]
impl L7Handler for ReverseProxy {
    async fn handle(&self, mut req: HttpRequest) -> HttpResponse {
        let Some(target) = self.lb.pick() else {
            return service_unavailable();
        };

        *req.uri_mut() = rewrite_uri(req.uri(), &target.address);
        if !req.headers().contains_key(http::header::USER_AGENT) {
            req.headers_mut().insert(
                http::header::USER_AGENT,
                http::HeaderValue::from_static(""),
            );
        }

        match self.client.request(req).await {
            Ok(resp) => {
                let (parts, body) = resp.into_parts();
                HttpResponse::from_parts(parts, swallow_errors(body))
            }
            Err(e) => {
                log::warn!("upstream error for route {}: {e}", self.route_name);
                bad_gateway()
            }
        }
    }
}

fn service_unavailable() -> HttpResponse {
    http::Response::builder()
        .status(http::StatusCode::SERVICE_UNAVAILABLE)
        .body(empty_body())
        .unwrap()
}

fn bad_gateway() -> HttpResponse {
    http::Response::builder()
        .status(http::StatusCode::BAD_GATEWAY)
        .body(empty_body())
        .unwrap()
}

pub fn empty_body() -> BoxBody {
    http_body_util::Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Adapts a body whose error type isn't `Infallible` (e.g. `hyper::Error`)
/// into `BoxBody` by ending the stream and logging on the first error,
/// rather than propagating a type we have no representation for.
struct SwallowErrors<B>(B);

impl<B> hyper::body::Body for SwallowErrors<B>
where
    B: hyper::body::Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<hyper::body::Frame<Bytes>, Infallible>>> {
        match Pin::new(&mut self.0).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(Some(Err(e))) => {
                log::warn!("dropping body stream after error: {e}");
                Poll::Ready(None)
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn swallow_errors(body: hyper::body::Incoming) -> BoxBody {
    BodyExt::boxed(SwallowErrors(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_paths_uses_exactly_one_slash() {
        assert_eq!(join_paths("/httpbin/", "/get"), "/httpbin/get");
        assert_eq!(join_paths("/httpbin", "get"), "/httpbin/get");
        assert_eq!(join_paths("", "/get"), "/get");
    }

    #[test]
    fn join_queries_concatenates_with_ampersand() {
        assert_eq!(join_queries(Some("a=1"), Some("b=2")).as_deref(), Some("a=1&b=2"));
        assert_eq!(join_queries(None, Some("b=2")).as_deref(), Some("b=2"));
        assert_eq!(join_queries(None, None), None);
    }

    #[test]
    fn bare_host_port_defaults_to_http() {
        let uri: http::Uri = "/get".parse().unwrap();
        let rewritten = rewrite_uri(&uri, "127.0.0.1:8080");
        assert_eq!(rewritten.scheme_str(), Some("http"));
        assert_eq!(rewritten.authority().unwrap().as_str(), "127.0.0.1:8080");
        assert_eq!(rewritten.path(), "/get");
    }

    #[test]
    fn scheme_qualified_upstream_keeps_its_scheme_and_base_path() {
        let uri: http::Uri = "/get".parse().unwrap();
        let rewritten = rewrite_uri(&uri, "https://api.internal:8443/base");
        assert_eq!(rewritten.scheme_str(), Some("https"));
        assert_eq!(rewritten.authority().unwrap().as_str(), "api.internal:8443");
        assert_eq!(rewritten.path(), "/base/get");
    }

    #[test]
    fn hostname_with_dots_and_no_scheme_is_not_mistaken_for_one() {
        let uri: http::Uri = "/get".parse().unwrap();
        let rewritten = rewrite_uri(&uri, "api.internal:8443/base");
        assert_eq!(rewritten.scheme_str(), Some("http"));
        assert_eq!(rewritten.authority().unwrap().as_str(), "api.internal:8443");
        assert_eq!(rewritten.path(), "/base/get");
    }
}
