//! `StripPathPrefix` (L7, §4.7): removes `prefix` from the URL path before
//! delegating to the inner handler.

use async_trait::async_trait;
use std::sync::Arc;

use super::{HttpRequest, L7Handler, L7Middleware};

pub struct StripPathPrefix {
    pub prefix: String,
}

struct Wrapped {
    prefix: String,
    inner: Arc<dyn L7Handler>,
}

impl L7Middleware for StripPathPrefix {
    fn wrap(self: Arc<Self>, inner: Arc<dyn L7Handler>) -> Arc<dyn L7Handler> {
        Arc::new(Wrapped {
            prefix: self.prefix.clone(),
            inner,
        })
    }
}

#[async_trait]
impl L7Handler for Wrapped {
    async fn handle(&self, mut req: HttpRequest) -> super::HttpResponse {
        let path = req.uri().path();
        let stripped = path.strip_prefix(self.prefix.as_str()).unwrap_or(path);
        let stripped = match stripped {
            "" => "/".to_string(),
            s if s.starts_with('/') => s.to_string(),
            s => format!("/{s}"),
        };
        let stripped = stripped.as_str();

        let mut parts = req.uri().clone().into_parts();
        let path_and_query = match req.uri().query() {
            Some(q) => format!("{stripped}?{q}"),
            None => stripped.to_string(),
        };
        parts.path_and_query = path_and_query.parse().ok();
        if let Ok(new_uri) = http::Uri::from_parts(parts) {
            *req.uri_mut() = new_uri;
        }

        self.inner.handle(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_configured_prefix_and_restores_leading_slash() {
        let prefix = "/httpbin/";
        let path = "/httpbin/get";
        let stripped = path.strip_prefix(prefix).unwrap();
        assert_eq!(format!("/{stripped}"), "/get");
    }
}
