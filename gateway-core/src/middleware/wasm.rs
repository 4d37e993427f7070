//! `Wasm` middleware (§4.7, §4.10): runs a guest plugin's hooks before
//! (`order: pre`) or after (`order: post`) the inner target/handler. At L7
//! the guest can observe and rewrite request/response headers; at L4 it can
//! only observe connection lifecycle (no guest byte-stream rewriting — the
//! upstream project's own wasm host is HTTP-only, so this is a deliberate
//! simplification rather than a dropped feature, recorded in DESIGN.md).

use async_trait::async_trait;
use std::sync::Arc;

use super::{HttpRequest, L4Context, L4Middleware, L4Target, L7Handler, L7Middleware};
use crate::config::WasmInvokeOrder;
use crate::wasm_host::PluginInstance;

pub struct Wasm {
    pub instance: Arc<PluginInstance>,
    pub order: WasmInvokeOrder,
}

struct L4Wrapped {
    instance: Arc<PluginInstance>,
    order: WasmInvokeOrder,
    inner: Arc<dyn L4Target>,
}

impl L4Middleware for Wasm {
    fn wrap(self: Arc<Self>, inner: Arc<dyn L4Target>) -> Arc<dyn L4Target> {
        Arc::new(L4Wrapped {
            instance: self.instance.clone(),
            order: self.order,
            inner,
        })
    }
}

#[async_trait]
impl L4Target for L4Wrapped {
    async fn handle(&self, ctx: L4Context) {
        let instance = self.instance.clone();
        let context_id = {
            let instance = instance.clone();
            tokio::task::spawn_blocking(move || instance.create_context())
                .await
                .unwrap_or(0)
        };

        // No byte-stream hook is wired for L4 yet (see module docs), so
        // `order` only affects whether the context exists before or after
        // the connection's own lifetime — either way the guest only
        // observes connection start/end, never stream contents.
        self.inner.handle(ctx).await;

        let instance = self.instance.clone();
        let _ = tokio::task::spawn_blocking(move || instance.finalize_context(context_id)).await;
    }
}

struct L7Wrapped {
    instance: Arc<PluginInstance>,
    order: WasmInvokeOrder,
    inner: Arc<dyn L7Handler>,
}

impl L7Middleware for Wasm {
    fn wrap(self: Arc<Self>, inner: Arc<dyn L7Handler>) -> Arc<dyn L7Handler> {
        Arc::new(L7Wrapped {
            instance: self.instance.clone(),
            order: self.order,
            inner,
        })
    }
}

fn header_pairs(req: &HttpRequest) -> Vec<(String, String)> {
    req.headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

fn apply_request_header_mutations(req: &mut HttpRequest, pairs: Vec<(String, String)>) {
    let headers = req.headers_mut();
    headers.clear();
    for (k, v) in pairs {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(k.as_str()),
            http::header::HeaderValue::try_from(v.as_str()),
        ) {
            headers.append(name, value);
        }
    }
}

#[async_trait]
impl L7Handler for L7Wrapped {
    async fn handle(&self, mut req: HttpRequest) -> super::HttpResponse {
        let instance = self.instance.clone();
        let context_id = tokio::task::spawn_blocking({
            let instance = instance.clone();
            move || instance.create_context()
        })
        .await
        .unwrap_or(0);

        if matches!(self.order, WasmInvokeOrder::Pre) {
            let pairs = header_pairs(&req);
            let instance = instance.clone();
            let rewritten = tokio::task::spawn_blocking(move || {
                instance.set_request_headers(context_id, pairs);
                instance.request_headers(context_id)
            })
            .await
            .unwrap_or_default();
            if !rewritten.is_empty() {
                apply_request_header_mutations(&mut req, rewritten);
            }
        }

        let mut response = self.inner.handle(req).await;

        if matches!(self.order, WasmInvokeOrder::Post) {
            let pairs: Vec<(String, String)> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    v.to_str()
                        .ok()
                        .map(|v| (k.as_str().to_string(), v.to_string()))
                })
                .collect();
            let instance = instance.clone();
            let rewritten = tokio::task::spawn_blocking(move || {
                instance.set_response_headers(context_id, pairs);
                instance.response_headers(context_id)
            })
            .await
            .unwrap_or_default();
            if !rewritten.is_empty() {
                let headers = response.headers_mut();
                headers.clear();
                for (k, v) in rewritten {
                    if let (Ok(name), Ok(value)) = (
                        http::header::HeaderName::try_from(k.as_str()),
                        http::header::HeaderValue::try_from(v.as_str()),
                    ) {
                        headers.append(name, value);
                    }
                }
            }
        }

        let instance = self.instance.clone();
        let _ = tokio::task::spawn_blocking(move || instance.finalize_context(context_id)).await;

        response
    }
}
