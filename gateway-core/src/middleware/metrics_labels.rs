//! `MetricsLabels` (L4, §4.7): injects a fixed label map into the
//! connection's meta labels before the inner target runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{L4Context, L4Middleware, L4Target};

pub struct MetricsLabels {
    pub labels: HashMap<String, String>,
}

struct Wrapped {
    labels: HashMap<String, String>,
    inner: Arc<dyn L4Target>,
}

impl L4Middleware for MetricsLabels {
    fn wrap(self: Arc<Self>, inner: Arc<dyn L4Target>) -> Arc<dyn L4Target> {
        Arc::new(Wrapped {
            labels: self.labels.clone(),
            inner,
        })
    }
}

#[async_trait]
impl L4Target for Wrapped {
    async fn handle(&self, ctx: L4Context) {
        ctx.meta.merge_labels(&self.labels);
        self.inner.handle(ctx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ConnectionMeta;
    use tokio::io::duplex;
    use tokio_util::sync::CancellationToken;

    struct Probe(std::sync::Arc<std::sync::atomic::AtomicBool>);

    #[async_trait]
    impl L4Target for Probe {
        async fn handle(&self, ctx: L4Context) {
            assert_eq!(
                ctx.meta.labels.lock().unwrap().get("env").map(String::as_str),
                Some("prod")
            );
            self.0.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn injects_labels_before_delegating() {
        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let probe: Arc<dyn L4Target> = Arc::new(Probe(called.clone()));
        let mut labels = HashMap::new();
        labels.insert("env".to_string(), "prod".to_string());
        let mw = Arc::new(MetricsLabels { labels });
        let composed = mw.wrap(probe);

        let (a, _b) = duplex(8);
        let meta = ConnectionMeta::new("l".into(), "r".into());
        let ctx = L4Context {
            meta,
            conn: Box::new(a),
            client_local_addr: "127.0.0.1:1".parse().unwrap(),
            client_remote_addr: "127.0.0.1:2".parse().unwrap(),
            cancel: CancellationToken::new(),
        };
        composed.handle(ctx).await;
        assert!(called.load(std::sync::atomic::Ordering::Relaxed));
    }
}
