//! Configuration reconciler (§4.11): turns a `Configuration` into a set of
//! running listeners. Routes are grouped by resolved `host:port`; new groups
//! get a fresh listener, removed groups are cancelled, unchanged groups get
//! their route table swapped through a single-slot channel so in-flight
//! connections keep running against the table they started with.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::accesslog::AccessLogSink;
use crate::config::{Configuration, MiddlewareSpec, Protocol, Route};
use crate::dial::DialOptions;
use crate::error::{GatewayError, Result};
use crate::l4::{is_port_allowed, DialTarget, L4RouteTable};
use crate::l7::{AccessLoggingHandler, HealthEndpoint, L7RouteTable, ReverseProxy, RouteRule, Router};
use crate::lb::LoadBalancer;
use crate::middleware::metrics_labels::MetricsLabels;
use crate::middleware::strip_prefix::StripPathPrefix;
use crate::middleware::wasm::Wasm;
use crate::middleware::{compose_l4, compose_l7, L4Middleware, L4Target, L7Handler, L7Middleware};
use crate::route_match::{priority_score, RouteEntry};
use crate::wasm_host::WasmHost;

/// Process identity surfaced by health-check routes.
pub struct ServiceIdentity {
    pub version: String,
    pub release_id: String,
    pub service_id: String,
}

struct L4ListenerHandle {
    cancel: CancellationToken,
    tx: watch::Sender<Arc<L4RouteTable>>,
}

struct L7ListenerHandle {
    cancel: CancellationToken,
    tx: watch::Sender<Arc<L7RouteTable>>,
}

/// Drives listener lifecycle from successive `Configuration`s (§4.11).
pub struct Reconciler {
    default_l4_bind: String,
    default_l7_bind: String,
    allowed_ports: Vec<u16>,
    wasm_host: WasmHost,
    wasm_enabled: bool,
    identity: ServiceIdentity,
    access_log: Arc<dyn AccessLogSink>,
    shutdown: CancellationToken,

    l4_listeners: Mutex<HashMap<String, L4ListenerHandle>>,
    l7_listeners: Mutex<HashMap<String, L7ListenerHandle>>,
    current: Mutex<Configuration>,
}

impl Reconciler {
    pub fn new(
        default_l4_bind: String,
        default_l7_bind: String,
        allowed_ports: Vec<u16>,
        wasm_host: WasmHost,
        wasm_enabled: bool,
        identity: ServiceIdentity,
        access_log: Arc<dyn AccessLogSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            default_l4_bind,
            default_l7_bind,
            allowed_ports,
            wasm_host,
            wasm_enabled,
            identity,
            access_log,
            shutdown,
            l4_listeners: Mutex::new(HashMap::new()),
            l7_listeners: Mutex::new(HashMap::new()),
            current: Mutex::new(Configuration::default()),
        }
    }

    pub fn current_configuration(&self) -> Configuration {
        self.current.lock().unwrap().clone()
    }

    /// Applies `new_config`, short-circuiting if it's structurally identical
    /// to the last applied one (§4.11: "compares ... via structural
    /// equality"). On failure, attempts to re-apply the prior configuration;
    /// if that also fails, logs a "broken state" error and leaves whatever
    /// listeners successfully transitioned (§4.11 step 5).
    pub async fn apply(&self, new_config: Configuration) -> Result<()> {
        let prior = self.current.lock().unwrap().clone();
        if prior == new_config {
            return Ok(());
        }

        match self.try_apply(&new_config).await {
            Ok(()) => {
                *self.current.lock().unwrap() = new_config;
                Ok(())
            }
            Err(e) => {
                log::error!("configuration reconcile failed: {e}; rolling back");
                match self.try_apply(&prior).await {
                    Ok(()) => {
                        log::warn!("rolled back to the prior configuration after a failed reconcile");
                    }
                    Err(rollback_err) => {
                        log::error!(
                            "rollback also failed ({rollback_err}); process left in a broken state, \
                             continuing with whatever listeners successfully transitioned"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn try_apply(&self, config: &Configuration) -> Result<()> {
        let mut l4_groups: HashMap<String, Vec<&Route>> = HashMap::new();
        let mut l7_groups: HashMap<String, Vec<&Route>> = HashMap::new();

        for route in &config.routes {
            let default = if route.protocol == Protocol::Http {
                &self.default_l7_bind
            } else {
                &self.default_l4_bind
            };
            let key = route.bind_key(default);
            match route.protocol {
                Protocol::Http => l7_groups.entry(key).or_default().push(route),
                Protocol::RawTcp | Protocol::Udp | Protocol::Websocket => {
                    l4_groups.entry(key).or_default().push(route)
                }
            }
        }

        let mut l4_tables = HashMap::new();
        for (key, routes) in &l4_groups {
            l4_tables.insert(key.clone(), Arc::new(self.build_l4_table(routes)?));
        }

        let mut l7_tables = HashMap::new();
        for (key, routes) in &l7_groups {
            l7_tables.insert(key.clone(), Arc::new(self.build_l7_table(routes)?));
        }

        self.reconcile_l4(l4_tables).await?;
        self.reconcile_l7(l7_tables).await?;
        Ok(())
    }

    async fn reconcile_l4(&self, tables: HashMap<String, Arc<L4RouteTable>>) -> Result<()> {
        let stale: Vec<String> = {
            let listeners = self.l4_listeners.lock().unwrap();
            listeners.keys().filter(|k| !tables.contains_key(*k)).cloned().collect()
        };
        for key in stale {
            if let Some(handle) = self.l4_listeners.lock().unwrap().remove(&key) {
                handle.cancel.cancel();
                log::info!("l4 listener {key} removed by reconcile");
            }
        }

        for (key, table) in tables {
            let already_running = self.l4_listeners.lock().unwrap().contains_key(&key);
            if already_running {
                if let Some(handle) = self.l4_listeners.lock().unwrap().get(&key) {
                    let _ = handle.tx.send(table);
                }
                continue;
            }

            if let Some(port) = extract_port(&key) {
                if !is_port_allowed(port, &self.allowed_ports) {
                    log::warn!("skipping l4 listener {key}: port {port} is not in the allowed-ports whitelist");
                    continue;
                }
            }

            let listener = TcpListener::bind(&key).await.map_err(|e| GatewayError::Bind {
                addr: key.clone(),
                source: e,
            })?;
            let (tx, rx) = watch::channel(table);
            let cancel = self.shutdown.child_token();
            let bind_addr = key.clone();
            let run_cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::l4::run_listener(bind_addr, listener, rx, run_cancel).await {
                    log::error!("l4 listener task ended with error: {e}");
                }
            });
            self.l4_listeners
                .lock()
                .unwrap()
                .insert(key, L4ListenerHandle { cancel, tx });
        }
        Ok(())
    }

    async fn reconcile_l7(&self, tables: HashMap<String, Arc<L7RouteTable>>) -> Result<()> {
        let stale: Vec<String> = {
            let listeners = self.l7_listeners.lock().unwrap();
            listeners.keys().filter(|k| !tables.contains_key(*k)).cloned().collect()
        };
        for key in stale {
            if let Some(handle) = self.l7_listeners.lock().unwrap().remove(&key) {
                handle.cancel.cancel();
                log::info!("l7 listener {key} removed by reconcile");
            }
        }

        for (key, table) in tables {
            let already_running = self.l7_listeners.lock().unwrap().contains_key(&key);
            if already_running {
                if let Some(handle) = self.l7_listeners.lock().unwrap().get(&key) {
                    let _ = handle.tx.send(table);
                }
                continue;
            }

            if let Some(port) = extract_port(&key) {
                if !is_port_allowed(port, &self.allowed_ports) {
                    log::warn!("skipping l7 listener {key}: port {port} is not in the allowed-ports whitelist");
                    continue;
                }
            }

            let listener = TcpListener::bind(&key).await.map_err(|e| GatewayError::Bind {
                addr: key.clone(),
                source: e,
            })?;
            let (tx, rx) = watch::channel(table);
            let cancel = self.shutdown.child_token();
            let bind_addr = key.clone();
            let run_cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::l7::run_listener(bind_addr, listener, rx, run_cancel).await {
                    log::error!("l7 listener task ended with error: {e}");
                }
            });
            self.l7_listeners
                .lock()
                .unwrap()
                .insert(key, L7ListenerHandle { cancel, tx });
        }
        Ok(())
    }

    fn build_l4_table(&self, routes: &[&Route]) -> Result<L4RouteTable> {
        let mut entries = Vec::new();
        let mut acme_candidates = Vec::new();

        for route in routes {
            let lb = Arc::new(LoadBalancer::new(route.load_balance_algo, &route.load_balance));
            let dial_options = build_dial_options(route)?;
            let base: Arc<dyn L4Target> = Arc::new(DialTarget {
                route_name: route.name.clone(),
                lb,
                dial_options,
            });
            let middlewares = self.build_l4_middlewares(&route.middlewares)?;
            let target = compose_l4(&middlewares, base);

            if route.allow_acme {
                if let Some(first) = route.load_balance.first() {
                    acme_candidates.push((first.address.clone(), target.clone()));
                }
            }

            entries.push(RouteEntry {
                condition: route.condition.clone(),
                user_weight: route.priority_weight.unwrap_or(1),
                target,
            });
        }

        entries.sort_by_key(|e| std::cmp::Reverse(priority_score(&e.condition, e.user_weight)));
        Ok(L4RouteTable { entries, acme_candidates })
    }

    fn build_l7_table(&self, routes: &[&Route]) -> Result<L7RouteTable> {
        let mut rules = Vec::new();
        for route in routes {
            let lb = Arc::new(LoadBalancer::new(route.load_balance_algo, &route.load_balance));
            let base: Arc<dyn L7Handler> = if route.is_health_endpoint {
                Arc::new(HealthEndpoint {
                    version: self.identity.version.clone(),
                    release_id: self.identity.release_id.clone(),
                    service_id: self.identity.service_id.clone(),
                })
            } else {
                Arc::new(ReverseProxy::new(route.name.clone(), lb))
            };

            let middlewares = self.build_l7_middlewares(&route.middlewares)?;
            let composed = compose_l7(&middlewares, base);
            let logged: Arc<dyn L7Handler> = Arc::new(AccessLoggingHandler {
                route_name: route.name.clone(),
                inner: composed,
                sink: self.access_log.clone(),
            });

            let (host, path, methods, headers, query) = http_rule_fields(route);
            let priority = priority_score(&route.condition, route.priority_weight.unwrap_or(1));

            rules.push(RouteRule {
                route_name: route.name.clone(),
                host,
                path,
                methods,
                headers,
                query,
                priority,
                handler: logged,
            });
        }
        Ok(L7RouteTable { router: Router::new(rules) })
    }

    fn build_l4_middlewares(&self, specs: &[MiddlewareSpec]) -> Result<Vec<Arc<dyn L4Middleware>>> {
        let mut out = Vec::new();
        for spec in specs {
            match spec {
                MiddlewareSpec::MetricsLabels { labels } => {
                    out.push(Arc::new(MetricsLabels { labels: labels.clone() }) as Arc<dyn L4Middleware>);
                }
                MiddlewareSpec::Wasm(wasm_spec) => {
                    if !self.wasm_enabled {
                        log::warn!("skipping wasm middleware {:?}: wasm is disabled", wasm_spec.module);
                        continue;
                    }
                    let instance = Arc::new(self.wasm_host.instantiate(wasm_spec)?);
                    out.push(Arc::new(Wasm { instance, order: wasm_spec.order }) as Arc<dyn L4Middleware>);
                }
                MiddlewareSpec::StripPathPrefix { .. } => {
                    log::warn!("StripPathPrefix is an L7-only middleware; ignoring it on a non-HTTP route");
                }
            }
        }
        Ok(out)
    }

    fn build_l7_middlewares(&self, specs: &[MiddlewareSpec]) -> Result<Vec<Arc<dyn L7Middleware>>> {
        let mut out = Vec::new();
        for spec in specs {
            match spec {
                MiddlewareSpec::StripPathPrefix { prefix } => {
                    out.push(Arc::new(StripPathPrefix { prefix: prefix.clone() }) as Arc<dyn L7Middleware>);
                }
                MiddlewareSpec::Wasm(wasm_spec) => {
                    if !self.wasm_enabled {
                        log::warn!("skipping wasm middleware {:?}: wasm is disabled", wasm_spec.module);
                        continue;
                    }
                    let instance = Arc::new(self.wasm_host.instantiate(wasm_spec)?);
                    out.push(Arc::new(Wasm { instance, order: wasm_spec.order }) as Arc<dyn L7Middleware>);
                }
                MiddlewareSpec::MetricsLabels { .. } => {
                    log::warn!("MetricsLabels is an L4-only middleware; ignoring it on an HTTP route");
                }
            }
        }
        Ok(out)
    }
}

fn build_dial_options(route: &Route) -> Result<DialOptions> {
    let speed = match &route.speed {
        Some(cfg) => cfg.resolve().map_err(GatewayError::Configuration)?,
        None => Default::default(),
    };
    Ok(DialOptions {
        dial_timeout: route.dial_timeout,
        keepalive: route.keepalive,
        proxy_protocol_v1: route.proxy_protocol_version == Some(1),
        speed,
    })
}

fn http_rule_fields(
    route: &Route,
) -> (
    Option<String>,
    Option<crate::config::PathMatch>,
    Vec<String>,
    Vec<crate::config::ValuePredicate>,
    Vec<crate::config::ValuePredicate>,
) {
    match &route.condition {
        crate::config::Condition::Http(h) => (
            h.host.clone(),
            h.path.clone(),
            h.methods.clone(),
            h.headers.clone(),
            h.query.clone(),
        ),
        _ => (None, None, Vec::new(), Vec::new(), Vec::new()),
    }
}

fn extract_port(bind_addr: &str) -> Option<u16> {
    bind_addr.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_port_reads_trailing_segment() {
        assert_eq!(extract_port("0.0.0.0:5700"), Some(5700));
        assert_eq!(extract_port(":5700"), Some(5700));
        assert_eq!(extract_port("not-an-addr"), None);
    }
}
