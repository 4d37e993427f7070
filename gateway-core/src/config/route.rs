//! Route/Configuration data model and its JSON wire shape.
//!
//! The JSON shapes mirror the upstream project's route files one-for-one:
//! `Condition` is a recursive predicate tree (`all`/`any`/`not` combinators
//! over `fixed`/`sni`/`acme`/`tcp`/`http` leaves) rather than two separate
//! "Condition" and "Rule" types, since the upstream's own leaf kinds (`tcp`,
//! `http`) are shared between both names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::duration::opt_duration_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    RawTcp,
    Http,
    Udp,
    Websocket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadBalanceAlgo {
    RoundRobinWeighted,
    SmoothWeighted,
    RandomWeighted,
}

impl Default for LoadBalanceAlgo {
    fn default() -> Self {
        LoadBalanceAlgo::RoundRobinWeighted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedAddr {
    pub address: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub metric_labels: HashMap<String, String>,
}

fn default_network() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PathMatch {
    Prefix(String),
    Exact(String),
    Regexp(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuePredicate {
    pub name: String,
    #[serde(rename = "type")]
    pub match_type: ValueMatchKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueMatchKind {
    Exact,
    RegularExpression,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCondition {
    pub host: Option<String>,
    pub path: Option<PathMatch>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub headers: Vec<ValuePredicate>,
    #[serde(default)]
    pub query: Vec<ValuePredicate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpCondition {
    pub port: Option<u16>,
    pub port_range: Option<(u16, u16)>,
}

/// Recursive route predicate tree. Covers both the "Condition" leaves
/// (`sni`, `fixed`, `http`) and the "Rule" combinators (`all`, `any`, `not`,
/// `tcp`, `http`) of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Condition {
    Fixed,
    Sni { equals: String },
    Acme,
    Tcp(TcpCondition),
    Http(HttpCondition),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MiddlewareSpec {
    StripPathPrefix { prefix: String },
    MetricsLabels { labels: HashMap<String, String> },
    Wasm(WasmMiddlewareSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WasmMiddlewareSpec {
    pub module: String,
    #[serde(default)]
    pub abi: WasmAbiVersion,
    #[serde(default)]
    pub order: WasmInvokeOrder,
    #[serde(default)]
    pub argv: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub preopens: Vec<String>,
    #[serde(default)]
    pub inherit_stdio: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WasmAbiVersion {
    V1,
    V2,
}

impl Default for WasmAbiVersion {
    fn default() -> Self {
        WasmAbiVersion::V2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WasmInvokeOrder {
    Pre,
    Post,
}

impl Default for WasmInvokeOrder {
    fn default() -> Self {
        WasmInvokeOrder::Pre
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeedConfig {
    /// Byte/sec cap on reads from the client (upload cap). `None` = unlimited.
    pub downstream: Option<String>,
    /// Byte/sec cap on reads from the upstream (download cap). `None` = unlimited.
    pub upstream: Option<String>,
}

impl SpeedConfig {
    pub fn resolve(&self) -> Result<crate::meta::SpeedCaps, String> {
        let downstream = match &self.downstream {
            Some(s) => super::size::parse_rate_bytes_per_sec(s)?,
            None => 0.0,
        };
        let upstream = match &self.upstream {
            Some(s) => super::size::parse_rate_bytes_per_sec(s)?,
            None => 0.0,
        };
        Ok(crate::meta::SpeedCaps {
            downstream_bytes_per_sec: downstream,
            upstream_bytes_per_sec: upstream,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub bind: Option<String>,
    pub condition: Condition,
    #[serde(default)]
    pub load_balance_algo: LoadBalanceAlgo,
    #[serde(default)]
    pub load_balance: Vec<WeightedAddr>,
    #[serde(default)]
    pub middlewares: Vec<MiddlewareSpec>,
    #[serde(default, with = "opt_duration_string")]
    pub dial_timeout: Option<Duration>,
    #[serde(default, with = "opt_duration_string")]
    pub keepalive: Option<Duration>,
    #[serde(default)]
    pub speed: Option<SpeedConfig>,
    #[serde(default)]
    pub metrics_labels: HashMap<String, String>,
    #[serde(default)]
    pub allow_acme: bool,
    #[serde(default)]
    pub is_health_endpoint: bool,
    #[serde(default)]
    pub proxy_protocol_version: Option<u8>,
    #[serde(default)]
    pub priority_weight: Option<u32>,
}

impl Route {
    /// `bind` remapped: the literal key `"dream"` (taken from the upstream
    /// project's `defaultIPPort` constant) means "use the process-wide
    /// default listener address".
    pub fn bind_key(&self, default_bind: &str) -> String {
        match self.bind.as_deref() {
            None | Some("dream") => default_bind.to_string(),
            Some(b) => b.to_string(),
        }
    }
}

/// Ordered list of routes; names are unique within a configuration. Replaced
/// atomically; Post/Delete express partial updates at the RPC layer, not
/// here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    pub routes: Vec<Route>,
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.protocol == other.protocol
            && self.bind == other.bind
            && self.condition == other.condition
            && self.load_balance_algo == other.load_balance_algo
            && self.load_balance == other.load_balance
            && self.middlewares == other.middlewares
            && self.dial_timeout == other.dial_timeout
            && self.keepalive == other.keepalive
            && self.metrics_labels == other.metrics_labels
            && self.allow_acme == other.allow_acme
            && self.is_health_endpoint == other.is_health_endpoint
            && self.proxy_protocol_version == other.proxy_protocol_version
            && self.priority_weight == other.priority_weight
            && self.speed == other.speed
    }
}
impl Eq for Route {}

impl Configuration {
    pub fn route_by_name(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name == name)
    }

    /// `Post` semantics: replace routes with matching names in place, append
    /// the rest.
    pub fn merge(&mut self, incoming: Vec<Route>) {
        for route in incoming {
            if let Some(slot) = self.routes.iter_mut().find(|r| r.name == route.name) {
                *slot = route;
            } else {
                self.routes.push(route);
            }
        }
    }

    /// `Delete` semantics: remove routes by name.
    pub fn delete(&mut self, names: &[String]) {
        self.routes.retain(|r| !names.contains(&r.name));
    }
}
