//! Host:port-grouped HTTP router (§4.9): an immutable tree of route rules,
//! rebuilt wholesale on every configuration change and published through a
//! single-slot channel the serving wrapper reads per request.

use std::sync::Arc;

use regex::Regex;

use crate::config::{Condition, HttpCondition, PathMatch, ValueMatchKind, ValuePredicate};
use crate::middleware::{HttpRequest, L7Handler};
use crate::route_match::priority_score;

pub struct RouteRule {
    pub route_name: String,
    pub host: Option<String>,
    pub path: Option<PathMatch>,
    pub methods: Vec<String>,
    pub headers: Vec<ValuePredicate>,
    pub query: Vec<ValuePredicate>,
    pub priority: i64,
    pub handler: Arc<dyn L7Handler>,
}

impl RouteRule {
    fn matches(&self, req: &HttpRequest) -> bool {
        if let Some(expect_host) = &self.host {
            let actual = req
                .headers()
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if actual != expect_host {
                return false;
            }
        }
        if !self.methods.is_empty()
            && !self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(req.method().as_str()))
        {
            return false;
        }
        if let Some(path_match) = &self.path {
            if !path_matches(path_match, req.uri().path()) {
                return false;
            }
        }
        if !self.headers.iter().all(|vp| header_matches(vp, req)) {
            return false;
        }
        if !self.query.iter().all(|vp| query_matches(vp, req)) {
            return false;
        }
        true
    }
}

fn path_matches(m: &PathMatch, path: &str) -> bool {
    match m {
        PathMatch::Prefix(p) => path.starts_with(p.as_str()),
        PathMatch::Exact(p) => path == p,
        // Open Question (b) resolved in SPEC_FULL.md: HTTP path regexps are
        // anchored, so a bare user pattern is wrapped in `^(?:...)$`.
        PathMatch::Regexp(p) => Regex::new(&format!("^(?:{p})$"))
            .map(|re| re.is_match(path))
            .unwrap_or(false),
    }
}

fn value_matches(predicate: &ValuePredicate, actual: Option<&str>) -> bool {
    let Some(actual) = actual else { return false };
    match predicate.match_type {
        ValueMatchKind::Exact => actual == predicate.value,
        ValueMatchKind::RegularExpression => Regex::new(&predicate.value)
            .map(|re| re.is_match(actual))
            .unwrap_or(false),
    }
}

fn header_matches(predicate: &ValuePredicate, req: &HttpRequest) -> bool {
    value_matches(
        predicate,
        req.headers()
            .get(predicate.name.as_str())
            .and_then(|v| v.to_str().ok()),
    )
}

fn query_matches(predicate: &ValuePredicate, req: &HttpRequest) -> bool {
    let query = req.uri().query().unwrap_or("");
    let actual = url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == predicate.name.as_str())
        .map(|(_, v)| v.into_owned());
    value_matches(predicate, actual.as_deref())
}

/// Immutable, priority-sorted route table for one `host:port` listener.
pub struct Router {
    rules: Vec<RouteRule>,
}

impl Router {
    /// Sorts by descending priority, a stable sort so ties keep insertion
    /// order (§4.3).
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    pub fn route(&self, req: &HttpRequest) -> Option<&RouteRule> {
        self.rules.iter().find(|r| r.matches(req))
    }

    pub fn route_count(&self) -> usize {
        self.rules.len()
    }
}

/// Computes an HTTP route's priority with the same scoring function the L4
/// matcher uses (§4.3), by reconstructing the `Condition::Http` leaf the
/// rule was compiled from.
pub fn http_priority(
    host: Option<&str>,
    path: Option<&PathMatch>,
    methods: &[String],
    user_weight: u32,
) -> i64 {
    let condition = Condition::Http(HttpCondition {
        host: host.map(str::to_string),
        path: path.cloned(),
        methods: methods.to_vec(),
        headers: Vec::new(),
        query: Vec::new(),
    });
    priority_score(&condition, user_weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_path_match_requires_full_equality() {
        assert!(path_matches(&PathMatch::Exact("/get".into()), "/get"));
        assert!(!path_matches(&PathMatch::Exact("/get".into()), "/get/x"));
    }

    #[test]
    fn prefix_path_match_allows_suffix() {
        assert!(path_matches(&PathMatch::Prefix("/api/".into()), "/api/users"));
    }

    #[test]
    fn regexp_path_match_is_anchored() {
        assert!(path_matches(&PathMatch::Regexp("/api/.*".into()), "/api/users"));
        assert!(!path_matches(&PathMatch::Regexp("/api".into()), "/api/users"));
    }
}
