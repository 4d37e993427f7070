//! Predicate priority scoring, taken verbatim from the weights the upstream
//! project's rule-priority table assigns per predicate kind.

use crate::config::Condition;

/// Per-kind base score. `All`/`Any` sum child scores; `Not` negates.
fn base_score(c: &Condition) -> i64 {
    match c {
        Condition::Tcp(tcp) if tcp.port_range.is_some() => 1,
        Condition::Tcp(_) => 0,
        Condition::Sni { .. } => 2,
        Condition::Acme => 2,
        Condition::Http(h) if !h.methods.is_empty() => 3,
        Condition::Http(h) => match &h.path {
            Some(crate::config::PathMatch::Exact(_)) | None => 4,
            Some(crate::config::PathMatch::Prefix(_)) => 5,
            Some(crate::config::PathMatch::Regexp(_)) => 6,
        },
        Condition::Fixed => 4,
        Condition::All(children) => children.iter().map(base_score).sum(),
        Condition::Any(children) => children.iter().map(base_score).sum(),
        Condition::Not(inner) => -base_score(inner),
    }
}

/// `Priority = score(rule) * user_weight`.
pub fn priority_score(condition: &Condition, user_weight: u32) -> i64 {
    base_score(condition) * user_weight.max(1) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpCondition, PathMatch, TcpCondition};

    #[test]
    fn regex_outranks_prefix_outranks_exact() {
        let exact = Condition::Http(HttpCondition {
            path: Some(PathMatch::Exact("/a".into())),
            ..Default::default()
        });
        let prefix = Condition::Http(HttpCondition {
            path: Some(PathMatch::Prefix("/a".into())),
            ..Default::default()
        });
        let regexp = Condition::Http(HttpCondition {
            path: Some(PathMatch::Regexp("/a.*".into())),
            ..Default::default()
        });
        assert!(priority_score(&regexp, 1) > priority_score(&prefix, 1));
        assert!(priority_score(&prefix, 1) > priority_score(&exact, 1));
    }

    #[test]
    fn sni_outranks_port() {
        let sni = Condition::Sni {
            equals: "a.com".into(),
        };
        let port = Condition::Tcp(TcpCondition {
            port: Some(80),
            port_range: None,
        });
        assert!(priority_score(&sni, 1) > priority_score(&port, 1));
    }

    #[test]
    fn weight_scales_score() {
        let sni = Condition::Sni {
            equals: "a.com".into(),
        };
        assert_eq!(priority_score(&sni, 3), priority_score(&sni, 1) * 3);
    }
}
