//! Predicate evaluation against a peeked connection (§4.3). `All`/`Any`/`Not`
//! compose boolean matches; `Acme` is special-cased at the top level of
//! [`match_route`] since a winning probe resolves to a *different* route's
//! target than the one whose condition matched.

use crate::config::Condition;
use crate::meta::ConnectionMeta;
use crate::peek::PeekReader;
use crate::sniff::{sniff_dtls_sni, sniff_http_host, sniff_tls_sni};
use tokio::io::AsyncRead;

use super::acme::{is_acme_challenge_sni, probe_acme_targets};

/// A 4 KiB peek window is ample for any of the three sniffers; HTTP uses it
/// directly (§4.2), TLS/DTLS parse well inside it for ordinary ClientHellos.
const PEEK_WINDOW: usize = 4096;

pub struct RouteEntry<T> {
    pub condition: Condition,
    pub user_weight: u32,
    pub target: T,
}

pub enum MatchOutcome<'a, T> {
    Matched {
        target: &'a T,
        server_name: Option<String>,
    },
    NoMatch,
}

/// Tries `routes` in order against the peeked connection; the first match
/// wins. `acme_candidates` are `(address, target)` pairs probed when an
/// `Acme` condition's SNI suffix matches.
pub async fn match_route<'a, S, T>(
    routes: &'a [RouteEntry<T>],
    peek: &mut PeekReader<S>,
    meta: &ConnectionMeta,
    acme_candidates: &'a [(String, T)],
) -> MatchOutcome<'a, T>
where
    S: AsyncRead + Unpin + Send,
{
    for entry in routes {
        if let Condition::Acme = entry.condition {
            if let Some(sni) = peeked_tls_or_dtls_sni(peek).await {
                if is_acme_challenge_sni(&sni) {
                    if let Some(winner) =
                        probe_acme_targets(&addresses(acme_candidates), &sni).await
                    {
                        if let Some((_, target)) =
                            acme_candidates.iter().find(|(addr, _)| *addr == winner)
                        {
                            meta.acme.store(true, std::sync::atomic::Ordering::Relaxed);
                            meta.set_server_name(sni.clone());
                            return MatchOutcome::Matched {
                                target,
                                server_name: Some(sni),
                            };
                        }
                    }
                }
            }
            continue;
        }

        if let Some(name) = eval_bool(&entry.condition, peek).await {
            if let Some(ref n) = name {
                meta.set_server_name(n.clone());
            }
            if matches!(entry.condition, Condition::Fixed) {
                meta.fixed.store(true, std::sync::atomic::Ordering::Relaxed);
            }
            return MatchOutcome::Matched {
                target: &entry.target,
                server_name: name,
            };
        }
    }
    meta.no_match.store(true, std::sync::atomic::Ordering::Relaxed);
    MatchOutcome::NoMatch
}

fn addresses<T>(candidates: &[(String, T)]) -> Vec<String> {
    candidates.iter().map(|(a, _)| a.clone()).collect()
}

/// Evaluates a condition to `Some(observed_name)` on match (name may be
/// `None` for conditions that don't observe one, e.g. `Fixed`), `None` on
/// no-match. A nested `Acme` leaf (unusual; the spec models it as a
/// top-level route predicate) degrades to a boolean suffix check with no
/// probing, since resolving its target requires the candidate list that
/// only [`match_route`] has in scope.
fn eval_bool<'a, S>(
    condition: &'a Condition,
    peek: &'a mut PeekReader<S>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<Option<String>>> + 'a + Send>>
where
    S: AsyncRead + Unpin + Send,
{
    Box::pin(async move {
        match condition {
            Condition::Fixed => Some(None),
            Condition::Sni { equals } => {
                let sni = peeked_tls_or_dtls_sni(peek).await?;
                (sni == *equals).then_some(Some(sni))
            }
            Condition::Acme => {
                let sni = peeked_tls_or_dtls_sni(peek).await?;
                is_acme_challenge_sni(&sni).then_some(Some(sni))
            }
            Condition::Http(http_cond) => {
                let host = peeked_http_host(peek).await?;
                match &http_cond.host {
                    Some(expect) if *expect == host => Some(Some(host)),
                    Some(_) => None,
                    None => Some(Some(host)),
                }
            }
            Condition::Tcp(_) => Some(None),
            Condition::All(children) => {
                let mut last_name = None;
                for child in children {
                    match eval_bool(child, peek).await {
                        Some(name) => last_name = name.or(last_name),
                        None => return None,
                    }
                }
                Some(last_name)
            }
            Condition::Any(children) => {
                for child in children {
                    if let Some(name) = eval_bool(child, peek).await {
                        return Some(name);
                    }
                }
                None
            }
            Condition::Not(inner) => {
                if eval_bool(inner, peek).await.is_some() {
                    None
                } else {
                    Some(None)
                }
            }
        }
    })
}

async fn peeked_tls_or_dtls_sni<S: AsyncRead + Unpin>(peek: &mut PeekReader<S>) -> Option<String> {
    let window = peek.peek(PEEK_WINDOW).await.ok()?.to_vec();
    sniff_tls_sni(&window).or_else(|| sniff_dtls_sni(&window))
}

async fn peeked_http_host<S: AsyncRead + Unpin>(peek: &mut PeekReader<S>) -> Option<String> {
    let window = peek.peek(PEEK_WINDOW).await.ok()?.to_vec();
    sniff_http_host(&window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn fixed_always_matches_and_sets_meta_flag() {
        let (mut client, server) = duplex(64);
        client.write_all(b"hello").await.unwrap();
        let mut peek = PeekReader::new(server);
        let meta = ConnectionMeta::new("l".into(), "r".into());
        let routes = vec![RouteEntry {
            condition: Condition::Fixed,
            user_weight: 1,
            target: "upstream-a",
        }];
        let outcome = match_route(&routes, &mut peek, &meta, &[]).await;
        assert!(matches!(outcome, MatchOutcome::Matched { target: &"upstream-a", .. }));
        assert!(meta.fixed.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[tokio::test]
    async fn first_match_wins_over_later_predicates() {
        let (mut client, server) = duplex(64);
        client.write_all(b"anything").await.unwrap();
        let mut peek = PeekReader::new(server);
        let meta = ConnectionMeta::new("l".into(), "r".into());
        let routes = vec![
            RouteEntry {
                condition: Condition::Fixed,
                user_weight: 1,
                target: "first",
            },
            RouteEntry {
                condition: Condition::Fixed,
                user_weight: 1,
                target: "second",
            },
        ];
        let outcome = match_route(&routes, &mut peek, &meta, &[]).await;
        assert!(matches!(outcome, MatchOutcome::Matched { target: &"first", .. }));
    }

    #[tokio::test]
    async fn no_route_matches_sets_no_match_flag() {
        let (_client, server) = duplex(64);
        let mut peek = PeekReader::new(server);
        let meta = ConnectionMeta::new("l".into(), "r".into());
        let routes: Vec<RouteEntry<&str>> = vec![RouteEntry {
            condition: Condition::Sni {
                equals: "only-this.example".into(),
            },
            user_weight: 1,
            target: "x",
        }];
        // No bytes ever arrive, sniff fails -> no match; but peek(4096) would
        // hang waiting for EOF on an open duplex. Drop the writer instead.
        drop(_client);
        let outcome = match_route(&routes, &mut peek, &meta, &[]).await;
        assert!(matches!(outcome, MatchOutcome::NoMatch));
        assert!(meta.no_match.load(std::sync::atomic::Ordering::Relaxed));
    }
}
