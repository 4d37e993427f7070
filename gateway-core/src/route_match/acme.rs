//! ACME challenge predicate support (§4.3, §4.5 scenario S4): given a
//! sniffed SNI ending in `.acme.invalid`, probe every candidate address
//! with a TLS handshake and return the first whose leaf certificate's SAN
//! list contains the exact challenge hostname. Outstanding probes are
//! cancelled (dropped) once a winner is found.

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use std::time::Duration;
use tokio::net::TcpStream;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns the first candidate address whose certificate's SAN list
/// contains `hostname`, racing all probes concurrently.
pub async fn probe_acme_targets(candidates: &[String], hostname: &str) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }

    let mut set = tokio::task::JoinSet::new();
    for addr in candidates {
        let addr = addr.clone();
        let hostname = hostname.to_string();
        set.spawn(async move {
            let ok = probe_one(&addr, &hostname).await;
            (addr, ok)
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Ok((addr, true)) = joined {
            set.abort_all();
            return Some(addr);
        }
    }
    None
}

async fn probe_one(addr: &str, hostname: &str) -> bool {
    let fut = async move {
        let tcp = TcpStream::connect(addr).await.ok()?;
        let mut builder = SslConnector::builder(SslMethod::tls()).ok()?;
        builder.set_verify(SslVerifyMode::NONE);
        let connector = builder.build();
        let config = connector.configure().ok()?;
        let ssl = config.into_ssl(hostname).ok()?;
        let mut stream = tokio_openssl::SslStream::new(ssl, tcp).ok()?;
        std::pin::Pin::new(&mut stream).connect().await.ok()?;
        let cert = stream.ssl().peer_certificate()?;
        Some(certificate_matches_hostname(&cert, hostname))
    };

    match tokio::time::timeout(PROBE_TIMEOUT, fut).await {
        Ok(Some(matched)) => matched,
        _ => false,
    }
}

fn certificate_matches_hostname(cert: &X509, hostname: &str) -> bool {
    match cert.subject_alt_names() {
        Some(sans) => sans
            .iter()
            .filter_map(|n| n.dnsname())
            .any(|dns| dns.eq_ignore_ascii_case(hostname)),
        None => false,
    }
}

pub fn is_acme_challenge_sni(sni: &str) -> bool {
    sni.ends_with(".acme.invalid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_acme_invalid_suffix() {
        assert!(is_acme_challenge_sni("example.com.acme.invalid"));
        assert!(!is_acme_challenge_sni("example.com"));
    }

    #[tokio::test]
    async fn empty_candidates_yield_no_winner() {
        assert_eq!(probe_acme_targets(&[], "x.acme.invalid").await, None);
    }
}
