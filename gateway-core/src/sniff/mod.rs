//! Pure, non-consuming sniffers: given a peek window, extract TLS SNI, DTLS
//! SNI, or HTTP Host. Every function returns `None` on any parse failure
//! rather than an error — a sniff failure just means "fall through to the
//! next predicate" (§7).

pub mod dtls;
pub mod http;
pub mod tls;

pub use dtls::sniff_dtls_sni;
pub use http::sniff_http_host;
pub use tls::sniff_tls_sni;
