//! Per-listener ordered route predicates (§4.3). Predicates are tried in
//! order; the first to accept the connection wins.

pub mod acme;
pub mod predicate;
pub mod priority;

pub use predicate::{match_route, MatchOutcome, RouteEntry};
pub use priority::priority_score;
